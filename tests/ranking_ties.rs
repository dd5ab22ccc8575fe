mod test_support;

use serde_json::json;
use test_support::{add_student, seed_school, spawn_sidecar, temp_dir};

fn ranks(table: &serde_json::Value) -> Vec<(serde_json::Value, String)> {
    table["rows"]
        .as_array()
        .expect("rows")
        .iter()
        .map(|r| {
            (
                r["rank"].clone(),
                r["displayName"].as_str().unwrap_or("").to_string(),
            )
        })
        .collect()
}

#[test]
fn tied_students_share_rank_and_next_rank_skips() {
    let workspace = temp_dir("tutord-ranking");
    let mut sc = spawn_sidecar();
    sc.select_workspace(workspace.path());
    let school = seed_school(&mut sc);
    let teacher = school.teacher.user_id.clone();

    let aziza = add_student(&mut sc, &school.admin, "Aziza", "Alimova", "10-A");
    let bobur = add_student(&mut sc, &school.admin, "Bobur", "Boboev", "10-A");
    let chori = add_student(&mut sc, &school.admin, "Chori", "Choriev", "10-A");
    let _dilya = add_student(&mut sc, &school.admin, "Dilya", "Dadaeva", "10-A");
    let other = add_student(&mut sc, &school.admin, "Erkin", "Ergashev", "11-B");

    for (student, correct) in [(&aziza, 9), (&bobur, 8), (&chori, 8), (&other, 10)] {
        sc.request_ok(
            Some(&teacher),
            "exams.record",
            json!({
                "kind": "topic",
                "studentId": student.profile_id,
                "topicId": school.topic_id,
                "correct": correct,
                "total": 10,
            }),
        );
    }

    let table = sc.request_ok(
        Some(&teacher),
        "stats.ranking",
        json!({ "subjectId": school.subject_id, "groupName": "10-A" }),
    );
    assert_eq!(table["basis"], json!("finalGrade"));
    assert_eq!(
        ranks(&table),
        vec![
            (json!(1), "Alimova, Aziza".to_string()),
            (json!(2), "Boboev, Bobur".to_string()),
            (json!(2), "Choriev, Chori".to_string()),
            (json!(null), "Dadaeva, Dilya".to_string()),
        ]
    );

    let whole_school = sc.request_ok(Some(&teacher), "stats.ranking", json!({ "subjectId": school.subject_id }));
    assert_eq!(whole_school["rows"][0]["displayName"], json!("Ergashev, Erkin"));
    assert_eq!(whole_school["rows"].as_array().map(|a| a.len()), Some(5));
}

#[test]
fn rating_snapshots_feed_the_rating_table() {
    let workspace = temp_dir("tutord-ratings");
    let mut sc = spawn_sidecar();
    sc.select_workspace(workspace.path());
    let school = seed_school(&mut sc);
    let teacher = school.teacher.user_id.clone();

    let aziza = add_student(&mut sc, &school.admin, "Aziza", "Alimova", "10-A");
    let bobur = add_student(&mut sc, &school.admin, "Bobur", "Boboev", "10-A");
    let _chori = add_student(&mut sc, &school.admin, "Chori", "Choriev", "10-A");

    sc.request_ok(
        Some(&teacher),
        "exams.record",
        json!({ "kind": "block", "studentId": aziza.profile_id, "blockId": school.block_id, "score": 90, "maxScore": 100 }),
    );
    sc.request_ok(
        Some(&teacher),
        "exams.record",
        json!({ "kind": "block", "studentId": bobur.profile_id, "blockId": school.block_id, "score": 70, "maxScore": 100 }),
    );
    sc.request_ok(
        Some(&teacher),
        "attendance.mark",
        json!({ "studentId": bobur.profile_id, "topicId": school.topic_id, "status": "absent" }),
    );

    let before = sc.request_ok(Some(&teacher), "ratings.list", json!({}));
    assert_eq!(before["ratings"].as_array().map(|a| a.len()), Some(0));

    assert_eq!(
        sc.request_err(Some(&aziza.user_id), "ratings.refresh", json!({})),
        "forbidden"
    );
    let refreshed = sc.request_ok(Some(&teacher), "ratings.refresh", json!({}));
    assert_eq!(refreshed["refreshed"], json!(3));

    let listed = sc.request_ok(Some(&teacher), "ratings.list", json!({ "groupName": "10-A" }));
    let rows = listed["ratings"].as_array().expect("ratings");
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0]["displayName"], json!("Alimova, Aziza"));
    assert_eq!(rows[0]["score"].as_f64(), Some(90.0));
    // (70*0.7 + 0*0.2) / 0.9 = 54.44
    assert_eq!(rows[1]["score"].as_f64(), Some(54.4));
    assert_eq!(rows[1]["attendanceComponent"].as_f64(), Some(0.0));
    assert_eq!(rows[2]["score"].as_f64(), Some(0.0));

    let table = sc.request_ok(Some(&teacher), "stats.ranking", json!({ "groupName": "10-A" }));
    assert_eq!(table["basis"], json!("rating"));
    assert_eq!(
        ranks(&table),
        vec![
            (json!(1), "Alimova, Aziza".to_string()),
            (json!(2), "Boboev, Bobur".to_string()),
            (json!(3), "Choriev, Chori".to_string()),
        ]
    );

    let one = sc.request_ok(Some(&teacher), "ratings.refresh", json!({ "studentId": aziza.profile_id }));
    assert_eq!(one["refreshed"], json!(1));
    assert_eq!(
        sc.request_err(Some(&teacher), "ratings.refresh", json!({ "studentId": "ghost" })),
        "not_found"
    );
}
