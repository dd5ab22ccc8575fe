mod test_support;

use serde_json::json;
use test_support::{add_student, seed_school, spawn_sidecar, str_field, temp_dir};

#[test]
fn submission_is_graded_and_feeds_the_topic_component() {
    let workspace = temp_dir("tutord-topic-test");
    let mut sc = spawn_sidecar();
    sc.select_workspace(workspace.path());
    let school = seed_school(&mut sc);
    let teacher = school.teacher.user_id.clone();
    let student = add_student(&mut sc, &school.admin, "Aziza", "Rahimova", "10-A");

    assert_eq!(
        sc.request_err(
            Some(&student.user_id),
            "topicTests.submit",
            json!({ "topicId": school.topic_id, "answers": {} }),
        ),
        "bad_params"
    );

    let mut ids = Vec::new();
    for (text, correct) in [("1 + 1", "B"), ("2 * 3", "D"), ("9 / 3", "C")] {
        let q = sc.request_ok(
            Some(&teacher),
            "questions.create",
            json!({
                "topicId": school.topic_id,
                "text": text,
                "options": ["1", "2", "3", "6"],
                "correctOption": correct,
            }),
        );
        ids.push(str_field(&q, "questionId"));
    }
    assert_eq!(
        sc.request_err(
            Some(&teacher),
            "questions.create",
            json!({ "topicId": school.topic_id, "text": "short", "options": ["a", "b"], "correctOption": "A" }),
        ),
        "bad_params"
    );

    assert_eq!(
        sc.request_err(
            Some(&student.user_id),
            "topicTests.submit",
            json!({ "topicId": school.topic_id, "answers": { "not-a-question": "A" } }),
        ),
        "bad_params"
    );
    assert_eq!(
        sc.request_err(
            Some(&teacher),
            "topicTests.submit",
            json!({ "topicId": school.topic_id, "answers": {} }),
        ),
        "forbidden"
    );

    let mut answers = serde_json::Map::new();
    answers.insert(ids[0].clone(), json!("b"));
    answers.insert(ids[1].clone(), json!("D"));
    let out = sc.request_ok(
        Some(&student.user_id),
        "topicTests.submit",
        json!({ "topicId": school.topic_id, "answers": answers }),
    );
    assert_eq!(out["correct"], json!(2));
    assert_eq!(out["total"], json!(3));
    assert_eq!(out["percent"].as_f64(), Some(66.7));
    assert_eq!(out["results"][2]["correct"], json!(false));

    let grade = sc.request_ok(
        Some(&student.user_id),
        "stats.finalGrade",
        json!({ "studentId": student.profile_id, "subjectId": school.subject_id }),
    );
    assert_eq!(grade.pointer("/grades/0/components/topic").and_then(|v| v.as_f64()), Some(66.7));
    assert_eq!(grade.pointer("/grades/0/letter").and_then(|v| v.as_u64()), Some(3));
}
