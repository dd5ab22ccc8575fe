mod test_support;

use serde_json::json;
use test_support::{add_student, create_user, seed_school, spawn_sidecar, temp_dir};

#[test]
fn deleting_a_student_removes_their_records() {
    let workspace = temp_dir("tutord-delete-student");
    let mut sc = spawn_sidecar();
    sc.select_workspace(workspace.path());
    let school = seed_school(&mut sc);
    let admin = school.admin.clone();
    let teacher = school.teacher.user_id.clone();
    let student = add_student(&mut sc, &admin, "Aziza", "Rahimova", "10-A");
    let keeper = add_student(&mut sc, &admin, "Bobur", "Tursunov", "10-A");

    for sid in [&student.profile_id, &keeper.profile_id] {
        sc.request_ok(
            Some(&teacher),
            "attendance.mark",
            json!({ "studentId": sid, "topicId": school.topic_id, "status": "present" }),
        );
        sc.request_ok(
            Some(&teacher),
            "comments.create",
            json!({ "studentId": sid, "kind": "positive", "text": "ok" }),
        );
        sc.request_ok(
            Some(&teacher),
            "exams.record",
            json!({ "kind": "dtm", "studentId": sid, "mandatoryCorrect": 1, "firstSpecializedCorrect": 1, "secondSpecializedCorrect": 1 }),
        );
    }
    sc.request_ok(Some(&teacher), "ratings.refresh", json!({}));

    assert_eq!(
        sc.request_err(Some(&admin), "users.delete", json!({ "userId": admin })),
        "bad_params"
    );
    assert_eq!(
        sc.request_err(Some(&teacher), "users.delete", json!({ "userId": student.user_id })),
        "forbidden"
    );
    sc.request_ok(Some(&admin), "users.delete", json!({ "userId": student.user_id }));
    assert_eq!(
        sc.request_err(Some(&admin), "users.delete", json!({ "userId": student.user_id })),
        "not_found"
    );

    assert_eq!(
        sc.request_err(Some(&admin), "users.get", json!({ "userId": student.user_id })),
        "not_found"
    );
    assert_eq!(
        sc.request_err(Some(&admin), "attendance.list", json!({ "studentId": student.profile_id })),
        "not_found"
    );
    let ratings = sc.request_ok(Some(&admin), "ratings.list", json!({}));
    assert_eq!(ratings["ratings"].as_array().map(|a| a.len()), Some(1));

    let dash = sc.request_ok(Some(&admin), "dashboard.admin", json!({}));
    assert_eq!(dash.pointer("/records/attendance").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(dash.pointer("/records/comments").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(dash.pointer("/records/dtmExams").and_then(|v| v.as_i64()), Some(1));
}

#[test]
fn deleting_a_teacher_or_parent_cleans_references() {
    let workspace = temp_dir("tutord-delete-staff");
    let mut sc = spawn_sidecar();
    sc.select_workspace(workspace.path());
    let school = seed_school(&mut sc);
    let admin = school.admin.clone();
    let student = add_student(&mut sc, &admin, "Aziza", "Rahimova", "10-A");
    let parent = create_user(&mut sc, Some(&admin), "parent", "Dilshod", "Rahimov", json!({}));
    sc.request_ok(
        Some(&admin),
        "parents.linkStudent",
        json!({ "parentUserId": parent.user_id, "studentUserId": student.user_id }),
    );
    sc.request_ok(
        Some(&school.teacher.user_id),
        "comments.create",
        json!({ "studentId": student.profile_id, "kind": "neutral", "text": "noted" }),
    );

    sc.request_ok(Some(&admin), "users.delete", json!({ "userId": school.teacher.user_id }));
    let comments = sc.request_ok(Some(&admin), "comments.list", json!({ "studentId": student.profile_id }));
    assert_eq!(comments["comments"].as_array().map(|a| a.len()), Some(0));

    sc.request_ok(Some(&admin), "users.delete", json!({ "userId": parent.user_id }));
    let user = sc.request_ok(Some(&admin), "users.get", json!({ "userId": student.user_id }));
    assert!(user.pointer("/user/parentId").map(|v| v.is_null()).unwrap_or(false));

    let listed = sc.request_ok(Some(&admin), "users.list", json!({ "role": "student" }));
    assert_eq!(listed["users"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(
        sc.request_err(Some(&admin), "users.list", json!({ "role": "janitor" })),
        "bad_params"
    );
}
