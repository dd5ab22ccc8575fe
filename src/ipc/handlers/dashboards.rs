use crate::domain::{MaterialKind, Role};
use crate::error::{query_failed, AppResult};
use crate::ipc::access::Actor;
use crate::ipc::helpers::{dispatch, optional_str, Handler};
use crate::ipc::types::{AppState, Request};
use crate::stats;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

const RECENT_COMMENTS: i64 = 10;

fn count(conn: &Connection, sql: &str) -> AppResult<i64> {
    conn.query_row(sql, [], |r| r.get(0)).map_err(query_failed)
}

fn dashboard_student(conn: &Connection, actor: &Actor, _params: &serde_json::Value) -> AppResult<serde_json::Value> {
    actor.require(&[Role::Student])?;
    let student_id = actor.profile_id(conn)?;
    stats::student_summary(conn, &student_id)
}

fn dashboard_parent(conn: &Connection, actor: &Actor, _params: &serde_json::Value) -> AppResult<serde_json::Value> {
    actor.require(&[Role::Parent])?;
    let parent_id = actor.profile_id(conn)?;
    let children = stats::children_of_parent(conn, &parent_id)?
        .iter()
        .map(|c| stats::student_summary(conn, &c.student_id))
        .collect::<AppResult<Vec<_>>>()?;
    Ok(json!({ "children": children }))
}

fn dashboard_teacher(conn: &Connection, actor: &Actor, params: &serde_json::Value) -> AppResult<serde_json::Value> {
    actor.require(&[Role::Teacher])?;
    let teacher_id = actor.profile_id(conn)?;
    let group_name = optional_str(params, "groupName")?;

    let subject: Option<(String, String)> = conn
        .query_row(
            "SELECT s.id, s.name
             FROM teachers t JOIN subjects s ON s.id = t.subject_id
             WHERE t.id = ?",
            [&teacher_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(query_failed)?;

    let students = stats::list_students(conn, group_name.as_deref())?.len();
    let comments_authored: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM comments WHERE teacher_id = ?",
            [&teacher_id],
            |r| r.get(0),
        )
        .map_err(query_failed)?;

    let mut stmt = conn
        .prepare(
            "SELECT c.id, c.student_id, u.last_name, u.first_name, c.kind, c.text, c.created_at
             FROM comments c
             JOIN students s ON s.id = c.student_id
             JOIN users u ON u.id = s.user_id
             WHERE c.teacher_id = ?
             ORDER BY c.created_at DESC, c.rowid DESC
             LIMIT ?",
        )
        .map_err(query_failed)?;
    let recent = stmt
        .query_map((&teacher_id, RECENT_COMMENTS), |r| {
            let id: String = r.get(0)?;
            let student_id: String = r.get(1)?;
            let last: String = r.get(2)?;
            let first: String = r.get(3)?;
            let kind: String = r.get(4)?;
            let text: String = r.get(5)?;
            let created_at: String = r.get(6)?;
            Ok(json!({
                "id": id,
                "studentId": student_id,
                "studentName": format!("{}, {}", last, first),
                "kind": kind,
                "text": text,
                "createdAt": created_at,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;

    let ratings = stats::ranking_by_rating(conn, group_name.as_deref())?;

    Ok(json!({
        "subject": subject.map(|(id, name)| json!({ "id": id, "name": name })),
        "groupName": group_name,
        "counts": {
            "students": students,
            "commentsAuthored": comments_authored,
        },
        "recentComments": recent,
        "ratings": ratings,
    }))
}

fn dashboard_admin(conn: &Connection, actor: &Actor, _params: &serde_json::Value) -> AppResult<serde_json::Value> {
    actor.require(&[Role::Admin])?;
    let mut users = serde_json::Map::new();
    for role in Role::ALL {
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM users WHERE role = ?",
                [role.as_str()],
                |r| r.get(0),
            )
            .map_err(query_failed)?;
        users.insert(role.as_str().to_string(), json!(n));
    }
    let mut materials = serde_json::Map::new();
    for kind in MaterialKind::ALL {
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM material_files WHERE kind = ?",
                [kind.as_str()],
                |r| r.get(0),
            )
            .map_err(query_failed)?;
        materials.insert(kind.as_str().to_string(), json!(n));
    }
    Ok(json!({
        "users": users,
        "content": {
            "subjects": count(conn, "SELECT COUNT(*) FROM subjects")?,
            "sections": count(conn, "SELECT COUNT(*) FROM sections")?,
            "blocks": count(conn, "SELECT COUNT(*) FROM blocks")?,
            "topics": count(conn, "SELECT COUNT(*) FROM topics")?,
            "questions": count(conn, "SELECT COUNT(*) FROM questions")?,
            "materials": materials,
        },
        "records": {
            "attendance": count(conn, "SELECT COUNT(*) FROM attendance")?,
            "comments": count(conn, "SELECT COUNT(*) FROM comments")?,
            "topicTests": count(conn, "SELECT COUNT(*) FROM topic_tests")?,
            "sectionExams": count(conn, "SELECT COUNT(*) FROM section_exams")?,
            "blockExams": count(conn, "SELECT COUNT(*) FROM block_exams")?,
            "modulExams": count(conn, "SELECT COUNT(*) FROM modul_exams")?,
            "dtmExams": count(conn, "SELECT COUNT(*) FROM dtm_exams")?,
        },
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: Handler = match req.method.as_str() {
        "dashboard.student" => dashboard_student,
        "dashboard.teacher" => dashboard_teacher,
        "dashboard.parent" => dashboard_parent,
        "dashboard.admin" => dashboard_admin,
        _ => return None,
    };
    Some(dispatch(state, req, f))
}
