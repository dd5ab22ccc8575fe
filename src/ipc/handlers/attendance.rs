use crate::domain::{AttendanceStatus, Role};
use crate::error::{commit_failed, query_failed, tx_failed, update_failed, AppError, AppResult};
use crate::ipc::access::{ensure_can_view_student, Actor};
use crate::ipc::helpers::{
    dispatch, new_id, now_rfc3339, require_row, required_str, required_str_list, row_exists,
    Handler,
};
use crate::ipc::types::{AppState, Request};
use crate::stats;
use rusqlite::Connection;
use serde_json::json;

fn parse_status(params: &serde_json::Value) -> AppResult<AttendanceStatus> {
    let raw = required_str(params, "status")?;
    AttendanceStatus::parse(&raw).ok_or_else(|| {
        AppError::bad_params(format!(
            "status must be one of: {}",
            AttendanceStatus::expected()
        ))
    })
}

/// One row per (student, topic); re-marking overwrites the status.
fn upsert_mark(
    conn: &Connection,
    student_id: &str,
    topic_id: &str,
    status: AttendanceStatus,
    marked_at: &str,
) -> AppResult<()> {
    conn.execute(
        "INSERT INTO attendance(id, student_id, topic_id, status, marked_at)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(student_id, topic_id) DO UPDATE SET
           status = excluded.status,
           marked_at = excluded.marked_at",
        (new_id(), student_id, topic_id, status.as_str(), marked_at),
    )
    .map_err(update_failed("attendance"))?;
    Ok(())
}

fn attendance_mark(conn: &Connection, actor: &Actor, params: &serde_json::Value) -> AppResult<serde_json::Value> {
    actor.require(&[Role::Teacher, Role::Admin])?;
    let student_id = required_str(params, "studentId")?;
    let topic_id = required_str(params, "topicId")?;
    let status = parse_status(params)?;
    require_row(conn, "students", &student_id, "student")?;
    require_row(conn, "topics", &topic_id, "topic")?;
    upsert_mark(conn, &student_id, &topic_id, status, &now_rfc3339())?;
    Ok(json!({ "studentId": student_id, "topicId": topic_id, "status": status.as_str() }))
}

/// Stamps one status for many students; unknown ids are skipped and reported.
fn attendance_bulk_mark(conn: &Connection, actor: &Actor, params: &serde_json::Value) -> AppResult<serde_json::Value> {
    actor.require(&[Role::Teacher, Role::Admin])?;
    let topic_id = required_str(params, "topicId")?;
    let status = parse_status(params)?;
    let student_ids = required_str_list(params, "studentIds")?;
    require_row(conn, "topics", &topic_id, "topic")?;

    let marked_at = now_rfc3339();
    let tx = conn.unchecked_transaction().map_err(tx_failed)?;
    let mut marked = 0_usize;
    let mut skipped: Vec<String> = Vec::new();
    for student_id in student_ids {
        if !row_exists(&tx, "students", &student_id)? {
            skipped.push(student_id);
            continue;
        }
        upsert_mark(&tx, &student_id, &topic_id, status, &marked_at)?;
        marked += 1;
    }
    tx.commit().map_err(commit_failed)?;
    if !skipped.is_empty() {
        log::warn!(
            "attendance.bulkMark skipped {} unknown student id(s)",
            skipped.len()
        );
    }
    Ok(json!({ "marked": marked, "skipped": skipped }))
}

fn attendance_list(conn: &Connection, actor: &Actor, params: &serde_json::Value) -> AppResult<serde_json::Value> {
    let student_id = required_str(params, "studentId")?;
    ensure_can_view_student(conn, actor, &student_id)?;
    let mut stmt = conn
        .prepare(
            "SELECT a.topic_id, t.title, a.status, a.marked_at
             FROM attendance a
             JOIN topics t ON t.id = a.topic_id
             WHERE a.student_id = ?
             ORDER BY a.marked_at, t.title",
        )
        .map_err(query_failed)?;
    let rows = stmt
        .query_map([&student_id], |r| {
            let topic_id: String = r.get(0)?;
            let topic_title: String = r.get(1)?;
            let status: String = r.get(2)?;
            let marked_at: String = r.get(3)?;
            Ok(json!({
                "topicId": topic_id,
                "topicTitle": topic_title,
                "status": status,
                "markedAt": marked_at,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;
    Ok(json!({
        "rows": rows,
        "summary": stats::attendance_for_student(conn, &student_id)?,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: Handler = match req.method.as_str() {
        "attendance.mark" => attendance_mark,
        "attendance.bulkMark" => attendance_bulk_mark,
        "attendance.list" => attendance_list,
        _ => return None,
    };
    Some(dispatch(state, req, f))
}
