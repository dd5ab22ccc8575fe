use crate::domain::{CommentKind, Role};
use crate::error::{delete_failed, insert_failed, query_failed, AppError, AppResult};
use crate::ipc::access::{ensure_can_view_student, Actor};
use crate::ipc::helpers::{dispatch, new_id, now_rfc3339, require_row, required_str, Handler};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

const MAX_COMMENT_CHARS: usize = 1000;

fn comments_create(conn: &Connection, actor: &Actor, params: &serde_json::Value) -> AppResult<serde_json::Value> {
    actor.require(&[Role::Teacher])?;
    let teacher_id = actor.profile_id(conn)?;
    let student_id = required_str(params, "studentId")?;
    let kind_raw = required_str(params, "kind")?;
    let kind = CommentKind::parse(&kind_raw).ok_or_else(|| {
        AppError::bad_params(format!("kind must be one of: {}", CommentKind::expected()))
    })?;
    let text = required_str(params, "text")?;
    if text.chars().count() > MAX_COMMENT_CHARS {
        return Err(AppError::bad_params(format!(
            "text must be at most {} characters",
            MAX_COMMENT_CHARS
        )));
    }
    require_row(conn, "students", &student_id, "student")?;

    let id = new_id();
    let created_at = now_rfc3339();
    conn.execute(
        "INSERT INTO comments(id, teacher_id, student_id, kind, text, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&id, &teacher_id, &student_id, kind.as_str(), &text, &created_at),
    )
    .map_err(insert_failed("comments"))?;
    Ok(json!({ "commentId": id, "createdAt": created_at }))
}

fn comments_list(conn: &Connection, actor: &Actor, params: &serde_json::Value) -> AppResult<serde_json::Value> {
    let student_id = required_str(params, "studentId")?;
    ensure_can_view_student(conn, actor, &student_id)?;
    let mut stmt = conn
        .prepare(
            "SELECT c.id, c.kind, c.text, c.created_at, u.last_name, u.first_name
             FROM comments c
             JOIN teachers t ON t.id = c.teacher_id
             JOIN users u ON u.id = t.user_id
             WHERE c.student_id = ?
             ORDER BY c.created_at DESC, c.rowid DESC",
        )
        .map_err(query_failed)?;
    let comments = stmt
        .query_map([&student_id], |r| {
            let id: String = r.get(0)?;
            let kind: String = r.get(1)?;
            let text: String = r.get(2)?;
            let created_at: String = r.get(3)?;
            let last: String = r.get(4)?;
            let first: String = r.get(5)?;
            Ok(json!({
                "id": id,
                "kind": kind,
                "text": text,
                "createdAt": created_at,
                "teacherName": format!("{}, {}", last, first),
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;
    Ok(json!({ "comments": comments }))
}

/// Authors may delete their own comments; admins may delete any.
fn comments_delete(conn: &Connection, actor: &Actor, params: &serde_json::Value) -> AppResult<serde_json::Value> {
    actor.require(&[Role::Teacher, Role::Admin])?;
    let comment_id = required_str(params, "commentId")?;
    let author: Option<String> = conn
        .query_row(
            "SELECT teacher_id FROM comments WHERE id = ?",
            [&comment_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(query_failed)?;
    let Some(author) = author else {
        return Err(AppError::not_found("comment not found"));
    };
    if actor.role == Role::Teacher && actor.profile_id(conn)? != author {
        return Err(AppError::forbidden("only the author may delete this comment"));
    }
    conn.execute("DELETE FROM comments WHERE id = ?", [&comment_id])
        .map_err(delete_failed("comments"))?;
    Ok(json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: Handler = match req.method.as_str() {
        "comments.create" => comments_create,
        "comments.list" => comments_list,
        "comments.delete" => comments_delete,
        _ => return None,
    };
    Some(dispatch(state, req, f))
}
