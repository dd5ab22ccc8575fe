use crate::domain::{MaterialKind, Role};
use crate::error::{delete_failed, insert_failed, query_failed, AppError, AppResult};
use crate::ipc::access::Actor;
use crate::ipc::helpers::{dispatch, new_id, now_rfc3339, require_row, required_str, Handler};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

fn materials_add(conn: &Connection, actor: &Actor, params: &serde_json::Value) -> AppResult<serde_json::Value> {
    actor.require(&[Role::Teacher, Role::Admin])?;
    let topic_id = required_str(params, "topicId")?;
    let title = required_str(params, "title")?;
    let kind_raw = required_str(params, "kind")?;
    let kind = MaterialKind::parse(&kind_raw).ok_or_else(|| {
        AppError::bad_params(format!("kind must be one of: {}", MaterialKind::expected()))
    })?;
    let location = required_str(params, "location")?;
    require_row(conn, "topics", &topic_id, "topic")?;

    let id = new_id();
    conn.execute(
        "INSERT INTO material_files(id, topic_id, title, kind, location, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&id, &topic_id, &title, kind.as_str(), &location, now_rfc3339()),
    )
    .map_err(insert_failed("material_files"))?;
    Ok(json!({ "materialId": id }))
}

fn materials_list(conn: &Connection, _actor: &Actor, params: &serde_json::Value) -> AppResult<serde_json::Value> {
    let topic_id = required_str(params, "topicId")?;
    require_row(conn, "topics", &topic_id, "topic")?;
    let mut stmt = conn
        .prepare(
            "SELECT id, title, kind, location, created_at
             FROM material_files
             WHERE topic_id = ?
             ORDER BY created_at, title",
        )
        .map_err(query_failed)?;
    let materials = stmt
        .query_map([&topic_id], |r| {
            let id: String = r.get(0)?;
            let title: String = r.get(1)?;
            let kind: String = r.get(2)?;
            let location: String = r.get(3)?;
            let created_at: String = r.get(4)?;
            Ok(json!({
                "id": id,
                "title": title,
                "kind": kind,
                "location": location,
                "createdAt": created_at,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;
    Ok(json!({ "materials": materials }))
}

fn materials_delete(conn: &Connection, actor: &Actor, params: &serde_json::Value) -> AppResult<serde_json::Value> {
    actor.require(&[Role::Teacher, Role::Admin])?;
    let material_id = required_str(params, "materialId")?;
    let n = conn
        .execute("DELETE FROM material_files WHERE id = ?", [&material_id])
        .map_err(delete_failed("material_files"))?;
    if n == 0 {
        return Err(AppError::not_found("material not found"));
    }
    Ok(json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: Handler = match req.method.as_str() {
        "materials.add" => materials_add,
        "materials.list" => materials_list,
        "materials.delete" => materials_delete,
        _ => return None,
    };
    Some(dispatch(state, req, f))
}
