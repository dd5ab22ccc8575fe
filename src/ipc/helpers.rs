use crate::error::{query_failed, AppError, AppResult};
use crate::ipc::access::{resolve_actor, Actor};
use crate::ipc::error::respond;
use crate::ipc::types::{AppState, Request};
use chrono::SecondsFormat;
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

/// Signature shared by every actor-gated handler.
pub type Handler = fn(&Connection, &Actor, &serde_json::Value) -> AppResult<serde_json::Value>;

/// Resolves the workspace connection and the caller, then runs `f`.
pub fn dispatch(state: &mut AppState, req: &Request, f: Handler) -> serde_json::Value {
    let result = db_conn(state).and_then(|conn| {
        let actor = resolve_actor(conn, req.actor.as_deref())?;
        f(conn, &actor, &req.params)
    });
    respond(&req.id, result)
}

pub fn db_conn(state: &AppState) -> AppResult<&Connection> {
    state.db.as_ref().ok_or(AppError::NoWorkspace)
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Trimmed, non-empty string parameter.
pub fn required_str(params: &serde_json::Value, key: &str) -> AppResult<String> {
    match optional_str(params, key)? {
        Some(s) => Ok(s),
        None => Err(AppError::bad_params(format!("missing {}", key))),
    }
}

/// Absent, null and blank all read as `None`.
pub fn optional_str(params: &serde_json::Value, key: &str) -> AppResult<Option<String>> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let Some(s) = v.as_str() else {
                return Err(AppError::bad_params(format!("{} must be a string", key)));
            };
            let t = s.trim();
            if t.is_empty() {
                Ok(None)
            } else {
                Ok(Some(t.to_string()))
            }
        }
    }
}

/// RFC 3339 timestamp, normalised to UTC so stored values sort as text.
pub fn optional_rfc3339(params: &serde_json::Value, key: &str) -> AppResult<Option<String>> {
    let Some(raw) = optional_str(params, key)? else {
        return Ok(None);
    };
    chrono::DateTime::parse_from_rfc3339(&raw)
        .map(|t| {
            Some(
                t.with_timezone(&chrono::Utc)
                    .to_rfc3339_opts(SecondsFormat::Secs, true),
            )
        })
        .map_err(|_| AppError::bad_params(format!("{} must be an RFC 3339 timestamp", key)))
}

pub fn required_f64(params: &serde_json::Value, key: &str) -> AppResult<f64> {
    params
        .get(key)
        .and_then(|v| v.as_f64())
        .filter(|n| n.is_finite())
        .ok_or_else(|| AppError::bad_params(format!("missing numeric {}", key)))
}

pub fn required_i64(params: &serde_json::Value, key: &str) -> AppResult<i64> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| AppError::bad_params(format!("missing integer {}", key)))
}

pub fn required_str_list(params: &serde_json::Value, key: &str) -> AppResult<Vec<String>> {
    let Some(arr) = params.get(key).and_then(|v| v.as_array()) else {
        return Err(AppError::bad_params(format!("missing {}", key)));
    };
    arr.iter()
        .map(|v| {
            v.as_str()
                .map(|s| s.trim().to_string())
                .ok_or_else(|| AppError::bad_params(format!("{} must contain strings", key)))
        })
        .collect()
}

pub fn row_exists(conn: &Connection, table: &str, id: &str) -> AppResult<bool> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
    conn.query_row(&sql, [id], |r| r.get::<_, i64>(0))
        .optional()
        .map(|v| v.is_some())
        .map_err(query_failed)
}

/// `not_found` with "<what> not found" unless the row exists.
pub fn require_row(conn: &Connection, table: &str, id: &str, what: &str) -> AppResult<()> {
    if row_exists(conn, table, id)? {
        Ok(())
    } else {
        Err(AppError::not_found(format!("{} not found", what)))
    }
}

/// Next `sort_order` among siblings sharing `parent_column = parent_id`.
pub fn next_sort_order(
    conn: &Connection,
    table: &str,
    parent_column: &str,
    parent_id: &str,
) -> AppResult<i64> {
    let sql = format!(
        "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM {} WHERE {} = ?",
        table, parent_column
    );
    conn.query_row(&sql, [parent_id], |r| r.get(0))
        .map_err(query_failed)
}
