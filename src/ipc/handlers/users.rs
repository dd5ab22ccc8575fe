use crate::auth::{self, MIN_PASSWORD_LEN};
use crate::domain::Role;
use crate::error::{
    commit_failed, delete_failed, insert_failed, query_failed, tx_failed, update_failed,
    AppError, AppResult,
};
use crate::ipc::access::{resolve_actor, Actor};
use crate::ipc::error::respond;
use crate::ipc::helpers::{
    db_conn, dispatch, new_id, now_rfc3339, optional_str, require_row, required_str,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn normalize_phone(raw: &str) -> AppResult<String> {
    let digits: String = raw
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
        .collect();
    let body = digits.strip_prefix('+').unwrap_or(&digits);
    if body.len() < 7 || body.len() > 15 || !body.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::bad_params("phone must be 7-15 digits"));
    }
    Ok(format!("+{}", body))
}

fn users_count(conn: &Connection) -> AppResult<i64> {
    conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))
        .map_err(query_failed)
}

/// Admin only, except for the very first user which must itself be an admin.
fn users_create(conn: &Connection, actor_id: Option<&str>, params: &serde_json::Value) -> AppResult<serde_json::Value> {
    let role_raw = required_str(params, "role")?;
    let role = Role::parse(&role_raw).ok_or_else(|| {
        AppError::bad_params(format!("role must be one of: {}", Role::expected()))
    })?;

    if users_count(conn)? == 0 {
        if role != Role::Admin {
            return Err(AppError::bad_params("the first user must be an admin"));
        }
    } else {
        resolve_actor(conn, actor_id)?.require(&[Role::Admin])?;
    }

    let phone = normalize_phone(&required_str(params, "phone")?)?;
    let password = params
        .get("password")
        .and_then(|v| v.as_str())
        .ok_or_else(|| AppError::bad_params("missing password"))?;
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::bad_params(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    let first_name = required_str(params, "firstName")?;
    let last_name = required_str(params, "lastName")?;
    let group_name = optional_str(params, "groupName")?;
    let subject_id = optional_str(params, "subjectId")?;
    if let Some(sid) = subject_id.as_deref() {
        require_row(conn, "subjects", sid, "subject")?;
    }

    let user_id = new_id();
    let profile_id = new_id();
    let tx = conn.unchecked_transaction().map_err(tx_failed)?;
    tx.execute(
        "INSERT INTO users(id, phone, password_hash, role, first_name, last_name, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &user_id,
            &phone,
            auth::hash_password(password),
            role.as_str(),
            &first_name,
            &last_name,
            now_rfc3339(),
        ),
    )
    .map_err(insert_failed("users"))?;
    match role {
        Role::Student => tx.execute(
            "INSERT INTO students(id, user_id, group_name, parent_id) VALUES(?, ?, ?, NULL)",
            (&profile_id, &user_id, &group_name),
        ),
        Role::Teacher => tx.execute(
            "INSERT INTO teachers(id, user_id, subject_id) VALUES(?, ?, ?)",
            (&profile_id, &user_id, &subject_id),
        ),
        Role::Parent => tx.execute(
            "INSERT INTO parents(id, user_id) VALUES(?, ?)",
            (&profile_id, &user_id),
        ),
        Role::Admin => tx.execute(
            "INSERT INTO admins(id, user_id) VALUES(?, ?)",
            (&profile_id, &user_id),
        ),
    }
    .map_err(insert_failed(role.profile_table()))?;
    tx.commit().map_err(commit_failed)?;

    log::info!("user created: {} ({})", user_id, role.as_str());
    Ok(json!({
        "userId": user_id,
        "profileId": profile_id,
        "role": role.as_str(),
    }))
}

fn handle_users_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = db_conn(state).and_then(|conn| users_create(conn, req.actor.as_deref(), &req.params));
    respond(&req.id, result)
}

/// Checks credentials for the host. Issues nothing; the host keeps its own session.
fn auth_verify_password(conn: &Connection, params: &serde_json::Value) -> AppResult<serde_json::Value> {
    let phone = normalize_phone(&required_str(params, "phone")?)?;
    let password = params
        .get("password")
        .and_then(|v| v.as_str())
        .ok_or_else(|| AppError::bad_params("missing password"))?;
    let row: Option<(String, String, String)> = conn
        .query_row(
            "SELECT id, role, password_hash FROM users WHERE phone = ?",
            [&phone],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(query_failed)?;
    match row {
        Some((user_id, role, stored)) if auth::verify_password(&stored, password) => {
            Ok(json!({ "valid": true, "userId": user_id, "role": role }))
        }
        _ => Ok(json!({ "valid": false })),
    }
}

fn handle_auth_verify_password(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = db_conn(state).and_then(|conn| auth_verify_password(conn, &req.params));
    respond(&req.id, result)
}

const USER_SELECT: &str = "SELECT u.id, u.phone, u.role, u.first_name, u.last_name, u.created_at,
            COALESCE(s.id, t.id, p.id, a.id) AS profile_id,
            s.group_name, s.parent_id, t.subject_id
     FROM users u
     LEFT JOIN students s ON s.user_id = u.id
     LEFT JOIN teachers t ON t.user_id = u.id
     LEFT JOIN parents p ON p.user_id = u.id
     LEFT JOIN admins a ON a.user_id = u.id";

fn user_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let id: String = r.get(0)?;
    let phone: String = r.get(1)?;
    let role: String = r.get(2)?;
    let first_name: String = r.get(3)?;
    let last_name: String = r.get(4)?;
    let created_at: String = r.get(5)?;
    let profile_id: Option<String> = r.get(6)?;
    let group_name: Option<String> = r.get(7)?;
    let parent_id: Option<String> = r.get(8)?;
    let subject_id: Option<String> = r.get(9)?;
    Ok(json!({
        "id": id,
        "phone": phone,
        "role": role,
        "firstName": first_name,
        "lastName": last_name,
        "createdAt": created_at,
        "profileId": profile_id,
        "groupName": group_name,
        "parentId": parent_id,
        "subjectId": subject_id,
    }))
}

fn users_list(conn: &Connection, actor: &Actor, params: &serde_json::Value) -> AppResult<serde_json::Value> {
    actor.require(&[Role::Admin, Role::Teacher])?;
    let role = match optional_str(params, "role")? {
        Some(r) => Some(
            Role::parse(&r)
                .ok_or_else(|| AppError::bad_params(format!("role must be one of: {}", Role::expected())))?
                .as_str(),
        ),
        None => None,
    };
    let sql = format!(
        "{} WHERE (?1 IS NULL OR u.role = ?1) ORDER BY u.last_name, u.first_name",
        USER_SELECT
    );
    let mut stmt = conn.prepare(&sql).map_err(query_failed)?;
    let users = stmt
        .query_map([role], user_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;
    Ok(json!({ "users": users }))
}

fn users_get(conn: &Connection, actor: &Actor, params: &serde_json::Value) -> AppResult<serde_json::Value> {
    let user_id = required_str(params, "userId")?;
    let sql = format!("{} WHERE u.id = ?", USER_SELECT);
    let user = conn
        .query_row(&sql, [&user_id], user_json)
        .optional()
        .map_err(query_failed)?
        .ok_or_else(|| AppError::not_found("user not found"))?;

    let allowed = actor.is_staff()
        || actor.user_id == user_id
        || (actor.role == Role::Parent
            && user.get("parentId").and_then(|v| v.as_str()) == Some(actor.profile_id(conn)?.as_str()));
    if !allowed {
        return Err(AppError::forbidden("not allowed to view this user"));
    }
    Ok(json!({ "user": user }))
}

/// Deletes the user, its profile and every row that references the profile.
fn users_delete(conn: &Connection, actor: &Actor, params: &serde_json::Value) -> AppResult<serde_json::Value> {
    actor.require(&[Role::Admin])?;
    let user_id = required_str(params, "userId")?;
    if user_id == actor.user_id {
        return Err(AppError::bad_params("cannot delete yourself"));
    }
    let role: Option<String> = conn
        .query_row("SELECT role FROM users WHERE id = ?", [&user_id], |r| r.get(0))
        .optional()
        .map_err(query_failed)?;
    let Some(role) = role.as_deref().and_then(Role::parse) else {
        return Err(AppError::not_found("user not found"));
    };

    let tx = conn.unchecked_transaction().map_err(tx_failed)?;
    let profile_id: Option<String> = tx
        .query_row(
            &format!("SELECT id FROM {} WHERE user_id = ?", role.profile_table()),
            [&user_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(query_failed)?;

    if let Some(pid) = profile_id.as_deref() {
        match role {
            Role::Student => {
                for table in [
                    "attendance",
                    "comments",
                    "topic_tests",
                    "section_exams",
                    "block_exams",
                    "modul_exams",
                    "dtm_exams",
                    "current_ratings",
                ] {
                    tx.execute(&format!("DELETE FROM {} WHERE student_id = ?", table), [pid])
                        .map_err(delete_failed("student records"))?;
                }
            }
            Role::Teacher => {
                tx.execute("DELETE FROM comments WHERE teacher_id = ?", [pid])
                    .map_err(delete_failed("comments"))?;
            }
            Role::Parent => {
                tx.execute("UPDATE students SET parent_id = NULL WHERE parent_id = ?", [pid])
                    .map_err(update_failed("students"))?;
            }
            Role::Admin => {}
        }
        tx.execute(
            &format!("DELETE FROM {} WHERE id = ?", role.profile_table()),
            [pid],
        )
        .map_err(delete_failed(role.profile_table()))?;
    }
    tx.execute("DELETE FROM users WHERE id = ?", [&user_id])
        .map_err(delete_failed("users"))?;
    tx.commit().map_err(commit_failed)?;

    log::info!("user deleted: {} ({})", user_id, role.as_str());
    Ok(json!({ "deleted": true }))
}

fn profile_of(conn: &Connection, table: &str, user_id: &str, what: &str) -> AppResult<String> {
    conn.query_row(
        &format!("SELECT id FROM {} WHERE user_id = ?", table),
        [user_id],
        |r| r.get(0),
    )
    .optional()
    .map_err(query_failed)?
    .ok_or_else(|| AppError::not_found(format!("{} not found", what)))
}

fn parents_link_student(conn: &Connection, actor: &Actor, params: &serde_json::Value) -> AppResult<serde_json::Value> {
    actor.require(&[Role::Admin])?;
    let parent_id = profile_of(conn, "parents", &required_str(params, "parentUserId")?, "parent")?;
    let student_id = profile_of(conn, "students", &required_str(params, "studentUserId")?, "student")?;
    conn.execute(
        "UPDATE students SET parent_id = ? WHERE id = ?",
        (&parent_id, &student_id),
    )
    .map_err(update_failed("students"))?;
    Ok(json!({ "parentId": parent_id, "studentId": student_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.create" => Some(handle_users_create(state, req)),
        "auth.verifyPassword" => Some(handle_auth_verify_password(state, req)),
        "users.list" => Some(dispatch(state, req, users_list)),
        "users.get" => Some(dispatch(state, req, users_get)),
        "users.delete" => Some(dispatch(state, req, users_delete)),
        "parents.linkStudent" => Some(dispatch(state, req, parents_link_student)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_normalization() {
        assert_eq!(normalize_phone("+998 (90) 123-45-67").expect("ok"), "+998901234567");
        assert_eq!(normalize_phone("998901234567").expect("ok"), "+998901234567");
        assert!(normalize_phone("12ab567").is_err());
        assert!(normalize_phone("123").is_err());
    }
}
