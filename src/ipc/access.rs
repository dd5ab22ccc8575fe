use crate::domain::Role;
use crate::error::{query_failed, AppError, AppResult};
use rusqlite::{Connection, OptionalExtension};

/// The caller of a request, as resolved from `users`.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user_id: String,
    pub role: Role,
}

pub fn resolve_actor(conn: &Connection, actor_id: Option<&str>) -> AppResult<Actor> {
    let Some(user_id) = actor_id.map(str::trim).filter(|s| !s.is_empty()) else {
        return Err(AppError::Unauthenticated);
    };
    let role: Option<String> = conn
        .query_row("SELECT role FROM users WHERE id = ?", [user_id], |r| r.get(0))
        .optional()
        .map_err(query_failed)?;
    let Some(role) = role else {
        return Err(AppError::Unauthenticated);
    };
    let role = Role::parse(&role)
        .ok_or_else(|| AppError::Internal(format!("user {} has unknown role {}", user_id, role)))?;
    Ok(Actor {
        user_id: user_id.to_string(),
        role,
    })
}

impl Actor {
    pub fn require(&self, allowed: &[Role]) -> AppResult<()> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            Err(AppError::forbidden(format!(
                "role {} may not perform this action",
                self.role.as_str()
            )))
        }
    }

    pub fn is_staff(&self) -> bool {
        matches!(self.role, Role::Teacher | Role::Admin)
    }

    /// Id of the role profile row (`students.id`, `teachers.id`, ...).
    pub fn profile_id(&self, conn: &Connection) -> AppResult<String> {
        let sql = format!(
            "SELECT id FROM {} WHERE user_id = ?",
            self.role.profile_table()
        );
        conn.query_row(&sql, [&self.user_id], |r| r.get(0))
            .optional()
            .map_err(query_failed)?
            .ok_or_else(|| AppError::not_found(format!("{} profile not found", self.role.as_str())))
    }
}

/// Staff see everyone; a student sees themselves; a parent sees linked children.
pub fn ensure_can_view_student(conn: &Connection, actor: &Actor, student_id: &str) -> AppResult<()> {
    let row: Option<(String, Option<String>)> = conn
        .query_row(
            "SELECT user_id, parent_id FROM students WHERE id = ?",
            [student_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(query_failed)?;
    let Some((student_user_id, parent_id)) = row else {
        return Err(AppError::not_found("student not found"));
    };
    let allowed = match actor.role {
        Role::Teacher | Role::Admin => true,
        Role::Student => student_user_id == actor.user_id,
        Role::Parent => match parent_id {
            Some(pid) => actor.profile_id(conn)? == pid,
            None => false,
        },
    };
    if allowed {
        Ok(())
    } else {
        Err(AppError::forbidden("not allowed to view this student"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        crate::db::create_schema(&conn).expect("schema");
        for (id, role) in [
            ("u-admin", "admin"),
            ("u-s1", "student"),
            ("u-s2", "student"),
            ("u-p", "parent"),
        ] {
            conn.execute(
                "INSERT INTO users(id, phone, password_hash, role, first_name, last_name, created_at)
                 VALUES(?, ?, 'x$y', ?, 'F', 'L', '2026-01-01T00:00:00Z')",
                (id, format!("+998{}", id), role),
            )
            .expect("user");
        }
        conn.execute("INSERT INTO parents(id, user_id) VALUES('p1', 'u-p')", [])
            .expect("parent");
        conn.execute(
            "INSERT INTO students(id, user_id, group_name, parent_id) VALUES('s1', 'u-s1', 'A', 'p1')",
            [],
        )
        .expect("s1");
        conn.execute(
            "INSERT INTO students(id, user_id, group_name, parent_id) VALUES('s2', 'u-s2', 'A', NULL)",
            [],
        )
        .expect("s2");
        conn
    }

    #[test]
    fn unknown_or_missing_actor_is_unauthenticated() {
        let conn = seeded();
        assert_eq!(resolve_actor(&conn, None).expect_err("none").code(), "unauthenticated");
        assert_eq!(
            resolve_actor(&conn, Some("ghost")).expect_err("ghost").code(),
            "unauthenticated"
        );
        let a = resolve_actor(&conn, Some("u-admin")).expect("admin");
        assert_eq!(a.role, Role::Admin);
    }

    #[test]
    fn student_and_parent_visibility() {
        let conn = seeded();
        let s1 = resolve_actor(&conn, Some("u-s1")).expect("s1");
        assert!(ensure_can_view_student(&conn, &s1, "s1").is_ok());
        assert_eq!(
            ensure_can_view_student(&conn, &s1, "s2").expect_err("other").code(),
            "forbidden"
        );

        let parent = resolve_actor(&conn, Some("u-p")).expect("parent");
        assert!(ensure_can_view_student(&conn, &parent, "s1").is_ok());
        assert!(ensure_can_view_student(&conn, &parent, "s2").is_err());

        let admin = resolve_actor(&conn, Some("u-admin")).expect("admin");
        assert!(ensure_can_view_student(&conn, &admin, "s2").is_ok());
        assert_eq!(
            ensure_can_view_student(&conn, &admin, "nope").expect_err("missing").code(),
            "not_found"
        );
    }
}
