use rusqlite::ffi;
use serde_json::json;
use thiserror::Error;

/// Failure of a single request. Every variant maps to a stable wire code.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadParams(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("missing or unknown actor")]
    Unauthenticated,
    #[error("{0}")]
    Forbidden(String),
    #[error("select a workspace first")]
    NoWorkspace,
    #[error("database error")]
    Db {
        code: &'static str,
        table: Option<&'static str>,
        #[source]
        source: rusqlite::Error,
    },
    #[error("failed to open workspace database")]
    DbOpen(String),
    #[error("backup failed")]
    Backup(String),
    #[error("internal error")]
    Internal(String),
}

impl AppError {
    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::BadParams(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::BadParams(_) => "bad_params",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Unauthenticated => "unauthenticated",
            Self::Forbidden(_) => "forbidden",
            Self::NoWorkspace => "no_workspace",
            Self::Db { code, .. } => code,
            Self::DbOpen(_) => "db_open_failed",
            Self::Backup(_) => "backup_failed",
            Self::Internal(_) => "internal",
        }
    }

    /// Extra payload for the `error.details` field.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::Db { table, source, .. } => {
                let mut d = json!({ "cause": source.to_string() });
                if let Some(t) = table {
                    d["table"] = json!(t);
                }
                Some(d)
            }
            Self::DbOpen(cause) | Self::Backup(cause) | Self::Internal(cause) => Some(json!({ "cause": cause })),
            _ => None,
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

pub fn query_failed(source: rusqlite::Error) -> AppError {
    AppError::Db {
        code: "db_query_failed",
        table: None,
        source,
    }
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                || f.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

/// Maps an INSERT failure; unique violations become `conflict`.
pub fn insert_failed(table: &'static str) -> impl FnOnce(rusqlite::Error) -> AppError {
    move |source| {
        if is_unique_violation(&source) {
            return AppError::Conflict(format!("duplicate row in {}", table));
        }
        AppError::Db {
            code: "db_insert_failed",
            table: Some(table),
            source,
        }
    }
}

pub fn update_failed(table: &'static str) -> impl FnOnce(rusqlite::Error) -> AppError {
    move |source| AppError::Db {
        code: "db_update_failed",
        table: Some(table),
        source,
    }
}

pub fn delete_failed(table: &'static str) -> impl FnOnce(rusqlite::Error) -> AppError {
    move |source| AppError::Db {
        code: "db_delete_failed",
        table: Some(table),
        source,
    }
}

pub fn tx_failed(source: rusqlite::Error) -> AppError {
    AppError::Db {
        code: "db_tx_failed",
        table: None,
        source,
    }
}

pub fn commit_failed(source: rusqlite::Error) -> AppError {
    AppError::Db {
        code: "db_commit_failed",
        table: None,
        source,
    }
}
