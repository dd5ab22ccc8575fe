use crate::backup;
use crate::db;
use crate::domain::Role;
use crate::error::{query_failed, AppError, AppResult};
use crate::ipc::access::resolve_actor;
use crate::ipc::error::respond;
use crate::ipc::helpers::{db_conn, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    respond(
        &req.id,
        Ok(json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        })),
    )
}

pub fn select_workspace(state: &mut AppState, path: PathBuf) -> anyhow::Result<()> {
    let conn = db::open_db(&path)?;
    log::info!("workspace opened: {}", path.display());
    state.workspace = Some(path);
    state.db = Some(conn);
    Ok(())
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = required_str(&req.params, "path").and_then(|p| {
        let path = PathBuf::from(p);
        select_workspace(state, path.clone()).map_err(|e| AppError::DbOpen(format!("{e:#}")))?;
        Ok(json!({ "workspacePath": path.to_string_lossy() }))
    });
    respond(&req.id, result)
}

/// Backups need an admin, except while the workspace has no users yet.
/// With no workspace open there is nothing to protect, so a restore may run.
fn require_backup_rights(state: &AppState, req: &Request) -> AppResult<()> {
    let Some(conn) = state.db.as_ref() else {
        return Ok(());
    };
    let users: i64 = conn
        .query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))
        .map_err(query_failed)?;
    if users == 0 {
        return Ok(());
    }
    resolve_actor(conn, req.actor.as_deref())?.require(&[Role::Admin])
}

fn backup_export(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = db_conn(state)?;
    require_backup_rights(state, req)?;
    let out_path = required_str(&req.params, "outPath")?;
    let export = backup::export_workspace_bundle(conn, &PathBuf::from(&out_path))
        .map_err(|e| AppError::Backup(format!("{e:#}")))?;
    log::info!("workspace exported to {}", out_path);
    Ok(json!({
        "path": out_path,
        "bundleFormat": export.manifest.format,
        "entryCount": export.entry_count,
        "dbSha256": export.manifest.db_sha256,
        "userCount": export.manifest.user_count,
    }))
}

fn backup_import(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    require_backup_rights(state, req)?;
    let in_path = required_str(&req.params, "inPath")?;
    let workspace_path = match req.params.get("workspacePath").and_then(|v| v.as_str()) {
        Some(p) if !p.trim().is_empty() => PathBuf::from(p.trim()),
        _ => state.workspace.clone().ok_or(AppError::NoWorkspace)?,
    };
    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return Err(AppError::not_found("bundle file not found"));
    }

    // Drop the open handle before replacing the file.
    state.db = None;
    let previous = state.workspace.take();

    let outcome = backup::import_workspace_bundle(&src, &workspace_path)
        .map_err(|e| AppError::Backup(format!("{e:#}")))
        .and_then(|import| {
            select_workspace(state, workspace_path.clone())
                .map_err(|e| AppError::DbOpen(format!("{e:#}")))?;
            Ok(import)
        });
    let import = match outcome {
        Ok(v) => v,
        Err(e) => {
            if let Some(prev) = previous {
                if let Err(reopen) = select_workspace(state, prev) {
                    log::error!("could not reopen workspace after failed import: {reopen:#}");
                }
            }
            return Err(e);
        }
    };
    log::info!("workspace restored from {}", in_path);
    Ok(json!({
        "workspacePath": workspace_path.to_string_lossy(),
        "bundleFormatDetected": import.manifest.format,
        "exportedAt": import.manifest.exported_at,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "backup.exportWorkspaceBundle" => {
            let result = backup_export(state, req);
            Some(respond(&req.id, result))
        }
        "backup.importWorkspaceBundle" => {
            let result = backup_import(state, req);
            Some(respond(&req.id, result))
        }
        _ => None,
    }
}
