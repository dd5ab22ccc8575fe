use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

type TryHandle = fn(&mut AppState, &Request) -> Option<serde_json::Value>;

const HANDLERS: &[TryHandle] = &[
    handlers::core::try_handle,
    handlers::users::try_handle,
    handlers::curriculum::try_handle,
    handlers::materials::try_handle,
    handlers::questions::try_handle,
    handlers::attendance::try_handle,
    handlers::comments::try_handle,
    handlers::exams::try_handle,
    handlers::stats::try_handle,
    handlers::dashboards::try_handle,
];

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    for &try_handle in HANDLERS {
        if let Some(resp) = try_handle(state, &req) {
            log_outcome(&req, &resp);
            return resp;
        }
    }

    log::warn!("unknown method: {}", req.method);
    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}

/// Server-side failures go out at warn; everything else stays at debug.
fn log_outcome(req: &Request, resp: &serde_json::Value) {
    if resp.get("ok").and_then(|v| v.as_bool()) == Some(true) {
        log::debug!("{} ok", req.method);
        return;
    }
    let code = resp
        .pointer("/error/code")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown");
    if code.starts_with("db_") || code == "internal" || code == "backup_failed" {
        let cause = resp
            .pointer("/error/details/cause")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        log::warn!("{} failed: {} {}", req.method, code, cause);
    } else {
        log::debug!("{} rejected: {}", req.method, code);
    }
}
