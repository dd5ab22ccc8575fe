mod auth;
mod backup;
mod calc;
mod config;
mod db;
mod domain;
mod error;
mod ipc;
mod logging;
mod stats;

use clap::Parser;
use std::io::{self, BufRead, Write};

fn main() -> anyhow::Result<()> {
    let cfg = config::Config::parse();
    let _logger = logging::init_logging(&cfg.log_level)?;

    let mut state = ipc::AppState {
        workspace: None,
        db: None,
    };
    if let Some(path) = cfg.workspace {
        if let Err(e) = ipc::select_workspace(&mut state, path.clone()) {
            log::error!("could not open workspace {}: {e:#}", path.display());
        }
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                log::error!("stdin read failed: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // No id to echo back.
                log::debug!("bad request line: {}", e);
                let resp = ipc::err("", "bad_json", e.to_string(), None);
                writeln!(stdout, "{}", resp)?;
                stdout.flush()?;
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        writeln!(stdout, "{}", resp)?;
        stdout.flush()?;
    }
    log::info!("stdin closed, exiting");
    Ok(())
}
