mod calc;
mod config;
mod db;
mod ipc;
mod reports;
mod snapshot;

use std::io::{self, BufRead, Write};

use serde_json::json;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries the protocol; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .compact()
        .init();
}

fn main() {
    let config = config::Config::from_env();
    init_tracing(&config.log_level);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        mode = config.aggregation_mode.as_str(),
        "sigced starting"
    );

    let startup_workspace = config.workspace.clone();
    let mut state = ipc::AppState::new(config);
    if let Some(path) = startup_workspace {
        // Best-effort: the front end can still select a workspace later.
        if let Err(e) = ipc::select_workspace(&mut state, &path) {
            warn!(workspace = %path.display(), error = %e, "startup workspace not opened");
        }
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "stdin read failed; exiting");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id.
                warn!(error = %e, "bad request json");
                let _ = writeln!(
                    stdout,
                    "{}",
                    json!({
                        "ok": false,
                        "error": { "code": "bad_json", "message": e.to_string() }
                    })
                );
                let _ = stdout.flush();
                continue;
            }
        };

        debug!(id = %req.id, method = %req.method, "request");
        let id = req.id.clone();
        let method = req.method.clone();
        let resp = ipc::handle_request(&mut state, req);
        if resp.get("ok").and_then(|v| v.as_bool()) == Some(false) {
            warn!(
                id = %id,
                method = %method,
                code = resp["error"]["code"].as_str().unwrap_or("unknown"),
                "request failed"
            );
        }
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }

    info!("stdin closed; sigced exiting");
}
