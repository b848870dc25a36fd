use rusqlite::Connection;
use serde_json::json;

use crate::calc::AggregationMode;
use crate::db;
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};

pub const AGGREGATION_MODE_KEY: &str = "rollup.aggregation_mode";

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn parse_mode_value(req: &Request, raw: &serde_json::Value) -> Result<AggregationMode, serde_json::Value> {
    raw.as_str()
        .and_then(AggregationMode::parse)
        .ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                "mode must be one of: average, sum",
                Some(json!({ "mode": raw })),
            )
        })
}

/// Workspace setting if one was saved and is readable, otherwise `None`.
pub fn workspace_mode(conn: &Connection) -> Option<AggregationMode> {
    match db::settings_get_json(conn, AGGREGATION_MODE_KEY) {
        Ok(saved) => saved
            .as_ref()
            .and_then(|v| v.get("mode"))
            .and_then(|v| v.as_str())
            .and_then(AggregationMode::parse),
        Err(e) => {
            tracing::warn!(error = %e, "ignoring unreadable aggregation mode setting");
            None
        }
    }
}

/// Request `mode` beats the workspace setting, which beats the config default.
pub fn resolve_mode(
    state: &AppState,
    conn: &Connection,
    req: &Request,
) -> Result<AggregationMode, serde_json::Value> {
    match req.params.get("mode") {
        Some(v) if !v.is_null() => parse_mode_value(req, v),
        _ => Ok(workspace_mode(conn).unwrap_or(state.config.aggregation_mode)),
    }
}
