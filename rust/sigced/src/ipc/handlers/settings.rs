use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, parse_mode_value, workspace_mode, AGGREGATION_MODE_KEY};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use tracing::info;

fn handle_aggregation_mode_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (mode, source) = match workspace_mode(conn) {
        Some(m) => (m, "workspace"),
        None => (state.config.aggregation_mode, "config"),
    };
    ok(&req.id, json!({ "mode": mode, "source": source }))
}

fn handle_aggregation_mode_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(raw) = req.params.get("mode") else {
        return err(&req.id, "bad_params", "missing mode", None);
    };
    let mode = match parse_mode_value(req, raw) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = db::settings_set_json(conn, AGGREGATION_MODE_KEY, &json!({ "mode": mode })) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    info!(mode = mode.as_str(), "aggregation mode saved");
    ok(&req.id, json!({ "mode": mode }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "settings.aggregationMode.get" => Some(handle_aggregation_mode_get(state, req)),
        "settings.aggregationMode.set" => Some(handle_aggregation_mode_set(state, req)),
        _ => None,
    }
}
