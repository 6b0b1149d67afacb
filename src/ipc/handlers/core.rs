use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_patch, with_db, HandlerErr, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::config::Config;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::{info, warn};

const ACADEMY_KEY: &str = "academy.profile";

/// Academy identity printed on report headers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AcademyProfile {
    pub name: String,
    pub applicant_name: String,
    pub sgb: String,
    pub club: String,
    pub phone: String,
    pub address: String,
}

impl Default for AcademyProfile {
    fn default() -> Self {
        AcademyProfile {
            name: "Masters Taekwon-Do Academy".to_string(),
            applicant_name: "VENUGOPALAN".to_string(),
            sgb: "UTAK".to_string(),
            club: "MASTERS TAEKWON-DO ACADEMY".to_string(),
            phone: String::new(),
            address: String::new(),
        }
    }
}

pub fn load_academy(conn: &Connection) -> Result<AcademyProfile, HandlerErr> {
    let stored = db::settings_get_json(conn, ACADEMY_KEY)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    match stored {
        Some(v) => serde_json::from_value(v)
            .map_err(|e| HandlerErr::new("db_query_failed", format!("bad academy profile: {}", e))),
        None => Ok(AcademyProfile::default()),
    }
}

fn handle_health(state: &mut AppState, req: &Request) -> Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "today": state.config.today().format("%Y-%m-%d").to_string(),
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match db::open_db(&path) {
        Ok(conn) => {
            info!(workspace = %path.display(), "workspace selected");
            state.workspace = Some(path.clone());
            state.db = Some(conn);
            ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
        }
        Err(e) => {
            warn!(workspace = %path.display(), error = %e, "failed to open workspace");
            err(&req.id, "db_open_failed", format!("{e:?}"), None)
        }
    }
}

fn academy_get(conn: &Connection, _config: &Config, _params: &Value) -> HandlerResult {
    let profile = load_academy(conn)?;
    Ok(json!({ "academy": profile }))
}

fn academy_update(conn: &Connection, _config: &Config, params: &Value) -> HandlerResult {
    let patch = get_patch(params)?;
    let mut merged = serde_json::to_value(load_academy(conn)?)
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    for (k, v) in patch {
        if merged.get(k).is_none() {
            return Err(HandlerErr::bad_params(format!("unknown academy field: {}", k)));
        }
        let Some(s) = v.as_str() else {
            return Err(HandlerErr::bad_params(format!("{} must be a string", k)));
        };
        merged[k.as_str()] = Value::String(s.trim().to_string());
    }
    let profile: AcademyProfile = serde_json::from_value(merged)
        .map_err(|e| HandlerErr::bad_params(e.to_string()))?;
    let value = serde_json::to_value(&profile)
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    db::settings_set_json(conn, ACADEMY_KEY, &value)
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    info!(fields = patch.len(), "academy profile updated");
    Ok(json!({ "academy": profile }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "academy.get" => Some(with_db(state, req, academy_get)),
        "academy.update" => Some(with_db(state, req, academy_update)),
        _ => None,
    }
}
