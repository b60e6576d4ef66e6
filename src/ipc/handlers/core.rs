use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{require_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "schemaVersion": db::SCHEMA_VERSION,
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match db::open_db(&path) {
        Ok(conn) => {
            state.workspace = Some(path.clone());
            state.db = Some(conn);
            ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
        }
        Err(e) => err(
            &req.id,
            "db_open_failed",
            format!("cannot open workspace database: {e}"),
            None,
        ),
    }
}

// Full reset: every collection emptied in one transaction. The profile row
// goes with it, so the next profile.get reports first launch again.
fn reset_data(state: &AppState) -> Result<(), HandlerErr> {
    let conn = require_db(state)?;
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    for table in [
        "student_notes",
        "student_exams",
        "students",
        "classes",
        "plans",
        "teacher_profile",
    ] {
        tx.execute(&format!("DELETE FROM {}", table), [])
            .map_err(|e| HandlerErr {
                code: "db_delete_failed",
                message: e.to_string(),
                details: Some(json!({ "table": table })),
            })?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))
}

fn handle_data_reset(state: &mut AppState, req: &Request) -> serde_json::Value {
    match reset_data(state) {
        Ok(()) => ok(&req.id, json!({ "reset": true })),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "data.reset" => Some(handle_data_reset(state, req)),
        _ => None,
    }
}
