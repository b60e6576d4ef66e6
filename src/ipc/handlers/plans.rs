use crate::ipc::error::ok;
use crate::ipc::helpers::{
    get_optional_str, get_required_i64, get_required_str, now_rfc3339, query_failed, require_db,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use sha2::{Digest, Sha256};

fn check_plan_type(plan_type: &str) -> Result<(), HandlerErr> {
    if plan_type != "yearly" && plan_type != "weekly" {
        return Err(HandlerErr::bad_params("type must be yearly or weekly"));
    }
    Ok(())
}

fn create_plan(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;

    let title = get_required_str(params, "title")?.trim().to_string();
    if title.is_empty() {
        return Err(HandlerErr::bad_params("title must not be empty"));
    }
    let plan_type = get_required_str(params, "type")?;
    check_plan_type(&plan_type)?;
    let file_name = get_required_str(params, "fileName")?;
    let file_data = get_required_str(params, "fileData")?;
    if file_data.is_empty() {
        return Err(HandlerErr::bad_params("fileData must not be empty"));
    }
    let file_type = get_optional_str(params, "fileType");

    // Checksum of the stored payload, kept alongside it so a later read can
    // detect a corrupted attachment.
    let checksum = format!("{:x}", Sha256::digest(file_data.as_bytes()));

    conn.execute(
        "INSERT INTO plans(title, plan_type, file_name, file_type, file_data, checksum, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![title, plan_type, file_name, file_type, file_data, checksum, now_rfc3339()],
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "plans" })),
    })?;

    Ok(json!({ "planId": conn.last_insert_rowid(), "checksum": checksum }))
}

fn list_plans(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let plan_type = get_required_str(params, "type")?;
    check_plan_type(&plan_type)?;

    // Metadata only; the payload is fetched per plan via plans.get.
    let mut stmt = conn
        .prepare(
            "SELECT id, title, file_name, file_type, checksum, created_at
             FROM plans WHERE plan_type = ?
             ORDER BY id DESC",
        )
        .map_err(query_failed)?;
    let plans = stmt
        .query_map([&plan_type], |r| {
            let id: i64 = r.get(0)?;
            let title: String = r.get(1)?;
            let file_name: String = r.get(2)?;
            let file_type: Option<String> = r.get(3)?;
            let checksum: Option<String> = r.get(4)?;
            let created_at: Option<String> = r.get(5)?;
            Ok(json!({
                "id": id,
                "title": title,
                "type": plan_type,
                "fileName": file_name,
                "fileType": file_type,
                "checksum": checksum,
                "createdAt": created_at,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;

    Ok(json!({ "plans": plans }))
}

fn get_plan(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let plan_id = get_required_i64(params, "planId")?;

    let plan = conn
        .query_row(
            "SELECT id, title, plan_type, file_name, file_type, file_data, checksum, created_at
             FROM plans WHERE id = ?",
            [plan_id],
            |r| {
                let id: i64 = r.get(0)?;
                let title: String = r.get(1)?;
                let plan_type: String = r.get(2)?;
                let file_name: String = r.get(3)?;
                let file_type: Option<String> = r.get(4)?;
                let file_data: String = r.get(5)?;
                let checksum: Option<String> = r.get(6)?;
                let created_at: Option<String> = r.get(7)?;
                Ok(json!({
                    "id": id,
                    "title": title,
                    "type": plan_type,
                    "fileName": file_name,
                    "fileType": file_type,
                    "fileData": file_data,
                    "checksum": checksum,
                    "createdAt": created_at,
                }))
            },
        )
        .optional()
        .map_err(query_failed)?
        .ok_or_else(|| HandlerErr::not_found("plan not found"))?;

    Ok(json!({ "plan": plan }))
}

fn delete_plan(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let plan_id = get_required_i64(params, "planId")?;

    let removed = conn
        .execute("DELETE FROM plans WHERE id = ?", [plan_id])
        .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;

    Ok(json!({ "planId": plan_id, "deleted": removed > 0 }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "plans.create" => create_plan(state, &req.params),
        "plans.list" => list_plans(state, &req.params),
        "plans.get" => get_plan(state, &req.params),
        "plans.delete" => delete_plan(state, &req.params),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
