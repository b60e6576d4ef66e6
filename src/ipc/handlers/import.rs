use crate::ipc::error::ok;
use crate::ipc::helpers::{now_rfc3339, query_failed, require_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

/// Level for a class created on the fly during import: a leading integer in
/// the class name ("9-A" -> 9), clamped to the valid range, else 0.
fn infer_level(class_name: &str) -> i64 {
    let digits: String = class_name.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse::<i64>().map(|v| v.clamp(0, 12)).unwrap_or(0)
}

fn find_or_create_class(conn: &Connection, class_name: &str) -> Result<i64, HandlerErr> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM classes WHERE name = ? ORDER BY id LIMIT 1",
            [class_name],
            |r| r.get(0),
        )
        .optional()
        .map_err(query_failed)?;
    if let Some(id) = existing {
        return Ok(id);
    }

    let now = now_rfc3339();
    conn.execute(
        "INSERT INTO classes(name, level, student_count, created_at, updated_at)
         VALUES(?, ?, 0, ?, ?)",
        rusqlite::params![class_name, infer_level(class_name), now, now],
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    Ok(conn.last_insert_rowid())
}

/// Bulk roster import. Each row commits as its own small unit of work, so a
/// failure mid-batch keeps the rows already imported and the caller gets
/// added/skipped counts instead of a whole-batch error.
fn import_rows(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let rows = params
        .get("rows")
        .and_then(|v| v.as_array())
        .ok_or_else(|| HandlerErr::bad_params("missing rows"))?;

    let mut added = 0usize;
    let mut skipped = 0usize;

    for row in rows {
        let name = row.get("name").and_then(|v| v.as_str()).unwrap_or("").trim();
        let class_name = row
            .get("className")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim();
        let number = row.get("number").and_then(|v| v.as_str()).unwrap_or("").trim();

        if name.is_empty() || class_name.is_empty() {
            skipped += 1;
            continue;
        }

        let tx = conn
            .unchecked_transaction()
            .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

        let class_id = find_or_create_class(&tx, class_name)?;

        // Duplicate key is (classId, number): a row colliding with an
        // existing active student is counted, not treated as an error.
        let duplicate: Option<i64> = tx
            .query_row(
                "SELECT id FROM students
                 WHERE class_id = ? AND number = ? AND status = 'active'",
                rusqlite::params![class_id, number],
                |r| r.get(0),
            )
            .optional()
            .map_err(query_failed)?;
        if duplicate.is_some() {
            tx.commit()
                .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
            skipped += 1;
            continue;
        }

        let now = now_rfc3339();
        tx.execute(
            "INSERT INTO students(class_id, number, name, notes, tags, status, created_at, updated_at)
             VALUES(?, ?, ?, '', '[]', 'active', ?, ?)",
            rusqlite::params![class_id, number, name, now, now],
        )
        .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
        tx.execute(
            "UPDATE classes SET student_count = student_count + 1 WHERE id = ?",
            [class_id],
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;

        tx.commit()
            .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
        added += 1;
    }

    Ok(json!({ "added": added, "skipped": skipped }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.importRows" => Some(match import_rows(state, &req.params) {
            Ok(v) => ok(&req.id, v),
            Err(e) => e.response(&req.id),
        }),
        _ => None,
    }
}
