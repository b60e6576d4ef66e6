use crate::ipc::error::ok;
use crate::ipc::helpers::{get_optional_i64, query_failed, require_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::Datelike;
use serde_json::json;

const DEFAULT_TERMINAL_LEVEL: i64 = 12;

struct ClassRow {
    id: i64,
    name: String,
    level: i64,
}

/// Advance the school year: every non-terminal class moves up one level,
/// every terminal class graduates its students and is removed. The whole
/// batch commits as one unit of work; on any failure nothing is applied.
fn year_transition(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;

    let terminal_level = get_optional_i64(params, "terminalLevel").unwrap_or(DEFAULT_TERMINAL_LEVEL);
    if !(1..=12).contains(&terminal_level) {
        return Err(HandlerErr::bad_params("terminalLevel must be between 1 and 12"));
    }
    let year = get_optional_i64(params, "year")
        .unwrap_or_else(|| i64::from(chrono::Local::now().year()));

    let classes = {
        let mut stmt = conn
            .prepare("SELECT id, name, level FROM classes")
            .map_err(query_failed)?;
        stmt.query_map([], |r| {
            Ok(ClassRow {
                id: r.get(0)?,
                name: r.get(1)?,
                level: r.get(2)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?
    };

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("transition_failed", e.to_string()))?;

    let aborted = |e: rusqlite::Error| HandlerErr::new("transition_failed", e.to_string());

    let mut advanced = 0usize;
    let mut graduated_students = 0usize;
    let mut removed = 0usize;

    for class in &classes {
        if class.level >= terminal_level {
            continue;
        }
        let new_level = class.level + 1;
        // Best-effort cosmetic rename: "9-A" becomes "10-A". Names that do
        // not contain the old level as a literal substring are left alone.
        let old_token = class.level.to_string();
        let new_name = if class.name.contains(&old_token) {
            class.name.replacen(&old_token, &new_level.to_string(), 1)
        } else {
            class.name.clone()
        };
        tx.execute(
            "UPDATE classes SET level = ?, name = ?, updated_at = ? WHERE id = ?",
            rusqlite::params![new_level, new_name, crate::ipc::helpers::now_rfc3339(), class.id],
        )
        .map_err(aborted)?;
        advanced += 1;
    }

    // Class names are captured from the pre-transition snapshot, so the
    // prev_class stamp is independent of the deletes below.
    for class in &classes {
        if class.level < terminal_level {
            continue;
        }
        graduated_students += tx
            .execute(
                "UPDATE students SET
                   status = 'graduated',
                   grad_year = ?,
                   prev_class = ?,
                   class_id = NULL,
                   updated_at = ?
                 WHERE class_id = ?",
                rusqlite::params![year, class.name, crate::ipc::helpers::now_rfc3339(), class.id],
            )
            .map_err(aborted)?;
        tx.execute("DELETE FROM classes WHERE id = ?", [class.id])
            .map_err(aborted)?;
        removed += 1;
    }

    tx.commit().map_err(aborted)?;

    Ok(json!({
        "year": year,
        "advancedClasses": advanced,
        "removedClasses": removed,
        "graduatedStudents": graduated_students,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "year.transition" => Some(match year_transition(state, &req.params) {
            Ok(v) => ok(&req.id, v),
            Err(e) => e.response(&req.id),
        }),
        _ => None,
    }
}
