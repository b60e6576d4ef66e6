use crate::ipc::error::ok;
use crate::ipc::helpers::{
    class_exists, get_optional_i64, get_optional_str, get_required_i64, get_required_str,
    now_rfc3339, query_failed, require_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn list_classes(state: &AppState) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;

    // studentCount is recomputed here from the class_id index; the cached
    // column only backs incremental maintenance and is not trusted for
    // display. Correlated subquery avoids double-counting from joins.
    let mut stmt = conn
        .prepare(
            "SELECT
               c.id,
               c.name,
               c.level,
               (SELECT COUNT(*) FROM students s
                WHERE s.class_id = c.id AND s.status = 'active') AS student_count
             FROM classes c
             ORDER BY c.level, c.name",
        )
        .map_err(query_failed)?;

    let classes = stmt
        .query_map([], |row| {
            let id: i64 = row.get(0)?;
            let name: String = row.get(1)?;
            let level: i64 = row.get(2)?;
            let student_count: i64 = row.get(3)?;
            Ok(json!({
                "id": id,
                "name": name,
                "level": level,
                "studentCount": student_count,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;

    Ok(json!({ "classes": classes }))
}

fn check_level(level: i64) -> Result<(), HandlerErr> {
    // 0 is the ungraded/prep level.
    if !(0..=12).contains(&level) {
        return Err(HandlerErr::bad_params("level must be between 0 and 12"));
    }
    Ok(())
}

fn create_class(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;

    let name = get_required_str(params, "name")?.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr::bad_params("name must not be empty"));
    }
    let level = get_required_i64(params, "level")?;
    check_level(level)?;

    let now = now_rfc3339();
    conn.execute(
        "INSERT INTO classes(name, level, student_count, created_at, updated_at)
         VALUES(?, ?, 0, ?, ?)",
        (&name, level, &now, &now),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "classes" })),
    })?;
    let class_id = conn.last_insert_rowid();

    Ok(json!({ "classId": class_id, "name": name, "level": level }))
}

fn update_class(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let class_id = get_required_i64(params, "classId")?;

    if !class_exists(conn, class_id)? {
        return Err(HandlerErr::not_found("class not found"));
    }

    let name = match get_optional_str(params, "name") {
        Some(n) => {
            let n = n.trim().to_string();
            if n.is_empty() {
                return Err(HandlerErr::bad_params("name must not be empty"));
            }
            Some(n)
        }
        None => None,
    };
    let level = get_optional_i64(params, "level");
    if let Some(level) = level {
        check_level(level)?;
    }
    if name.is_none() && level.is_none() {
        return Err(HandlerErr::bad_params("nothing to update"));
    }

    // Partial update: untouched fields keep their stored values.
    conn.execute(
        "UPDATE classes SET
           name = COALESCE(?, name),
           level = COALESCE(?, level),
           updated_at = ?
         WHERE id = ?",
        (&name, level, now_rfc3339(), class_id),
    )
    .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;

    Ok(json!({ "classId": class_id }))
}

fn delete_class(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let class_id = get_required_i64(params, "classId")?;
    let mode = get_optional_str(params, "mode").unwrap_or_else(|| "cascade".to_string());
    if mode != "cascade" && mode != "detach" {
        return Err(HandlerErr::bad_params("mode must be cascade or detach"));
    }

    if !class_exists(conn, class_id)? {
        return Err(HandlerErr::not_found("class not found"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    let run = |sql: &str, table: &str| -> Result<usize, HandlerErr> {
        tx.execute(sql, [class_id]).map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": table })),
        })
    };

    let detached_or_deleted;
    if mode == "cascade" {
        // Explicitly delete in dependency order (no ON DELETE CASCADE).
        run(
            "DELETE FROM student_notes
             WHERE student_id IN (SELECT id FROM students WHERE class_id = ?)",
            "student_notes",
        )?;
        run(
            "DELETE FROM student_exams
             WHERE student_id IN (SELECT id FROM students WHERE class_id = ?)",
            "student_exams",
        )?;
        detached_or_deleted = run("DELETE FROM students WHERE class_id = ?", "students")?;
    } else {
        // Detached students stay active with no class.
        detached_or_deleted = tx
            .execute(
                "UPDATE students SET class_id = NULL WHERE class_id = ?",
                [class_id],
            )
            .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }
    run("DELETE FROM classes WHERE id = ?", "classes")?;

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({
        "classId": class_id,
        "mode": mode,
        "studentsAffected": detached_or_deleted,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "classes.list" => list_classes(state),
        "classes.create" => create_class(state, &req.params),
        "classes.update" => update_class(state, &req.params),
        "classes.delete" => delete_class(state, &req.params),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
