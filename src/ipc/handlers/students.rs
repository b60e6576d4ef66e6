use crate::ipc::error::ok;
use crate::ipc::helpers::{
    class_exists, get_optional_i64, get_optional_str, get_required_i64, get_required_str,
    get_student, now_rfc3339, parse_tags, query_failed, require_db, student_detail_json,
    student_from_row, student_json, HandlerErr, STUDENT_COLUMNS,
};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn parent_field(params: &serde_json::Value, parent: &str, field: &str) -> Option<String> {
    params
        .get("parents")
        .and_then(|p| p.get(parent))
        .and_then(|p| p.get(field))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

fn list_students(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let class_id = get_required_i64(params, "classId")?;

    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM students
             WHERE class_id = ? AND status = 'active'
             ORDER BY number, name",
            STUDENT_COLUMNS
        ))
        .map_err(query_failed)?;
    let students = stmt
        .query_map([class_id], |r| student_from_row(r))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;

    let students: Vec<serde_json::Value> = students.iter().map(student_json).collect();
    Ok(json!({ "students": students }))
}

fn get_student_detail(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let student_id = get_required_i64(params, "studentId")?;
    let row = get_student(conn, student_id)?
        .ok_or_else(|| HandlerErr::not_found("student not found"))?;
    Ok(json!({ "student": student_detail_json(conn, &row)? }))
}

fn create_student(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;

    let class_id = get_required_i64(params, "classId")?;
    let name = get_required_str(params, "name")?.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr::bad_params("name must not be empty"));
    }
    let number = get_optional_str(params, "number").unwrap_or_default();
    let notes = get_optional_str(params, "notes").unwrap_or_default();
    let photo = get_optional_str(params, "photo");
    let tags = match params.get("tags") {
        Some(v) => parse_tags(v)?,
        None => Vec::new(),
    };
    let tags_json = serde_json::to_string(&tags)
        .map_err(|e| HandlerErr::bad_params(format!("invalid tags: {}", e)))?;

    if !class_exists(conn, class_id)? {
        return Err(HandlerErr::not_found("class not found"));
    }

    // Insert and the owning class's count bump are one unit of work.
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    let now = now_rfc3339();
    tx.execute(
        "INSERT INTO students(
            class_id, number, name,
            mother_name, mother_tel, father_name, father_tel,
            notes, tags, photo, status, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'active', ?, ?)",
        rusqlite::params![
            class_id,
            number,
            name,
            parent_field(params, "mother", "name"),
            parent_field(params, "mother", "tel"),
            parent_field(params, "father", "name"),
            parent_field(params, "father", "tel"),
            notes,
            tags_json,
            photo,
            now,
            now,
        ],
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "students" })),
    })?;
    let student_id = tx.last_insert_rowid();

    tx.execute(
        "UPDATE classes SET student_count = student_count + 1 WHERE id = ?",
        [class_id],
    )
    .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({ "studentId": student_id }))
}

fn update_student(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let student_id = get_required_i64(params, "studentId")?;
    let patch = params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::bad_params("missing patch"))?;

    // Read-then-merge: fields absent from the patch keep their stored
    // values. Status, graduation fields, class membership, notes and exams
    // are not editable here at all.
    let existing = get_student(conn, student_id)?
        .ok_or_else(|| HandlerErr::not_found("student not found"))?;

    let name = match patch.get("name").and_then(|v| v.as_str()) {
        Some(n) => {
            let n = n.trim().to_string();
            if n.is_empty() {
                return Err(HandlerErr::bad_params("name must not be empty"));
            }
            n
        }
        None => existing.name.clone(),
    };
    let number = patch
        .get("number")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| existing.number.clone());
    let notes = patch
        .get("notes")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| existing.notes.clone());
    let photo = match patch.get("photo") {
        Some(serde_json::Value::Null) => None,
        Some(v) => v.as_str().map(|s| s.to_string()),
        None => existing.photo.clone(),
    };
    let tags_json = match patch.get("tags") {
        Some(v) => {
            let tags = parse_tags(v)?;
            serde_json::to_string(&tags)
                .map_err(|e| HandlerErr::bad_params(format!("invalid tags: {}", e)))?
        }
        None => existing.tags.clone(),
    };

    let patch_value = serde_json::Value::Object(patch.clone());
    let mother_name = if patch.contains_key("parents") {
        parent_field(&patch_value, "mother", "name")
    } else {
        existing.mother_name.clone()
    };
    let mother_tel = if patch.contains_key("parents") {
        parent_field(&patch_value, "mother", "tel")
    } else {
        existing.mother_tel.clone()
    };
    let father_name = if patch.contains_key("parents") {
        parent_field(&patch_value, "father", "name")
    } else {
        existing.father_name.clone()
    };
    let father_tel = if patch.contains_key("parents") {
        parent_field(&patch_value, "father", "tel")
    } else {
        existing.father_tel.clone()
    };

    conn.execute(
        "UPDATE students SET
           number = ?, name = ?,
           mother_name = ?, mother_tel = ?, father_name = ?, father_tel = ?,
           notes = ?, tags = ?, photo = ?, updated_at = ?
         WHERE id = ?",
        rusqlite::params![
            number,
            name,
            mother_name,
            mother_tel,
            father_name,
            father_tel,
            notes,
            tags_json,
            photo,
            now_rfc3339(),
            student_id,
        ],
    )
    .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;

    Ok(json!({ "studentId": student_id }))
}

fn delete_student(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let student_id = get_required_i64(params, "studentId")?;

    let existing = get_student(conn, student_id)?
        .ok_or_else(|| HandlerErr::not_found("student not found"))?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    for (sql, table) in [
        ("DELETE FROM student_notes WHERE student_id = ?", "student_notes"),
        ("DELETE FROM student_exams WHERE student_id = ?", "student_exams"),
        ("DELETE FROM students WHERE id = ?", "students"),
    ] {
        tx.execute(sql, [student_id]).map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": table })),
        })?;
    }

    // Keep the cached roster size in step with the row removal.
    if let (Some(class_id), "active") = (existing.class_id, existing.status.as_str()) {
        tx.execute(
            "UPDATE classes SET student_count = MAX(student_count - 1, 0) WHERE id = ?",
            [class_id],
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({ "studentId": student_id, "deleted": true }))
}

fn list_alumni(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let year = get_optional_i64(params, "year");

    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM students
             WHERE status = 'graduated' AND (?1 IS NULL OR grad_year = ?1)
             ORDER BY grad_year DESC, name",
            STUDENT_COLUMNS
        ))
        .map_err(query_failed)?;
    let alumni = stmt
        .query_map([year], |r| student_from_row(r))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;

    let alumni: Vec<serde_json::Value> = alumni.iter().map(student_json).collect();
    Ok(json!({ "alumni": alumni }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "students.list" => list_students(state, &req.params),
        "students.get" => get_student_detail(state, &req.params),
        "students.create" => create_student(state, &req.params),
        "students.update" => update_student(state, &req.params),
        "students.delete" => delete_student(state, &req.params),
        "alumni.list" => list_alumni(state, &req.params),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
