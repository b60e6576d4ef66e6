use crate::ipc::error::ok;
use crate::ipc::helpers::{
    exam_average_display, exams_json, get_required_i64, get_required_str, get_student,
    notes_json, now_rfc3339, require_db, valid_date, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn add_note(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let student_id = get_required_i64(params, "studentId")?;
    let date = get_required_str(params, "date")?;
    let text = get_required_str(params, "text")?.trim().to_string();

    if text.is_empty() {
        return Err(HandlerErr::bad_params("text must not be empty"));
    }
    if !valid_date(&date) {
        return Err(HandlerErr::bad_params("date must be YYYY-MM-DD"));
    }
    if get_student(conn, student_id)?.is_none() {
        return Err(HandlerErr::not_found("student not found"));
    }

    conn.execute(
        "INSERT INTO student_notes(student_id, date, text, created_at) VALUES(?, ?, ?, ?)",
        rusqlite::params![student_id, date, text, now_rfc3339()],
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    let note_id = conn.last_insert_rowid();

    // Newest insertion first, same order the timeline renders in.
    Ok(json!({ "noteId": note_id, "teacherNotes": notes_json(conn, student_id)? }))
}

fn delete_note(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let student_id = get_required_i64(params, "studentId")?;
    let note_id = get_required_i64(params, "noteId")?;

    // Removing an already-gone note is a no-op, not an error.
    conn.execute(
        "DELETE FROM student_notes WHERE id = ? AND student_id = ?",
        [note_id, student_id],
    )
    .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;

    Ok(json!({ "teacherNotes": notes_json(conn, student_id)? }))
}

fn add_exam(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let student_id = get_required_i64(params, "studentId")?;
    let name = get_required_str(params, "name")?.trim().to_string();
    let date = get_required_str(params, "date")?;
    let score = params
        .get("score")
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr::bad_params("missing score"))?;

    if name.is_empty() {
        return Err(HandlerErr::bad_params("name must not be empty"));
    }
    if !valid_date(&date) {
        return Err(HandlerErr::bad_params("date must be YYYY-MM-DD"));
    }
    if !score.is_finite() {
        return Err(HandlerErr::bad_params("score must be a finite number"));
    }
    if get_student(conn, student_id)?.is_none() {
        return Err(HandlerErr::not_found("student not found"));
    }

    conn.execute(
        "INSERT INTO student_exams(student_id, name, date, score) VALUES(?, ?, ?, ?)",
        rusqlite::params![student_id, name, date, score],
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    let exam_id = conn.last_insert_rowid();

    let (exams, scores) = exams_json(conn, student_id)?;
    Ok(json!({
        "examId": exam_id,
        "exams": exams,
        "examAverage": exam_average_display(&scores),
    }))
}

fn delete_exam(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let student_id = get_required_i64(params, "studentId")?;
    let exam_id = get_required_i64(params, "examId")?;

    conn.execute(
        "DELETE FROM student_exams WHERE id = ? AND student_id = ?",
        [exam_id, student_id],
    )
    .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;

    let (exams, scores) = exams_json(conn, student_id)?;
    Ok(json!({
        "exams": exams,
        "examAverage": exam_average_display(&scores),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "notes.add" => add_note(state, &req.params),
        "notes.delete" => delete_note(state, &req.params),
        "exams.add" => add_exam(state, &req.params),
        "exams.delete" => delete_exam(state, &req.params),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
