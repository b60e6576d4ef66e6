use crate::ipc::error::ok;
use crate::ipc::handlers::profile::load_profile;
use crate::ipc::helpers::{
    get_required_i64, get_student, query_failed, require_db, student_detail_json, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;

/// Read-only view model for the printable student card: teacher profile,
/// full student record, and the resolved class name. For graduated students
/// the class was deleted, so the snapshot taken at graduation is used.
fn student_card(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let student_id = get_required_i64(params, "studentId")?;

    let student = get_student(conn, student_id)?
        .ok_or_else(|| HandlerErr::not_found("student not found"))?;

    let class_name: Option<String> = match student.class_id {
        Some(class_id) => conn
            .query_row("SELECT name FROM classes WHERE id = ?", [class_id], |r| {
                r.get(0)
            })
            .optional()
            .map_err(query_failed)?,
        None => student.prev_class.clone(),
    };

    let teacher = load_profile(conn)?;
    let graduated = student.status == "graduated";
    let student = student_detail_json(conn, &student)?;

    Ok(json!({
        "teacher": teacher,
        "student": student,
        "className": class_name,
        "graduated": graduated,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.studentCard" => Some(match student_card(state, &req.params) {
            Ok(v) => ok(&req.id, v),
            Err(e) => e.response(&req.id),
        }),
        _ => None,
    }
}
