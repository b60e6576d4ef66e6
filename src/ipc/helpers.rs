use crate::ipc::error::err;
use crate::ipc::types::AppState;
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

/// Handler-internal failure, carried through `?` and turned into the wire
/// error object at the method boundary.
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        HandlerErr {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        HandlerErr::new("bad_params", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        HandlerErr::new("not_found", message)
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn query_failed(e: rusqlite::Error) -> HandlerErr {
    HandlerErr::new("db_query_failed", e.to_string())
}

pub fn require_db(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

pub fn get_required_i64(params: &serde_json::Value, key: &str) -> Result<i64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_i64(params: &serde_json::Value, key: &str) -> Option<i64> {
    params.get(key).and_then(|v| v.as_i64())
}

/// Behavioral tags a student may carry. Unknown values are rejected before
/// anything is written.
pub const ALLOWED_TAGS: [&str; 4] = ["success", "follow_up", "support", "passive"];

pub fn parse_tags(value: &serde_json::Value) -> Result<Vec<String>, HandlerErr> {
    let raw = value
        .as_array()
        .ok_or_else(|| HandlerErr::bad_params("tags must be an array"))?;
    let mut tags: Vec<String> = Vec::new();
    for item in raw {
        let tag = item
            .as_str()
            .ok_or_else(|| HandlerErr::bad_params("tags must be strings"))?;
        if !ALLOWED_TAGS.contains(&tag) {
            return Err(HandlerErr::bad_params(format!("unknown tag: {}", tag)));
        }
        if !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
    }
    Ok(tags)
}

pub fn valid_date(s: &str) -> bool {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[derive(Debug, Clone)]
pub struct StudentRow {
    pub id: i64,
    pub class_id: Option<i64>,
    pub number: String,
    pub name: String,
    pub mother_name: Option<String>,
    pub mother_tel: Option<String>,
    pub father_name: Option<String>,
    pub father_tel: Option<String>,
    pub notes: String,
    pub tags: String,
    pub photo: Option<String>,
    pub status: String,
    pub grad_year: Option<i64>,
    pub prev_class: Option<String>,
}

pub const STUDENT_COLUMNS: &str = "id, class_id, number, name, mother_name, mother_tel, \
     father_name, father_tel, notes, tags, photo, status, grad_year, prev_class";

pub fn student_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<StudentRow> {
    Ok(StudentRow {
        id: r.get(0)?,
        class_id: r.get(1)?,
        number: r.get(2)?,
        name: r.get(3)?,
        mother_name: r.get(4)?,
        mother_tel: r.get(5)?,
        father_name: r.get(6)?,
        father_tel: r.get(7)?,
        notes: r.get(8)?,
        tags: r.get(9)?,
        photo: r.get(10)?,
        status: r.get(11)?,
        grad_year: r.get(12)?,
        prev_class: r.get(13)?,
    })
}

pub fn get_student(conn: &Connection, student_id: i64) -> Result<Option<StudentRow>, HandlerErr> {
    conn.query_row(
        &format!("SELECT {} FROM students WHERE id = ?", STUDENT_COLUMNS),
        [student_id],
        |r| student_from_row(r),
    )
    .optional()
    .map_err(query_failed)
}

pub fn class_exists(conn: &Connection, class_id: i64) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(query_failed)
}

pub fn student_json(s: &StudentRow) -> serde_json::Value {
    let tags: Vec<String> = serde_json::from_str(&s.tags).unwrap_or_default();
    json!({
        "id": s.id,
        "classId": s.class_id,
        "number": s.number,
        "name": s.name,
        "parents": {
            "mother": { "name": s.mother_name, "tel": s.mother_tel },
            "father": { "name": s.father_name, "tel": s.father_tel },
        },
        "notes": s.notes,
        "tags": tags,
        "photo": s.photo,
        "status": s.status,
        "gradYear": s.grad_year,
        "prevClass": s.prev_class,
    })
}

pub fn notes_json(conn: &Connection, student_id: i64) -> Result<Vec<serde_json::Value>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, date, text FROM student_notes
             WHERE student_id = ?
             ORDER BY id DESC",
        )
        .map_err(query_failed)?;
    stmt.query_map([student_id], |r| {
        let id: i64 = r.get(0)?;
        let date: String = r.get(1)?;
        let text: String = r.get(2)?;
        Ok(json!({ "id": id, "date": date, "text": text }))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(query_failed)
}

pub fn exams_json(
    conn: &Connection,
    student_id: i64,
) -> Result<(Vec<serde_json::Value>, Vec<f64>), HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, date, score FROM student_exams
             WHERE student_id = ?
             ORDER BY id",
        )
        .map_err(query_failed)?;
    let rows = stmt
        .query_map([student_id], |r| {
            let id: i64 = r.get(0)?;
            let name: String = r.get(1)?;
            let date: String = r.get(2)?;
            let score: f64 = r.get(3)?;
            Ok((json!({ "id": id, "name": name, "date": date, "score": score }), score))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;

    let mut items = Vec::with_capacity(rows.len());
    let mut scores = Vec::with_capacity(rows.len());
    for (item, score) in rows {
        items.push(item);
        scores.push(score);
    }
    Ok((items, scores))
}

/// Mean of all exam scores rendered with one decimal place; "-" when the
/// student has no exams yet.
pub fn exam_average_display(scores: &[f64]) -> String {
    if scores.is_empty() {
        return "-".to_string();
    }
    let avg = scores.iter().sum::<f64>() / scores.len() as f64;
    format!("{:.1}", avg)
}

/// Full student detail: core fields plus both sub-lists and the derived
/// exam average.
pub fn student_detail_json(
    conn: &Connection,
    s: &StudentRow,
) -> Result<serde_json::Value, HandlerErr> {
    let mut detail = student_json(s);
    let notes = notes_json(conn, s.id)?;
    let (exams, scores) = exams_json(conn, s.id)?;
    detail["teacherNotes"] = json!(notes);
    detail["exams"] = json!(exams);
    detail["examAverage"] = json!(exam_average_display(&scores));
    Ok(detail)
}
