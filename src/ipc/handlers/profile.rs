use crate::ipc::error::ok;
use crate::ipc::helpers::{
    get_optional_str, get_required_str, now_rfc3339, query_failed, require_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

const GENDERS: [&str; 3] = ["male", "female", "unspecified"];

pub fn load_profile(conn: &Connection) -> Result<Option<serde_json::Value>, HandlerErr> {
    conn.query_row(
        "SELECT name, branch, school, gender, avatar, photo, updated_at
         FROM teacher_profile WHERE id = 1",
        [],
        |r| {
            let name: String = r.get(0)?;
            let branch: String = r.get(1)?;
            let school: String = r.get(2)?;
            let gender: String = r.get(3)?;
            let avatar: Option<String> = r.get(4)?;
            let photo: Option<String> = r.get(5)?;
            let updated_at: Option<String> = r.get(6)?;
            Ok(json!({
                "name": name,
                "branch": branch,
                "school": school,
                "gender": gender,
                "avatar": avatar,
                "photo": photo,
                "updatedAt": updated_at,
            }))
        },
    )
    .optional()
    .map_err(query_failed)
}

fn get_profile(state: &AppState) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let profile = load_profile(conn)?;
    // Absence is first-launch, not an error.
    let first_launch = profile.is_none();
    Ok(json!({ "profile": profile, "firstLaunch": first_launch }))
}

fn save_profile(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;

    let name = get_required_str(params, "name")?.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr::bad_params("name must not be empty"));
    }
    let branch = get_optional_str(params, "branch").unwrap_or_default();
    let school = get_optional_str(params, "school").unwrap_or_default();
    let gender = get_optional_str(params, "gender").unwrap_or_else(|| "unspecified".to_string());
    if !GENDERS.contains(&gender.as_str()) {
        return Err(HandlerErr::bad_params(format!("unknown gender: {}", gender)));
    }
    let avatar = get_optional_str(params, "avatar");
    let photo = get_optional_str(params, "photo");

    // Upsert against the pinned singleton key; edits overwrite, never add.
    conn.execute(
        "INSERT INTO teacher_profile(id, name, branch, school, gender, avatar, photo, updated_at)
         VALUES(1, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           name = excluded.name,
           branch = excluded.branch,
           school = excluded.school,
           gender = excluded.gender,
           avatar = excluded.avatar,
           photo = excluded.photo,
           updated_at = excluded.updated_at",
        (&name, &branch, &school, &gender, &avatar, &photo, now_rfc3339()),
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;

    Ok(json!({ "saved": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "profile.get" => get_profile(state),
        "profile.save" => save_profile(state, &req.params),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
