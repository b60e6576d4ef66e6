use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_rosterd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn rosterd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn class_count(classes: &serde_json::Value, class_id: i64) -> i64 {
    classes
        .get("classes")
        .and_then(|v| v.as_array())
        .and_then(|rows| {
            rows.iter()
                .find(|r| r.get("id").and_then(|v| v.as_i64()) == Some(class_id))
        })
        .and_then(|r| r.get("studentCount"))
        .and_then(|v| v.as_i64())
        .expect("studentCount")
}

#[test]
fn student_counts_track_create_and_delete() {
    let workspace = temp_dir("rosterd-lifecycle");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "classes.create",
        json!({ "name": "7-B", "level": 7 }),
    );
    let class_id = created.get("classId").and_then(|v| v.as_i64()).expect("classId");

    let s1 = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({ "classId": class_id, "name": "First Student", "number": "1" }),
    );
    let s1_id = s1.get("studentId").and_then(|v| v.as_i64()).expect("studentId");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.create",
        json!({ "classId": class_id, "name": "Second Student", "number": "2" }),
    );

    let listed = request_ok(&mut stdin, &mut reader, "5", "classes.list", json!({}));
    assert_eq!(class_count(&listed, class_id), 2);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "students.delete",
        json!({ "studentId": s1_id }),
    );
    let listed = request_ok(&mut stdin, &mut reader, "7", "classes.list", json!({}));
    assert_eq!(class_count(&listed, class_id), 1);

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn student_edit_preserves_notes_exams_and_status_fields() {
    let workspace = temp_dir("rosterd-edit-merge");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "classes.create",
        json!({ "name": "8-C", "level": 8 }),
    );
    let class_id = created.get("classId").and_then(|v| v.as_i64()).expect("classId");
    let s = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({
            "classId": class_id,
            "name": "Merge Target",
            "number": "12",
            "tags": ["success"],
            "parents": { "mother": { "name": "M", "tel": "555" } }
        }),
    );
    let student_id = s.get("studentId").and_then(|v| v.as_i64()).expect("studentId");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "notes.add",
        json!({ "studentId": student_id, "date": "2025-10-01", "text": "kept note" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "exams.add",
        json!({ "studentId": student_id, "name": "Midterm", "date": "2025-10-15", "score": 77 }),
    );

    // A patch that only renames must leave everything else untouched.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "students.update",
        json!({ "studentId": student_id, "patch": { "name": "Renamed Target" } }),
    );

    let detail = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "students.get",
        json!({ "studentId": student_id }),
    );
    let student = detail.get("student").expect("student");
    assert_eq!(student.get("name").and_then(|v| v.as_str()), Some("Renamed Target"));
    assert_eq!(student.get("number").and_then(|v| v.as_str()), Some("12"));
    assert_eq!(student.get("status").and_then(|v| v.as_str()), Some("active"));
    assert_eq!(
        student.get("tags").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(1)
    );
    assert_eq!(
        student
            .get("parents")
            .and_then(|p| p.get("mother"))
            .and_then(|m| m.get("name"))
            .and_then(|v| v.as_str()),
        Some("M")
    );
    assert_eq!(
        student
            .get("teacherNotes")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(1)
    );
    assert_eq!(
        student.get("exams").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(1)
    );

    // Saving the identical patch twice must not duplicate or change anything.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "students.update",
        json!({ "studentId": student_id, "patch": { "name": "Renamed Target" } }),
    );
    let again = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "students.get",
        json!({ "studentId": student_id }),
    );
    assert_eq!(
        again.get("student").and_then(|s| s.get("name")),
        student.get("name")
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn cascade_delete_removes_students_detach_keeps_them() {
    let workspace = temp_dir("rosterd-class-delete");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let cascade = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "classes.create",
        json!({ "name": "5-A", "level": 5 }),
    );
    let cascade_id = cascade.get("classId").and_then(|v| v.as_i64()).expect("classId");
    let victim = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({ "classId": cascade_id, "name": "Cascaded", "number": "1" }),
    );
    let victim_id = victim.get("studentId").and_then(|v| v.as_i64()).expect("studentId");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "notes.add",
        json!({ "studentId": victim_id, "date": "2025-11-01", "text": "gone with the class" }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "classes.delete",
        json!({ "classId": cascade_id }),
    );
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "students.list",
        json!({ "classId": cascade_id }),
    );
    assert_eq!(
        listed.get("students").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );
    let gone = request(
        &mut stdin,
        &mut reader,
        "7",
        "students.get",
        json!({ "studentId": victim_id }),
    );
    assert_eq!(
        gone.get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("not_found")
    );

    let detach = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "classes.create",
        json!({ "name": "5-B", "level": 5 }),
    );
    let detach_id = detach.get("classId").and_then(|v| v.as_i64()).expect("classId");
    let kept = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "students.create",
        json!({ "classId": detach_id, "name": "Detached", "number": "1" }),
    );
    let kept_id = kept.get("studentId").and_then(|v| v.as_i64()).expect("studentId");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "classes.delete",
        json!({ "classId": detach_id, "mode": "detach" }),
    );
    let survivor = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "students.get",
        json!({ "studentId": kept_id }),
    );
    let student = survivor.get("student").expect("student");
    assert!(student.get("classId").map(|v| v.is_null()).unwrap_or(false));
    assert_eq!(student.get("status").and_then(|v| v.as_str()), Some("active"));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn class_create_validates_level_range() {
    let workspace = temp_dir("rosterd-class-validation");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let too_high = request(
        &mut stdin,
        &mut reader,
        "2",
        "classes.create",
        json!({ "name": "13-A", "level": 13 }),
    );
    assert_eq!(
        too_high
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("bad_params")
    );
    let missing_level = request(
        &mut stdin,
        &mut reader,
        "3",
        "classes.create",
        json!({ "name": "No Level" }),
    );
    assert_eq!(
        missing_level
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("bad_params")
    );

    let _ = std::fs::remove_dir_all(workspace);
}
