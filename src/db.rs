use rusqlite::Connection;
use std::path::Path;

/// Current on-disk schema version, tracked via PRAGMA user_version.
/// v1: profile, classes, students, notes, exams. v2: plans.
pub const SCHEMA_VERSION: i64 = 2;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("roster.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    // Migration is additive only: each step creates what is missing and
    // never drops or rewrites existing rows, so reopening an up-to-date
    // workspace is a no-op and a v1 workspace gains the v2 tables intact.
    let on_disk: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;

    ensure_schema_v1(&conn)?;
    ensure_schema_v2(&conn)?;

    if on_disk < SCHEMA_VERSION {
        conn.execute_batch(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))?;
    }

    Ok(conn)
}

fn ensure_schema_v1(conn: &Connection) -> anyhow::Result<()> {
    // Singleton profile row. The CHECK pins the only legal key so a second
    // profile cannot be created by any code path.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS teacher_profile(
            id INTEGER PRIMARY KEY CHECK (id = 1),
            name TEXT NOT NULL,
            branch TEXT NOT NULL DEFAULT '',
            school TEXT NOT NULL DEFAULT '',
            gender TEXT NOT NULL DEFAULT 'unspecified',
            avatar TEXT,
            photo TEXT,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            level INTEGER NOT NULL,
            student_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_name ON classes(name)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id INTEGER PRIMARY KEY,
            class_id INTEGER,
            number TEXT NOT NULL DEFAULT '',
            name TEXT NOT NULL,
            mother_name TEXT,
            mother_tel TEXT,
            father_name TEXT,
            father_tel TEXT,
            notes TEXT NOT NULL DEFAULT '',
            tags TEXT NOT NULL DEFAULT '[]',
            photo TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            grad_year INTEGER,
            prev_class TEXT,
            created_at TEXT,
            updated_at TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_name ON students(name)",
        [],
    )?;

    // Notes and exams are append-only sub-lists of a student. Rowids give
    // them collision-free ids and carry the insertion order: notes are read
    // newest-first, exams in entry order.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_notes(
            id INTEGER PRIMARY KEY,
            student_id INTEGER NOT NULL,
            date TEXT NOT NULL,
            text TEXT NOT NULL,
            created_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_notes_student ON student_notes(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_exams(
            id INTEGER PRIMARY KEY,
            student_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            date TEXT NOT NULL,
            score REAL NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_exams_student ON student_exams(student_id)",
        [],
    )?;

    Ok(())
}

fn ensure_schema_v2(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS plans(
            id INTEGER PRIMARY KEY,
            title TEXT NOT NULL,
            plan_type TEXT NOT NULL,
            file_name TEXT NOT NULL,
            file_type TEXT,
            file_data TEXT NOT NULL,
            created_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_plans_type ON plans(plan_type)",
        [],
    )?;

    // Early v2 workspaces stored plans without a payload checksum.
    ensure_plans_checksum(conn)?;

    Ok(())
}

fn ensure_plans_checksum(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "plans", "checksum")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE plans ADD COLUMN checksum TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
