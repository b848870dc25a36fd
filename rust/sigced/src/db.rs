use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "sigce.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

/// Creates any missing table. Rows are written by the CRUD front end; the
/// sidecar only reads them, apart from `workspace_settings`.
pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS groups(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            level TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            group_id TEXT NOT NULL,
            subject_name TEXT NOT NULL,
            sort_order INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(group_id) REFERENCES groups(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_courses_group ON courses(group_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            group_id TEXT NOT NULL,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(group_id) REFERENCES groups(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_group_sort ON students(group_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS units(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            period INTEGER NOT NULL,
            name TEXT NOT NULL,
            sort_order INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_units_course ON units(course_id, period)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS criteria(
            id TEXT PRIMARY KEY,
            unit_id TEXT NOT NULL,
            idx INTEGER NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            max_value REAL NOT NULL DEFAULT 10,
            FOREIGN KEY(unit_id) REFERENCES units(id)
        )",
        [],
    )?;
    // Workspaces created before competency grouping lack the column.
    ensure_criteria_competency(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_criteria_unit ON criteria(unit_id, idx)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            student_id TEXT NOT NULL,
            unit_id TEXT NOT NULL,
            criterion_id TEXT NOT NULL,
            value REAL,
            PRIMARY KEY(student_id, unit_id, criterion_id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(unit_id) REFERENCES units(id),
            FOREIGN KEY(criterion_id) REFERENCES criteria(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_unit ON grades(unit_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS recovery_grades(
            student_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            period INTEGER NOT NULL,
            competency TEXT NOT NULL,
            value REAL,
            PRIMARY KEY(student_id, course_id, period, competency),
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS comments(
            student_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            period TEXT NOT NULL,
            body TEXT NOT NULL,
            PRIMARY KEY(student_id, course_id, period),
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS workspace_settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM workspace_settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO workspace_settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

fn ensure_criteria_competency(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "criteria", "competency")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE criteria ADD COLUMN competency TEXT", [])?;
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
