// SQLite execution and introspection on a single connection
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::models::ResultRecord;
use crate::services::database::postgresql::render_tables;

/// Open a SQLite database. Accepts plain paths, `:memory:`, and
/// `sqlite:` / `sqlite://` prefixed URLs.
pub fn open(url: &str) -> rusqlite::Result<Connection> {
    let path = url.trim_start_matches("sqlite:").trim_start_matches("//");
    let conn = if path.is_empty() || path == ":memory:" {
        Connection::open_in_memory()?
    } else {
        Connection::open(path)?
    };
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    Ok(conn)
}

pub fn read(conn: &Connection, sql: &str) -> rusqlite::Result<Vec<ResultRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    let mut rows = stmt.query([])?;
    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = ResultRecord::new();
        for (idx, name) in columns.iter().enumerate() {
            record.insert(name.clone(), to_json(row.get_ref(idx)?));
        }
        records.push(record);
    }

    Ok(records)
}

pub fn write(conn: &Connection, sql: &str) -> rusqlite::Result<u64> {
    let affected = conn.execute(sql, [])?;
    Ok(affected as u64)
}

pub fn introspect(conn: &Connection) -> rusqlite::Result<String> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let table_names: Vec<String> = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<_>>()?;

    let mut tables = BTreeMap::new();
    for table in table_names {
        let pragma = format!("PRAGMA table_info(\"{}\")", table.replace('"', "\"\""));
        let mut stmt = conn.prepare(&pragma)?;
        let columns: Vec<String> = stmt
            .query_map([], |row| {
                let name: String = row.get(1)?;
                let data_type: String = row.get(2)?;
                Ok(if data_type.is_empty() {
                    name
                } else {
                    format!("{} {}", name, data_type.to_lowercase())
                })
            })?
            .collect::<rusqlite::Result<_>>()?;
        tables.insert(table, columns);
    }

    Ok(render_tables(&tables))
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => json!(v),
        ValueRef::Real(v) => json!(v),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => json!(format!("<blob {} bytes>", bytes.len())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn students() -> Connection {
        let conn = open(":memory:").unwrap();
        conn.execute_batch(
            "CREATE TABLE students (id INTEGER PRIMARY KEY, name TEXT NOT NULL, age INTEGER, gpa REAL);
             INSERT INTO students (name, age, gpa) VALUES ('Ada', 21, 3.9), ('Linus', 19, NULL);",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_read_normalizes_values() {
        let conn = students();
        let rows = read(&conn, "SELECT name, age, gpa FROM students ORDER BY id").unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("name"), Some(&json!("Ada")));
        assert_eq!(rows[0].get("age"), Some(&json!(21)));
        assert_eq!(rows[0].get("gpa"), Some(&json!(3.9)));
        assert_eq!(rows[1].get("gpa"), Some(&Value::Null));
    }

    #[test]
    fn test_write_reports_affected_rows() {
        let conn = students();
        let affected = write(&conn, "UPDATE students SET age = age + 1").unwrap();
        assert_eq!(affected, 2);
    }

    #[test]
    fn test_introspect() {
        let conn = students();
        let schema = introspect(&conn).unwrap();
        assert_eq!(schema, "students(id integer, name text, age integer, gpa real)\n");
    }

    #[test]
    fn test_open_file_url() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.db");
        let url = format!("sqlite://{}", path.display());

        let conn = open(&url).unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER)").unwrap();
        drop(conn);

        let conn = open(path.to_str().unwrap()).unwrap();
        assert!(introspect(&conn).unwrap().starts_with("t(id integer)"));
    }
}
