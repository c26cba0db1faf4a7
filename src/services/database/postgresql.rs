// PostgreSQL execution and introspection over pooled connections
use anyhow::Context;
use deadpool_postgres::Pool;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio_postgres::types::Type;
use tokio_postgres::Row;

use crate::models::ResultRecord;

const INTROSPECTION_SQL: &str = r#"
    SELECT
        c.table_name::text,
        c.column_name::text,
        c.data_type::text
    FROM information_schema.columns c
    JOIN information_schema.tables t
        ON c.table_name = t.table_name
        AND c.table_schema = t.table_schema
    WHERE c.table_schema = 'public'
        AND t.table_type = 'BASE TABLE'
    ORDER BY c.table_name, c.ordinal_position
"#;

fn describe_error(e: &tokio_postgres::Error) -> String {
    match e.as_db_error() {
        Some(db_error) => format!(
            "Code: {}, Message: {}",
            db_error.code().code(),
            db_error.message()
        ),
        None => e.to_string(),
    }
}

pub async fn read(pool: &Pool, sql: &str, timeout: Duration) -> anyhow::Result<Vec<ResultRecord>> {
    let client = pool
        .get()
        .await
        .context("Failed to get connection from pool")?;

    let rows = tokio::time::timeout(timeout, client.query(sql, &[]))
        .await
        .map_err(|_| anyhow::anyhow!("Query timeout after {} seconds", timeout.as_secs()))?
        .map_err(|e| anyhow::anyhow!("Query execution failed: {}", describe_error(&e)))?;

    Ok(rows.iter().map(row_to_record).collect())
}

pub async fn write(pool: &Pool, sql: &str, timeout: Duration) -> anyhow::Result<u64> {
    let client = pool
        .get()
        .await
        .context("Failed to get connection from pool")?;

    tokio::time::timeout(timeout, client.execute(sql, &[]))
        .await
        .map_err(|_| anyhow::anyhow!("Statement timeout after {} seconds", timeout.as_secs()))?
        .map_err(|e| anyhow::anyhow!("Statement execution failed: {}", describe_error(&e)))
}

pub async fn introspect(pool: &Pool, timeout: Duration) -> anyhow::Result<String> {
    let client = pool
        .get()
        .await
        .context("Failed to get connection from pool")?;

    let rows = tokio::time::timeout(timeout, client.query(INTROSPECTION_SQL, &[]))
        .await
        .map_err(|_| anyhow::anyhow!("Introspection timeout after {} seconds", timeout.as_secs()))?
        .map_err(|e| anyhow::anyhow!("Introspection failed: {}", describe_error(&e)))?;

    let mut tables: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for row in &rows {
        let table: String = row.try_get(0)?;
        let column: String = row.try_get(1)?;
        let data_type: String = row.try_get(2)?;
        tables
            .entry(table)
            .or_default()
            .push(format!("{} {}", column, data_type));
    }

    Ok(render_tables(&tables))
}

/// `table(col type, ...)` per line
pub fn render_tables(tables: &BTreeMap<String, Vec<String>>) -> String {
    tables
        .iter()
        .map(|(table, columns)| format!("{}({})\n", table, columns.join(", ")))
        .collect()
}

fn row_to_record(row: &Row) -> ResultRecord {
    let mut record = ResultRecord::new();
    for (idx, column) in row.columns().iter().enumerate() {
        record.insert(column.name().to_string(), column_value(row, idx, column.type_()));
    }
    record
}

fn column_value(row: &Row, idx: usize, ty: &Type) -> Value {
    fn opt<T: Into<Value>>(value: Result<Option<T>, tokio_postgres::Error>) -> Value {
        match value {
            Ok(Some(v)) => v.into(),
            _ => Value::Null,
        }
    }

    match *ty {
        Type::INT2 => opt(row.try_get::<_, Option<i16>>(idx)),
        Type::INT4 => opt(row.try_get::<_, Option<i32>>(idx)),
        Type::INT8 => opt(row.try_get::<_, Option<i64>>(idx)),
        Type::FLOAT4 => opt(row.try_get::<_, Option<f32>>(idx)),
        Type::FLOAT8 => opt(row.try_get::<_, Option<f64>>(idx)),
        Type::BOOL => opt(row.try_get::<_, Option<bool>>(idx)),
        Type::TIMESTAMP => match row.try_get::<_, Option<chrono::NaiveDateTime>>(idx) {
            Ok(Some(v)) => json!(v.to_string()),
            _ => Value::Null,
        },
        Type::TIMESTAMPTZ => match row.try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx) {
            Ok(Some(v)) => json!(v.to_rfc3339()),
            _ => Value::Null,
        },
        Type::DATE => match row.try_get::<_, Option<chrono::NaiveDate>>(idx) {
            Ok(Some(v)) => json!(v.to_string()),
            _ => Value::Null,
        },
        Type::TIME => match row.try_get::<_, Option<chrono::NaiveTime>>(idx) {
            Ok(Some(v)) => json!(v.to_string()),
            _ => Value::Null,
        },
        Type::NUMERIC => match row.try_get::<_, Option<Decimal>>(idx) {
            Ok(Some(v)) => decimal_to_json(v),
            // NaN and values beyond 96 bits do not fit a Decimal
            _ => Value::Null,
        },
        Type::UUID => match row.try_get::<_, Option<uuid::Uuid>>(idx) {
            Ok(Some(v)) => json!(v.to_string()),
            _ => Value::Null,
        },
        Type::JSON | Type::JSONB => match row.try_get::<_, Option<Value>>(idx) {
            Ok(Some(v)) => v,
            _ => Value::Null,
        },
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY => array(row.try_get::<_, Option<Vec<Option<String>>>>(idx)),
        Type::INT2_ARRAY => array(row.try_get::<_, Option<Vec<Option<i16>>>>(idx)),
        Type::INT4_ARRAY => array(row.try_get::<_, Option<Vec<Option<i32>>>>(idx)),
        Type::INT8_ARRAY => array(row.try_get::<_, Option<Vec<Option<i64>>>>(idx)),
        Type::FLOAT8_ARRAY => array(row.try_get::<_, Option<Vec<Option<f64>>>>(idx)),
        Type::BOOL_ARRAY => array(row.try_get::<_, Option<Vec<Option<bool>>>>(idx)),
        _ => match row.try_get::<_, Option<String>>(idx) {
            Ok(Some(v)) => json!(v),
            Ok(None) => Value::Null,
            // Types without a text mapping are shown by name
            Err(_) => json!(format!("<{}>", ty.name())),
        },
    }
}

fn array<T: Into<Value>>(value: Result<Option<Vec<Option<T>>>, tokio_postgres::Error>) -> Value {
    match value {
        Ok(Some(items)) => Value::Array(
            items
                .into_iter()
                .map(|item| item.map_or(Value::Null, Into::into))
                .collect(),
        ),
        _ => Value::Null,
    }
}

/// Whole numbers become JSON integers, the rest JSON floats. Values that
/// fit neither keep their exact decimal text.
fn decimal_to_json(value: Decimal) -> Value {
    if value.fract().is_zero() {
        if let Some(integer) = value.to_i64() {
            return json!(integer);
        }
    }
    match value.to_f64().and_then(serde_json::Number::from_f64) {
        Some(number) => Value::Number(number),
        None => json!(value.to_string()),
    }
}
