// MongoDB execution and introspection
use anyhow::{bail, Context};
use futures::TryStreamExt;
use mongodb::bson::{self, doc, Bson, Document};
use mongodb::{Client, Collection, Cursor};
use serde_json::{json, Value};

use crate::models::ResultRecord;

/// Documents sampled per collection when describing its fields
const SAMPLE_SIZE: i64 = 20;

/// Open a client and make sure the deployment answers a ping
pub async fn connect(uri: &str) -> anyhow::Result<Client> {
    let client = Client::with_uri_str(uri)
        .await
        .context("Invalid MongoDB connection string")?;
    client
        .database("admin")
        .run_command(doc! {"ping": 1})
        .await
        .context("MongoDB ping failed")?;
    Ok(client)
}

fn collection(client: &Client, database: &str, name: &str) -> Collection<Document> {
    client.database(database).collection::<Document>(name)
}

pub async fn find(
    client: &Client,
    database: &str,
    name: &str,
    filter: &Value,
) -> anyhow::Result<Vec<ResultRecord>> {
    let cursor = collection(client, database, name)
        .find(filter_document(filter)?)
        .await
        .with_context(|| format!("find on {}.{} failed", database, name))?;
    collect(cursor).await
}

pub async fn insert(
    client: &Client,
    database: &str,
    name: &str,
    document: &Value,
) -> anyhow::Result<Vec<ResultRecord>> {
    let documents = match document {
        Value::Object(_) => vec![to_document(document)?],
        Value::Array(items) if !items.is_empty() => items
            .iter()
            .map(|item| match item {
                Value::Object(_) => to_document(item),
                _ => bail!("insert expects every document to be an object"),
            })
            .collect::<anyhow::Result<Vec<_>>>()?,
        _ => bail!("insert expects a document object or a non-empty array of documents"),
    };

    let result = collection(client, database, name)
        .insert_many(documents)
        .await
        .with_context(|| format!("insert into {}.{} failed", database, name))?;

    let mut ids: Vec<(usize, Bson)> = result.inserted_ids.into_iter().collect();
    ids.sort_by_key(|(index, _)| *index);
    Ok(ids
        .into_iter()
        .map(|(_, id)| single_field("inserted_id", bson_to_json(id)))
        .collect())
}

pub async fn update(
    client: &Client,
    database: &str,
    name: &str,
    filter: &Value,
    update: &Value,
) -> anyhow::Result<Vec<ResultRecord>> {
    let result = collection(client, database, name)
        .update_many(filter_document(filter)?, update_document(update)?)
        .await
        .with_context(|| format!("update on {}.{} failed", database, name))?;

    let mut record = single_field("matched_count", json!(result.matched_count));
    record.insert("modified_count".to_string(), json!(result.modified_count));
    Ok(vec![record])
}

pub async fn delete(
    client: &Client,
    database: &str,
    name: &str,
    filter: &Value,
) -> anyhow::Result<Vec<ResultRecord>> {
    let result = collection(client, database, name)
        .delete_many(filter_document(filter)?)
        .await
        .with_context(|| format!("delete on {}.{} failed", database, name))?;
    Ok(vec![single_field("deleted_count", json!(result.deleted_count))])
}

pub async fn aggregate(
    client: &Client,
    database: &str,
    name: &str,
    pipeline: &[Value],
) -> anyhow::Result<Vec<ResultRecord>> {
    let stages = pipeline
        .iter()
        .map(to_document)
        .collect::<anyhow::Result<Vec<_>>>()?;
    let cursor = collection(client, database, name)
        .aggregate(stages)
        .await
        .with_context(|| format!("aggregate on {}.{} failed", database, name))?;
    collect(cursor).await
}

/// Render every collection as `name(field type, ...)`, with fields taken
/// from a small sample of its documents
pub async fn introspect(client: &Client, database: &str) -> anyhow::Result<String> {
    let db = client.database(database);
    let mut names = db
        .list_collection_names()
        .await
        .with_context(|| format!("Failed to list collections of {}", database))?;
    names.sort();

    let mut schema = String::new();
    for name in names {
        let cursor = db
            .collection::<Document>(&name)
            .find(doc! {})
            .limit(SAMPLE_SIZE)
            .await
            .with_context(|| format!("Failed to sample {}.{}", database, name))?;
        let sample: Vec<Document> = cursor.try_collect().await?;
        schema.push_str(&format!("{}({})\n", name, describe_fields(&sample).join(", ")));
    }
    Ok(schema)
}

async fn collect(cursor: Cursor<Document>) -> anyhow::Result<Vec<ResultRecord>> {
    let documents: Vec<Document> = cursor.try_collect().await?;
    Ok(documents.into_iter().map(document_to_record).collect())
}

fn to_document(value: &Value) -> anyhow::Result<Document> {
    match value {
        Value::Object(_) => bson::to_document(value).context("Value cannot be encoded as BSON"),
        _ => bail!("expected a JSON object"),
    }
}

fn filter_document(filter: &Value) -> anyhow::Result<Document> {
    match filter {
        Value::Null => Ok(Document::new()),
        Value::Object(_) => to_document(filter),
        _ => bail!("filter must be an object"),
    }
}

/// A plain field map is treated as `$set`
fn update_document(update: &Value) -> anyhow::Result<Document> {
    let Value::Object(fields) = update else {
        bail!("update must be an object");
    };
    if fields.keys().any(|k| k.starts_with('$')) {
        to_document(update)
    } else {
        Ok(doc! {"$set": to_document(update)?})
    }
}

fn single_field(key: &str, value: Value) -> ResultRecord {
    let mut record = ResultRecord::new();
    record.insert(key.to_string(), value);
    record
}

fn document_to_record(document: Document) -> ResultRecord {
    document
        .into_iter()
        .map(|(field, value)| (field, bson_to_json(value)))
        .collect()
}

/// Relaxed extended JSON, except that object ids and dates become plain strings
fn bson_to_json(value: Bson) -> Value {
    match value {
        Bson::ObjectId(id) => json!(id.to_hex()),
        Bson::DateTime(date) => match date.try_to_rfc3339_string() {
            Ok(text) => json!(text),
            Err(_) => json!(date.timestamp_millis()),
        },
        Bson::Document(document) => Value::Object(document_to_record(document)),
        Bson::Array(items) => Value::Array(items.into_iter().map(bson_to_json).collect()),
        other => other.into_relaxed_extjson(),
    }
}

fn bson_type_name(value: &Bson) -> &'static str {
    match value {
        Bson::Double(_) => "double",
        Bson::String(_) => "string",
        Bson::Array(_) => "array",
        Bson::Document(_) => "object",
        Bson::Boolean(_) => "bool",
        Bson::Null => "null",
        Bson::Int32(_) => "int",
        Bson::Int64(_) => "long",
        Bson::ObjectId(_) => "objectId",
        Bson::DateTime(_) => "date",
        Bson::Decimal128(_) => "decimal",
        _ => "mixed",
    }
}

/// Union of field names across the sample, typed by their first occurrence
fn describe_fields(sample: &[Document]) -> Vec<String> {
    let mut fields: Vec<(&str, &'static str)> = Vec::new();
    for document in sample {
        for (field, value) in document {
            if !fields.iter().any(|(name, _)| *name == field.as_str()) {
                fields.push((field.as_str(), bson_type_name(value)));
            }
        }
    }
    fields
        .into_iter()
        .map(|(field, type_name)| format!("{} {}", field, type_name))
        .collect()
}
