// In-process document store
//
// Documents live in memory, grouped by (store, database, collection).
// Filters, updates and aggregation stages cover the subset of the document
// query language that generated operations use in practice.

use anyhow::{bail, Context};
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{PoisonError, RwLock};
use uuid::Uuid;

use crate::models::{value_to_record, ResultRecord};
use crate::services::database::DocumentAdapter;

type Collections = BTreeMap<String, Vec<ResultRecord>>;

/// Document adapter keeping every collection in memory
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    databases: RwLock<HashMap<(String, String), Collections>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a logical database available under a store name
    pub fn attach(&self, store: &str, database: &str) {
        let mut databases = self.databases.write().unwrap_or_else(PoisonError::into_inner);
        databases
            .entry((store.to_string(), database.to_string()))
            .or_default();
    }

    pub fn is_attached(&self, store: &str, database: &str) -> bool {
        let databases = self.databases.read().unwrap_or_else(PoisonError::into_inner);
        databases.contains_key(&(store.to_string(), database.to_string()))
    }

    /// Append documents to a collection, attaching the database if needed
    pub fn seed(&self, store: &str, database: &str, collection: &str, documents: Vec<Value>) {
        let mut databases = self.databases.write().unwrap_or_else(PoisonError::into_inner);
        let collections = databases
            .entry((store.to_string(), database.to_string()))
            .or_default();
        collections
            .entry(collection.to_string())
            .or_default()
            .extend(documents.into_iter().map(value_to_record));
    }

    /// Load `{ "collection": [documents...] }` from a JSON file
    pub fn load_seed_file(&self, store: &str, database: &str, path: &Path) -> anyhow::Result<usize> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read seed file {}", path.display()))?;
        let seed: BTreeMap<String, Vec<Value>> = serde_json::from_str(&text)
            .with_context(|| format!("Seed file {} must map collection names to arrays", path.display()))?;

        let mut total = 0;
        for (collection, documents) in seed {
            total += documents.len();
            self.seed(store, database, &collection, documents);
        }
        self.attach(store, database);

        tracing::info!("Seeded {} documents into {}/{}", total, store, database);
        Ok(total)
    }

    fn with_collection<T>(
        &self,
        store: &str,
        database: &str,
        collection: &str,
        f: impl FnOnce(&mut Vec<ResultRecord>) -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        let mut databases = self.databases.write().unwrap_or_else(PoisonError::into_inner);
        let collections = databases
            .get_mut(&(store.to_string(), database.to_string()))
            .ok_or_else(|| anyhow::anyhow!("No document database {}/{} attached", store, database))?;
        f(collections.entry(collection.to_string()).or_default())
    }

    fn snapshot(&self, store: &str, database: &str, collection: &str) -> anyhow::Result<Vec<ResultRecord>> {
        let databases = self.databases.read().unwrap_or_else(PoisonError::into_inner);
        let collections = databases
            .get(&(store.to_string(), database.to_string()))
            .ok_or_else(|| anyhow::anyhow!("No document database {}/{} attached", store, database))?;
        Ok(collections.get(collection).cloned().unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl DocumentAdapter for MemoryDocumentStore {
    async fn find(
        &self,
        store: &str,
        database: &str,
        collection: &str,
        filter: &Value,
    ) -> anyhow::Result<Vec<ResultRecord>> {
        let documents = self.snapshot(store, database, collection)?;
        let mut found = Vec::new();
        for document in documents {
            if matches_filter(&document, filter)? {
                found.push(document);
            }
        }
        Ok(found)
    }

    async fn insert(
        &self,
        store: &str,
        database: &str,
        collection: &str,
        document: &Value,
    ) -> anyhow::Result<Vec<ResultRecord>> {
        let documents = match document {
            Value::Object(_) => vec![document.clone()],
            Value::Array(items) => items.clone(),
            _ => bail!("insert expects a document object or an array of documents"),
        };

        let mut prepared = Vec::with_capacity(documents.len());
        for document in documents {
            let Value::Object(mut record) = document else {
                bail!("insert expects every document to be an object");
            };
            if !record.contains_key("_id") {
                record.insert("_id".to_string(), json!(Uuid::new_v4().to_string()));
            }
            prepared.push(record);
        }

        self.with_collection(store, database, collection, |docs| {
            let mut results = Vec::with_capacity(prepared.len());
            for record in prepared {
                let mut result = Map::new();
                result.insert("inserted_id".to_string(), record["_id"].clone());
                results.push(result);
                docs.push(record);
            }
            Ok(results)
        })
    }

    async fn update(
        &self,
        store: &str,
        database: &str,
        collection: &str,
        filter: &Value,
        update: &Value,
    ) -> anyhow::Result<Vec<ResultRecord>> {
        let changes = parse_update(update)?;
        self.with_collection(store, database, collection, |docs| {
            // Work on a copy so a failing document leaves the collection untouched
            let mut updated = docs.clone();
            let mut matched = 0u64;
            let mut modified = 0u64;
            for document in updated.iter_mut() {
                if !matches_filter(document, filter)? {
                    continue;
                }
                matched += 1;
                if apply_update(document, &changes)? {
                    modified += 1;
                }
            }
            *docs = updated;
            Ok(vec![counts_record(&[("matched_count", matched), ("modified_count", modified)])])
        })
    }

    async fn delete(
        &self,
        store: &str,
        database: &str,
        collection: &str,
        filter: &Value,
    ) -> anyhow::Result<Vec<ResultRecord>> {
        self.with_collection(store, database, collection, |docs| {
            let matched = docs
                .iter()
                .map(|document| matches_filter(document, filter))
                .collect::<anyhow::Result<Vec<bool>>>()?;
            let before = docs.len();
            let mut flags = matched.into_iter();
            docs.retain(|_| !flags.next().unwrap_or(false));
            let deleted = (before - docs.len()) as u64;
            Ok(vec![counts_record(&[("deleted_count", deleted)])])
        })
    }

    async fn aggregate(
        &self,
        store: &str,
        database: &str,
        collection: &str,
        pipeline: &[Value],
    ) -> anyhow::Result<Vec<ResultRecord>> {
        let mut documents = self.snapshot(store, database, collection)?;
        for stage in pipeline {
            documents = apply_stage(documents, stage)?;
        }
        Ok(documents)
    }

    async fn introspect(&self, store: &str, database: &str) -> anyhow::Result<String> {
        let databases = self.databases.read().unwrap_or_else(PoisonError::into_inner);
        let collections = databases
            .get(&(store.to_string(), database.to_string()))
            .ok_or_else(|| anyhow::anyhow!("No document database {}/{} attached", store, database))?;

        let mut schema = String::new();
        for (name, documents) in collections {
            let fields: Vec<String> = documents
                .first()
                .map(|doc| {
                    doc.iter()
                        .map(|(field, value)| format!("{} {}", field, type_name(value)))
                        .collect()
                })
                .unwrap_or_default();
            schema.push_str(&format!("{}({})\n", name, fields.join(", ")));
        }
        Ok(schema)
    }
}

fn counts_record(counts: &[(&str, u64)]) -> ResultRecord {
    counts
        .iter()
        .map(|(key, count)| (key.to_string(), json!(count)))
        .collect()
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "double",
        Value::Number(_) => "int",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Field lookup with dotted paths into nested objects
fn lookup<'a>(document: &'a ResultRecord, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = document.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    compare_values(a, b) == Some(Ordering::Equal) || a == b
}

fn matches_filter(document: &ResultRecord, filter: &Value) -> anyhow::Result<bool> {
    let conditions = match filter {
        Value::Null => return Ok(true),
        Value::Object(conditions) => conditions,
        _ => bail!("filter must be an object"),
    };

    for (key, condition) in conditions {
        let matched = match key.as_str() {
            "$and" => {
                let mut all = true;
                for sub in as_array(condition, "$and")? {
                    all &= matches_filter(document, sub)?;
                }
                all
            }
            "$or" => {
                let mut any = false;
                for sub in as_array(condition, "$or")? {
                    any |= matches_filter(document, sub)?;
                }
                any
            }
            _ => matches_condition(lookup(document, key), condition)?,
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn as_array<'a>(value: &'a Value, operator: &str) -> anyhow::Result<&'a Vec<Value>> {
    value
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("{} expects an array", operator))
}

fn is_operator_object(value: &Value) -> bool {
    match value {
        Value::Object(map) => !map.is_empty() && map.keys().all(|k| k.starts_with('$')),
        _ => false,
    }
}

fn matches_condition(field: Option<&Value>, condition: &Value) -> anyhow::Result<bool> {
    if !is_operator_object(condition) {
        return Ok(field.map_or(condition.is_null(), |value| values_equal(value, condition)));
    }

    let Value::Object(operators) = condition else {
        return Ok(false);
    };
    for (operator, operand) in operators {
        let ordering = field.and_then(|value| compare_values(value, operand));
        let matched = match operator.as_str() {
            "$eq" => field.map_or(operand.is_null(), |value| values_equal(value, operand)),
            "$ne" => !field.map_or(operand.is_null(), |value| values_equal(value, operand)),
            "$gt" => ordering == Some(Ordering::Greater),
            "$gte" => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
            "$lt" => ordering == Some(Ordering::Less),
            "$lte" => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
            "$in" => {
                let candidates = as_array(operand, "$in")?;
                field.is_some_and(|value| candidates.iter().any(|c| values_equal(value, c)))
            }
            "$nin" => {
                let candidates = as_array(operand, "$nin")?;
                !field.is_some_and(|value| candidates.iter().any(|c| values_equal(value, c)))
            }
            "$exists" => field.is_some() == operand.as_bool().unwrap_or(true),
            other => bail!("Unsupported filter operator: {}", other),
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

enum FieldChange {
    Set(String, Value),
    Inc(String, f64),
    Unset(String),
}

fn parse_update(update: &Value) -> anyhow::Result<Vec<FieldChange>> {
    let Value::Object(spec) = update else {
        bail!("update must be an object");
    };

    // A plain field map is treated as $set
    if !spec.keys().any(|k| k.starts_with('$')) {
        return Ok(spec
            .iter()
            .map(|(field, value)| FieldChange::Set(field.clone(), value.clone()))
            .collect());
    }

    let mut changes = Vec::new();
    for (operator, fields) in spec {
        let fields = fields
            .as_object()
            .ok_or_else(|| anyhow::anyhow!("{} expects an object of fields", operator))?;
        for (field, value) in fields {
            let change = match operator.as_str() {
                "$set" => FieldChange::Set(field.clone(), value.clone()),
                "$inc" => FieldChange::Inc(
                    field.clone(),
                    value
                        .as_f64()
                        .ok_or_else(|| anyhow::anyhow!("$inc on {} expects a number", field))?,
                ),
                "$unset" => FieldChange::Unset(field.clone()),
                other => bail!("Unsupported update operator: {}", other),
            };
            changes.push(change);
        }
    }
    Ok(changes)
}

fn apply_update(document: &mut ResultRecord, changes: &[FieldChange]) -> anyhow::Result<bool> {
    let before = document.clone();
    for change in changes {
        match change {
            FieldChange::Set(field, value) => {
                document.insert(field.clone(), value.clone());
            }
            FieldChange::Inc(field, delta) => {
                let current = match document.get(field) {
                    None | Some(Value::Null) => 0.0,
                    Some(value) => value
                        .as_f64()
                        .ok_or_else(|| anyhow::anyhow!("$inc target {} is not numeric", field))?,
                };
                document.insert(field.clone(), number(current + delta));
            }
            FieldChange::Unset(field) => {
                document.remove(field);
            }
        }
    }
    Ok(*document != before)
}

/// Integral results stay integers so counters do not turn into floats
fn number(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        json!(value as i64)
    } else {
        json!(value)
    }
}

fn apply_stage(documents: Vec<ResultRecord>, stage: &Value) -> anyhow::Result<Vec<ResultRecord>> {
    let spec = stage
        .as_object()
        .filter(|spec| spec.len() == 1)
        .ok_or_else(|| anyhow::anyhow!("each pipeline stage must be an object with one operator"))?;
    let (operator, argument) = spec.iter().next().context("empty pipeline stage")?;

    match operator.as_str() {
        "$match" => {
            let mut kept = Vec::new();
            for document in documents {
                if matches_filter(&document, argument)? {
                    kept.push(document);
                }
            }
            Ok(kept)
        }
        "$sort" => {
            let keys = argument
                .as_object()
                .ok_or_else(|| anyhow::anyhow!("$sort expects an object"))?;
            let mut documents = documents;
            documents.sort_by(|a, b| {
                for (field, direction) in keys {
                    let ordering = match (lookup(a, field), lookup(b, field)) {
                        (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
                        (Some(_), None) => Ordering::Greater,
                        (None, Some(_)) => Ordering::Less,
                        (None, None) => Ordering::Equal,
                    };
                    let ordering = if direction.as_i64() == Some(-1) {
                        ordering.reverse()
                    } else {
                        ordering
                    };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
            Ok(documents)
        }
        "$skip" => {
            let n = argument
                .as_u64()
                .ok_or_else(|| anyhow::anyhow!("$skip expects a non-negative integer"))?;
            Ok(documents.into_iter().skip(n as usize).collect())
        }
        "$limit" => {
            let n = argument
                .as_u64()
                .ok_or_else(|| anyhow::anyhow!("$limit expects a non-negative integer"))?;
            Ok(documents.into_iter().take(n as usize).collect())
        }
        "$project" => project(documents, argument),
        "$count" => {
            let field = argument
                .as_str()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| anyhow::anyhow!("$count expects a field name"))?;
            Ok(vec![counts_record(&[(field, documents.len() as u64)])])
        }
        "$group" => group(documents, argument),
        other => bail!("Unsupported pipeline stage: {}", other),
    }
}

fn project(documents: Vec<ResultRecord>, argument: &Value) -> anyhow::Result<Vec<ResultRecord>> {
    let fields = argument
        .as_object()
        .ok_or_else(|| anyhow::anyhow!("$project expects an object"))?;
    let included = |value: &Value| value.as_bool().unwrap_or_else(|| value.as_i64() != Some(0));
    let inclusion = fields.iter().any(|(field, value)| field != "_id" && included(value));
    let keep_id = fields.get("_id").map_or(true, included);

    Ok(documents
        .into_iter()
        .map(|document| {
            let mut projected = Map::new();
            for (field, value) in document {
                let listed = fields.get(&field);
                let keep = if field == "_id" {
                    keep_id
                } else if inclusion {
                    listed.is_some_and(included)
                } else {
                    listed.map_or(true, |v| included(v))
                };
                if keep {
                    projected.insert(field, value);
                }
            }
            projected
        })
        .collect())
}

/// Resolve `"$field"` references; anything else is a literal
fn expression(document: &ResultRecord, expr: &Value) -> Value {
    match expr.as_str().and_then(|s| s.strip_prefix('$')) {
        Some(path) => lookup(document, path).cloned().unwrap_or(Value::Null),
        None => expr.clone(),
    }
}

fn group(documents: Vec<ResultRecord>, argument: &Value) -> anyhow::Result<Vec<ResultRecord>> {
    let spec = argument
        .as_object()
        .ok_or_else(|| anyhow::anyhow!("$group expects an object"))?;
    let id_expr = spec.get("_id").cloned().unwrap_or(Value::Null);

    let mut accumulators = Vec::new();
    for (field, accumulator) in spec.iter().filter(|(field, _)| field.as_str() != "_id") {
        let (op, operand) = accumulator
            .as_object()
            .filter(|acc| acc.len() == 1)
            .and_then(|acc| acc.iter().next())
            .ok_or_else(|| anyhow::anyhow!("$group field {} needs one accumulator", field))?;
        if !matches!(op.as_str(), "$sum" | "$avg" | "$min" | "$max" | "$count") {
            bail!("Unsupported accumulator: {}", op);
        }
        accumulators.push((field.clone(), op.clone(), operand.clone()));
    }

    // (group key, member documents) in first-seen order
    let mut groups: Vec<(Value, Vec<ResultRecord>)> = Vec::new();
    for document in documents {
        let key = expression(&document, &id_expr);
        match groups.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, members)) => members.push(document),
            None => groups.push((key, vec![document])),
        }
    }

    Ok(groups
        .into_iter()
        .map(|(key, members)| {
            let mut record = Map::new();
            record.insert("_id".to_string(), key);
            for (field, op, operand) in &accumulators {
                let values: Vec<Value> = members.iter().map(|doc| expression(doc, operand)).collect();
                let numbers: Vec<f64> = values.iter().filter_map(Value::as_f64).collect();
                let result = match op.as_str() {
                    "$count" => json!(members.len()),
                    "$sum" => number(numbers.iter().sum()),
                    "$avg" if numbers.is_empty() => Value::Null,
                    "$avg" => json!(numbers.iter().sum::<f64>() / numbers.len() as f64),
                    "$min" => extreme(&values, Ordering::Less),
                    _ => extreme(&values, Ordering::Greater),
                };
                record.insert(field.clone(), result);
            }
            record
        })
        .collect())
}

fn extreme(values: &[Value], wanted: Ordering) -> Value {
    let mut best: Option<&Value> = None;
    for value in values.iter().filter(|v| !v.is_null()) {
        best = match best {
            Some(current) if compare_values(value, current) != Some(wanted) => Some(current),
            _ => Some(value),
        };
    }
    best.cloned().unwrap_or(Value::Null)
}
