//! In-memory table service
//!
//! Holds every table as a vector of JSON records. Used by the `atelierd`
//! server and directly in tests.

use super::eval::{self, Predicate};
use super::{
    ErrorCode, SelectResponse, ServiceError, ServiceResult, TableService, WriteRequest,
    WriteResponse,
};
use crate::query::SelectRequest;
use crate::schema::Record;
use crate::{AtelierError, AtelierResult};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Definition of one table, optionally with seed rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    pub name: String,
    pub primary_key: Vec<String>,
    /// Integer column filled from a sequence when an insert omits it.
    #[serde(default)]
    pub identity: Option<String>,
    #[serde(default)]
    pub rows: Vec<Record>,
}

impl TableConfig {
    pub fn new(name: impl Into<String>, primary_key: &[&str]) -> Self {
        Self {
            name: name.into(),
            primary_key: primary_key.iter().map(|c| c.to_string()).collect(),
            identity: None,
            rows: Vec::new(),
        }
    }

    pub fn identity(mut self, column: impl Into<String>) -> Self {
        self.identity = Some(column.into());
        self
    }

    pub fn rows(mut self, rows: Vec<Record>) -> Self {
        self.rows = rows;
        self
    }
}

#[derive(Debug, Deserialize)]
struct SeedFile {
    tables: Vec<TableConfig>,
}

struct TableData {
    primary_key: Vec<String>,
    identity: Option<String>,
    next_id: i64,
    rows: Vec<Record>,
}

impl TableData {
    fn from_config(config: TableConfig) -> Self {
        let next_id = config
            .identity
            .as_ref()
            .map(|column| {
                config
                    .rows
                    .iter()
                    .filter_map(|row| row.get(column).and_then(Value::as_i64))
                    .max()
                    .unwrap_or(0)
                    + 1
            })
            .unwrap_or(1);

        Self {
            primary_key: config.primary_key,
            identity: config.identity,
            next_id,
            rows: config.rows,
        }
    }

    fn assign_identity(&mut self, row: &mut Record) {
        if let Some(column) = &self.identity
            && row.get(column).is_none_or(Value::is_null)
        {
            row.insert(column.clone(), Value::from(self.next_id));
            self.next_id += 1;
        } else if let Some(column) = &self.identity
            && let Some(id) = row.get(column).and_then(Value::as_i64)
        {
            self.next_id = self.next_id.max(id + 1);
        }
    }

    fn key_of(&self, row: &Record) -> Option<Vec<Value>> {
        self.primary_key
            .iter()
            .map(|column| row.get(column).cloned())
            .collect()
    }

    fn find(&self, columns: &[String], probe: &Record) -> Option<usize> {
        self.rows.iter().position(|row| {
            columns
                .iter()
                .all(|c| probe.get(c).is_some() && row.get(c) == probe.get(c))
        })
    }
}

fn matches_all(row: &Record, matching: &Record) -> bool {
    matching
        .iter()
        .all(|(column, value)| row.get(column) == Some(value))
}

pub struct MemoryService {
    tables: DashMap<String, TableData>,
}

impl MemoryService {
    pub fn new() -> Self {
        Self {
            tables: DashMap::new(),
        }
    }

    pub fn with_table(self, config: TableConfig) -> Self {
        self.register(config);
        self
    }

    /// Create (or replace) a table.
    pub fn register(&self, config: TableConfig) {
        debug!(table = %config.name, rows = config.rows.len(), "registering table");
        self.tables
            .insert(config.name.clone(), TableData::from_config(config));
    }

    /// Build a service from a JSON seed file of the form
    /// `{"tables": [{"name": ..., "primary_key": [...], "rows": [...]}]}`.
    pub fn from_seed_file<P: AsRef<Path>>(path: P) -> AtelierResult<Self> {
        let contents = fs::read_to_string(path.as_ref())?;
        let seed: SeedFile = serde_json::from_str(&contents).map_err(|e| {
            AtelierError::Config(format!(
                "Failed to parse seed file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let service = Self::new();
        for table in seed.tables {
            service.register(table);
        }
        Ok(service)
    }

    fn table_not_found(name: &str) -> ServiceError {
        ServiceError::new(
            ErrorCode::TableNotFound,
            format!("Table '{}' not found", name),
        )
    }

    fn run_select(&self, request: &SelectRequest) -> ServiceResult<SelectResponse> {
        let table = self
            .tables
            .get(&request.table)
            .ok_or_else(|| Self::table_not_found(&request.table))?;

        let predicates: Vec<Predicate> = request
            .filters
            .iter()
            .map(eval::compile)
            .collect::<ServiceResult<_>>()?;
        let selections = eval::parse_columns(&request.columns)?;

        let mut rows: Vec<Record> = table
            .rows
            .iter()
            .filter(|row| predicates.iter().all(|p| p.matches(row)))
            .cloned()
            .collect();
        drop(table);

        let count = request.count.map(|_| rows.len() as u64);
        eval::apply_order(&mut rows, &request.order);

        if let Some((from, to)) = request.range {
            if to < from {
                return Err(ServiceError::new(
                    ErrorCode::InvalidRequest,
                    format!("Invalid range {}-{}", from, to),
                ));
            }
            let len = rows.len() as u64;
            let start = from.min(len) as usize;
            let end = to.saturating_add(1).min(len) as usize;
            rows = rows.drain(start..end).collect();
        }

        if request.single {
            match rows.len() {
                0 => {
                    return Err(ServiceError::new(
                        ErrorCode::NoRows,
                        "Single row requested, no rows returned",
                    ));
                }
                1 => {}
                n => {
                    return Err(ServiceError::new(
                        ErrorCode::MultipleRows,
                        format!("Single row requested, {} rows returned", n),
                    ));
                }
            }
        }

        let rows = rows
            .iter()
            .map(|row| eval::project(row, &selections))
            .collect();
        Ok(SelectResponse { rows, count })
    }

    fn run_write(&self, request: WriteRequest) -> ServiceResult<WriteResponse> {
        let name = request.table().to_string();
        let mut table = self
            .tables
            .get_mut(&name)
            .ok_or_else(|| Self::table_not_found(&name))?;

        match request {
            WriteRequest::Insert { rows, .. } => {
                let mut written = Vec::with_capacity(rows.len());
                let mut keys = Vec::new();
                for mut row in rows {
                    table.assign_identity(&mut row);
                    if let Some(key) = table.key_of(&row) {
                        let duplicate = keys.contains(&key)
                            || table.rows.iter().any(|r| table.key_of(r).as_ref() == Some(&key));
                        if duplicate {
                            return Err(ServiceError::new(
                                ErrorCode::ConstraintViolation,
                                format!("Duplicate key in table '{}'", name),
                            )
                            .with_details(format!("{:?}", key)));
                        }
                        keys.push(key);
                    }
                    written.push(row);
                }
                table.rows.extend(written.iter().cloned());
                Ok(WriteResponse { rows: written })
            }
            WriteRequest::Update { matching, data, .. } => {
                if matching.is_empty() {
                    return Err(ServiceError::new(
                        ErrorCode::InvalidRequest,
                        "Update requires at least one match column",
                    ));
                }
                let mut written = Vec::new();
                for row in table.rows.iter_mut().filter(|r| matches_all(r, &matching)) {
                    for (column, value) in &data {
                        row.insert(column.clone(), value.clone());
                    }
                    written.push(row.clone());
                }
                Ok(WriteResponse { rows: written })
            }
            WriteRequest::Delete { matching, .. } => {
                if matching.is_empty() {
                    return Err(ServiceError::new(
                        ErrorCode::InvalidRequest,
                        "Delete requires at least one match column",
                    ));
                }
                let (removed, kept): (Vec<Record>, Vec<Record>) = table
                    .rows
                    .drain(..)
                    .partition(|r| matches_all(r, &matching));
                table.rows = kept;
                Ok(WriteResponse { rows: removed })
            }
            WriteRequest::Upsert {
                rows, on_conflict, ..
            } => {
                let conflict: Vec<String> = on_conflict
                    .split(',')
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .collect();
                if conflict.is_empty() {
                    return Err(ServiceError::new(
                        ErrorCode::InvalidRequest,
                        "Upsert requires a conflict target",
                    ));
                }

                let mut written = Vec::with_capacity(rows.len());
                for mut row in rows {
                    match table.find(&conflict, &row) {
                        Some(index) => {
                            let existing = &mut table.rows[index];
                            for (column, value) in row {
                                existing.insert(column, value);
                            }
                            written.push(existing.clone());
                        }
                        None => {
                            table.assign_identity(&mut row);
                            table.rows.push(row.clone());
                            written.push(row);
                        }
                    }
                }
                Ok(WriteResponse { rows: written })
            }
        }
    }
}

impl Default for MemoryService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TableService for MemoryService {
    async fn select(&self, request: SelectRequest) -> ServiceResult<SelectResponse> {
        self.run_select(&request)
    }

    async fn write(&self, request: WriteRequest) -> ServiceResult<WriteResponse> {
        self.run_write(request)
    }

    async fn list_tables(&self) -> ServiceResult<Vec<String>> {
        let mut names: Vec<String> = self.tables.iter().map(|e| e.key().clone()).collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{CountMode, Filters, SelectBuilder, Sort};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    fn catalog() -> MemoryService {
        MemoryService::new().with_table(
            TableConfig::new("products", &["id"])
                .identity("id")
                .rows(vec![
                    record(json!({"id": 1, "name": "Rose Absolue", "price": 95, "brand_id": 1})),
                    record(json!({"id": 2, "name": "Oud Noir", "price": 180, "brand_id": 2})),
                    record(json!({"id": 3, "name": "White Rose", "price": 60, "brand_id": 1})),
                ]),
        )
    }

    #[tokio::test]
    async fn test_select_filter_count_and_range() {
        let service = catalog();
        let request = SelectBuilder::new("products", "id, name")
            .count(Some(CountMode::Exact))
            .filter(|f: Filters| f.ilike("name", "%rose%"))
            .order(&Sort::desc("price"))
            .range(0, 0)
            .into_request();

        let response = service.select(request).await.unwrap();
        assert_eq!(response.count, Some(2));
        assert_eq!(response.rows, vec![record(json!({"id": 1, "name": "Rose Absolue"}))]);
    }

    #[tokio::test]
    async fn test_single_distinguishes_zero_and_many() {
        let service = catalog();

        let none = SelectBuilder::new("products", "*")
            .filter(|f| f.eq("id", 42))
            .single()
            .into_request();
        let err = service.select(none).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NoRows);

        let many = SelectBuilder::new("products", "*")
            .filter(|f| f.eq("brand_id", 1))
            .single()
            .into_request();
        let err = service.select(many).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::MultipleRows);
    }

    #[tokio::test]
    async fn test_range_past_end_is_empty() {
        let service = catalog();
        let request = SelectBuilder::new("products", "*").range(10, 19).into_request();
        assert!(service.select(request).await.unwrap().rows.is_empty());
    }

    #[tokio::test]
    async fn test_insert_assigns_identity_and_rejects_duplicates() {
        let service = catalog();
        let written = service
            .write(WriteRequest::Insert {
                table: "products".to_string(),
                rows: vec![record(json!({"name": "Vetiver", "price": 70}))],
            })
            .await
            .unwrap();
        assert_eq!(written.rows[0]["id"], json!(4));

        let err = service
            .write(WriteRequest::Insert {
                table: "products".to_string(),
                rows: vec![record(json!({"id": 2, "name": "Copy"}))],
            })
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ConstraintViolation);
    }

    #[tokio::test]
    async fn test_update_delete_and_upsert() {
        let service = catalog();

        let updated = service
            .write(WriteRequest::Update {
                table: "products".to_string(),
                matching: record(json!({"id": 3})),
                data: record(json!({"price": 65})),
            })
            .await
            .unwrap();
        assert_eq!(updated.rows[0]["price"], json!(65));

        let removed = service
            .write(WriteRequest::Delete {
                table: "products".to_string(),
                matching: record(json!({"id": 2})),
            })
            .await
            .unwrap();
        assert_eq!(removed.rows.len(), 1);

        let upserted = service
            .write(WriteRequest::Upsert {
                table: "products".to_string(),
                rows: vec![
                    record(json!({"id": 1, "price": 99})),
                    record(json!({"id": 9, "name": "Ambre", "price": 75})),
                ],
                on_conflict: "id".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(upserted.rows[0]["name"], json!("Rose Absolue"));
        assert_eq!(upserted.rows[0]["price"], json!(99));

        let all = service
            .select(SelectRequest::new("products", "id"))
            .await
            .unwrap();
        let ids: Vec<Value> = all.rows.iter().map(|r| r["id"].clone()).collect();
        assert_eq!(ids, vec![json!(1), json!(3), json!(9)]);
    }

    #[tokio::test]
    async fn test_unknown_table() {
        let err = MemoryService::new()
            .select(SelectRequest::new("banners", "*"))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::TableNotFound);
    }

    #[test]
    fn test_seed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seed.json");
        fs::write(
            &path,
            r#"{"tables": [{"name": "brands", "primary_key": ["id"], "identity": "id",
                "rows": [{"id": 5, "name": "Maison"}]}]}"#,
        )
        .unwrap();

        let service = MemoryService::from_seed_file(&path).unwrap();
        let table = service.tables.get("brands").unwrap();
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.next_id, 6);
    }
}
