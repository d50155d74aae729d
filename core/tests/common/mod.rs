#![allow(dead_code)]

use async_trait::async_trait;
use atelier_core::query::SelectRequest;
use atelier_core::schema::{Record, Table};
use atelier_core::service::{
    ErrorCode, MemoryService, SelectResponse, ServiceError, ServiceResult, TableConfig,
    TableService, WriteRequest, WriteResponse,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;

pub fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("not an object: {}", other),
    }
}

pub struct Products;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub price: i64,
}

#[derive(Serialize)]
pub struct NewProduct {
    pub name: String,
    pub price: i64,
}

#[derive(Debug, Default, Serialize)]
pub struct ProductPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<i64>,
}

impl Table for Products {
    const NAME: &'static str = "products";
    const PRIMARY_KEY: &'static [&'static str] = &["id"];
    type Row = Product;
    type Insert = NewProduct;
    type Update = ProductPatch;
}

pub struct OrderItems;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OrderItem {
    pub order_id: i64,
    pub product_id: i64,
    pub quantity: i64,
}

#[derive(Serialize)]
pub struct NewOrderItem {
    pub order_id: i64,
    pub product_id: i64,
    pub quantity: i64,
}

#[derive(Debug, Default, Serialize)]
pub struct OrderItemPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<i64>,
}

impl Table for OrderItems {
    const NAME: &'static str = "order_items";
    const PRIMARY_KEY: &'static [&'static str] = &["order_id", "product_id"];
    type Row = OrderItem;
    type Insert = NewOrderItem;
    type Update = OrderItemPatch;
}

pub fn product_rows() -> Vec<Record> {
    vec![
        record(json!({"id": 1, "name": "Rose Absolue", "price": 95})),
        record(json!({"id": 2, "name": "Oud Noir", "price": 180})),
        record(json!({"id": 3, "name": "White Rose", "price": 60})),
    ]
}

pub fn order_item_rows() -> Vec<Record> {
    vec![
        record(json!({"order_id": 1, "product_id": 10, "quantity": 1})),
        record(json!({"order_id": 1, "product_id": 11, "quantity": 2})),
        record(json!({"order_id": 2, "product_id": 10, "quantity": 3})),
    ]
}

pub fn storefront() -> MemoryService {
    MemoryService::new()
        .with_table(
            TableConfig::new("products", &["id"])
                .identity("id")
                .rows(product_rows()),
        )
        .with_table(TableConfig::new("order_items", &["order_id", "product_id"]).rows(order_item_rows()))
}

/// Counts calls and remembers the last requests before delegating.
pub struct SpyService {
    inner: MemoryService,
    pub selects: AtomicUsize,
    pub writes: AtomicUsize,
    pub last_select: Mutex<Option<SelectRequest>>,
}

impl SpyService {
    pub fn new(inner: MemoryService) -> Arc<Self> {
        Arc::new(Self {
            inner,
            selects: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            last_select: Mutex::new(None),
        })
    }

    pub fn calls(&self) -> usize {
        self.selects.load(Ordering::SeqCst) + self.writes.load(Ordering::SeqCst)
    }

    pub fn last_select(&self) -> SelectRequest {
        self.last_select.lock().clone().expect("no select recorded")
    }
}

#[async_trait]
impl TableService for SpyService {
    async fn select(&self, request: SelectRequest) -> ServiceResult<SelectResponse> {
        self.selects.fetch_add(1, Ordering::SeqCst);
        *self.last_select.lock() = Some(request.clone());
        self.inner.select(request).await
    }

    async fn write(&self, request: WriteRequest) -> ServiceResult<WriteResponse> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.write(request).await
    }

    async fn list_tables(&self) -> ServiceResult<Vec<String>> {
        self.inner.list_tables().await
    }
}

/// Rejects every write.
pub struct FailingService;

#[async_trait]
impl TableService for FailingService {
    async fn select(&self, _request: SelectRequest) -> ServiceResult<SelectResponse> {
        Ok(SelectResponse::default())
    }

    async fn write(&self, _request: WriteRequest) -> ServiceResult<WriteResponse> {
        Err(ServiceError::new(ErrorCode::ConstraintViolation, "write rejected"))
    }

    async fn list_tables(&self) -> ServiceResult<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Holds every write until `release` is notified.
pub struct GatedService {
    inner: MemoryService,
    pub release: Notify,
}

impl GatedService {
    pub fn new(inner: MemoryService) -> Arc<Self> {
        Arc::new(Self {
            inner,
            release: Notify::new(),
        })
    }
}

#[async_trait]
impl TableService for GatedService {
    async fn select(&self, request: SelectRequest) -> ServiceResult<SelectResponse> {
        self.inner.select(request).await
    }

    async fn write(&self, request: WriteRequest) -> ServiceResult<WriteResponse> {
        self.release.notified().await;
        self.inner.write(request).await
    }

    async fn list_tables(&self) -> ServiceResult<Vec<String>> {
        self.inner.list_tables().await
    }
}
