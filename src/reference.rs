//! Built-in reference target.
//!
//! A small axum server exposing the same routes as the benchmarked framework
//! servers. The binary runs it via the hidden `--internal-reference-target`
//! flag, which gives the harness a real child process to calibrate and test
//! against without any external toolchain.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::Query;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::info;

const MAX_QUERIES: usize = 1000;
const MAX_DB_ROWS: usize = 1000;
const MAX_UPDATE_ROWS: usize = 500;
const MAX_JSON_DEPTH: usize = 10;
const MAX_BATCH_ITEMS: usize = 10_000;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DatabaseItem {
    id: usize,
    random_number: u32,
    message: String,
    timestamp: String,
    metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItem {
    pub id: i64,
    pub value: f64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub items: Vec<BatchItem>,
    pub operation: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchResult {
    operation: String,
    result: f64,
    count: usize,
    processing_time: f64,
    timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    pub phone: String,
    pub age: u32,
    pub active: bool,
    pub tags: Vec<String>,
    pub preferences: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidateRequest {
    pub user: User,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct CountQuery {
    queries: Option<String>,
    depth: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    page: Option<String>,
    limit: Option<String>,
}

/// Positive integer query parameter, capped at [`MAX_QUERIES`].
fn parse_count(raw: Option<&str>, default: usize) -> usize {
    raw.and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .map(|v| v.min(MAX_QUERIES))
        .unwrap_or(default)
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

fn unix_nanos() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

fn database_items(count: usize) -> Vec<DatabaseItem> {
    let mut rng = rand::thread_rng();
    let now = now_rfc3339();
    (0..count.clamp(1, MAX_DB_ROWS))
        .map(|i| DatabaseItem {
            id: i + 1,
            random_number: rng.gen_range(1..=10_000),
            message: format!("Database record {}", i + 1),
            timestamp: now.clone(),
            metadata: json!({
                "version": "1.0.0",
                "source": "simulated_db",
                "index": i,
                "checksum": format!("checksum_{}_{}", i, unix_nanos()),
            }),
        })
        .collect()
}

fn updated_items(count: usize) -> Vec<DatabaseItem> {
    let mut rng = rand::thread_rng();
    let now = now_rfc3339();
    (0..count.clamp(1, MAX_UPDATE_ROWS))
        .map(|i| DatabaseItem {
            id: i + 1,
            random_number: rng.gen_range(1..=10_000),
            message: format!("Updated record {} at {}", i + 1, now),
            timestamp: now.clone(),
            metadata: json!({
                "operation": "UPDATE",
                "affectedRows": 1,
                "executionTime": rng.gen::<f64>() * 10.0 + 1.0,
                "transactionId": format!("tx_{}_{}", unix_nanos(), i),
            }),
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    Object,
    Array,
}

/// One level of the complex-json payload: objects carry a random item array
/// and a nested child that is randomly an object or an array.
fn nested_node(depth: usize, max_depth: usize, kind: NodeKind) -> Value {
    if depth >= max_depth {
        return match kind {
            NodeKind::Array => json!([]),
            NodeKind::Object => json!("leaf"),
        };
    }

    let mut rng = rand::thread_rng();
    if kind == NodeKind::Array {
        let value = rng.gen::<f64>() * 1000.0;
        return json!([
            depth,
            format!("array-data-{}", depth),
            nested_node(depth + 1, max_depth, NodeKind::Object),
            value,
            now_rfc3339(),
        ]);
    }

    let items: Vec<Value> = (0..rng.gen_range(1..=10))
        .map(|i| json!({ "index": i, "value": rng.gen::<f64>() * 100.0, "label": format!("item-{}", i) }))
        .collect();
    let next = if rng.gen::<f64>() > 0.5 {
        NodeKind::Array
    } else {
        NodeKind::Object
    };

    json!({
        "level": depth,
        "data": format!("nested-data-{}", depth),
        "nested": nested_node(depth + 1, max_depth, next),
        "array": items,
        "timestamp": now_rfc3339(),
        "metadata": {
            "depth": depth,
            "complexity": 1u64 << depth,
            "generated": unix_nanos(),
        },
    })
}

fn complex_json(depth: usize) -> Value {
    nested_node(0, depth.clamp(1, MAX_JSON_DEPTH), NodeKind::Object)
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

fn aggregate(operation: &str, values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let sum: f64 = values.iter().sum();
    let result = match operation {
        "sum" => sum,
        "average" => sum / values.len() as f64,
        "count" => values.len() as f64,
        "min" => values.iter().copied().fold(f64::INFINITY, f64::min),
        "max" => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        "median" => {
            values.sort_unstable_by(f64::total_cmp);
            let mid = values.len() / 2;
            if values.len() % 2 == 0 {
                (values[mid - 1] + values[mid]) / 2.0
            } else {
                values[mid]
            }
        }
        _ => return None,
    };
    Some(result)
}

/// Mainland mobile number: 11 digits, `1` then `3`-`9`.
fn valid_phone(phone: &str) -> bool {
    let bytes = phone.as_bytes();
    bytes.len() == 11
        && bytes.iter().all(u8::is_ascii_digit)
        && bytes[0] == b'1'
        && (b'3'..=b'9').contains(&bytes[1])
}

fn validate_user(user: &User) -> Result<(), &'static str> {
    let name_len = user.name.chars().count();
    if !(2..=50).contains(&name_len) {
        return Err("name must be 2-50 characters");
    }
    if !valid_phone(&user.phone) {
        return Err("invalid phone number");
    }
    if user.age > 120 {
        return Err("age out of range");
    }
    Ok(())
}

async fn batch_process(Json(request): Json<BatchRequest>) -> Response {
    let started = Instant::now();
    if request.items.is_empty() {
        return bad_request("items array cannot be empty");
    }
    if request.items.len() > MAX_BATCH_ITEMS {
        return bad_request("items array too large (max 10,000)");
    }
    if request.items.iter().any(|item| item.name.is_empty()) {
        return bad_request("Validation failed");
    }
    let mut values: Vec<f64> = request.items.iter().map(|item| item.value).collect();
    match aggregate(&request.operation, &mut values) {
        Some(result) => Json(BatchResult {
            operation: request.operation,
            result: round_to(result, 6),
            count: values.len(),
            processing_time: round_to(started.elapsed().as_secs_f64() * 1_000.0, 3),
            timestamp: now_rfc3339(),
        })
        .into_response(),
        None => bad_request("Validation failed"),
    }
}

async fn schema_validate(Query(query): Query<PageQuery>, Json(request): Json<ValidateRequest>) -> Response {
    if let Err(reason) = validate_user(&request.user) {
        return bad_request(reason);
    }
    Json(json!({
        "success": true,
        "validatedBody": request,
        "validatedQuery": { "page": query.page, "limit": query.limit },
        "timestamp": now_rfc3339(),
    }))
    .into_response()
}

pub fn router() -> Router {
    Router::new()
        .route("/", get(|| async { "Hello Reference!" }))
        .route(
            "/health",
            get(|| async { Json(json!({ "status": "ok", "framework": "reference" })) }),
        )
        .route(
            "/techempower/json",
            get(|| async { Json(json!({ "message": "Hello, World!" })) }),
        )
        .route("/techempower/plaintext", get(|| async { "Hello, World!" }))
        .route(
            "/techempower/db",
            get(|Query(q): Query<CountQuery>| async move {
                Json(database_items(parse_count(q.queries.as_deref(), 1)))
            }),
        )
        .route(
            "/techempower/updates",
            get(|Query(q): Query<CountQuery>| async move {
                Json(updated_items(parse_count(q.queries.as_deref(), 1)))
            }),
        )
        .route(
            "/techempower/complex-json",
            get(|Query(q): Query<CountQuery>| async move {
                Json(complex_json(parse_count(q.depth.as_deref(), 3)))
            }),
        )
        .route("/techempower/batch-process", post(batch_process))
        .route("/schema/validate", post(schema_validate))
}

/// Serve the reference routes on `127.0.0.1:port` until the process exits.
pub async fn serve(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(addr).await?;
    info!("Reference target listening on http://{}", addr);
    axum::serve(listener, router()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count(None, 1), 1);
        assert_eq!(parse_count(Some("20"), 1), 20);
        assert_eq!(parse_count(Some("0"), 1), 1);
        assert_eq!(parse_count(Some("abc"), 3), 3);
        assert_eq!(parse_count(Some("50000"), 1), MAX_QUERIES);
    }

    #[test]
    fn test_aggregate_operations() {
        let mut values = vec![4.0, 1.0, 3.0, 2.0];
        assert_eq!(aggregate("sum", &mut values), Some(10.0));
        assert_eq!(aggregate("average", &mut values), Some(2.5));
        assert_eq!(aggregate("min", &mut values), Some(1.0));
        assert_eq!(aggregate("max", &mut values), Some(4.0));
        assert_eq!(aggregate("median", &mut values), Some(2.5));
        assert_eq!(aggregate("mode", &mut values), None);
        assert_eq!(aggregate("sum", &mut []), None);
    }

    #[test]
    fn test_phone_validation() {
        assert!(valid_phone("13800138000"));
        assert!(!valid_phone("12800138000"));
        assert!(!valid_phone("1380013800"));
        assert!(!valid_phone("1380013800a"));
    }

    /// Follow `nested` links (through array nodes) down to the leaf.
    fn nesting_depth(value: &Value) -> usize {
        match value {
            Value::Object(map) => 1 + nesting_depth(&map["nested"]),
            Value::Array(items) if items.len() == 5 => 1 + nesting_depth(&items[2]),
            _ => 0,
        }
    }

    #[test]
    fn test_complex_json_depth_is_clamped() {
        let value = complex_json(3);
        assert_eq!(value["level"], 0);
        assert_eq!(value["metadata"]["complexity"], 1);
        assert_eq!(nesting_depth(&value), 3);
        assert_eq!(nesting_depth(&complex_json(50)), MAX_JSON_DEPTH);
        assert_eq!(nesting_depth(&complex_json(0)), 1);
    }

    #[test]
    fn test_database_rows_carry_metadata() {
        let rows = database_items(MAX_QUERIES);
        assert_eq!(rows.len(), MAX_DB_ROWS);
        assert_eq!(rows[0].message, "Database record 1");
        assert_eq!(rows[3].metadata["index"], 3);
        assert_eq!(rows[0].metadata["source"], "simulated_db");

        let updates = updated_items(MAX_QUERIES);
        assert_eq!(updates.len(), MAX_UPDATE_ROWS);
        assert_eq!(updates[0].metadata["operation"], "UPDATE");
        assert_eq!(updates[0].metadata["affectedRows"], 1);
    }

    #[tokio::test]
    async fn test_batch_process_limits() {
        let item = BatchItem {
            id: 1,
            value: 1.0,
            name: "x".into(),
            category: None,
            tags: None,
        };
        let empty = BatchRequest {
            items: Vec::new(),
            operation: "sum".into(),
        };
        assert_eq!(batch_process(Json(empty)).await.status(), StatusCode::BAD_REQUEST);

        let oversized = BatchRequest {
            items: vec![item.clone(); MAX_BATCH_ITEMS + 1],
            operation: "sum".into(),
        };
        assert_eq!(batch_process(Json(oversized)).await.status(), StatusCode::BAD_REQUEST);

        let at_limit = BatchRequest {
            items: vec![item; MAX_BATCH_ITEMS],
            operation: "sum".into(),
        };
        assert_eq!(batch_process(Json(at_limit)).await.status(), StatusCode::OK);
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(2.123_456_789, 6), 2.123_457);
        assert_eq!(round_to(0.0004, 3), 0.0);
    }
}
