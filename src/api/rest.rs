use axum::{
    Router,
    routing::{get, post, delete},
    extract::{Query, State, Json},
    extract::rejection::QueryRejection,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use crate::api::series::{self, DataPoint, LatestReading};
use crate::interfaces::reading_store::ReadingStore;
use crate::observability::metrics;
use crate::telemetry::connection::{ConnectionState, FeedConnectionManager};

const DEFAULT_LIMIT: i64 = 1000;
const MAX_LIMIT: i64 = 10_000;
const MAX_HOURS: i64 = 720;

pub struct ApiState {
    pub store: Arc<dyn ReadingStore>,
    /// Live feed, when the service runs one. Read-only from here.
    pub connection: Option<Arc<FeedConnectionManager>>,
    pub enable_seed: bool,
}

impl ApiState {
    fn live_value(&self) -> Option<f64> {
        self.connection.as_ref().and_then(|c| c.current_value())
    }
}

pub fn create_router(state: Arc<ApiState>, cors_origins: &[String]) -> Router {
    let mut router = Router::new()
        .route("/health", get(health_check))
        .route("/telemetry", get(get_telemetry))
        .route("/telemetry/latest", get(get_latest))
        .route("/status", get(get_status))
        .route("/metrics", get(get_metrics));

    if state.enable_seed {
        router = router
            .route("/telemetry/seed", post(seed_telemetry))
            .route("/telemetry/clear", delete(clear_telemetry));
    }

    router.layer(cors_layer(cors_origins)).with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let values: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!("Ignoring invalid CORS origin: {}", o);
                    None
                }
            })
            .collect();
        AllowOrigin::list(values)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal,
}

impl From<crate::error::Error> for ApiError {
    fn from(e: crate::error::Error) -> Self {
        tracing::error!("Request failed: {}", e);
        ApiError::Internal
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string()),
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

#[derive(Debug, Deserialize)]
struct TelemetryQuery {
    #[serde(default, deserialize_with = "query_time")]
    start_time: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "query_time")]
    end_time: Option<DateTime<Utc>>,
    hours: Option<i64>,
    limit: Option<i64>,
}

/// ISO 8601 timestamp, with or without an offset. Naive values are UTC.
fn parse_query_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .map(|naive| naive.and_utc())
}

fn query_time<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(raw) => parse_query_time(&raw)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid datetime: {}", raw))),
    }
}

#[derive(Debug, Serialize)]
struct TelemetryResponse {
    data: Vec<DataPoint>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    total_points: usize,
}

async fn get_telemetry(
    State(state): State<Arc<ApiState>>,
    query: Result<Query<TelemetryQuery>, QueryRejection>,
) -> Result<Json<TelemetryResponse>, ApiError> {
    let Query(query) = query?;

    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    if !(1..=MAX_LIMIT).contains(&limit) {
        return Err(ApiError::BadRequest(format!("limit must be between 1 and {}", MAX_LIMIT)));
    }

    let (start_time, end_time) = match query.hours {
        Some(hours) if !(1..=MAX_HOURS).contains(&hours) => {
            return Err(ApiError::BadRequest(format!("hours must be between 1 and {}", MAX_HOURS)));
        }
        Some(hours) => {
            let end = Utc::now();
            (Some(end - Duration::hours(hours)), Some(end))
        }
        None => (query.start_time, query.end_time),
    };

    let readings = state.store.readings(start_time, end_time, limit as usize).await?;
    let data = series::build_series(readings, end_time, state.live_value(), Utc::now());

    Ok(Json(TelemetryResponse {
        total_points: data.len(),
        data,
        start_time,
        end_time,
    }))
}

async fn get_latest(State(state): State<Arc<ApiState>>) -> Result<Json<LatestReading>, ApiError> {
    let stored = state.store.latest_reading().await?;
    series::latest_view(stored, state.live_value(), Utc::now())
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("No telemetry data available".to_string()))
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    state: ConnectionState,
    item: Option<String>,
    live_value: Option<f64>,
    connection_attempts: u64,
    status_history: Vec<String>,
}

async fn get_status(State(state): State<Arc<ApiState>>) -> Json<StatusResponse> {
    let response = match &state.connection {
        Some(conn) => StatusResponse {
            state: conn.state(),
            item: Some(conn.item().to_string()),
            live_value: conn.current_value(),
            connection_attempts: conn.connection_attempts(),
            status_history: conn.status_history(),
        },
        None => StatusResponse {
            state: ConnectionState::Disconnected,
            item: None,
            live_value: None,
            connection_attempts: 0,
            status_history: Vec::new(),
        },
    };
    Json(response)
}

async fn get_metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather_text(),
    )
}

async fn seed_telemetry(State(state): State<Arc<ApiState>>) -> Result<Json<serde_json::Value>, ApiError> {
    if state.store.latest_reading().await?.is_some() {
        return Ok(Json(json!({ "message": "Database already contains data" })));
    }

    let readings = series::seed_readings(&mut rand::thread_rng(), Utc::now());
    for reading in &readings {
        state.store.add_reading(reading).await?;
    }

    tracing::info!("Seeded {} sample telemetry readings", readings.len());
    Ok(Json(json!({ "message": "Sample telemetry data added" })))
}

async fn clear_telemetry(State(state): State<Arc<ApiState>>) -> Result<Json<serde_json::Value>, ApiError> {
    let deleted = state.store.clear_all().await?;
    Ok(Json(json!({ "message": format!("Cleared {} telemetry readings", deleted) })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use chrono::TimeZone;
    use std::collections::HashMap;
    use tower::ServiceExt;
    use crate::error::Error;
    use crate::interfaces::feed_transport::{
        FeedListener, ItemUpdate, MockFeedSession, MockFeedTransport, SessionStatus, SubscriptionId,
    };
    use crate::interfaces::reading_store::MockReadingStore;
    use crate::storage::SqliteReadingStore;
    use crate::telemetry::connection::ConnectionSettings;
    use crate::types::Reading;

    async fn empty_store() -> Arc<SqliteReadingStore> {
        let store = SqliteReadingStore::in_memory().unwrap();
        store.init().await.unwrap();
        Arc::new(store)
    }

    async fn live_connection(value: &'static str) -> Arc<FeedConnectionManager> {
        let mut transport = MockFeedTransport::new();
        transport.expect_open().returning(move |listener: Arc<dyn FeedListener>| {
            listener.on_status_change(SessionStatus::ws_streaming());
            let mut fields = HashMap::new();
            fields.insert("Value".to_string(), Some(value.to_string()));
            listener.on_item_update(ItemUpdate { item_name: "NODE3000005".to_string(), fields });
            let mut session = MockFeedSession::new();
            session.expect_subscribe().returning(|_| Ok(SubscriptionId(1)));
            session.expect_unsubscribe().returning(|_| Ok(()));
            session.expect_disconnect().returning(|| Ok(()));
            Ok(Box::new(session))
        });

        let conn = Arc::new(FeedConnectionManager::new(
            Arc::new(transport),
            ConnectionSettings {
                item: "NODE3000005".to_string(),
                field: "Value".to_string(),
                connect_timeout: std::time::Duration::from_millis(200),
            },
        ));
        assert!(conn.ensure_connected().await);
        conn
    }

    fn app(store: Arc<dyn ReadingStore>, connection: Option<Arc<FeedConnectionManager>>, enable_seed: bool) -> Router {
        let state = Arc::new(ApiState { store, connection, enable_seed });
        create_router(state, &["http://localhost:3000".to_string()])
    }

    async fn call(app: Router, method: Method, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn health_reports_healthy() {
        let (status, body) = call(app(empty_store().await, None, false), Method::GET, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "healthy" }));
    }

    #[tokio::test]
    async fn telemetry_appends_live_point_to_stale_history() {
        let store = empty_store().await;
        store.add_reading(&Reading::new(Utc::now() - Duration::minutes(5), 46.2)).await.unwrap();
        let conn = live_connection("50.0").await;

        let (status, body) = call(app(store, Some(conn), false), Method::GET, "/telemetry").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_points"], 2);
        assert_eq!(body["data"][0]["urine_tank_level"], 46.2);
        assert_eq!(body["data"][1]["urine_tank_level"], 50.0);
    }

    #[tokio::test]
    async fn telemetry_range_is_chronological_and_bounded() {
        let store = empty_store().await;
        let base = Utc::now() - Duration::hours(3);
        for (i, v) in [45.0, 46.2, 44.9].into_iter().enumerate() {
            store.add_reading(&Reading::new(base + Duration::minutes(i as i64 * 10), v)).await.unwrap();
        }

        let start = urlencoding::encode(&(base + Duration::minutes(5)).to_rfc3339()).into_owned();
        let end = urlencoding::encode(&(base + Duration::minutes(30)).to_rfc3339()).into_owned();
        let uri = format!("/telemetry?start_time={}&end_time={}", start, end);

        let (status, body) = call(app(store, None, false), Method::GET, &uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_points"], 2);
        assert_eq!(body["data"][0]["urine_tank_level"], 46.2);
        assert_eq!(body["data"][1]["urine_tank_level"], 44.9);
    }

    #[tokio::test]
    async fn telemetry_rejects_out_of_range_parameters() {
        for uri in ["/telemetry?hours=0", "/telemetry?hours=721", "/telemetry?limit=0", "/telemetry?limit=10001", "/telemetry?start_time=yesterday"] {
            let (status, body) = call(app(empty_store().await, None, false), Method::GET, uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
            assert!(body["detail"].is_string());
        }
    }

    #[test]
    fn query_time_accepts_naive_and_offset_forms() {
        let noon = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert_eq!(parse_query_time("2024-05-01T12:00:00Z"), Some(noon));
        assert_eq!(parse_query_time("2024-05-01T14:00:00+02:00"), Some(noon));
        assert_eq!(parse_query_time("2024-05-01T12:00:00"), Some(noon));
        assert_eq!(parse_query_time("2024-05-01 12:00:00.000"), Some(noon));
        assert_eq!(parse_query_time("2024-05-01T12:00"), Some(noon));
        assert_eq!(
            parse_query_time("2024-05-01"),
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_query_time("yesterday"), None);
    }

    #[tokio::test]
    async fn naive_start_time_is_read_as_utc() {
        let store = empty_store().await;
        let noon = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        store.add_reading(&Reading::new(noon - Duration::minutes(10), 44.0)).await.unwrap();
        store.add_reading(&Reading::new(noon + Duration::minutes(10), 46.2)).await.unwrap();

        let uri = "/telemetry?start_time=2024-05-01T12:00:00&end_time=2024-05-01T13:00:00";
        let (status, body) = call(app(store, None, false), Method::GET, uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_points"], 1);
        assert_eq!(body["data"][0]["urine_tank_level"], 46.2);
        assert_eq!(body["start_time"], "2024-05-01T12:00:00Z");
    }

    #[tokio::test]
    async fn latest_is_404_without_any_data() {
        let (status, body) = call(app(empty_store().await, None, false), Method::GET, "/telemetry/latest").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "No telemetry data available");
    }

    #[tokio::test]
    async fn latest_uses_live_value_when_store_is_empty() {
        let conn = live_connection("50.0").await;
        let (status, body) = call(app(empty_store().await, Some(conn), false), Method::GET, "/telemetry/latest").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "live");
        assert_eq!(body["urine_tank_level"], 50.0);
    }

    #[tokio::test]
    async fn storage_failure_is_500() {
        let mut store = MockReadingStore::new();
        store
            .expect_latest_reading()
            .returning(|| Err(Error::StorageTask("disk I/O error".to_string())));

        let (status, body) = call(app(Arc::new(store), None, false), Method::GET, "/telemetry/latest").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["detail"], "Internal server error");
    }

    #[tokio::test]
    async fn seed_only_fills_an_empty_store() {
        let store = empty_store().await;
        let router = app(store.clone(), None, true);

        let (status, body) = call(router.clone(), Method::POST, "/telemetry/seed").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Sample telemetry data added");
        assert_eq!(store.readings(None, None, 100).await.unwrap().len(), 12);

        let (_, body) = call(router.clone(), Method::POST, "/telemetry/seed").await;
        assert_eq!(body["message"], "Database already contains data");
        assert_eq!(store.readings(None, None, 100).await.unwrap().len(), 12);

        let (status, body) = call(router, Method::DELETE, "/telemetry/clear").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Cleared 12 telemetry readings");
    }

    #[tokio::test]
    async fn seed_routes_absent_when_disabled() {
        let (status, _) = call(app(empty_store().await, None, false), Method::POST, "/telemetry/seed").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(app(empty_store().await, None, false), Method::DELETE, "/telemetry/clear").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn status_reports_connection() {
        let conn = live_connection("45.0").await;
        let (status, body) = call(app(empty_store().await, Some(conn), false), Method::GET, "/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "connected");
        assert_eq!(body["live_value"], 45.0);
        assert_eq!(body["item"], "NODE3000005");
    }
}
