use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use axum::extract::{Path, Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use what_cook_api::{
    CatalogApi, DeleteResult, FoodRequest, IngredientRequest, RecommendRequest,
    API_CONTRACT_VERSION,
};
use what_cook_core::{CatalogError, Ingredient, IngredientId, Recipe, RecipeId, RecommendationPackage};
use what_cook_store_sqlite::{IntegrityReport, SchemaStatus};

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const OPENAPI_YAML: &str = include_str!("../../../openapi/openapi.yaml");

const ALLOW_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS";
const ALLOW_HEADERS: &str = "Origin, Content-Type";
const INTERNAL_ERROR_MESSAGE: &str = "storage failure";

#[derive(Debug, Clone)]
struct ServiceState {
    api: CatalogApi,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    #[serde(skip)]
    status: StatusCode,
    service_contract_version: &'static str,
    error: String,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Parser)]
#[command(name = "what-cook-service")]
#[command(about = "HTTP service for the What Cook recipe catalog")]
struct Args {
    #[arg(long, default_value = "./what_cook.sqlite3")]
    db: PathBuf,
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: SocketAddr,
    /// Tracing filter used when `RUST_LOG` is not set.
    #[arg(long, default_value = "info")]
    log_filter: String,
}

impl ServiceError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, service_contract_version: SERVICE_CONTRACT_VERSION, error: message.into() }
    }

    fn internal(detail: &str) -> Self {
        tracing::error!(error = %detail, "catalog request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_MESSAGE)
    }
}

impl From<CatalogError> for ServiceError {
    fn from(err: CatalogError) -> Self {
        let status = match &err {
            CatalogError::Validation(_) => StatusCode::BAD_REQUEST,
            CatalogError::NotFound(_) => StatusCode::NOT_FOUND,
            CatalogError::Conflict(_) => StatusCode::CONFLICT,
            CatalogError::Storage(detail) => return Self::internal(detail),
        };
        Self::new(status, err.to_string())
    }
}

impl From<anyhow::Error> for ServiceError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<CatalogError>() {
            Some(catalog_error) => Self::from(catalog_error.clone()),
            None => Self::internal(&format!("{err:#}")),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status;
        (status, Json(self)).into_response()
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

type Envelope<T> = Result<Json<ServiceEnvelope<T>>, ServiceError>;

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/openapi", get(openapi))
        .route("/v1/db/schema-version", post(db_schema_version))
        .route("/v1/db/integrity-check", post(db_integrity_check))
        .route("/v1/ingredients", get(ingredient_list).post(ingredient_create))
        .route(
            "/v1/ingredients/:id",
            get(ingredient_get).put(ingredient_update).delete(ingredient_delete),
        )
        .route("/v1/foods", get(food_list).post(food_create))
        .route("/v1/foods/by-ingredients", post(food_by_ingredients))
        .route("/v1/foods/:id", get(food_get).put(food_update).delete(food_delete))
        .layer(middleware::from_fn(access_control))
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let state = ServiceState { api: CatalogApi::new(args.db.clone()) };
    state.api.migrate()?;

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(bind = %args.bind, db = %args.db.display(), "what-cook service listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn access_control(request: Request, next: Next) -> Response {
    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::OK.into_response()
    } else {
        next.run(request).await
    };

    let headers = response.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(ALLOW_METHODS));
    headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static(ALLOW_HEADERS));
    response
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let response = next.run(request).await;
    tracing::info!(%method, %path, status = response.status().as_u16(), "handled request");
    response
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn openapi() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "application/yaml; charset=utf-8")], OPENAPI_YAML)
}

async fn db_schema_version(State(state): State<ServiceState>) -> Envelope<SchemaStatus> {
    Ok(Json(envelope(state.api.schema_status()?)))
}

async fn db_integrity_check(State(state): State<ServiceState>) -> Envelope<IntegrityReport> {
    Ok(Json(envelope(state.api.integrity_check()?)))
}

async fn ingredient_list(State(state): State<ServiceState>) -> Envelope<Vec<Ingredient>> {
    Ok(Json(envelope(state.api.list_ingredients()?)))
}

async fn ingredient_create(
    State(state): State<ServiceState>,
    Json(request): Json<IngredientRequest>,
) -> Envelope<Ingredient> {
    Ok(Json(envelope(state.api.create_ingredient(request)?)))
}

async fn ingredient_get(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
) -> Envelope<Ingredient> {
    let id = id.parse::<IngredientId>()?;
    Ok(Json(envelope(state.api.get_ingredient(id)?)))
}

async fn ingredient_update(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
    Json(request): Json<IngredientRequest>,
) -> Envelope<Ingredient> {
    let id = id.parse::<IngredientId>()?;
    Ok(Json(envelope(state.api.update_ingredient(id, request)?)))
}

async fn ingredient_delete(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
) -> Envelope<DeleteResult> {
    let id = id.parse::<IngredientId>()?;
    Ok(Json(envelope(state.api.delete_ingredient(id)?)))
}

async fn food_list(State(state): State<ServiceState>) -> Envelope<Vec<Recipe>> {
    Ok(Json(envelope(state.api.list_foods()?)))
}

async fn food_create(
    State(state): State<ServiceState>,
    Json(request): Json<FoodRequest>,
) -> Envelope<Recipe> {
    Ok(Json(envelope(state.api.create_food(request)?)))
}

async fn food_get(State(state): State<ServiceState>, Path(id): Path<String>) -> Envelope<Recipe> {
    let id = id.parse::<RecipeId>()?;
    Ok(Json(envelope(state.api.get_food(id)?)))
}

async fn food_update(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
    Json(request): Json<FoodRequest>,
) -> Envelope<Recipe> {
    let id = id.parse::<RecipeId>()?;
    Ok(Json(envelope(state.api.update_food(id, request)?)))
}

async fn food_delete(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
) -> Envelope<DeleteResult> {
    let id = id.parse::<RecipeId>()?;
    Ok(Json(envelope(state.api.delete_food(id)?)))
}

async fn food_by_ingredients(
    State(state): State<ServiceState>,
    Json(request): Json<RecommendRequest>,
) -> Envelope<RecommendationPackage> {
    Ok(Json(envelope(state.api.recommend(request)?)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use serde_json::Value;
    use tower::ServiceExt;

    fn unique_temp_db_path() -> PathBuf {
        std::env::temp_dir().join(format!("what-cook-service-{}.sqlite3", ulid::Ulid::new()))
    }

    fn test_router(db_path: PathBuf) -> Router {
        app(ServiceState { api: CatalogApi::new(db_path) })
    }

    async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> Response {
        let builder = http::Request::builder().uri(uri).method(method);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap_or_else(|err| panic!("failed to build request: {err}"));

        match router.clone().oneshot(request).await {
            Ok(response) => response,
            Err(err) => panic!("router request failed: {err}"),
        }
    }

    async fn response_json(response: Response) -> Value {
        let bytes = match to_bytes(response.into_body(), 1024 * 1024).await {
            Ok(bytes) => bytes,
            Err(err) => panic!("failed to read response body: {err}"),
        };
        let body = match String::from_utf8(bytes.to_vec()) {
            Ok(body) => body,
            Err(err) => panic!("response body is not UTF-8: {err}"),
        };
        match serde_json::from_str(&body) {
            Ok(value) => value,
            Err(err) => panic!("response body is not JSON: {err}; body={body}"),
        }
    }

    fn data_id(value: &Value) -> String {
        match value.pointer("/data/id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => panic!("response has no data.id: {value}"),
        }
    }

    async fn create_ingredient(router: &Router, name: &str) -> String {
        let response = send(
            router,
            "POST",
            "/v1/ingredients",
            Some(serde_json::json!({ "name": name, "calories": 20.0 })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        data_id(&response_json(response).await)
    }

    async fn create_food(router: &Router, name: &str, ingredient_ids: &[&str]) -> String {
        let ingredients = ingredient_ids
            .iter()
            .map(|id| serde_json::json!({ "ingredient_id": id, "weight": 0.25 }))
            .collect::<Vec<_>>();
        let response = send(
            router,
            "POST",
            "/v1/foods",
            Some(serde_json::json!({
                "name": name,
                "description": format!("{name} fixture"),
                "ingredients": ingredients
            })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        data_id(&response_json(response).await)
    }

    // Test IDs: TSVC-001
    #[tokio::test]
    async fn health_endpoint_reports_ok() {
        let router = test_router(unique_temp_db_path());
        let response = send(&router, "GET", "/v1/health", None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let value = response_json(response).await;
        assert_eq!(
            value.get("service_contract_version").and_then(Value::as_str),
            Some(SERVICE_CONTRACT_VERSION)
        );
        assert_eq!(value.pointer("/data/status").and_then(Value::as_str), Some("ok"));
    }

    // Test IDs: TSVC-002
    #[tokio::test]
    async fn openapi_endpoint_returns_versioned_artifact() {
        let router = test_router(unique_temp_db_path());
        let response = send(&router, "GET", "/v1/openapi", None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = match to_bytes(response.into_body(), 1024 * 1024).await {
            Ok(bytes) => bytes,
            Err(err) => panic!("failed to read response body: {err}"),
        };
        let body = String::from_utf8_lossy(&bytes);
        assert!(body.contains("openapi: 3.1.0"));
        assert!(body.contains("version: service.v1"));
        assert!(body.contains("/v1/foods/by-ingredients"));
        assert!(body.contains("/v1/ingredients/{id}"));
    }

    // Test IDs: TSVC-003
    #[tokio::test]
    async fn by_ingredients_ranks_foods_with_has_and_absent() {
        let db_path = unique_temp_db_path();
        let router = test_router(db_path.clone());

        let a = create_ingredient(&router, "A").await;
        let b = create_ingredient(&router, "B").await;
        let c = create_ingredient(&router, "C").await;
        let d = create_ingredient(&router, "D").await;
        let r1 = create_food(&router, "R1", &[&a, &b]).await;
        let r2 = create_food(&router, "R2", &[&a, &b, &c, &d]).await;
        create_food(&router, "R3", &[&c]).await;

        let response = send(
            &router,
            "POST",
            "/v1/foods/by-ingredients",
            Some(serde_json::json!({ "ingredients": ["A", "B", "unknown-xyz"] })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let value = response_json(response).await;
        let recommendations = match value.pointer("/data/recommendations").and_then(Value::as_array)
        {
            Some(items) => items.clone(),
            None => panic!("missing recommendations: {value}"),
        };
        let ids = recommendations
            .iter()
            .filter_map(|item| item.pointer("/recipe/id").and_then(Value::as_str))
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![r1.as_str(), r2.as_str()]);

        let absent_names: Vec<&str> = recommendations[1]
            .get("absent")
            .and_then(Value::as_array)
            .map(|items| {
                items.iter().filter_map(|item| item.get("name").and_then(Value::as_str)).collect()
            })
            .unwrap_or_else(Vec::new);
        assert_eq!(absent_names, vec!["C", "D"]);
        assert_eq!(
            value.pointer("/data/unresolved_ingredients/0").and_then(Value::as_str),
            Some("unknown-xyz")
        );

        let _ = std::fs::remove_file(&db_path);
    }

    // Test IDs: TSVC-004
    #[tokio::test]
    async fn catalog_errors_map_to_http_statuses() {
        let db_path = unique_temp_db_path();
        let router = test_router(db_path.clone());

        let invalid = send(
            &router,
            "POST",
            "/v1/ingredients",
            Some(serde_json::json!({ "name": "", "calories": 1.0 })),
        )
        .await;
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);

        let bad_id = send(&router, "GET", "/v1/ingredients/not-a-ulid", None).await;
        assert_eq!(bad_id.status(), StatusCode::BAD_REQUEST);

        let missing_uri = format!("/v1/foods/{}", ulid::Ulid::new());
        let missing = send(&router, "GET", &missing_uri, None).await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        let value = response_json(missing).await;
        assert!(value
            .get("error")
            .and_then(Value::as_str)
            .is_some_and(|message| message.contains("not found")));

        let salt = create_ingredient(&router, "salt").await;
        let duplicate = send(
            &router,
            "POST",
            "/v1/ingredients",
            Some(serde_json::json!({ "name": "salt", "calories": 0.0 })),
        )
        .await;
        assert_eq!(duplicate.status(), StatusCode::CONFLICT);

        create_food(&router, "brine", &[&salt]).await;
        let referenced = send(&router, "DELETE", &format!("/v1/ingredients/{salt}"), None).await;
        assert_eq!(referenced.status(), StatusCode::CONFLICT);

        let _ = std::fs::remove_file(&db_path);
    }

    // Test IDs: TSVC-007
    #[tokio::test]
    async fn storage_failures_return_opaque_500() {
        let from_catalog = ServiceError::from(CatalogError::Storage(
            "no such table: ingredient_weights in SELECT iw.food_id FROM ingredient_weights"
                .to_string(),
        ));
        assert_eq!(from_catalog.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(from_catalog.error, INTERNAL_ERROR_MESSAGE);

        let from_anyhow = ServiceError::from(anyhow::anyhow!("failed to prepare candidate query"));
        assert_eq!(from_anyhow.error, INTERNAL_ERROR_MESSAGE);

        let db_dir =
            std::env::temp_dir().join(format!("what-cook-service-dir-{}", ulid::Ulid::new()));
        if let Err(err) = std::fs::create_dir_all(&db_dir) {
            panic!("failed to create temp dir: {err}");
        }
        let router = test_router(db_dir.clone());
        let response = send(&router, "GET", "/v1/ingredients", None).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let value = response_json(response).await;
        assert_eq!(value.get("error").and_then(Value::as_str), Some(INTERNAL_ERROR_MESSAGE));

        let _ = std::fs::remove_dir_all(&db_dir);
    }

    // Test IDs: TSVC-005
    #[tokio::test]
    async fn food_update_and_delete_round_trip() {
        let db_path = unique_temp_db_path();
        let router = test_router(db_path.clone());

        let rice = create_ingredient(&router, "rice").await;
        let egg = create_ingredient(&router, "egg").await;
        let food = create_food(&router, "plain rice", &[&rice]).await;

        let updated = send(
            &router,
            "PUT",
            &format!("/v1/foods/{food}"),
            Some(serde_json::json!({
                "name": "fried rice",
                "description": "rice with egg",
                "ingredients": [
                    { "ingredient_id": rice, "weight": 0.3 },
                    { "ingredient_id": egg, "weight": 0.1 }
                ]
            })),
        )
        .await;
        assert_eq!(updated.status(), StatusCode::OK);

        let loaded =
            response_json(send(&router, "GET", &format!("/v1/foods/{food}"), None).await).await;
        assert_eq!(loaded.pointer("/data/name").and_then(Value::as_str), Some("fried rice"));
        assert_eq!(
            loaded.pointer("/data/requirements").and_then(Value::as_array).map(Vec::len),
            Some(2)
        );

        let deleted = send(&router, "DELETE", &format!("/v1/foods/{food}"), None).await;
        assert_eq!(deleted.status(), StatusCode::OK);
        let listed = response_json(send(&router, "GET", "/v1/foods", None).await).await;
        assert_eq!(listed.pointer("/data").and_then(Value::as_array).map(Vec::len), Some(0));

        let _ = std::fs::remove_file(&db_path);
    }

    // Test IDs: TSVC-006
    #[tokio::test]
    async fn cors_headers_and_preflight() {
        let router = test_router(unique_temp_db_path());

        let preflight = send(&router, "OPTIONS", "/v1/foods/by-ingredients", None).await;
        assert_eq!(preflight.status(), StatusCode::OK);
        assert_eq!(
            preflight.headers().get(header::ACCESS_CONTROL_ALLOW_METHODS),
            Some(&HeaderValue::from_static(ALLOW_METHODS))
        );

        let health = send(&router, "GET", "/v1/health", None).await;
        assert_eq!(
            health.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN),
            Some(&HeaderValue::from_static("*"))
        );
        assert_eq!(
            health.headers().get(header::ACCESS_CONTROL_ALLOW_HEADERS),
            Some(&HeaderValue::from_static(ALLOW_HEADERS))
        );
    }
}
