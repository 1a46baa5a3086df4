use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::coordinator::{ReleaseOutcome, ReservationCoordinator, ReserveOutcome, ReserveRequest};
use crate::error::ReservationError;
use crate::models::{LineItem, StockLevel};

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<ReservationCoordinator>,
}

#[derive(Debug, Serialize)]
pub struct StockResponse {
    pub product_id: Uuid,
    pub name: String,
    pub is_active: bool,
    #[serde(flatten)]
    pub stock: StockLevel,
}

#[derive(Debug, Serialize)]
pub struct ReservationResponse {
    pub reservation_id: String,
    pub line_items: Vec<LineItem>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(err: ReservationError) -> ApiError {
    if err.http_status() == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %err, "Unexpected error while handling HTTP request");
    }
    (
        err.http_status(),
        Json(ErrorResponse {
            error: err.public_message(),
        }),
    )
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/products/:product_id/stock", get(get_stock))
        .route("/reservations", post(reserve))
        .route("/reservations/:reservation_id", get(get_reservation))
        .route("/reservations/:reservation_id/release", post(release))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

pub async fn get_stock(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
) -> Result<Json<StockResponse>, ApiError> {
    let product_id = Uuid::parse_str(&product_id)
        .map_err(|_| api_error(ReservationError::validation("Invalid product ID format.")))?;

    let stock = state.coordinator.get_product(product_id).await.map_err(api_error)?;

    Ok(Json(StockResponse {
        product_id: stock.product.id,
        name: stock.product.name,
        is_active: stock.product.is_active,
        stock: stock.stock,
    }))
}

pub async fn reserve(
    State(state): State<AppState>,
    payload: Result<Json<ReserveRequest>, JsonRejection>,
) -> Result<Json<ReserveOutcome>, ApiError> {
    let Json(request) = payload.map_err(|rejection| api_error(ReservationError::validation(rejection.body_text())))?;
    let outcome = state.coordinator.reserve(request).await.map_err(api_error)?;
    Ok(Json(outcome))
}

pub async fn get_reservation(
    State(state): State<AppState>,
    Path(reservation_id): Path<String>,
) -> Result<Json<ReservationResponse>, ApiError> {
    let line_items = state.coordinator.inspect(&reservation_id).await.map_err(api_error)?;
    Ok(Json(ReservationResponse {
        reservation_id,
        line_items,
    }))
}

pub async fn release(
    State(state): State<AppState>,
    Path(reservation_id): Path<String>,
) -> Result<Json<ReleaseOutcome>, ApiError> {
    let outcome = state.coordinator.release(&reservation_id).await.map_err(api_error)?;
    Ok(Json(outcome))
}

pub async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::ReservationSettings;
    use crate::store::MemoryInventoryStore;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn app() -> (Router, Uuid) {
        let store = Arc::new(MemoryInventoryStore::new());
        let p = store.add_product("Mouse", 3).await;
        let coordinator = Arc::new(ReservationCoordinator::new(store, ReservationSettings::default()));
        (create_router(AppState { coordinator }), p)
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, body)
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn reserve_inspect_and_release() {
        let (app, p) = app().await;

        let (status, body) = send(
            &app,
            post_json(
                "/reservations",
                serde_json::json!({ "reservation_id": "cart-9", "items": [{ "product_id": p, "quantity": 2 }] }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["all_reserved"], true);

        let (status, body) = send(&app, Request::get(format!("/products/{}/stock", p)).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["available"], 1);

        let (status, body) = send(&app, Request::get("/reservations/cart-9").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["line_items"][0]["status"], "ACTIVE");

        let (status, body) = send(&app, post_json("/reservations/cart-9/release", serde_json::json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
    }

    #[tokio::test]
    async fn maps_errors_to_http_status() {
        let (app, _p) = app().await;

        let (status, _) = send(&app, Request::get("/products/nope/stock").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let uri = format!("/products/{}/stock", Uuid::new_v4());
        let (status, body) = send(&app, Request::get(uri).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Product not found");

        let (status, _) = send(&app, Request::get("/reservations/unknown").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_reserve_body_is_a_bad_request() {
        let (app, _p) = app().await;

        let (status, body) = send(
            &app,
            post_json(
                "/reservations",
                serde_json::json!({ "items": [{ "product_id": "not-a-uuid", "quantity": 1 }] }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("invalid argument"));
    }
}
