use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        FromRequest, FromRequestParts, State,
    },
    http::StatusCode,
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::*;
use std::time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
};
use uuid::Uuid;

use crate::engine::ReservationEngine;

#[derive(Clone)]
pub struct AppState {
    pub engine: ReservationEngine,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct ReservationResponse {
    #[serde(flatten)]
    pub reservation: Reservation,
    pub reservation_number: String,
    pub total_price: BigDecimal,
}

impl From<Reservation> for ReservationResponse {
    fn from(reservation: Reservation) -> Self {
        Self {
            reservation_number: reservation.reservation_number(),
            total_price: reservation.total_price(),
            reservation,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub reservation: ReservationResponse,
    pub already_cancelled: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePriceRequest {
    pub unit_price: BigDecimal,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

// Extractors that report malformed input with the same JSON body as domain errors.

#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct JsonBody<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct PathParam<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct QueryParams<T>(pub T);

pub enum ApiError {
    Domain(ReservationError),
    Rejected { status: StatusCode, message: String },
}

impl From<ReservationError> for ApiError {
    fn from(err: ReservationError) -> Self {
        Self::Domain(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Rejected {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::Rejected {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::Rejected {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

fn domain_status(err: &ReservationError) -> StatusCode {
    match err {
        ReservationError::EventNotFound(_)
        | ReservationError::CategoryNotFound(_)
        | ReservationError::ReservationNotFound(_) => StatusCode::NOT_FOUND,
        ReservationError::InvalidQuantity(_) | ReservationError::InvalidCategory(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ReservationError::InsufficientInventory { .. } => StatusCode::CONFLICT,
        ReservationError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
        ReservationError::CapacityExceeded { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Domain(err) => (domain_status(&err), err.to_string()),
            Self::Rejected { status, message } => (status, message),
        };
        if status.is_server_error() {
            tracing::error!("Request failed: {}", message);
        }
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

/// Gives the bare 408 from the timeout layer the standard error body.
pub async fn timeout_as_json(response: Response) -> Response {
    if response.status() != StatusCode::REQUEST_TIMEOUT {
        return response;
    }
    tracing::warn!("Request timed out");
    ApiError::Rejected {
        status: StatusCode::REQUEST_TIMEOUT,
        message: "request timed out".to_string(),
    }
    .into_response()
}

async fn not_found() -> ApiError {
    ApiError::Rejected {
        status: StatusCode::NOT_FOUND,
        message: "no such route".to_string(),
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

pub fn create_router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/events", get(list_events).post(create_event))
        .route("/events/search", get(search_events))
        .route("/events/:event_id", get(get_event))
        .route(
            "/events/:event_id/categories",
            get(list_categories).post(create_category),
        )
        .route("/events/:event_id/available", get(list_available_categories))
        .route("/categories/:category_id/price", put(update_price))
        .route("/reservations", get(list_reservations).post(create_reservation))
        .route("/reservations/:reservation_id", get(get_reservation))
        .route("/reservations/:reservation_id/cancel", post(cancel_reservation))
        .route("/buyers/:buyer_id/reservations", get(list_buyer_reservations))
        .route("/organizers/:organizer_id/events", get(list_organizer_events))
        .fallback(not_found)
        .with_state(state)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(middleware::map_response(timeout_as_json))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

pub async fn health_check() -> &'static str {
    "OK"
}

pub async fn list_events(State(state): State<AppState>) -> ApiResult<Json<Vec<Event>>> {
    Ok(Json(state.engine.catalog().list_events().await?))
}

pub async fn create_event(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<NewEvent>,
) -> ApiResult<(StatusCode, Json<Event>)> {
    let event = state.engine.catalog().add_event(request).await?;
    Ok((StatusCode::CREATED, Json(event)))
}

pub async fn search_events(
    State(state): State<AppState>,
    QueryParams(query): QueryParams<SearchQuery>,
) -> ApiResult<Json<Vec<Event>>> {
    let events = state
        .engine
        .catalog()
        .events_between(query.from, query.to)
        .await?;
    Ok(Json(events))
}

pub async fn get_event(
    State(state): State<AppState>,
    PathParam(event_id): PathParam<Uuid>,
) -> ApiResult<Json<Event>> {
    let event_id = EventId::from_uuid(event_id);
    let event = state
        .engine
        .catalog()
        .resolve_event(event_id)
        .await?
        .ok_or(ReservationError::EventNotFound(event_id))?;
    Ok(Json(event))
}

pub async fn list_categories(
    State(state): State<AppState>,
    PathParam(event_id): PathParam<Uuid>,
) -> ApiResult<Json<Vec<TicketCategory>>> {
    let categories = state
        .engine
        .catalog()
        .categories(EventId::from_uuid(event_id))
        .await?;
    Ok(Json(categories))
}

pub async fn list_available_categories(
    State(state): State<AppState>,
    PathParam(event_id): PathParam<Uuid>,
) -> ApiResult<Json<Vec<TicketCategory>>> {
    let categories = state
        .engine
        .catalog()
        .available_categories(EventId::from_uuid(event_id))
        .await?;
    Ok(Json(categories))
}

pub async fn create_category(
    State(state): State<AppState>,
    PathParam(event_id): PathParam<Uuid>,
    JsonBody(request): JsonBody<NewCategory>,
) -> ApiResult<(StatusCode, Json<TicketCategory>)> {
    let category = state
        .engine
        .catalog()
        .add_category(EventId::from_uuid(event_id), request)
        .await?;
    Ok((StatusCode::CREATED, Json(category)))
}

pub async fn update_price(
    State(state): State<AppState>,
    PathParam(category_id): PathParam<Uuid>,
    JsonBody(request): JsonBody<UpdatePriceRequest>,
) -> ApiResult<Json<TicketCategory>> {
    let category = state
        .engine
        .catalog()
        .update_price(CategoryId::from_uuid(category_id), request.unit_price)
        .await?;
    Ok(Json(category))
}

pub async fn list_organizer_events(
    State(state): State<AppState>,
    PathParam(organizer_id): PathParam<Uuid>,
) -> ApiResult<Json<Vec<Event>>> {
    let events = state
        .engine
        .catalog()
        .events_by_organizer(organizer_id)
        .await?;
    Ok(Json(events))
}

pub async fn list_reservations(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<ReservationResponse>>> {
    let reservations = state.engine.list_reservations().await?;
    Ok(Json(reservations.into_iter().map(Into::into).collect()))
}

pub async fn create_reservation(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<ReservationRequest>,
) -> ApiResult<(StatusCode, Json<ReservationResponse>)> {
    let reservation = state.engine.reserve(request).await?;
    Ok((StatusCode::CREATED, Json(reservation.into())))
}

pub async fn get_reservation(
    State(state): State<AppState>,
    PathParam(reservation_id): PathParam<Uuid>,
) -> ApiResult<Json<ReservationResponse>> {
    let reservation = state
        .engine
        .get_reservation(ReservationId::from_uuid(reservation_id))
        .await?;
    Ok(Json(reservation.into()))
}

pub async fn cancel_reservation(
    State(state): State<AppState>,
    PathParam(reservation_id): PathParam<Uuid>,
) -> ApiResult<Json<CancelResponse>> {
    let outcome = state
        .engine
        .cancel(ReservationId::from_uuid(reservation_id))
        .await?;
    let already_cancelled = outcome.was_noop();
    Ok(Json(CancelResponse {
        reservation: outcome.into_reservation().into(),
        already_cancelled,
    }))
}

pub async fn list_buyer_reservations(
    State(state): State<AppState>,
    PathParam(buyer_id): PathParam<Uuid>,
) -> ApiResult<Json<Vec<ReservationResponse>>> {
    let reservations = state
        .engine
        .list_reservations_for_buyer(BuyerId::from_uuid(buyer_id))
        .await?;
    Ok(Json(reservations.into_iter().map(Into::into).collect()))
}
