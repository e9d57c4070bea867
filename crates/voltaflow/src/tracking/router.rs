use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::consent::{ConsentGateway, ConsentRequestInput, ConsentSyncManager};
use super::domain::{Actor, ConsentId, DossierId, OrderId, OrderStatus};
use super::dossier::{Dossier, DossierStatus, DossierType};
use super::repository::{OrderRecord, TrackingStore};
use super::service::{NewDocument, NewOrder, TrackingError, TrackingService};
use super::validation::TechnicalVisitForm;

/// Shared router state: the order aggregate plus the consent manager
/// layered on top of it.
pub struct TrackingApi<S, G> {
    pub service: Arc<TrackingService<S>>,
    pub consent: Arc<ConsentSyncManager<S, G>>,
}

impl<S, G> Clone for TrackingApi<S, G> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            consent: Arc::clone(&self.consent),
        }
    }
}

/// Router exposing the tracking surface. Every mutating route requires an
/// `x-actor` header carrying the already-authenticated caller identity.
pub fn tracking_router<S, G>(api: TrackingApi<S, G>) -> Router
where
    S: TrackingStore + 'static,
    G: ConsentGateway + 'static,
{
    Router::new()
        .route("/api/v1/orders", post(create_order_handler::<S, G>))
        .route("/api/v1/orders/:order_id", get(order_detail_handler::<S, G>))
        .route(
            "/api/v1/orders/:order_id/status",
            post(order_status_handler::<S, G>),
        )
        .route(
            "/api/v1/orders/:order_id/notes",
            post(add_note_handler::<S, G>).get(list_notes_handler::<S, G>),
        )
        .route(
            "/api/v1/orders/:order_id/dossiers/:dossier_id/transitions",
            post(dossier_transition_handler::<S, G>),
        )
        .route(
            "/api/v1/orders/:order_id/dossiers/:dossier_id/events",
            get(dossier_events_handler::<S, G>),
        )
        .route(
            "/api/v1/orders/:order_id/dossiers/:dossier_id/documents",
            post(attach_document_handler::<S, G>),
        )
        .route(
            "/api/v1/orders/:order_id/dossiers/:dossier_id/consent",
            post(request_consent_handler::<S, G>),
        )
        .route(
            "/api/v1/consents/:consent_id",
            get(consent_detail_handler::<S, G>),
        )
        .route(
            "/api/v1/consents/:consent_id/activate",
            post(activate_consent_handler::<S, G>),
        )
        .route(
            "/api/v1/consents/:consent_id/sync",
            post(sync_consent_handler::<S, G>),
        )
        .route(
            "/api/v1/consents/:consent_id/revoke",
            post(revoke_consent_handler::<S, G>),
        )
        .with_state(api)
}

/// Resolve the caller identity handed over by the authorization boundary.
fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, TrackingError> {
    let id = headers
        .get("x-actor")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(TrackingError::Unauthorized)?;

    let actor = match headers
        .get("x-actor-kind")
        .and_then(|value| value.to_str().ok())
    {
        Some("customer") => Actor::customer(id),
        _ => Actor::admin(id),
    };
    Ok(actor)
}

fn error_response(error: TrackingError) -> Response {
    let (status, code) = match &error {
        TrackingError::ValidationFailed(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_FAILED"),
        TrackingError::InvalidTransition { .. } => (StatusCode::CONFLICT, "INVALID_TRANSITION"),
        TrackingError::VersionConflict { .. } => (StatusCode::CONFLICT, "VERSION_CONFLICT"),
        TrackingError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        TrackingError::ExternalUnavailable(_) => {
            (StatusCode::SERVICE_UNAVAILABLE, "ENEDIS_API_UNAVAILABLE")
        }
        TrackingError::ExternalDataAbsent(_) => (StatusCode::NOT_FOUND, "ENEDIS_DATA_NOT_FOUND"),
        TrackingError::ConsentInvalid(_) => {
            (StatusCode::UNPROCESSABLE_ENTITY, "ENEDIS_CONSENT_INVALID")
        }
        TrackingError::ConsentExpired(_) => (StatusCode::GONE, "ENEDIS_CONSENT_EXPIRED"),
        TrackingError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
        TrackingError::StoreUnavailable(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR"),
    };

    let payload = match &error {
        TrackingError::ValidationFailed(field_errors) => json!({
            "error": code,
            "message": error.to_string(),
            "field_errors": field_errors,
        }),
        _ => json!({
            "error": code,
            "message": error.to_string(),
        }),
    };
    (status, Json(payload)).into_response()
}

/// Flattened dossier summary for API responses.
#[derive(Debug, Serialize)]
pub struct DossierView {
    pub dossier_id: DossierId,
    pub dossier_type: DossierType,
    pub type_label: &'static str,
    pub status: &'static str,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
    pub allowed_transitions: Vec<&'static str>,
    pub document_count: usize,
}

impl DossierView {
    fn from_dossier(dossier: &Dossier) -> Self {
        Self {
            dossier_id: dossier.dossier_id.clone(),
            dossier_type: dossier.dossier_type(),
            type_label: dossier.dossier_type().label(),
            status: dossier.status.label(),
            version: dossier.version,
            updated_at: dossier.updated_at,
            allowed_transitions: dossier
                .status
                .allowed_transitions()
                .into_iter()
                .map(DossierStatus::label)
                .collect(),
            document_count: dossier.documents.len(),
        }
    }
}

#[derive(Debug, Serialize)]
struct OrderDetailView {
    order_id: OrderId,
    status: &'static str,
    created_at: DateTime<Utc>,
    total_amount_cents: u32,
    dossiers: Vec<DossierView>,
}

impl OrderDetailView {
    fn from_record(record: &OrderRecord) -> Self {
        Self {
            order_id: record.order.order_id.clone(),
            status: record.order.status.label(),
            created_at: record.order.created_at,
            total_amount_cents: record.order.total_amount_cents,
            dossiers: record.dossiers.iter().map(DossierView::from_dossier).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreateOrderRequest {
    total_amount_cents: u32,
    payment_status: super::domain::PaymentStatus,
    shipping_address: super::domain::ShippingAddress,
    items: Vec<super::domain::LineItem>,
    dossier_types: Vec<DossierType>,
}

async fn create_order_handler<S, G>(
    State(api): State<TrackingApi<S, G>>,
    headers: HeaderMap,
    Json(request): Json<CreateOrderRequest>,
) -> Response
where
    S: TrackingStore + 'static,
    G: ConsentGateway + 'static,
{
    let result = actor_from_headers(&headers).and_then(|actor| {
        api.service.create_order(
            NewOrder {
                total_amount_cents: request.total_amount_cents,
                payment_status: request.payment_status,
                shipping_address: request.shipping_address,
                items: request.items,
                dossier_types: request.dossier_types,
            },
            &actor,
        )
    });

    match result {
        Ok(record) => (
            StatusCode::CREATED,
            Json(OrderDetailView::from_record(&record)),
        )
            .into_response(),
        Err(error) => error_response(error),
    }
}

async fn order_detail_handler<S, G>(
    State(api): State<TrackingApi<S, G>>,
    Path(order_id): Path<String>,
) -> Response
where
    S: TrackingStore + 'static,
    G: ConsentGateway + 'static,
{
    match api.service.order(&OrderId(order_id)) {
        Ok(record) => Json(OrderDetailView::from_record(&record)).into_response(),
        Err(error) => error_response(error),
    }
}

#[derive(Debug, Deserialize)]
struct OrderStatusRequest {
    status: OrderStatus,
}

async fn order_status_handler<S, G>(
    State(api): State<TrackingApi<S, G>>,
    Path(order_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<OrderStatusRequest>,
) -> Response
where
    S: TrackingStore + 'static,
    G: ConsentGateway + 'static,
{
    let result = actor_from_headers(&headers).and_then(|actor| {
        api.service
            .change_order_status(&OrderId(order_id), request.status, &actor)
    });

    match result {
        Ok(order) => Json(json!({
            "order_id": order.order_id.0,
            "status": order.status.label(),
        }))
        .into_response(),
        Err(error) => error_response(error),
    }
}

#[derive(Debug, Deserialize)]
struct AddNoteRequest {
    content: String,
    #[serde(default)]
    dossier_id: Option<String>,
}

async fn add_note_handler<S, G>(
    State(api): State<TrackingApi<S, G>>,
    Path(order_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<AddNoteRequest>,
) -> Response
where
    S: TrackingStore + 'static,
    G: ConsentGateway + 'static,
{
    let dossier_id = request.dossier_id.map(DossierId);
    let result = actor_from_headers(&headers).and_then(|actor| {
        api.service.add_note(
            &OrderId(order_id),
            dossier_id.as_ref(),
            &request.content,
            &actor,
        )
    });

    match result {
        Ok(note) => (StatusCode::CREATED, Json(note)).into_response(),
        Err(error) => error_response(error),
    }
}

async fn list_notes_handler<S, G>(
    State(api): State<TrackingApi<S, G>>,
    Path(order_id): Path<String>,
) -> Response
where
    S: TrackingStore + 'static,
    G: ConsentGateway + 'static,
{
    Json(api.service.notes(&OrderId(order_id))).into_response()
}

#[derive(Debug, Deserialize)]
struct TransitionRequest {
    #[serde(flatten)]
    requested: DossierStatus,
    expected_version: u64,
    #[serde(default)]
    technical_visit: Option<TechnicalVisitForm>,
}

async fn dossier_transition_handler<S, G>(
    State(api): State<TrackingApi<S, G>>,
    Path((order_id, dossier_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(request): Json<TransitionRequest>,
) -> Response
where
    S: TrackingStore + 'static,
    G: ConsentGateway + 'static,
{
    let result = actor_from_headers(&headers).and_then(|actor| {
        api.service.apply_dossier_transition(
            &OrderId(order_id),
            &DossierId(dossier_id),
            request.requested,
            &actor,
            request.expected_version,
            request.technical_visit.as_ref(),
        )
    });

    match result {
        Ok(dossier) => Json(DossierView::from_dossier(&dossier)).into_response(),
        Err(error) => error_response(error),
    }
}

async fn dossier_events_handler<S, G>(
    State(api): State<TrackingApi<S, G>>,
    Path((_order_id, dossier_id)): Path<(String, String)>,
) -> Response
where
    S: TrackingStore + 'static,
    G: ConsentGateway + 'static,
{
    Json(api.service.dossier_events(&DossierId(dossier_id))).into_response()
}

#[derive(Debug, Deserialize)]
struct AttachDocumentRequest {
    kind: super::domain::DocumentKind,
    file_name: String,
    content_type: String,
    storage_key: String,
}

async fn attach_document_handler<S, G>(
    State(api): State<TrackingApi<S, G>>,
    Path((order_id, dossier_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(request): Json<AttachDocumentRequest>,
) -> Response
where
    S: TrackingStore + 'static,
    G: ConsentGateway + 'static,
{
    let result = actor_from_headers(&headers).and_then(|actor| {
        api.service.attach_document(
            &OrderId(order_id),
            &DossierId(dossier_id),
            NewDocument {
                kind: request.kind,
                file_name: request.file_name,
                content_type: request.content_type,
                storage_key: request.storage_key,
            },
            &actor,
        )
    });

    match result {
        Ok(document) => (StatusCode::CREATED, Json(document)).into_response(),
        Err(error) => error_response(error),
    }
}

async fn request_consent_handler<S, G>(
    State(api): State<TrackingApi<S, G>>,
    Path((order_id, dossier_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(input): Json<ConsentRequestInput>,
) -> Response
where
    S: TrackingStore + 'static,
    G: ConsentGateway + 'static,
{
    if let Err(error) = actor_from_headers(&headers) {
        return error_response(error);
    }

    match api
        .consent
        .request_consent(&OrderId(order_id), &DossierId(dossier_id), input)
        .await
    {
        Ok(consent) => (StatusCode::ACCEPTED, Json(consent)).into_response(),
        Err(error) => error_response(error),
    }
}

async fn consent_detail_handler<S, G>(
    State(api): State<TrackingApi<S, G>>,
    Path(consent_id): Path<String>,
) -> Response
where
    S: TrackingStore + 'static,
    G: ConsentGateway + 'static,
{
    match api.consent.consent(&ConsentId(consent_id), Utc::now()) {
        Ok(consent) => Json(consent).into_response(),
        Err(error) => error_response(error),
    }
}

async fn activate_consent_handler<S, G>(
    State(api): State<TrackingApi<S, G>>,
    Path(consent_id): Path<String>,
    headers: HeaderMap,
) -> Response
where
    S: TrackingStore + 'static,
    G: ConsentGateway + 'static,
{
    if let Err(error) = actor_from_headers(&headers) {
        return error_response(error);
    }

    match api.consent.activate_consent(&ConsentId(consent_id), Utc::now()) {
        Ok(consent) => Json(consent).into_response(),
        Err(error) => error_response(error),
    }
}

async fn sync_consent_handler<S, G>(
    State(api): State<TrackingApi<S, G>>,
    Path(consent_id): Path<String>,
    headers: HeaderMap,
) -> Response
where
    S: TrackingStore + 'static,
    G: ConsentGateway + 'static,
{
    if let Err(error) = actor_from_headers(&headers) {
        return error_response(error);
    }

    match api
        .consent
        .sync_consumption(&ConsentId(consent_id), Utc::now())
        .await
    {
        Ok(range) => Json(range).into_response(),
        Err(error) => error_response(error),
    }
}

async fn revoke_consent_handler<S, G>(
    State(api): State<TrackingApi<S, G>>,
    Path(consent_id): Path<String>,
    headers: HeaderMap,
) -> Response
where
    S: TrackingStore + 'static,
    G: ConsentGateway + 'static,
{
    match actor_from_headers(&headers) {
        Ok(actor) => match api
            .consent
            .revoke_consent(&ConsentId(consent_id), &actor, Utc::now())
        {
            Ok(consent) => Json(consent).into_response(),
            Err(error) => error_response(error),
        },
        Err(error) => error_response(error),
    }
}
