// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! HTTP API
//!
//! Caller identity arrives from the upstream authentication layer in the
//! `x-dtp-user` header. The staff flag is always read from the user
//! directory, never from the request.

use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures::stream::{Stream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::application::admin::{require_staff, AdminService};
use crate::application::event_tail::EventTail;
use crate::application::last_data::{LastDataCache, RefresherStatus};
use crate::application::rbac_resolver::RbacResolver;
use crate::application::registry::{Registry, UpsertTwin};
use crate::domain::error::CatalogError;
use crate::domain::freshness::FreshnessEntry;
use crate::domain::portal::{CardGrant, CardId, NewCard, NewUser, ServiceGrant, UserId};
use crate::domain::rbac::{Caller, Scope};
use crate::domain::service::NewService;
use crate::domain::twin::{Twin, TwinFilter, TwinId, TwinPatch};

pub const USER_HEADER: &str = "x-dtp-user";

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub rbac: RbacResolver,
    pub last_data: Arc<LastDataCache>,
    pub event_tail: EventTail,
    pub admin: AdminService,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/healthz", get(healthz))
        .route("/api/registry/twins", get(list_twins).post(upsert_twin))
        .route("/api/registry/public/twins", get(list_public_twins))
        .route("/api/registry/my/twins", get(list_my_twins))
        .route(
            "/api/registry/twins/{id}",
            get(get_twin).patch(patch_twin).delete(detach_twin),
        )
        .route("/api/registry/services", post(register_service))
        .route("/api/registry/services/list", get(list_services))
        .route("/api/registry/my/services", get(list_my_services))
        .route("/api/last-data/cached", get(cached_last_data))
        .route("/api/last-data/my", get(my_last_data))
        .route("/api/last-data/twins/{id}", get(twin_last_data))
        .route("/api/portal/stream", get(portal_stream))
        .route("/api/admin/users", get(list_users).post(create_user).delete(delete_user))
        .route("/api/admin/cards", get(list_cards).post(create_card).delete(delete_card))
        .route(
            "/api/admin/grants",
            get(list_card_grants).post(grant_card).delete(revoke_card),
        )
        .route(
            "/api/admin/service-grants",
            get(list_service_grants).post(grant_service).delete(revoke_service),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

// ============================================================================
// Errors and identity
// ============================================================================

impl IntoResponse for CatalogError {
    fn into_response(self) -> Response {
        let status = match &self {
            CatalogError::NotFound(_) => StatusCode::NOT_FOUND,
            CatalogError::Validation(_) => StatusCode::BAD_REQUEST,
            CatalogError::Conflict(_) => StatusCode::CONFLICT,
            CatalogError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            CatalogError::Forbidden(_) => StatusCode::FORBIDDEN,
            CatalogError::Unavailable(msg) => {
                error!(error = %msg, "Catalog unavailable");
                StatusCode::SERVICE_UNAVAILABLE
            }
        };
        let body = json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}

/// Caller resolved from the identity header
pub struct Authenticated(pub Caller);

impl FromRequestParts<Arc<AppState>> for Authenticated {
    type Rejection = CatalogError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let username = parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        state.rbac.caller(username).await.map(Authenticated)
    }
}

type ApiResult<T> = Result<T, CatalogError>;

// ============================================================================
// Query types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct TwinQuery {
    pub scope: Option<Scope>,
    pub tenant: Option<String>,
    pub status: Option<String>,
    pub domain: Option<String>,
}

impl TwinQuery {
    fn filter(&self) -> TwinFilter {
        let non_empty = |v: &Option<String>| v.as_ref().map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        TwinFilter {
            tenant: non_empty(&self.tenant),
            status: non_empty(&self.status),
            domain: non_empty(&self.domain),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ServiceQuery {
    pub scope: Option<Scope>,
    pub tenant: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DetachQuery {
    #[serde(default)]
    pub soft: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    pub tenant: Option<String>,
    pub since: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UserRef {
    pub user_id: UserId,
}

#[derive(Debug, Deserialize)]
pub struct CardRef {
    pub card_id: CardId,
}

#[derive(Debug, Default, Deserialize)]
pub struct GrantQuery {
    pub user_id: Option<UserId>,
}

#[derive(Debug, Serialize)]
pub struct TwinFreshness {
    pub twin_id: TwinId,
    #[serde(flatten)]
    pub entry: FreshnessEntry,
}

#[derive(Debug, Serialize)]
pub struct FreshnessReport {
    pub refreshed_at: Option<DateTime<Utc>>,
    pub items: Vec<TwinFreshness>,
}

// ============================================================================
// Health
// ============================================================================

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    last_data: RefresherStatus,
}

async fn healthz(State(state): State<Arc<AppState>>) -> Json<Health> {
    Json(Health {
        status: "ok",
        last_data: state.last_data.status(),
    })
}

// ============================================================================
// Registry
// ============================================================================

async fn list_twins(
    State(state): State<Arc<AppState>>,
    Authenticated(caller): Authenticated,
    Query(query): Query<TwinQuery>,
) -> ApiResult<Json<Vec<Twin>>> {
    let scope = query.scope.unwrap_or_default();
    let twins = state.rbac.visible_twins(&caller, scope, query.filter()).await?;
    Ok(Json(twins))
}

async fn list_my_twins(
    State(state): State<Arc<AppState>>,
    Authenticated(caller): Authenticated,
    Query(query): Query<TwinQuery>,
) -> ApiResult<Json<Vec<Twin>>> {
    let twins = state.rbac.visible_twins(&caller, Scope::Mine, query.filter()).await?;
    Ok(Json(twins))
}

async fn list_public_twins(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TwinQuery>,
) -> ApiResult<Json<Vec<Twin>>> {
    let twins: Vec<Twin> = state.registry.list(query.filter()).try_collect().await?;
    Ok(Json(twins))
}

async fn upsert_twin(
    State(state): State<Arc<AppState>>,
    Authenticated(caller): Authenticated,
    Json(request): Json<UpsertTwin>,
) -> ApiResult<Response> {
    require_staff(&caller)?;
    let result = state.registry.upsert(request).await?;
    let status = if result.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(result)).into_response())
}

async fn get_twin(
    State(state): State<Arc<AppState>>,
    Authenticated(caller): Authenticated,
    Path(id): Path<String>,
) -> ApiResult<Json<Twin>> {
    let twin = state.rbac.visible_twin(&caller, &TwinId::new(id)).await?;
    Ok(Json(twin))
}

async fn patch_twin(
    State(state): State<Arc<AppState>>,
    Authenticated(caller): Authenticated,
    Path(id): Path<String>,
    Json(patch): Json<TwinPatch>,
) -> ApiResult<Json<Twin>> {
    require_staff(&caller)?;
    let twin = state.registry.partial_update(&TwinId::new(id), patch).await?;
    Ok(Json(twin))
}

async fn detach_twin(
    State(state): State<Arc<AppState>>,
    Authenticated(caller): Authenticated,
    Path(id): Path<String>,
    Query(query): Query<DetachQuery>,
) -> ApiResult<Response> {
    require_staff(&caller)?;
    let outcome = state.registry.detach(&TwinId::new(id), query.soft).await?;
    Ok(Json(outcome).into_response())
}

async fn register_service(
    State(state): State<Arc<AppState>>,
    Authenticated(caller): Authenticated,
    Json(request): Json<NewService>,
) -> ApiResult<Response> {
    require_staff(&caller)?;
    let service = state.registry.register_service(request).await?;
    Ok((StatusCode::CREATED, Json(service)).into_response())
}

async fn list_services(
    State(state): State<Arc<AppState>>,
    Authenticated(caller): Authenticated,
    Query(query): Query<ServiceQuery>,
) -> ApiResult<Response> {
    let scope = query.scope.unwrap_or_default();
    let tenant = query.tenant.as_deref().map(str::trim).filter(|t| !t.is_empty());
    let services = state.rbac.visible_services(&caller, scope, tenant).await?;
    Ok(Json(services).into_response())
}

async fn list_my_services(
    State(state): State<Arc<AppState>>,
    Authenticated(caller): Authenticated,
) -> ApiResult<Response> {
    let services = state.rbac.visible_services(&caller, Scope::Mine, None).await?;
    Ok(Json(services).into_response())
}

// ============================================================================
// Last data
// ============================================================================

async fn cached_last_data(
    State(state): State<Arc<AppState>>,
    Authenticated(caller): Authenticated,
) -> ApiResult<Json<FreshnessReport>> {
    let twins = state
        .rbac
        .visible_twins(&caller, Scope::All, TwinFilter::default())
        .await?;
    let snapshot = state.last_data.snapshot();
    let items = twins
        .into_iter()
        .map(|t| TwinFreshness {
            entry: snapshot.get(&t.twin_id),
            twin_id: t.twin_id,
        })
        .collect();
    Ok(Json(FreshnessReport {
        refreshed_at: snapshot.refreshed_at,
        items,
    }))
}

async fn my_last_data(
    State(state): State<Arc<AppState>>,
    Authenticated(caller): Authenticated,
) -> ApiResult<Json<FreshnessReport>> {
    let twins = state
        .rbac
        .visible_twins(&caller, Scope::All, TwinFilter::default())
        .await?;
    let ids: Vec<TwinId> = twins.iter().map(|t| t.twin_id.clone()).collect();
    let mut computed = state.last_data.compute_many(twins).await;
    let items = ids
        .into_iter()
        .map(|twin_id| TwinFreshness {
            entry: computed.remove(&twin_id).unwrap_or_default(),
            twin_id,
        })
        .collect();
    Ok(Json(FreshnessReport {
        refreshed_at: Some(Utc::now()),
        items,
    }))
}

async fn twin_last_data(
    State(state): State<Arc<AppState>>,
    Authenticated(caller): Authenticated,
    Path(id): Path<String>,
) -> ApiResult<Json<TwinFreshness>> {
    let twin = state.rbac.visible_twin(&caller, &TwinId::new(id)).await?;
    let entry = state.last_data.compute(&twin).await;
    Ok(Json(TwinFreshness {
        twin_id: twin.twin_id,
        entry,
    }))
}

// ============================================================================
// Portal event stream
// ============================================================================

async fn portal_stream(
    State(state): State<Arc<AppState>>,
    Authenticated(_caller): Authenticated,
    Query(query): Query<StreamQuery>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let events = state
        .event_tail
        .stream(query.tenant, query.since.as_deref())
        .map(|event| {
            Event::default()
                .event(event.event_type.as_str())
                .id(event.event_id.to_string())
                .json_data(&event)
        });
    Sse::new(events).keep_alive(KeepAlive::default())
}

// ============================================================================
// Admin
// ============================================================================

async fn list_users(
    State(state): State<Arc<AppState>>,
    Authenticated(caller): Authenticated,
) -> ApiResult<Response> {
    Ok(Json(state.admin.list_users(&caller).await?).into_response())
}

async fn create_user(
    State(state): State<Arc<AppState>>,
    Authenticated(caller): Authenticated,
    Json(request): Json<NewUser>,
) -> ApiResult<Response> {
    let user = state.admin.create_user(&caller, request).await?;
    Ok((StatusCode::CREATED, Json(user)).into_response())
}

async fn delete_user(
    State(state): State<Arc<AppState>>,
    Authenticated(caller): Authenticated,
    Query(target): Query<UserRef>,
) -> ApiResult<StatusCode> {
    state.admin.delete_user(&caller, target.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_cards(
    State(state): State<Arc<AppState>>,
    Authenticated(caller): Authenticated,
) -> ApiResult<Response> {
    Ok(Json(state.admin.list_cards(&caller).await?).into_response())
}

async fn create_card(
    State(state): State<Arc<AppState>>,
    Authenticated(caller): Authenticated,
    Json(request): Json<NewCard>,
) -> ApiResult<Response> {
    let card = state.admin.create_card(&caller, request).await?;
    Ok((StatusCode::CREATED, Json(card)).into_response())
}

async fn delete_card(
    State(state): State<Arc<AppState>>,
    Authenticated(caller): Authenticated,
    Query(target): Query<CardRef>,
) -> ApiResult<StatusCode> {
    state.admin.delete_card(&caller, target.card_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_card_grants(
    State(state): State<Arc<AppState>>,
    Authenticated(caller): Authenticated,
    Query(query): Query<GrantQuery>,
) -> ApiResult<Response> {
    Ok(Json(state.admin.list_card_grants(&caller, query.user_id).await?).into_response())
}

async fn grant_card(
    State(state): State<Arc<AppState>>,
    Authenticated(caller): Authenticated,
    Json(grant): Json<CardGrant>,
) -> ApiResult<Response> {
    let created = state.admin.grant_card(&caller, grant).await?;
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(grant)).into_response())
}

async fn revoke_card(
    State(state): State<Arc<AppState>>,
    Authenticated(caller): Authenticated,
    Query(grant): Query<CardGrant>,
) -> ApiResult<StatusCode> {
    state.admin.revoke_card(&caller, grant).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_service_grants(
    State(state): State<Arc<AppState>>,
    Authenticated(caller): Authenticated,
    Query(query): Query<GrantQuery>,
) -> ApiResult<Response> {
    Ok(Json(state.admin.list_service_grants(&caller, query.user_id).await?).into_response())
}

async fn grant_service(
    State(state): State<Arc<AppState>>,
    Authenticated(caller): Authenticated,
    Json(grant): Json<ServiceGrant>,
) -> ApiResult<Response> {
    let created = state.admin.grant_service(&caller, grant).await?;
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(grant)).into_response())
}

async fn revoke_service(
    State(state): State<Arc<AppState>>,
    Authenticated(caller): Authenticated,
    Query(grant): Query<ServiceGrant>,
) -> ApiResult<StatusCode> {
    state.admin.revoke_service(&caller, grant).await?;
    Ok(StatusCode::NO_CONTENT)
}
