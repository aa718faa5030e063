use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    middleware,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;
use uuid::Uuid;

use crate::audit::AuditLog;
use crate::config::Config;
use crate::error::{
    ApiError, ApiErrorWithMeta, E_BAD_AMOUNT, E_BAD_CURRENCY, E_DB_FAILURE, E_GRANT_CONFLICT,
    E_INGEST_FAILURE, E_PAYOUT_FAILURE, E_REFUND_FAILURE, E_REWARD_FAILURE, E_UNKNOWN_GRANT,
    E_UNKNOWN_PROJECT, E_UNKNOWN_PURCHASE, EngineError,
};
use crate::gateway::{AccountResolver, TransferGateway};
use crate::notify::Notifier;
use crate::payout::run_payouts;
use crate::responses::{ApiOk, RequestMeta, meta_middleware};
use crate::rewards::{advance_grant, evaluate_rewards};
use crate::status::{IngestOutcome, apply_refund, ingest_sale};
use crate::store::Store;
use crate::types::{
    AttributionKind, CommissionStatus, EvaluationSummary, GroupResult, NewAdjustment, RefundEvent,
    RewardEarned, RewardEarnedStatus, SaleEvent, Transfer,
};

/// The application state; every collaborator sits behind its trait so the
/// same router wires up against Postgres or the in-memory store.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub accounts: Arc<dyn AccountResolver>,
    pub transfers: Arc<dyn TransferGateway>,
    pub audit: Arc<dyn AuditLog>,
    pub notifier: Arc<dyn Notifier>,
    pub config: Config,
}

#[derive(Serialize)]
pub struct IngestResponse {
    pub purchase_id: Uuid,
    /// True when the event was already ingested and this call was a no-op.
    pub duplicate: bool,
    pub commission_status: CommissionStatus,
    pub commission_amount: i64,
}

#[derive(Serialize)]
pub struct RefundResponse {
    pub purchase_id: Uuid,
    pub commission_status: CommissionStatus,
    pub refunded_amount: i64,
}

#[derive(Deserialize)]
pub struct AttributionEvent {
    pub project_id: Uuid,
    pub marketer_id: Uuid,
    pub kind: AttributionKind,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct AdjustmentResponse {
    pub id: Uuid,
}

pub fn init_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/webhooks/sales", post(sale_webhook_handler))
        .route("/webhooks/refunds", post(refund_webhook_handler))
        .route("/webhooks/attribution", post(attribution_webhook_handler))
        .route("/adjustments", post(create_adjustment_handler))
        .route("/creators/{creator_id}/payouts", post(run_payouts_handler))
        .route(
            "/creators/{creator_id}/transfers/pending",
            get(pending_transfers_handler),
        )
        .route("/rewards/evaluate", post(evaluate_rewards_handler))
        .route("/rewards/earned/{id}/status", post(grant_status_handler))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(middleware::from_fn(meta_middleware))
}

/// Maps engine failures onto API errors: validation problems become 4xx
/// with a stable code, everything else is an opaque 500.
fn map_engine_error(e: anyhow::Error, meta: RequestMeta, fallback: &str) -> ApiErrorWithMeta {
    match e.downcast_ref::<EngineError>() {
        Some(EngineError::UnknownProject(id)) => {
            ApiError::NotFound(format!("unknown project {id}"))
                .with_meta(meta)
                .with_code(E_UNKNOWN_PROJECT)
        }
        Some(EngineError::UnknownPurchase) => ApiError::NotFound("unknown purchase".into())
            .with_meta(meta)
            .with_code(E_UNKNOWN_PURCHASE),
        Some(EngineError::InvalidAmount(amount)) => {
            ApiError::BadRequest(format!("amount must be >= 0, got {amount}"))
                .with_meta(meta)
                .with_code(E_BAD_AMOUNT)
        }
        Some(EngineError::MissingCurrency) => ApiError::BadRequest("currency is required".into())
            .with_meta(meta)
            .with_code(E_BAD_CURRENCY),
        Some(EngineError::UnknownGrant) => ApiError::NotFound("unknown reward grant".into())
            .with_meta(meta)
            .with_code(E_UNKNOWN_GRANT),
        Some(EngineError::InvalidGrantTransition { from, to }) => {
            ApiError::Conflict(format!("grant cannot move from {from} to {to}"))
                .with_meta(meta)
                .with_code(E_GRANT_CONFLICT)
        }
        Some(EngineError::InvalidRate(rate)) => {
            ApiError::BadRequest(format!("invalid commission rate {rate}"))
                .with_meta(meta)
                .with_code(E_INGEST_FAILURE)
        }
        _ => ApiError::Internal(e).with_meta(meta).with_code(fallback),
    }
}

async fn sale_webhook_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Json(event): Json<SaleEvent>,
) -> Result<ApiOk<IngestResponse>, ApiErrorWithMeta> {
    let outcome = ingest_sale(st.store.as_ref(), st.audit.as_ref(), event, Utc::now())
        .await
        .map_err(|e| map_engine_error(e, meta.clone(), E_INGEST_FAILURE))?;

    match outcome {
        IngestOutcome::Created(purchase) => Ok(ApiOk::created(
            "sale ingested",
            IngestResponse {
                purchase_id: purchase.id,
                duplicate: false,
                commission_status: purchase.commission_status,
                commission_amount: purchase.commission_amount,
            },
            meta,
        )),
        IngestOutcome::Duplicate(purchase) => Ok(ApiOk::ok(
            "duplicate event ignored",
            IngestResponse {
                purchase_id: purchase.id,
                duplicate: true,
                commission_status: purchase.commission_status,
                commission_amount: purchase.commission_amount,
            },
            meta,
        )),
    }
}

async fn refund_webhook_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Json(event): Json<RefundEvent>,
) -> Result<ApiOk<RefundResponse>, ApiErrorWithMeta> {
    let purchase = apply_refund(st.store.as_ref(), st.audit.as_ref(), event)
        .await
        .map_err(|e| map_engine_error(e, meta.clone(), E_REFUND_FAILURE))?;

    Ok(ApiOk::ok(
        "refund applied",
        RefundResponse {
            purchase_id: purchase.id,
            commission_status: purchase.commission_status,
            refunded_amount: purchase.refunded_amount,
        },
        meta,
    ))
}

async fn attribution_webhook_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Json(event): Json<AttributionEvent>,
) -> Result<ApiOk<serde_json::Value>, ApiErrorWithMeta> {
    st.store
        .record_attribution(
            event.project_id,
            event.marketer_id,
            event.kind,
            event.occurred_at,
        )
        .await
        .map_err(|e| {
            ApiError::Internal(e)
                .with_meta(meta.clone())
                .with_code(E_DB_FAILURE)
        })?;

    Ok(ApiOk::created(
        "attribution recorded",
        serde_json::json!({ "recorded": true }),
        meta,
    ))
}

async fn create_adjustment_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<NewAdjustment>,
) -> Result<ApiOk<AdjustmentResponse>, ApiErrorWithMeta> {
    if req.currency.trim().is_empty() {
        return Err(ApiError::BadRequest("currency is required".into())
            .with_meta(meta)
            .with_code(E_BAD_CURRENCY));
    }

    let adjustment = st
        .store
        .insert_adjustment(req, Utc::now())
        .await
        .map_err(|e| {
            ApiError::Internal(e)
                .with_meta(meta.clone())
                .with_code(E_DB_FAILURE)
        })?;

    Ok(ApiOk::created(
        "adjustment recorded",
        AdjustmentResponse { id: adjustment.id },
        meta,
    ))
}

async fn run_payouts_handler(
    State(st): State<AppState>,
    Path(creator_id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<Vec<GroupResult>>, ApiErrorWithMeta> {
    let report = run_payouts(
        st.store.as_ref(),
        st.accounts.as_ref(),
        st.transfers.as_ref(),
        st.audit.as_ref(),
        st.notifier.as_ref(),
        creator_id,
        Utc::now(),
    )
    .await
    .map_err(|e| map_engine_error(e, meta.clone(), E_PAYOUT_FAILURE))?;

    Ok(ApiOk::ok("payout run complete", report, meta))
}

async fn pending_transfers_handler(
    State(st): State<AppState>,
    Path(creator_id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<Vec<Transfer>>, ApiErrorWithMeta> {
    let transfers = st.store.pending_transfers(creator_id).await.map_err(|e| {
        ApiError::Internal(e)
            .with_meta(meta.clone())
            .with_code(E_DB_FAILURE)
    })?;

    Ok(ApiOk::ok("pending transfers fetched", transfers, meta))
}

#[derive(Deserialize)]
pub struct GrantStatusRequest {
    pub status: RewardEarnedStatus,
}

async fn grant_status_handler(
    State(st): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<GrantStatusRequest>,
) -> Result<ApiOk<RewardEarned>, ApiErrorWithMeta> {
    let grant = advance_grant(st.store.as_ref(), st.audit.as_ref(), id, req.status)
        .await
        .map_err(|e| map_engine_error(e, meta.clone(), E_REWARD_FAILURE))?;

    Ok(ApiOk::ok("grant status updated", grant, meta))
}

async fn evaluate_rewards_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<EvaluationSummary>, ApiErrorWithMeta> {
    let summary = evaluate_rewards(
        st.store.as_ref(),
        st.audit.as_ref(),
        st.notifier.as_ref(),
        Utc::now(),
    )
    .await
    .map_err(|e| map_engine_error(e, meta.clone(), E_REWARD_FAILURE))?;

    Ok(ApiOk::ok("reward evaluation complete", summary, meta))
}
