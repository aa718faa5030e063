use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditLog};
use crate::contract::{commission_amount, refund_eligible_at, resolve_terms};
use crate::error::EngineError;
use crate::gateway::AccountResolver;
use crate::store::Store;
use crate::types::{
    CommissionStatus, NewPurchase, PaymentStatus, Purchase, RefundEvent, RefundKind, SaleEvent,
};

/// Result of ingesting one inbound sale event.
#[derive(Debug, Clone)]
pub enum IngestOutcome {
    Created(Purchase),
    /// The event id or transaction id was already seen for this project;
    /// ingestion is at-most-once and this is a no-op.
    Duplicate(Purchase),
}

/// Status a purchase starts its life in.
///
/// Nothing owed settles immediately; otherwise the refund window decides
/// whether the commission is still gated.
pub fn initial_status(
    commission_amount: i64,
    now: DateTime<Utc>,
    refund_eligible_at: DateTime<Utc>,
) -> (CommissionStatus, PaymentStatus) {
    if commission_amount <= 0 {
        (CommissionStatus::Paid, PaymentStatus::Paid)
    } else if now >= refund_eligible_at {
        (CommissionStatus::PendingCreatorPayment, PaymentStatus::Pending)
    } else {
        (CommissionStatus::AwaitingRefundWindow, PaymentStatus::Pending)
    }
}

/// Where an elapsed-window purchase goes next.
pub fn window_elapsed_target(creator_funding_ready: bool) -> CommissionStatus {
    if creator_funding_ready {
        CommissionStatus::ReadyForPayout
    } else {
        CommissionStatus::PendingCreatorPayment
    }
}

/// Ingests one sale event: dedup, contract resolution, commission
/// computation, initial status. Safe against duplicate and out-of-order
/// delivery.
pub async fn ingest_sale(
    store: &dyn Store,
    audit: &dyn AuditLog,
    event: SaleEvent,
    now: DateTime<Utc>,
) -> Result<IngestOutcome> {
    if event.gross_amount < 0 {
        return Err(EngineError::InvalidAmount(event.gross_amount).into());
    }
    let currency = event.currency.trim().to_uppercase();
    if currency.is_empty() {
        return Err(EngineError::MissingCurrency.into());
    }

    if let Some(existing) = store
        .find_purchase_by_external(event.project_id, &event.event_id, &event.transaction_id)
        .await?
    {
        debug!(
            purchase_id = %existing.id,
            event_id = %event.event_id,
            "duplicate sale event ignored"
        );
        return Ok(IngestOutcome::Duplicate(existing));
    }

    let project = store
        .project(event.project_id)
        .await?
        .ok_or(EngineError::UnknownProject(event.project_id))?;

    // Marketer may be carried on the event or derived from the coupon.
    let marketer_id = match event.marketer_id {
        Some(id) => Some(id),
        None => match &event.coupon {
            Some(coupon) => store.marketer_for_coupon(project.id, coupon).await?,
            None => None,
        },
    };

    let terms = resolve_terms(store, &project, marketer_id).await?;
    let commission = commission_amount(event.gross_amount, marketer_id, terms.rate);
    let eligible_at = refund_eligible_at(event.occurred_at, terms.refund_window_days);
    let (commission_status, payment_status) = initial_status(commission, now, eligible_at);

    let purchase = store
        .insert_purchase(NewPurchase {
            id: Uuid::new_v4(),
            project_id: project.id,
            marketer_id,
            coupon: event.coupon,
            gross_amount: event.gross_amount,
            currency,
            commission_amount: commission,
            commission_status,
            payment_status,
            refund_window_days: terms.refund_window_days,
            refund_eligible_at: eligible_at,
            external_event_id: Some(event.event_id),
            external_transaction_id: Some(event.transaction_id),
            occurred_at: event.occurred_at,
            created_at: now,
        })
        .await?;

    info!(
        purchase_id = %purchase.id,
        project_id = %project.id,
        marketer_id = ?marketer_id,
        commission = commission,
        status = %commission_status,
        "sale ingested"
    );
    audit
        .record_event(AuditEvent {
            kind: "purchase.created",
            actor: marketer_id,
            project_id: Some(project.id),
            subject_type: "purchase",
            subject_id: purchase.id.to_string(),
            data: json!({
                "gross_amount": purchase.gross_amount,
                "commission_amount": purchase.commission_amount,
                "currency": purchase.currency,
                "terms_source": terms.source,
                "status": commission_status,
            }),
        })
        .await;

    Ok(IngestOutcome::Created(purchase))
}

/// Idempotent refund-window re-evaluation for one creator: elapsed
/// AWAITING_REFUND_WINDOW purchases move forward, and held
/// PENDING_CREATOR_PAYMENT purchases are promoted once the creator's
/// funding account is usable. Safe to run repeatedly and concurrently per
/// purchase.
pub async fn reevaluate_refund_window(
    store: &dyn Store,
    accounts: &dyn AccountResolver,
    creator_id: Uuid,
    now: DateTime<Utc>,
) -> Result<usize> {
    let target = window_elapsed_target(accounts.creator_funding_ready(creator_id).await?);
    let candidates = store.window_reevaluation_candidates(creator_id, now).await?;

    let mut moved = 0;
    for purchase in &candidates {
        if purchase.commission_status == target {
            continue;
        }
        store.set_commission_status(purchase.id, target).await?;
        moved += 1;
    }
    if moved > 0 {
        debug!(creator_id = %creator_id, moved, target = %target, "refund windows re-evaluated");
    }
    Ok(moved)
}

/// Applies an external refund or support-initiated cancellation. A
/// chargeback is modeled the same way, tagged distinctly. Terminal
/// purchases are left untouched.
pub async fn apply_refund(
    store: &dyn Store,
    audit: &dyn AuditLog,
    event: RefundEvent,
) -> Result<Purchase> {
    let found = match event.purchase_id {
        Some(id) => store.purchase(id).await?,
        None => match &event.transaction_id {
            Some(tx) => store.purchase_by_transaction(event.project_id, tx).await?,
            None => None,
        },
    };
    let purchase = found.ok_or(EngineError::UnknownPurchase)?;

    if purchase.commission_status.is_terminal() {
        // Already settled or already refunded; refunds never claw back a
        // paid-out commission.
        warn!(
            purchase_id = %purchase.id,
            status = %purchase.commission_status,
            "refund event for terminal purchase ignored"
        );
        return Ok(purchase);
    }

    let amount = event.amount.unwrap_or(purchase.gross_amount);
    store
        .mark_refunded(purchase.id, event.kind, amount, event.occurred_at)
        .await?;

    let kind = match event.kind {
        RefundKind::Refund => "purchase.refunded",
        RefundKind::Chargeback => "purchase.chargeback",
    };
    info!(purchase_id = %purchase.id, refunded_amount = amount, kind, "purchase cancelled");
    audit
        .record_event(AuditEvent {
            kind,
            actor: None,
            project_id: Some(purchase.project_id),
            subject_type: "purchase",
            subject_id: purchase.id.to_string(),
            data: json!({
                "refunded_amount": amount,
                "reason": event.reason,
            }),
        })
        .await;

    store
        .purchase(purchase.id)
        .await?
        .ok_or_else(|| EngineError::UnknownPurchase.into())
}
