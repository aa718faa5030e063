use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::store::Store;
use crate::types::{CommissionRate, Project};

/// Hard-coded refund-window fallback when neither the contract nor the
/// project specifies one.
pub const DEFAULT_REFUND_WINDOW_DAYS: i32 = 30;

/// Where the effective terms came from; carried into audit payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TermsSource {
    Contract,
    ProjectDefault,
    Fallback,
}

/// Effective commission terms for one (project, marketer) pair.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedTerms {
    pub rate: CommissionRate,
    pub refund_window_days: i32,
    pub source: TermsSource,
}

/// Resolution order: an APPROVED contract between this project and
/// marketer, else the project defaults, else the 30-day fallback window
/// with the project's default rate.
pub async fn resolve_terms(
    store: &dyn Store,
    project: &Project,
    marketer_id: Option<Uuid>,
) -> Result<ResolvedTerms> {
    if let Some(marketer_id) = marketer_id {
        if let Some(contract) = store.approved_contract(project.id, marketer_id).await? {
            let refund_window_days = contract
                .refund_window_days
                .or(project.default_refund_window_days)
                .unwrap_or(DEFAULT_REFUND_WINDOW_DAYS);
            return Ok(ResolvedTerms {
                rate: contract.commission_rate,
                refund_window_days,
                source: TermsSource::Contract,
            });
        }
    }

    match project.default_refund_window_days {
        Some(days) => Ok(ResolvedTerms {
            rate: project.default_commission_rate,
            refund_window_days: days,
            source: TermsSource::ProjectDefault,
        }),
        None => Ok(ResolvedTerms {
            rate: project.default_commission_rate,
            refund_window_days: DEFAULT_REFUND_WINDOW_DAYS,
            source: TermsSource::Fallback,
        }),
    }
}

/// Commission owed on a sale. A sale without an attributable marketer is
/// "direct": nothing is owed regardless of the resolved rate.
pub fn commission_amount(gross: i64, marketer_id: Option<Uuid>, rate: CommissionRate) -> i64 {
    match marketer_id {
        Some(_) => rate.commission_for(gross),
        None => 0,
    }
}

/// Instant after which a refund can no longer claw the commission back.
pub fn refund_eligible_at(occurred_at: DateTime<Utc>, refund_window_days: i32) -> DateTime<Utc> {
    occurred_at + Duration::days(refund_window_days as i64)
}
