use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;

/// Lifecycle of a purchase's commission, from creation to settlement.
///
/// `Paid`, `Refunded` and `Chargeback` are terminal; no transition ever
/// leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommissionStatus {
    /// The refund window has not elapsed yet.
    AwaitingRefundWindow,
    /// Window elapsed but the creator has no usable funding account.
    PendingCreatorPayment,
    /// Eligible for the next payout batch.
    ReadyForPayout,
    Paid,
    Refunded,
    Chargeback,
}

impl CommissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommissionStatus::AwaitingRefundWindow => "awaiting_refund_window",
            CommissionStatus::PendingCreatorPayment => "pending_creator_payment",
            CommissionStatus::ReadyForPayout => "ready_for_payout",
            CommissionStatus::Paid => "paid",
            CommissionStatus::Refunded => "refunded",
            CommissionStatus::Chargeback => "chargeback",
        }
    }

    pub fn is_terminal(&self) -> bool {
        match self {
            CommissionStatus::Paid | CommissionStatus::Refunded | CommissionStatus::Chargeback => {
                true
            }
            CommissionStatus::AwaitingRefundWindow
            | CommissionStatus::PendingCreatorPayment
            | CommissionStatus::ReadyForPayout => false,
        }
    }
}

impl FromStr for CommissionStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "awaiting_refund_window" => Ok(CommissionStatus::AwaitingRefundWindow),
            "pending_creator_payment" => Ok(CommissionStatus::PendingCreatorPayment),
            "ready_for_payout" => Ok(CommissionStatus::ReadyForPayout),
            "paid" => Ok(CommissionStatus::Paid),
            "refunded" => Ok(CommissionStatus::Refunded),
            "chargeback" => Ok(CommissionStatus::Chargeback),
            other => Err(EngineError::UnknownStatus {
                kind: "commission_status",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for CommissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the money for a purchase's commission has actually moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "paid" => Ok(PaymentStatus::Paid),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(EngineError::UnknownStatus {
                kind: "payment_status",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    Paid,
    Failed,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Paid => "paid",
            TransferStatus::Failed => "failed",
        }
    }
}

impl FromStr for TransferStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransferStatus::Pending),
            "paid" => Ok(TransferStatus::Paid),
            "failed" => Ok(TransferStatus::Failed),
            other => Err(EngineError::UnknownStatus {
                kind: "transfer_status",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentStatus {
    Pending,
    Applied,
}

impl AdjustmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdjustmentStatus::Pending => "pending",
            AdjustmentStatus::Applied => "applied",
        }
    }
}

impl FromStr for AdjustmentStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AdjustmentStatus::Pending),
            "applied" => Ok(AdjustmentStatus::Applied),
            other => Err(EngineError::UnknownStatus {
                kind: "adjustment_status",
                value: other.to_string(),
            }),
        }
    }
}

/// A refund-classified cancellation vs a chargeback; modeled the same way,
/// tagged distinctly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundKind {
    Refund,
    Chargeback,
}

impl RefundKind {
    pub fn terminal_status(&self) -> CommissionStatus {
        match self {
            RefundKind::Refund => CommissionStatus::Refunded,
            RefundKind::Chargeback => CommissionStatus::Chargeback,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    Pending,
    Approved,
    Declined,
}

impl ContractStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractStatus::Pending => "pending",
            ContractStatus::Approved => "approved",
            ContractStatus::Declined => "declined",
        }
    }
}

impl FromStr for ContractStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ContractStatus::Pending),
            "approved" => Ok(ContractStatus::Approved),
            "declined" => Ok(ContractStatus::Declined),
            other => Err(EngineError::UnknownStatus {
                kind: "contract_status",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardStatus {
    Draft,
    Active,
    Paused,
    Archived,
}

impl RewardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RewardStatus::Draft => "draft",
            RewardStatus::Active => "active",
            RewardStatus::Paused => "paused",
            RewardStatus::Archived => "archived",
        }
    }
}

impl FromStr for RewardStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(RewardStatus::Draft),
            "active" => Ok(RewardStatus::Active),
            "paused" => Ok(RewardStatus::Paused),
            "archived" => Ok(RewardStatus::Archived),
            other => Err(EngineError::UnknownStatus {
                kind: "reward_status",
                value: other.to_string(),
            }),
        }
    }
}

/// The cumulative referred metric a reward milestone is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneType {
    /// Refund-safe referred revenue, in minor units.
    NetRevenue,
    /// Count of refund-safe completed sales.
    CompletedSales,
    Clicks,
    Installs,
}

impl MilestoneType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MilestoneType::NetRevenue => "net_revenue",
            MilestoneType::CompletedSales => "completed_sales",
            MilestoneType::Clicks => "clicks",
            MilestoneType::Installs => "installs",
        }
    }
}

impl FromStr for MilestoneType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "net_revenue" => Ok(MilestoneType::NetRevenue),
            "completed_sales" => Ok(MilestoneType::CompletedSales),
            "clicks" => Ok(MilestoneType::Clicks),
            "installs" => Ok(MilestoneType::Installs),
            other => Err(EngineError::UnknownStatus {
                kind: "milestone_type",
                value: other.to_string(),
            }),
        }
    }
}

/// How many times one marketer can earn the same reward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EarnLimit {
    OncePerMarketer,
    Multiple,
}

impl EarnLimit {
    pub fn as_str(&self) -> &'static str {
        match self {
            EarnLimit::OncePerMarketer => "once_per_marketer",
            EarnLimit::Multiple => "multiple",
        }
    }
}

impl FromStr for EarnLimit {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "once_per_marketer" => Ok(EarnLimit::OncePerMarketer),
            "multiple" => Ok(EarnLimit::Multiple),
            other => Err(EngineError::UnknownStatus {
                kind: "earn_limit",
                value: other.to_string(),
            }),
        }
    }
}

/// Scarcity of a reward across marketers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "cap")]
pub enum Availability {
    Unlimited,
    /// Only the first `n` distinct marketers ever admitted may earn it.
    FirstN(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardEarnedStatus {
    Unlocked,
    Claimed,
    Paid,
}

impl RewardEarnedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RewardEarnedStatus::Unlocked => "unlocked",
            RewardEarnedStatus::Claimed => "claimed",
            RewardEarnedStatus::Paid => "paid",
        }
    }
}

impl FromStr for RewardEarnedStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unlocked" => Ok(RewardEarnedStatus::Unlocked),
            "claimed" => Ok(RewardEarnedStatus::Claimed),
            "paid" => Ok(RewardEarnedStatus::Paid),
            other => Err(EngineError::UnknownStatus {
                kind: "reward_earned_status",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributionKind {
    Click,
    Install,
}

impl AttributionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributionKind::Click => "click",
            AttributionKind::Install => "install",
        }
    }
}

impl FromStr for AttributionKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "click" => Ok(AttributionKind::Click),
            "install" => Ok(AttributionKind::Install),
            other => Err(EngineError::UnknownStatus {
                kind: "attribution_kind",
                value: other.to_string(),
            }),
        }
    }
}

/// A commission percentage, always held as a fraction in [0, 1].
///
/// Legacy callers supply 0–100 percents; the divide-by-100 normalization
/// happens exactly once, here, at the boundary. Every read and comparison
/// elsewhere works on the fraction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommissionRate(f64);

impl CommissionRate {
    pub const ZERO: CommissionRate = CommissionRate(0.0);

    /// Accepts either a fraction in [0, 1] or a legacy 0–100 percent.
    pub fn from_raw(raw: f64) -> Result<Self, EngineError> {
        if !raw.is_finite() || raw < 0.0 {
            return Err(EngineError::InvalidRate(raw));
        }
        let fraction = if raw > 1.0 { raw / 100.0 } else { raw };
        if fraction > 1.0 {
            return Err(EngineError::InvalidRate(raw));
        }
        Ok(CommissionRate(fraction))
    }

    /// Wraps a value already known to be a fraction (e.g. read back from
    /// storage, which only ever holds normalized rates).
    pub fn from_fraction(fraction: f64) -> Result<Self, EngineError> {
        if !fraction.is_finite() || !(0.0..=1.0).contains(&fraction) {
            return Err(EngineError::InvalidRate(fraction));
        }
        Ok(CommissionRate(fraction))
    }

    pub fn as_fraction(&self) -> f64 {
        self.0
    }

    /// Commission owed on a gross amount in minor units, rounded to the
    /// nearest unit.
    pub fn commission_for(&self, gross: i64) -> i64 {
        (gross as f64 * self.0).round() as i64
    }
}

/// A project whose sales generate commissions; owned by one creator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub creator_id: Uuid,
    pub name: String,
    /// Default commission for marketers without an approved contract.
    pub default_commission_rate: CommissionRate,
    /// Default refund window; `None` falls back to the engine-wide default.
    pub default_refund_window_days: Option<i32>,
}

/// Per-(project, marketer) commission terms. Only APPROVED contracts
/// participate in commission computation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    pub id: Uuid,
    pub project_id: Uuid,
    pub marketer_id: Uuid,
    pub commission_rate: CommissionRate,
    pub refund_window_days: Option<i32>,
    pub status: ContractStatus,
    pub created_at: DateTime<Utc>,
}

/// One referred or direct sale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Purchase {
    pub id: Uuid,
    pub project_id: Uuid,
    pub marketer_id: Option<Uuid>,
    pub coupon: Option<String>,
    /// Gross sale amount in minor units.
    pub gross_amount: i64,
    pub currency: String,
    /// Commission owed; mutable until settlement.
    pub commission_amount: i64,
    /// Immutable snapshot of the commission as computed at ingestion.
    pub original_commission_amount: i64,
    pub refunded_amount: i64,
    pub commission_status: CommissionStatus,
    pub payment_status: PaymentStatus,
    /// Refund-window length resolved at ingestion.
    pub refund_window_days: i32,
    /// Once set this is immutable unless the window is re-snapshotted.
    pub refund_eligible_at: DateTime<Utc>,
    pub refunded_at: Option<DateTime<Utc>>,
    /// External transfer id, set when the settling transfer succeeds.
    pub transfer_id: Option<String>,
    /// Our Transfer row, set once grouped into a payout attempt.
    pub transfer_record_id: Option<Uuid>,
    pub external_event_id: Option<String>,
    pub external_transaction_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Purchase {
    /// True when the sale carried marketer attribution (directly or via
    /// coupon).
    pub fn is_affiliate(&self) -> bool {
        self.marketer_id.is_some()
    }
}

/// Insert payload for a new purchase; the ingestion path computes every
/// field up front, the store assigns nothing.
#[derive(Debug, Clone)]
pub struct NewPurchase {
    pub id: Uuid,
    pub project_id: Uuid,
    pub marketer_id: Option<Uuid>,
    pub coupon: Option<String>,
    pub gross_amount: i64,
    pub currency: String,
    pub commission_amount: i64,
    pub commission_status: CommissionStatus,
    pub payment_status: PaymentStatus,
    pub refund_window_days: i32,
    pub refund_eligible_at: DateTime<Utc>,
    pub external_event_id: Option<String>,
    pub external_transaction_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// A manual credit or debit against a marketer's owed balance, netted into
/// the next payout for the same (account, currency).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommissionAdjustment {
    pub id: Uuid,
    pub creator_id: Uuid,
    pub marketer_id: Uuid,
    /// Signed minor units; negative debits reduce the payout.
    pub amount: i64,
    pub currency: String,
    pub status: AdjustmentStatus,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub applied_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewAdjustment {
    pub creator_id: Uuid,
    pub marketer_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub note: Option<String>,
}

/// One payout attempt to one destination account in one currency. Created
/// PENDING before the external call so a crash mid-call leaves a traceable
/// record; never re-issued automatically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transfer {
    pub id: Uuid,
    pub creator_id: Uuid,
    pub marketer_id: Uuid,
    pub destination_account: String,
    pub amount: i64,
    pub currency: String,
    pub status: TransferStatus,
    pub external_id: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewTransfer {
    pub id: Uuid,
    pub creator_id: Uuid,
    pub marketer_id: Uuid,
    pub destination_account: String,
    pub amount: i64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

/// A milestone definition owned by a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reward {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub milestone_type: MilestoneType,
    /// Threshold: minor units for net revenue, a count otherwise.
    pub milestone_value: i64,
    /// Snapshotted onto each grant when the reward is cash-based.
    pub cash_amount: Option<i64>,
    pub cash_currency: Option<String>,
    pub earn_limit: EarnLimit,
    pub availability: Availability,
    /// When set, only listed marketers are evaluated.
    pub allowed_marketers: Option<Vec<Uuid>>,
    pub status: RewardStatus,
    /// Only activity at or after this instant counts toward the metric.
    pub starts_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// One grant of a reward to one marketer. Immutable once created; claiming
/// or paying only changes `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardEarned {
    pub id: Uuid,
    pub reward_id: Uuid,
    pub marketer_id: Uuid,
    /// Which repetition this grant is (1-based, for MULTIPLE earn limits).
    pub sequence: i64,
    pub status: RewardEarnedStatus,
    pub cash_amount: Option<i64>,
    pub cash_currency: Option<String>,
    pub earned_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewRewardEarned {
    pub reward_id: Uuid,
    pub marketer_id: Uuid,
    pub sequence: i64,
    pub cash_amount: Option<i64>,
    pub cash_currency: Option<String>,
    pub earned_at: DateTime<Utc>,
}

/// Inbound sale notification from the subscription-billing webhook source.
#[derive(Debug, Clone, Deserialize)]
pub struct SaleEvent {
    pub event_id: String,
    pub transaction_id: String,
    pub project_id: Uuid,
    pub marketer_id: Option<Uuid>,
    pub coupon: Option<String>,
    pub gross_amount: i64,
    pub currency: String,
    pub occurred_at: DateTime<Utc>,
}

/// Inbound refund or chargeback notification. The purchase is resolved by
/// external transaction id within the project, or by purchase id.
#[derive(Debug, Clone, Deserialize)]
pub struct RefundEvent {
    pub project_id: Uuid,
    pub transaction_id: Option<String>,
    pub purchase_id: Option<Uuid>,
    /// Falls back to the purchase's gross amount when absent.
    pub amount: Option<i64>,
    pub reason: Option<String>,
    #[serde(default = "RefundEvent::default_kind")]
    pub kind: RefundKind,
    pub occurred_at: DateTime<Utc>,
}

impl RefundEvent {
    fn default_kind() -> RefundKind {
        RefundKind::Refund
    }
}

/// Per-marketer cumulative referred activity for one project, used by the
/// milestone evaluator. Revenue and sales only count refund-safe purchases.
#[derive(Debug, Clone, Default)]
pub struct ReferredTotals {
    pub marketer_id: Uuid,
    pub net_revenue: i64,
    pub completed_sales: i64,
    pub clicks: i64,
    pub installs: i64,
}

impl ReferredTotals {
    pub fn metric(&self, milestone: MilestoneType) -> i64 {
        match milestone {
            MilestoneType::NetRevenue => self.net_revenue,
            MilestoneType::CompletedSales => self.completed_sales,
            MilestoneType::Clicks => self.clicks,
            MilestoneType::Installs => self.installs,
        }
    }
}

/// Composite payout-grouping key. One destination account in one currency
/// makes one transfer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupKey {
    pub destination_account: String,
    pub currency: String,
}

/// Outcome of one payout group within a settlement run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum GroupOutcome {
    Paid {
        transfer_record_id: Uuid,
        external_id: String,
    },
    Failed {
        /// Absent when the group failed before a transfer row was created.
        transfer_record_id: Option<Uuid>,
        reason: String,
    },
    Skipped {
        reason: String,
    },
}

/// One entry of the settlement report returned to the triggering caller.
#[derive(Debug, Clone, Serialize)]
pub struct GroupResult {
    pub marketer_id: Uuid,
    pub destination_account: String,
    pub currency: String,
    pub purchase_count: usize,
    /// Net amount after adjustments, in minor units.
    pub amount: i64,
    #[serde(flatten)]
    pub outcome: GroupOutcome,
}

/// Counts returned by one reward-evaluation run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EvaluationSummary {
    pub rewards_evaluated: usize,
    pub marketers_considered: usize,
    pub grants_created: usize,
}

/// Granted state of one reward at the start of an evaluation run.
#[derive(Debug, Clone, Default)]
pub struct GrantedState {
    /// Grants already persisted, per marketer (count == max sequence).
    pub counts: HashMap<Uuid, i64>,
}

impl GrantedState {
    pub fn granted_for(&self, marketer_id: Uuid) -> i64 {
        self.counts.get(&marketer_id).copied().unwrap_or(0)
    }

    /// Distinct marketers ever admitted to this reward.
    pub fn admitted(&self) -> usize {
        self.counts.len()
    }

    pub fn is_admitted(&self, marketer_id: Uuid) -> bool {
        self.counts.contains_key(&marketer_id)
    }
}
