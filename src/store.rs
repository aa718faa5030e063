use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::types::{
    AttributionKind, CommissionAdjustment, CommissionStatus, Contract, GrantedState, NewAdjustment,
    NewPurchase, NewRewardEarned, NewTransfer, Project, Purchase, ReferredTotals, RefundKind,
    Reward, RewardEarned, RewardEarnedStatus, Transfer,
};

/// Persistence operations the engine components run against.
///
/// Implemented by [`PgStore`](crate::pg::PgStore) for production and
/// [`MemStore`](crate::memory::MemStore) for tests and local runs. Methods
/// that settle a payout group (`complete_transfer`, `fail_transfer`) must
/// apply all of their row updates atomically.
#[async_trait]
pub trait Store: Send + Sync {
    // Projects, contracts, coupons.

    async fn project(&self, project_id: Uuid) -> Result<Option<Project>>;

    /// The APPROVED contract between a project and a marketer, if any.
    async fn approved_contract(
        &self,
        project_id: Uuid,
        marketer_id: Uuid,
    ) -> Result<Option<Contract>>;

    /// Marketer owning a coupon code within a project.
    async fn marketer_for_coupon(&self, project_id: Uuid, coupon: &str) -> Result<Option<Uuid>>;

    // Purchases.

    /// Dedup lookup: a purchase in this project already carrying either
    /// external id.
    async fn find_purchase_by_external(
        &self,
        project_id: Uuid,
        event_id: &str,
        transaction_id: &str,
    ) -> Result<Option<Purchase>>;

    async fn insert_purchase(&self, new: NewPurchase) -> Result<Purchase>;

    async fn purchase(&self, id: Uuid) -> Result<Option<Purchase>>;

    async fn purchase_by_transaction(
        &self,
        project_id: Uuid,
        transaction_id: &str,
    ) -> Result<Option<Purchase>>;

    async fn set_commission_status(&self, id: Uuid, status: CommissionStatus) -> Result<()>;

    async fn mark_refunded(
        &self,
        id: Uuid,
        kind: RefundKind,
        amount: i64,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Purchases of this creator due for window re-evaluation: still
    /// AWAITING_REFUND_WINDOW with the window elapsed at `now`, plus any
    /// held PENDING_CREATOR_PAYMENT rows (promoted once the creator has a
    /// usable funding account).
    async fn window_reevaluation_candidates(
        &self,
        creator_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Purchase>>;

    /// Payout candidates for one creator: READY_FOR_PAYOUT, payment status
    /// pending or failed, positive commission, and not already linked to an
    /// in-flight PENDING transfer record.
    async fn payout_candidates(&self, creator_id: Uuid) -> Result<Vec<Purchase>>;

    // Adjustments.

    async fn insert_adjustment(
        &self,
        new: NewAdjustment,
        now: DateTime<Utc>,
    ) -> Result<CommissionAdjustment>;

    async fn pending_adjustments(&self, creator_id: Uuid) -> Result<Vec<CommissionAdjustment>>;

    // Transfers.

    /// Creates the PENDING transfer row and links the grouped purchases to
    /// it, before any external call is made.
    async fn create_transfer(&self, new: NewTransfer, purchase_ids: &[Uuid]) -> Result<Transfer>;

    /// Settles a successful group: transfer PAID with its external id,
    /// netted adjustments APPLIED, purchases PAID on both statuses.
    async fn complete_transfer(
        &self,
        transfer_id: Uuid,
        external_id: &str,
        purchase_ids: &[Uuid],
        adjustment_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Records a failed group: transfer FAILED with the reason, purchases'
    /// payment status FAILED, commission status untouched so they reappear
    /// as candidates next run.
    async fn fail_transfer(
        &self,
        transfer_id: Uuid,
        reason: &str,
        purchase_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Transfers still PENDING for this creator; surfaced for manual
    /// reconciliation after a crash, never re-issued automatically.
    async fn pending_transfers(&self, creator_id: Uuid) -> Result<Vec<Transfer>>;

    // Rewards.

    async fn active_rewards(&self) -> Result<Vec<Reward>>;

    /// Cumulative refund-safe referred activity per marketer for one
    /// project, counting only activity at or after `since`.
    async fn referred_totals(
        &self,
        project_id: Uuid,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReferredTotals>>;

    /// Grants already persisted for a reward, per marketer.
    async fn granted_state(&self, reward_id: Uuid) -> Result<GrantedState>;

    async fn insert_reward_earned(&self, grant: NewRewardEarned) -> Result<RewardEarned>;

    async fn reward_earned(&self, id: Uuid) -> Result<Option<RewardEarned>>;

    /// Claim/pay transitions only ever touch the status column; the grant
    /// row itself is immutable once created.
    async fn set_reward_earned_status(&self, id: Uuid, status: RewardEarnedStatus) -> Result<()>;

    // Attribution.

    async fn record_attribution(
        &self,
        project_id: Uuid,
        marketer_id: Uuid,
        kind: AttributionKind,
        occurred_at: DateTime<Utc>,
    ) -> Result<()>;
}
