use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::store::Store;
use crate::types::{
    AdjustmentStatus, AttributionKind, CommissionAdjustment, CommissionStatus, Contract,
    ContractStatus, GrantedState, NewAdjustment, NewPurchase, NewRewardEarned, NewTransfer,
    PaymentStatus, Project, Purchase, ReferredTotals, RefundKind, Reward, RewardEarned,
    RewardEarnedStatus, Transfer, TransferStatus,
};

#[derive(Default)]
struct Inner {
    projects: HashMap<Uuid, Project>,
    contracts: Vec<Contract>,
    coupons: HashMap<(Uuid, String), Uuid>,
    purchases: HashMap<Uuid, Purchase>,
    adjustments: HashMap<Uuid, CommissionAdjustment>,
    transfers: HashMap<Uuid, Transfer>,
    rewards: HashMap<Uuid, Reward>,
    grants: Vec<RewardEarned>,
    attributions: Vec<Attribution>,
}

struct Attribution {
    project_id: Uuid,
    marketer_id: Uuid,
    kind: AttributionKind,
    occurred_at: DateTime<Utc>,
}

/// In-memory [`Store`] used by the test suite and for local runs without a
/// database. Mirrors the PgStore semantics, including the idempotent grant
/// insert.
#[derive(Default)]
pub struct MemStore {
    inner: Mutex<Inner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_project(&self, project: Project) {
        self.locked().projects.insert(project.id, project);
    }

    pub fn add_contract(&self, contract: Contract) {
        self.locked().contracts.push(contract);
    }

    pub fn add_coupon(&self, project_id: Uuid, coupon: &str, marketer_id: Uuid) {
        self.locked()
            .coupons
            .insert((project_id, coupon.to_string()), marketer_id);
    }

    pub fn add_reward(&self, reward: Reward) {
        self.locked().rewards.insert(reward.id, reward);
    }

    pub fn all_purchases(&self) -> Vec<Purchase> {
        let mut rows: Vec<_> = self.locked().purchases.values().cloned().collect();
        rows.sort_by_key(|p| (p.created_at, p.id));
        rows
    }

    pub fn all_transfers(&self) -> Vec<Transfer> {
        let mut rows: Vec<_> = self.locked().transfers.values().cloned().collect();
        rows.sort_by_key(|t| (t.created_at, t.id));
        rows
    }

    pub fn all_grants(&self) -> Vec<RewardEarned> {
        self.locked().grants.clone()
    }

    pub fn adjustment(&self, id: Uuid) -> Option<CommissionAdjustment> {
        self.locked().adjustments.get(&id).cloned()
    }
}

#[async_trait]
impl Store for MemStore {
    async fn project(&self, project_id: Uuid) -> Result<Option<Project>> {
        Ok(self.locked().projects.get(&project_id).cloned())
    }

    async fn approved_contract(
        &self,
        project_id: Uuid,
        marketer_id: Uuid,
    ) -> Result<Option<Contract>> {
        Ok(self
            .locked()
            .contracts
            .iter()
            .find(|c| {
                c.project_id == project_id
                    && c.marketer_id == marketer_id
                    && c.status == ContractStatus::Approved
            })
            .cloned())
    }

    async fn marketer_for_coupon(&self, project_id: Uuid, coupon: &str) -> Result<Option<Uuid>> {
        Ok(self
            .locked()
            .coupons
            .get(&(project_id, coupon.to_string()))
            .copied())
    }

    async fn find_purchase_by_external(
        &self,
        project_id: Uuid,
        event_id: &str,
        transaction_id: &str,
    ) -> Result<Option<Purchase>> {
        Ok(self
            .locked()
            .purchases
            .values()
            .find(|p| {
                p.project_id == project_id
                    && (p.external_event_id.as_deref() == Some(event_id)
                        || p.external_transaction_id.as_deref() == Some(transaction_id))
            })
            .cloned())
    }

    async fn insert_purchase(&self, new: NewPurchase) -> Result<Purchase> {
        let purchase = Purchase {
            id: new.id,
            project_id: new.project_id,
            marketer_id: new.marketer_id,
            coupon: new.coupon,
            gross_amount: new.gross_amount,
            currency: new.currency,
            commission_amount: new.commission_amount,
            original_commission_amount: new.commission_amount,
            refunded_amount: 0,
            commission_status: new.commission_status,
            payment_status: new.payment_status,
            refund_window_days: new.refund_window_days,
            refund_eligible_at: new.refund_eligible_at,
            refunded_at: None,
            transfer_id: None,
            transfer_record_id: None,
            external_event_id: new.external_event_id,
            external_transaction_id: new.external_transaction_id,
            occurred_at: new.occurred_at,
            created_at: new.created_at,
        };
        self.locked().purchases.insert(purchase.id, purchase.clone());
        Ok(purchase)
    }

    async fn purchase(&self, id: Uuid) -> Result<Option<Purchase>> {
        Ok(self.locked().purchases.get(&id).cloned())
    }

    async fn purchase_by_transaction(
        &self,
        project_id: Uuid,
        transaction_id: &str,
    ) -> Result<Option<Purchase>> {
        Ok(self
            .locked()
            .purchases
            .values()
            .find(|p| {
                p.project_id == project_id
                    && p.external_transaction_id.as_deref() == Some(transaction_id)
            })
            .cloned())
    }

    async fn set_commission_status(&self, id: Uuid, status: CommissionStatus) -> Result<()> {
        if let Some(p) = self.locked().purchases.get_mut(&id) {
            p.commission_status = status;
        }
        Ok(())
    }

    async fn mark_refunded(
        &self,
        id: Uuid,
        kind: RefundKind,
        amount: i64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        if let Some(p) = self.locked().purchases.get_mut(&id) {
            p.commission_status = kind.terminal_status();
            p.refunded_amount = amount;
            p.refunded_at = Some(at);
        }
        Ok(())
    }

    async fn window_reevaluation_candidates(
        &self,
        creator_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Purchase>> {
        let inner = self.locked();
        let mut rows: Vec<_> = inner
            .purchases
            .values()
            .filter(|p| {
                inner
                    .projects
                    .get(&p.project_id)
                    .is_some_and(|pr| pr.creator_id == creator_id)
                    && ((p.commission_status == CommissionStatus::AwaitingRefundWindow
                        && p.refund_eligible_at <= now)
                        || p.commission_status == CommissionStatus::PendingCreatorPayment)
            })
            .cloned()
            .collect();
        rows.sort_by_key(|p| (p.created_at, p.id));
        Ok(rows)
    }

    async fn payout_candidates(&self, creator_id: Uuid) -> Result<Vec<Purchase>> {
        let inner = self.locked();
        let mut rows: Vec<_> = inner
            .purchases
            .values()
            .filter(|p| {
                inner
                    .projects
                    .get(&p.project_id)
                    .is_some_and(|pr| pr.creator_id == creator_id)
                    && p.commission_status == CommissionStatus::ReadyForPayout
                    && matches!(
                        p.payment_status,
                        PaymentStatus::Pending | PaymentStatus::Failed
                    )
                    && p.commission_amount > 0
                    && !p.transfer_record_id.is_some_and(|tid| {
                        inner
                            .transfers
                            .get(&tid)
                            .is_some_and(|t| t.status == TransferStatus::Pending)
                    })
            })
            .cloned()
            .collect();
        rows.sort_by_key(|p| (p.created_at, p.id));
        Ok(rows)
    }

    async fn insert_adjustment(
        &self,
        new: NewAdjustment,
        now: DateTime<Utc>,
    ) -> Result<CommissionAdjustment> {
        let adjustment = CommissionAdjustment {
            id: Uuid::new_v4(),
            creator_id: new.creator_id,
            marketer_id: new.marketer_id,
            amount: new.amount,
            currency: new.currency,
            status: AdjustmentStatus::Pending,
            note: new.note,
            created_at: now,
            applied_at: None,
        };
        self.locked()
            .adjustments
            .insert(adjustment.id, adjustment.clone());
        Ok(adjustment)
    }

    async fn pending_adjustments(&self, creator_id: Uuid) -> Result<Vec<CommissionAdjustment>> {
        let mut rows: Vec<_> = self
            .locked()
            .adjustments
            .values()
            .filter(|a| a.creator_id == creator_id && a.status == AdjustmentStatus::Pending)
            .cloned()
            .collect();
        rows.sort_by_key(|a| (a.created_at, a.id));
        Ok(rows)
    }

    async fn create_transfer(&self, new: NewTransfer, purchase_ids: &[Uuid]) -> Result<Transfer> {
        let transfer = Transfer {
            id: new.id,
            creator_id: new.creator_id,
            marketer_id: new.marketer_id,
            destination_account: new.destination_account,
            amount: new.amount,
            currency: new.currency,
            status: TransferStatus::Pending,
            external_id: None,
            failure_reason: None,
            created_at: new.created_at,
            resolved_at: None,
        };
        let mut inner = self.locked();
        inner.transfers.insert(transfer.id, transfer.clone());
        for id in purchase_ids {
            if let Some(p) = inner.purchases.get_mut(id) {
                p.transfer_record_id = Some(transfer.id);
            }
        }
        Ok(transfer)
    }

    async fn complete_transfer(
        &self,
        transfer_id: Uuid,
        external_id: &str,
        purchase_ids: &[Uuid],
        adjustment_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.locked();
        if let Some(t) = inner.transfers.get_mut(&transfer_id) {
            t.status = TransferStatus::Paid;
            t.external_id = Some(external_id.to_string());
            t.resolved_at = Some(now);
        }
        for id in purchase_ids {
            if let Some(p) = inner.purchases.get_mut(id) {
                p.commission_status = CommissionStatus::Paid;
                p.payment_status = PaymentStatus::Paid;
                p.transfer_id = Some(external_id.to_string());
                p.transfer_record_id = Some(transfer_id);
            }
        }
        for id in adjustment_ids {
            if let Some(a) = inner.adjustments.get_mut(id) {
                a.status = AdjustmentStatus::Applied;
                a.applied_at = Some(now);
            }
        }
        Ok(())
    }

    async fn fail_transfer(
        &self,
        transfer_id: Uuid,
        reason: &str,
        purchase_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.locked();
        if let Some(t) = inner.transfers.get_mut(&transfer_id) {
            t.status = TransferStatus::Failed;
            t.failure_reason = Some(reason.to_string());
            t.resolved_at = Some(now);
        }
        for id in purchase_ids {
            if let Some(p) = inner.purchases.get_mut(id) {
                p.payment_status = PaymentStatus::Failed;
                p.transfer_record_id = Some(transfer_id);
            }
        }
        Ok(())
    }

    async fn pending_transfers(&self, creator_id: Uuid) -> Result<Vec<Transfer>> {
        let mut rows: Vec<_> = self
            .locked()
            .transfers
            .values()
            .filter(|t| t.creator_id == creator_id && t.status == TransferStatus::Pending)
            .cloned()
            .collect();
        rows.sort_by_key(|t| (t.created_at, t.id));
        Ok(rows)
    }

    async fn active_rewards(&self) -> Result<Vec<Reward>> {
        let mut rows: Vec<_> = self
            .locked()
            .rewards
            .values()
            .filter(|r| r.status == crate::types::RewardStatus::Active)
            .cloned()
            .collect();
        rows.sort_by_key(|r| (r.created_at, r.id));
        Ok(rows)
    }

    async fn referred_totals(
        &self,
        project_id: Uuid,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReferredTotals>> {
        let inner = self.locked();
        let mut by_marketer: HashMap<Uuid, ReferredTotals> = HashMap::new();

        for p in inner.purchases.values() {
            let Some(marketer_id) = p.marketer_id else {
                continue;
            };
            if p.project_id != project_id
                || p.occurred_at < since
                || p.refund_eligible_at > now
                || matches!(
                    p.commission_status,
                    CommissionStatus::Refunded | CommissionStatus::Chargeback
                )
            {
                continue;
            }
            let entry = by_marketer.entry(marketer_id).or_insert(ReferredTotals {
                marketer_id,
                ..ReferredTotals::default()
            });
            entry.net_revenue += p.gross_amount - p.refunded_amount;
            entry.completed_sales += 1;
        }

        for a in &inner.attributions {
            if a.project_id != project_id || a.occurred_at < since {
                continue;
            }
            let entry = by_marketer.entry(a.marketer_id).or_insert(ReferredTotals {
                marketer_id: a.marketer_id,
                ..ReferredTotals::default()
            });
            match a.kind {
                AttributionKind::Click => entry.clicks += 1,
                AttributionKind::Install => entry.installs += 1,
            }
        }

        let mut rows: Vec<_> = by_marketer.into_values().collect();
        rows.sort_by_key(|t| t.marketer_id);
        Ok(rows)
    }

    async fn granted_state(&self, reward_id: Uuid) -> Result<GrantedState> {
        let mut state = GrantedState::default();
        for grant in self
            .locked()
            .grants
            .iter()
            .filter(|g| g.reward_id == reward_id)
        {
            let entry = state.counts.entry(grant.marketer_id).or_insert(0);
            *entry = (*entry).max(grant.sequence);
        }
        Ok(state)
    }

    async fn insert_reward_earned(&self, grant: NewRewardEarned) -> Result<RewardEarned> {
        let mut inner = self.locked();
        // Unique on (reward, marketer, sequence); a replay returns the
        // existing row, matching the ON CONFLICT DO NOTHING insert in Pg.
        if let Some(existing) = inner.grants.iter().find(|g| {
            g.reward_id == grant.reward_id
                && g.marketer_id == grant.marketer_id
                && g.sequence == grant.sequence
        }) {
            return Ok(existing.clone());
        }
        let earned = RewardEarned {
            id: Uuid::new_v4(),
            reward_id: grant.reward_id,
            marketer_id: grant.marketer_id,
            sequence: grant.sequence,
            status: RewardEarnedStatus::Unlocked,
            cash_amount: grant.cash_amount,
            cash_currency: grant.cash_currency,
            earned_at: grant.earned_at,
        };
        inner.grants.push(earned.clone());
        Ok(earned)
    }

    async fn reward_earned(&self, id: Uuid) -> Result<Option<RewardEarned>> {
        Ok(self.locked().grants.iter().find(|g| g.id == id).cloned())
    }

    async fn set_reward_earned_status(&self, id: Uuid, status: RewardEarnedStatus) -> Result<()> {
        if let Some(g) = self.locked().grants.iter_mut().find(|g| g.id == id) {
            g.status = status;
        }
        Ok(())
    }

    async fn record_attribution(
        &self,
        project_id: Uuid,
        marketer_id: Uuid,
        kind: AttributionKind,
        occurred_at: DateTime<Utc>,
    ) -> Result<()> {
        self.locked().attributions.push(Attribution {
            project_id,
            marketer_id,
            kind,
            occurred_at,
        });
        Ok(())
    }
}
