use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::gateway::AccountResolver;
use crate::store::Store;
use crate::types::{
    AdjustmentStatus, AttributionKind, Availability, CommissionAdjustment, CommissionRate,
    CommissionStatus, Contract, ContractStatus, GrantedState, NewAdjustment, NewPurchase,
    NewRewardEarned, NewTransfer, Project, Purchase, ReferredTotals, RefundKind, Reward,
    RewardEarned, RewardEarnedStatus, RewardStatus, Transfer, TransferStatus,
};

/// Postgres-backed [`Store`]. All queries are runtime-checked; settlement
/// updates that touch several tables run in one transaction.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await
            .context("Failed to connect to Postgres")?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn purchase_from_row(row: &PgRow) -> Result<Purchase> {
    Ok(Purchase {
        id: row.try_get("id")?,
        project_id: row.try_get("project_id")?,
        marketer_id: row.try_get("marketer_id")?,
        coupon: row.try_get("coupon")?,
        gross_amount: row.try_get("gross_amount")?,
        currency: row.try_get("currency")?,
        commission_amount: row.try_get("commission_amount")?,
        original_commission_amount: row.try_get("original_commission_amount")?,
        refunded_amount: row.try_get("refunded_amount")?,
        commission_status: row
            .try_get::<String, _>("commission_status")?
            .parse::<CommissionStatus>()?,
        payment_status: row.try_get::<String, _>("payment_status")?.parse()?,
        refund_window_days: row.try_get("refund_window_days")?,
        refund_eligible_at: row.try_get("refund_eligible_at")?,
        refunded_at: row.try_get("refunded_at")?,
        transfer_id: row.try_get("transfer_id")?,
        transfer_record_id: row.try_get("transfer_record_id")?,
        external_event_id: row.try_get("external_event_id")?,
        external_transaction_id: row.try_get("external_transaction_id")?,
        occurred_at: row.try_get("occurred_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn contract_from_row(row: &PgRow) -> Result<Contract> {
    Ok(Contract {
        id: row.try_get("id")?,
        project_id: row.try_get("project_id")?,
        marketer_id: row.try_get("marketer_id")?,
        commission_rate: CommissionRate::from_fraction(row.try_get("commission_rate")?)?,
        refund_window_days: row.try_get("refund_window_days")?,
        status: row.try_get::<String, _>("status")?.parse::<ContractStatus>()?,
        created_at: row.try_get("created_at")?,
    })
}

fn adjustment_from_row(row: &PgRow) -> Result<CommissionAdjustment> {
    Ok(CommissionAdjustment {
        id: row.try_get("id")?,
        creator_id: row.try_get("creator_id")?,
        marketer_id: row.try_get("marketer_id")?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        status: row.try_get::<String, _>("status")?.parse::<AdjustmentStatus>()?,
        note: row.try_get("note")?,
        created_at: row.try_get("created_at")?,
        applied_at: row.try_get("applied_at")?,
    })
}

fn transfer_from_row(row: &PgRow) -> Result<Transfer> {
    Ok(Transfer {
        id: row.try_get("id")?,
        creator_id: row.try_get("creator_id")?,
        marketer_id: row.try_get("marketer_id")?,
        destination_account: row.try_get("destination_account")?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        status: row.try_get::<String, _>("status")?.parse::<TransferStatus>()?,
        external_id: row.try_get("external_id")?,
        failure_reason: row.try_get("failure_reason")?,
        created_at: row.try_get("created_at")?,
        resolved_at: row.try_get("resolved_at")?,
    })
}

fn reward_from_row(row: &PgRow) -> Result<Reward> {
    let availability = match row.try_get::<String, _>("availability")?.as_str() {
        "unlimited" => Availability::Unlimited,
        "first_n" => {
            let cap: i32 = row
                .try_get::<Option<i32>, _>("availability_cap")?
                .unwrap_or(0);
            Availability::FirstN(cap.max(0) as u32)
        }
        other => {
            return Err(crate::error::EngineError::UnknownStatus {
                kind: "availability",
                value: other.to_string(),
            }
            .into());
        }
    };
    Ok(Reward {
        id: row.try_get("id")?,
        project_id: row.try_get("project_id")?,
        name: row.try_get("name")?,
        milestone_type: row.try_get::<String, _>("milestone_type")?.parse()?,
        milestone_value: row.try_get("milestone_value")?,
        cash_amount: row.try_get("cash_amount")?,
        cash_currency: row.try_get("cash_currency")?,
        earn_limit: row.try_get::<String, _>("earn_limit")?.parse()?,
        availability,
        allowed_marketers: row.try_get("allowed_marketers")?,
        status: row.try_get::<String, _>("status")?.parse::<RewardStatus>()?,
        starts_at: row.try_get("starts_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn reward_earned_from_row(row: &PgRow) -> Result<RewardEarned> {
    Ok(RewardEarned {
        id: row.try_get("id")?,
        reward_id: row.try_get("reward_id")?,
        marketer_id: row.try_get("marketer_id")?,
        sequence: row.try_get("sequence")?,
        status: row
            .try_get::<String, _>("status")?
            .parse::<RewardEarnedStatus>()?,
        cash_amount: row.try_get("cash_amount")?,
        cash_currency: row.try_get("cash_currency")?,
        earned_at: row.try_get("earned_at")?,
    })
}

#[async_trait]
impl Store for PgStore {
    async fn project(&self, project_id: Uuid) -> Result<Option<Project>> {
        let row = sqlx::query(
            r#"SELECT id, creator_id, name, default_commission_rate, default_refund_window_days
               FROM projects WHERE id = $1"#,
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(Project {
                id: row.try_get("id")?,
                creator_id: row.try_get("creator_id")?,
                name: row.try_get("name")?,
                default_commission_rate: CommissionRate::from_fraction(
                    row.try_get("default_commission_rate")?,
                )?,
                default_refund_window_days: row.try_get("default_refund_window_days")?,
            })
        })
        .transpose()
    }

    async fn approved_contract(
        &self,
        project_id: Uuid,
        marketer_id: Uuid,
    ) -> Result<Option<Contract>> {
        let row = sqlx::query(
            r#"SELECT id, project_id, marketer_id, commission_rate, refund_window_days, status, created_at
               FROM contracts
               WHERE project_id = $1 AND marketer_id = $2 AND status = 'approved'
               ORDER BY created_at DESC
               LIMIT 1"#,
        )
        .bind(project_id)
        .bind(marketer_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(contract_from_row).transpose()
    }

    async fn marketer_for_coupon(&self, project_id: Uuid, coupon: &str) -> Result<Option<Uuid>> {
        let marketer: Option<Uuid> = sqlx::query_scalar(
            r#"SELECT marketer_id FROM coupons WHERE project_id = $1 AND code = $2"#,
        )
        .bind(project_id)
        .bind(coupon)
        .fetch_optional(&self.pool)
        .await?;
        Ok(marketer)
    }

    async fn find_purchase_by_external(
        &self,
        project_id: Uuid,
        event_id: &str,
        transaction_id: &str,
    ) -> Result<Option<Purchase>> {
        let row = sqlx::query(
            r#"SELECT * FROM purchases
               WHERE project_id = $1
                 AND (external_event_id = $2 OR external_transaction_id = $3)
               LIMIT 1"#,
        )
        .bind(project_id)
        .bind(event_id)
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(purchase_from_row).transpose()
    }

    async fn insert_purchase(&self, new: NewPurchase) -> Result<Purchase> {
        sqlx::query(
            r#"INSERT INTO purchases (
                   id, project_id, marketer_id, coupon, gross_amount, currency,
                   commission_amount, original_commission_amount, refunded_amount,
                   commission_status, payment_status, refund_window_days,
                   refund_eligible_at, external_event_id, external_transaction_id,
                   occurred_at, created_at
               ) VALUES ($1, $2, $3, $4, $5, $6, $7, $7, 0, $8, $9, $10, $11, $12, $13, $14, $15)"#,
        )
        .bind(new.id)
        .bind(new.project_id)
        .bind(new.marketer_id)
        .bind(&new.coupon)
        .bind(new.gross_amount)
        .bind(&new.currency)
        .bind(new.commission_amount)
        .bind(new.commission_status.as_str())
        .bind(new.payment_status.as_str())
        .bind(new.refund_window_days)
        .bind(new.refund_eligible_at)
        .bind(&new.external_event_id)
        .bind(&new.external_transaction_id)
        .bind(new.occurred_at)
        .bind(new.created_at)
        .execute(&self.pool)
        .await?;

        Ok(Purchase {
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
        })
    }

    async fn purchase(&self, id: Uuid) -> Result<Option<Purchase>> {
        let row = sqlx::query(r#"SELECT * FROM purchases WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(purchase_from_row).transpose()
    }

    async fn purchase_by_transaction(
        &self,
        project_id: Uuid,
        transaction_id: &str,
    ) -> Result<Option<Purchase>> {
        let row = sqlx::query(
            r#"SELECT * FROM purchases
               WHERE project_id = $1 AND external_transaction_id = $2
               LIMIT 1"#,
        )
        .bind(project_id)
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(purchase_from_row).transpose()
    }

    async fn set_commission_status(&self, id: Uuid, status: CommissionStatus) -> Result<()> {
        sqlx::query(r#"UPDATE purchases SET commission_status = $2 WHERE id = $1"#)
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_refunded(
        &self,
        id: Uuid,
        kind: RefundKind,
        amount: i64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"UPDATE purchases
               SET commission_status = $2, refunded_amount = $3, refunded_at = $4
               WHERE id = $1"#,
        )
        .bind(id)
        .bind(kind.terminal_status().as_str())
        .bind(amount)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn window_reevaluation_candidates(
        &self,
        creator_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Purchase>> {
        let rows = sqlx::query(
            r#"SELECT p.* FROM purchases p
               JOIN projects pr ON pr.id = p.project_id
               WHERE pr.creator_id = $1
                 AND ((p.commission_status = 'awaiting_refund_window' AND p.refund_eligible_at <= $2)
                      OR p.commission_status = 'pending_creator_payment')
               ORDER BY p.created_at, p.id"#,
        )
        .bind(creator_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(purchase_from_row).collect()
    }

    async fn payout_candidates(&self, creator_id: Uuid) -> Result<Vec<Purchase>> {
        let rows = sqlx::query(
            r#"SELECT p.* FROM purchases p
               JOIN projects pr ON pr.id = p.project_id
               LEFT JOIN transfers t ON t.id = p.transfer_record_id
               WHERE pr.creator_id = $1
                 AND p.commission_status = 'ready_for_payout'
                 AND p.payment_status IN ('pending', 'failed')
                 AND p.commission_amount > 0
                 AND (p.transfer_record_id IS NULL OR t.status <> 'pending')
               ORDER BY p.created_at, p.id"#,
        )
        .bind(creator_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(purchase_from_row).collect()
    }

    async fn insert_adjustment(
        &self,
        new: NewAdjustment,
        now: DateTime<Utc>,
    ) -> Result<CommissionAdjustment> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"INSERT INTO commission_adjustments
                   (id, creator_id, marketer_id, amount, currency, status, note, created_at)
               VALUES ($1, $2, $3, $4, $5, 'pending', $6, $7)"#,
        )
        .bind(id)
        .bind(new.creator_id)
        .bind(new.marketer_id)
        .bind(new.amount)
        .bind(&new.currency)
        .bind(&new.note)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(CommissionAdjustment {
            id,
            creator_id: new.creator_id,
            marketer_id: new.marketer_id,
            amount: new.amount,
            currency: new.currency,
            status: AdjustmentStatus::Pending,
            note: new.note,
            created_at: now,
            applied_at: None,
        })
    }

    async fn pending_adjustments(&self, creator_id: Uuid) -> Result<Vec<CommissionAdjustment>> {
        let rows = sqlx::query(
            r#"SELECT * FROM commission_adjustments
               WHERE creator_id = $1 AND status = 'pending'
               ORDER BY created_at, id"#,
        )
        .bind(creator_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(adjustment_from_row).collect()
    }

    async fn create_transfer(&self, new: NewTransfer, purchase_ids: &[Uuid]) -> Result<Transfer> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"INSERT INTO transfers
                   (id, creator_id, marketer_id, destination_account, amount, currency, status, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7)"#,
        )
        .bind(new.id)
        .bind(new.creator_id)
        .bind(new.marketer_id)
        .bind(&new.destination_account)
        .bind(new.amount)
        .bind(&new.currency)
        .bind(new.created_at)
        .execute(tx.as_mut())
        .await?;

        sqlx::query(r#"UPDATE purchases SET transfer_record_id = $1 WHERE id = ANY($2)"#)
            .bind(new.id)
            .bind(purchase_ids)
            .execute(tx.as_mut())
            .await?;

        tx.commit().await?;

        Ok(Transfer {
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
        })
    }

    async fn complete_transfer(
        &self,
        transfer_id: Uuid,
        external_id: &str,
        purchase_ids: &[Uuid],
        adjustment_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"UPDATE transfers
               SET status = 'paid', external_id = $2, resolved_at = $3
               WHERE id = $1"#,
        )
        .bind(transfer_id)
        .bind(external_id)
        .bind(now)
        .execute(tx.as_mut())
        .await?;

        sqlx::query(
            r#"UPDATE purchases
               SET commission_status = 'paid', payment_status = 'paid',
                   transfer_id = $2, transfer_record_id = $1
               WHERE id = ANY($3)"#,
        )
        .bind(transfer_id)
        .bind(external_id)
        .bind(purchase_ids)
        .execute(tx.as_mut())
        .await?;

        sqlx::query(
            r#"UPDATE commission_adjustments
               SET status = 'applied', applied_at = $2
               WHERE id = ANY($1)"#,
        )
        .bind(adjustment_ids)
        .bind(now)
        .execute(tx.as_mut())
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn fail_transfer(
        &self,
        transfer_id: Uuid,
        reason: &str,
        purchase_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"UPDATE transfers
               SET status = 'failed', failure_reason = $2, resolved_at = $3
               WHERE id = $1"#,
        )
        .bind(transfer_id)
        .bind(reason)
        .bind(now)
        .execute(tx.as_mut())
        .await?;

        sqlx::query(
            r#"UPDATE purchases
               SET payment_status = 'failed', transfer_record_id = $1
               WHERE id = ANY($2)"#,
        )
        .bind(transfer_id)
        .bind(purchase_ids)
        .execute(tx.as_mut())
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn pending_transfers(&self, creator_id: Uuid) -> Result<Vec<Transfer>> {
        let rows = sqlx::query(
            r#"SELECT * FROM transfers
               WHERE creator_id = $1 AND status = 'pending'
               ORDER BY created_at, id"#,
        )
        .bind(creator_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(transfer_from_row).collect()
    }

    async fn active_rewards(&self) -> Result<Vec<Reward>> {
        let rows = sqlx::query(
            r#"SELECT * FROM rewards WHERE status = 'active' ORDER BY created_at, id"#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(reward_from_row).collect()
    }

    async fn referred_totals(
        &self,
        project_id: Uuid,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReferredTotals>> {
        let mut by_marketer: HashMap<Uuid, ReferredTotals> = HashMap::new();

        let revenue_rows = sqlx::query(
            r#"SELECT marketer_id,
                      COALESCE(SUM(gross_amount - refunded_amount), 0)::bigint AS net_revenue,
                      COUNT(*)::bigint AS completed_sales
               FROM purchases
               WHERE project_id = $1
                 AND marketer_id IS NOT NULL
                 AND occurred_at >= $2
                 AND refund_eligible_at <= $3
                 AND commission_status NOT IN ('refunded', 'chargeback')
               GROUP BY marketer_id"#,
        )
        .bind(project_id)
        .bind(since)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        for row in &revenue_rows {
            let marketer_id: Uuid = row.try_get("marketer_id")?;
            let entry = by_marketer.entry(marketer_id).or_insert(ReferredTotals {
                marketer_id,
                ..ReferredTotals::default()
            });
            entry.net_revenue = row.try_get("net_revenue")?;
            entry.completed_sales = row.try_get("completed_sales")?;
        }

        let attribution_rows = sqlx::query(
            r#"SELECT marketer_id,
                      COUNT(*) FILTER (WHERE kind = 'click')::bigint AS clicks,
                      COUNT(*) FILTER (WHERE kind = 'install')::bigint AS installs
               FROM attribution_events
               WHERE project_id = $1 AND occurred_at >= $2
               GROUP BY marketer_id"#,
        )
        .bind(project_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        for row in &attribution_rows {
            let marketer_id: Uuid = row.try_get("marketer_id")?;
            let entry = by_marketer.entry(marketer_id).or_insert(ReferredTotals {
                marketer_id,
                ..ReferredTotals::default()
            });
            entry.clicks = row.try_get("clicks")?;
            entry.installs = row.try_get("installs")?;
        }

        let mut rows: Vec<_> = by_marketer.into_values().collect();
        rows.sort_by_key(|t| t.marketer_id);
        Ok(rows)
    }

    async fn granted_state(&self, reward_id: Uuid) -> Result<GrantedState> {
        let rows = sqlx::query(
            r#"SELECT marketer_id, MAX(sequence)::bigint AS granted
               FROM rewards_earned
               WHERE reward_id = $1
               GROUP BY marketer_id"#,
        )
        .bind(reward_id)
        .fetch_all(&self.pool)
        .await?;

        let mut state = GrantedState::default();
        for row in &rows {
            state
                .counts
                .insert(row.try_get("marketer_id")?, row.try_get("granted")?);
        }
        Ok(state)
    }

    async fn insert_reward_earned(&self, grant: NewRewardEarned) -> Result<RewardEarned> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"INSERT INTO rewards_earned
                   (id, reward_id, marketer_id, sequence, status, cash_amount, cash_currency, earned_at)
               VALUES ($1, $2, $3, $4, 'unlocked', $5, $6, $7)
               ON CONFLICT (reward_id, marketer_id, sequence) DO NOTHING"#,
        )
        .bind(id)
        .bind(grant.reward_id)
        .bind(grant.marketer_id)
        .bind(grant.sequence)
        .bind(grant.cash_amount)
        .bind(&grant.cash_currency)
        .bind(grant.earned_at)
        .execute(&self.pool)
        .await?;

        // Either the fresh row or the one a concurrent run got in first.
        let row = sqlx::query(
            r#"SELECT * FROM rewards_earned
               WHERE reward_id = $1 AND marketer_id = $2 AND sequence = $3"#,
        )
        .bind(grant.reward_id)
        .bind(grant.marketer_id)
        .bind(grant.sequence)
        .fetch_one(&self.pool)
        .await?;
        reward_earned_from_row(&row)
    }

    async fn reward_earned(&self, id: Uuid) -> Result<Option<RewardEarned>> {
        let row = sqlx::query(r#"SELECT * FROM rewards_earned WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(reward_earned_from_row).transpose()
    }

    async fn set_reward_earned_status(&self, id: Uuid, status: RewardEarnedStatus) -> Result<()> {
        sqlx::query(r#"UPDATE rewards_earned SET status = $2 WHERE id = $1"#)
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_attribution(
        &self,
        project_id: Uuid,
        marketer_id: Uuid,
        kind: AttributionKind,
        occurred_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO attribution_events (project_id, marketer_id, kind, occurred_at)
               VALUES ($1, $2, $3, $4)"#,
        )
        .bind(project_id)
        .bind(marketer_id)
        .bind(kind.as_str())
        .bind(occurred_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Account resolver backed by the `payout_accounts` table.
#[derive(Clone)]
pub struct PgAccountResolver {
    pool: PgPool,
}

impl PgAccountResolver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountResolver for PgAccountResolver {
    async fn marketer_account(&self, marketer_id: Uuid) -> Result<Option<String>> {
        let account: Option<String> = sqlx::query_scalar(
            r#"SELECT account FROM payout_accounts
               WHERE user_id = $1 AND kind = 'marketer_destination'"#,
        )
        .bind(marketer_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    async fn creator_funding_ready(&self, creator_id: Uuid) -> Result<bool> {
        let ready: Option<bool> = sqlx::query_scalar(
            r#"SELECT EXISTS (
                   SELECT 1 FROM payout_accounts
                   WHERE user_id = $1 AND kind = 'creator_funding'
               )"#,
        )
        .bind(creator_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(ready.unwrap_or(false))
    }
}
