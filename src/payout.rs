use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditLog};
use crate::gateway::{AccountResolver, TransferGateway, TransferRequest};
use crate::notify::{Notification, Notifier};
use crate::status::reevaluate_refund_window;
use crate::store::Store;
use crate::types::{
    CommissionAdjustment, GroupKey, GroupOutcome, GroupResult, NewTransfer, Purchase,
};

/// One payout group: everything owed to one destination account in one
/// currency, plus the pending adjustments netted against it.
#[derive(Debug, Clone)]
pub struct PayoutGroup {
    pub key: GroupKey,
    pub marketer_id: Uuid,
    pub purchases: Vec<Purchase>,
    pub adjustments: Vec<CommissionAdjustment>,
}

impl PayoutGroup {
    pub fn commission_total(&self) -> i64 {
        self.purchases.iter().map(|p| p.commission_amount).sum()
    }

    pub fn adjustment_total(&self) -> i64 {
        self.adjustments.iter().map(|a| a.amount).sum()
    }

    pub fn net_amount(&self) -> i64 {
        self.commission_total() + self.adjustment_total()
    }

    fn purchase_ids(&self) -> Vec<Uuid> {
        self.purchases.iter().map(|p| p.id).collect()
    }

    fn adjustment_ids(&self) -> Vec<Uuid> {
        self.adjustments.iter().map(|a| a.id).collect()
    }
}

/// Groups candidates by (destination account, currency) and nets pending
/// adjustments into the groups those candidates formed. Adjustments with
/// no candidate group stay pending, held until commissions accrue.
pub fn build_groups(
    candidates: Vec<(Purchase, String)>,
    adjustments: Vec<(CommissionAdjustment, String)>,
) -> Vec<PayoutGroup> {
    let mut groups: HashMap<GroupKey, PayoutGroup> = HashMap::new();

    for (purchase, account) in candidates {
        let Some(marketer_id) = purchase.marketer_id else {
            continue;
        };
        let key = GroupKey {
            destination_account: account,
            currency: purchase.currency.clone(),
        };
        groups
            .entry(key.clone())
            .or_insert_with(|| PayoutGroup {
                key,
                marketer_id,
                purchases: Vec::new(),
                adjustments: Vec::new(),
            })
            .purchases
            .push(purchase);
    }

    for (adjustment, account) in adjustments {
        let key = GroupKey {
            destination_account: account,
            currency: adjustment.currency.clone(),
        };
        if let Some(group) = groups.get_mut(&key) {
            group.adjustments.push(adjustment);
        }
    }

    let mut out: Vec<_> = groups.into_values().collect();
    out.sort_by(|a, b| {
        (&a.key.destination_account, &a.key.currency)
            .cmp(&(&b.key.destination_account, &b.key.currency))
    });
    out
}

/// One settlement run for one creator.
///
/// Steps: refund-window catch-up, candidate selection, grouping and
/// netting, then one transfer per group. Groups are isolated: a failed or
/// skipped group never affects the others, and every group lands in the
/// returned report.
pub async fn run_payouts(
    store: &dyn Store,
    accounts: &dyn AccountResolver,
    gateway: &dyn TransferGateway,
    audit: &dyn AuditLog,
    notifier: &dyn Notifier,
    creator_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Vec<GroupResult>> {
    reevaluate_refund_window(store, accounts, creator_id, now).await?;

    let candidates = store.payout_candidates(creator_id).await?;
    let adjustments = store.pending_adjustments(creator_id).await?;

    // Resolve each marketer's destination account once.
    let mut resolved: HashMap<Uuid, Option<String>> = HashMap::new();
    for marketer_id in candidates
        .iter()
        .filter_map(|p| p.marketer_id)
        .chain(adjustments.iter().map(|a| a.marketer_id))
    {
        if !resolved.contains_key(&marketer_id) {
            let account = accounts.marketer_account(marketer_id).await?;
            resolved.insert(marketer_id, account);
        }
    }

    let mut placeable = Vec::new();
    for purchase in candidates {
        let account = purchase
            .marketer_id
            .and_then(|m| resolved.get(&m).cloned().flatten());
        match account {
            Some(account) => placeable.push((purchase, account)),
            None => {
                debug!(purchase_id = %purchase.id, "no destination account; left for a later run");
            }
        }
    }
    let mut placeable_adjustments = Vec::new();
    for adjustment in adjustments {
        if let Some(account) = resolved.get(&adjustment.marketer_id).cloned().flatten() {
            placeable_adjustments.push((adjustment, account));
        }
    }

    let groups = build_groups(placeable, placeable_adjustments);
    info!(creator_id = %creator_id, groups = groups.len(), "payout run starting");

    let mut results = Vec::with_capacity(groups.len());
    for group in &groups {
        results.push(settle_group(store, gateway, audit, notifier, creator_id, group, now).await);
    }
    Ok(results)
}

/// Settles one group. Never returns an error: every failure mode becomes
/// the group's report entry so sibling groups keep processing.
async fn settle_group(
    store: &dyn Store,
    gateway: &dyn TransferGateway,
    audit: &dyn AuditLog,
    notifier: &dyn Notifier,
    creator_id: Uuid,
    group: &PayoutGroup,
    now: DateTime<Utc>,
) -> GroupResult {
    let amount = group.net_amount();
    let base = GroupResult {
        marketer_id: group.marketer_id,
        destination_account: group.key.destination_account.clone(),
        currency: group.key.currency.clone(),
        purchase_count: group.purchases.len(),
        amount,
        outcome: GroupOutcome::Skipped {
            reason: String::new(),
        },
    };

    if amount <= 0 {
        debug!(
            marketer_id = %group.marketer_id,
            amount,
            "group skipped: net amount not positive"
        );
        return GroupResult {
            outcome: GroupOutcome::Skipped {
                reason: format!(
                    "net amount {} {} is not positive; held until commissions accrue",
                    amount, group.key.currency
                ),
            },
            ..base
        };
    }

    let purchase_ids = group.purchase_ids();
    let adjustment_ids = group.adjustment_ids();

    // The PENDING row goes in before the external call so the intent is
    // durable; its id doubles as the idempotency key.
    let transfer = match store
        .create_transfer(
            NewTransfer {
                id: Uuid::new_v4(),
                creator_id,
                marketer_id: group.marketer_id,
                destination_account: group.key.destination_account.clone(),
                amount,
                currency: group.key.currency.clone(),
                created_at: now,
            },
            &purchase_ids,
        )
        .await
    {
        Ok(transfer) => transfer,
        Err(e) => {
            error!(marketer_id = %group.marketer_id, "failed to create transfer record: {e:?}");
            return GroupResult {
                outcome: GroupOutcome::Failed {
                    transfer_record_id: None,
                    reason: format!("failed to create transfer record: {e}"),
                },
                ..base
            };
        }
    };

    let issued = gateway
        .issue_transfer(TransferRequest {
            destination_account: group.key.destination_account.clone(),
            amount,
            currency: group.key.currency.clone(),
            idempotency_key: transfer.id,
            metadata: json!({
                "creator_id": creator_id,
                "marketer_id": group.marketer_id,
                "purchase_count": group.purchases.len(),
            }),
        })
        .await;

    match issued {
        Ok(issued) => {
            if let Err(e) = store
                .complete_transfer(
                    transfer.id,
                    &issued.external_id,
                    &purchase_ids,
                    &adjustment_ids,
                    now,
                )
                .await
            {
                // The money moved but our settlement write failed; the
                // PENDING row keeps the state inspectable for manual
                // reconciliation.
                error!(
                    transfer_record_id = %transfer.id,
                    external_id = %issued.external_id,
                    "settlement persistence failed after transfer: {e:?}"
                );
                return GroupResult {
                    outcome: GroupOutcome::Failed {
                        transfer_record_id: Some(transfer.id),
                        reason: format!(
                            "transfer {} issued but settlement persistence failed: {e}",
                            issued.external_id
                        ),
                    },
                    ..base
                };
            }

            info!(
                transfer_record_id = %transfer.id,
                external_id = %issued.external_id,
                amount,
                currency = %group.key.currency,
                purchases = group.purchases.len(),
                "payout group settled"
            );
            audit
                .record_event(AuditEvent {
                    kind: "payout.paid",
                    actor: Some(group.marketer_id),
                    project_id: None,
                    subject_type: "transfer",
                    subject_id: transfer.id.to_string(),
                    data: json!({
                        "external_id": issued.external_id,
                        "amount": amount,
                        "currency": group.key.currency,
                        "purchase_count": group.purchases.len(),
                        "adjustment_count": group.adjustments.len(),
                    }),
                })
                .await;
            notifier
                .notify(Notification {
                    user_id: group.marketer_id,
                    kind: "payout_sent",
                    title: "Commission payout sent".to_string(),
                    message: format!(
                        "A payout of {} {} covering {} sale(s) is on its way.",
                        amount,
                        group.key.currency,
                        group.purchases.len()
                    ),
                    data: json!({ "transfer_record_id": transfer.id, "amount": amount }),
                })
                .await;
            notifier
                .notify(Notification {
                    user_id: creator_id,
                    kind: "payout_issued",
                    title: "Marketer payout issued".to_string(),
                    message: format!(
                        "Paid {} {} to marketer {}.",
                        amount, group.key.currency, group.marketer_id
                    ),
                    data: json!({ "transfer_record_id": transfer.id, "amount": amount }),
                })
                .await;

            GroupResult {
                outcome: GroupOutcome::Paid {
                    transfer_record_id: transfer.id,
                    external_id: issued.external_id,
                },
                ..base
            }
        }
        Err(gateway_error) => {
            let reason = gateway_error.to_string();
            warn!(
                transfer_record_id = %transfer.id,
                marketer_id = %group.marketer_id,
                "transfer failed: {reason}"
            );
            if let Err(e) = store
                .fail_transfer(transfer.id, &reason, &purchase_ids, now)
                .await
            {
                error!(transfer_record_id = %transfer.id, "failed to record transfer failure: {e:?}");
            }
            GroupResult {
                outcome: GroupOutcome::Failed {
                    transfer_record_id: Some(transfer.id),
                    reason,
                },
                ..base
            }
        }
    }
}
