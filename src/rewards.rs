use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditLog};
use crate::error::EngineError;
use crate::notify::{Notification, Notifier};
use crate::store::Store;
use crate::types::{
    Availability, EarnLimit, EvaluationSummary, NewRewardEarned, Project, Reward, RewardEarned,
    RewardEarnedStatus,
};

/// How many times the milestone threshold has been fully crossed.
pub fn achieved(metric: i64, milestone_value: i64) -> i64 {
    if milestone_value <= 0 || metric <= 0 {
        return 0;
    }
    metric / milestone_value
}

/// Grants a marketer should hold in total, given how often they achieved
/// the milestone.
pub fn desired_grants(achieved: i64, earn_limit: EarnLimit) -> i64 {
    match earn_limit {
        EarnLimit::OncePerMarketer => achieved.min(1),
        EarnLimit::Multiple => achieved,
    }
}

/// One evaluation pass over all ACTIVE rewards. Re-runnable: it only adds
/// grants for sequence numbers above what already exists and never mutates
/// existing rows. A failure on one reward or marketer never blocks the
/// rest of the run.
pub async fn evaluate_rewards(
    store: &dyn Store,
    audit: &dyn AuditLog,
    notifier: &dyn Notifier,
    now: DateTime<Utc>,
) -> Result<EvaluationSummary> {
    let rewards = store.active_rewards().await?;
    let mut summary = EvaluationSummary {
        rewards_evaluated: rewards.len(),
        ..EvaluationSummary::default()
    };

    for reward in &rewards {
        match evaluate_reward(store, audit, notifier, reward, now).await {
            Ok((considered, created)) => {
                summary.marketers_considered += considered;
                summary.grants_created += created;
            }
            Err(e) => {
                error!(reward_id = %reward.id, "reward evaluation failed: {e:?}");
            }
        }
    }

    if summary.grants_created > 0 {
        info!(
            rewards = summary.rewards_evaluated,
            grants = summary.grants_created,
            "reward evaluation pass complete"
        );
    }
    Ok(summary)
}

async fn evaluate_reward(
    store: &dyn Store,
    audit: &dyn AuditLog,
    notifier: &dyn Notifier,
    reward: &Reward,
    now: DateTime<Utc>,
) -> Result<(usize, usize)> {
    let project = store
        .project(reward.project_id)
        .await?
        .ok_or(EngineError::UnknownProject(reward.project_id))?;
    let totals = store
        .referred_totals(reward.project_id, reward.starts_at, now)
        .await?;
    // Admission is decided against the granted set as it stood when the
    // run started; in-run admissions count toward the cap so availability
    // is never exceeded in the persisted result.
    let granted = store.granted_state(reward.id).await?;
    let cap = match reward.availability {
        Availability::Unlimited => None,
        Availability::FirstN(n) => Some(n as usize),
    };

    let mut considered = 0;
    let mut created = 0;
    let mut admitted_in_run = 0;

    for row in &totals {
        let marketer_id = row.marketer_id;
        if let Some(allowed) = &reward.allowed_marketers {
            if !allowed.contains(&marketer_id) {
                continue;
            }
        }
        considered += 1;

        let metric = row.metric(reward.milestone_type);
        let achieved = achieved(metric, reward.milestone_value);
        if achieved <= 0 {
            continue;
        }
        let already = granted.granted_for(marketer_id);
        let desired = desired_grants(achieved, reward.earn_limit);
        if desired <= already {
            continue;
        }

        if !granted.is_admitted(marketer_id) {
            if let Some(cap) = cap {
                if granted.admitted() + admitted_in_run >= cap {
                    continue;
                }
            }
            admitted_in_run += 1;
        }

        match grant_range(store, audit, notifier, reward, &project, marketer_id, already, desired, now)
            .await
        {
            Ok(n) => created += n,
            Err(e) => {
                error!(
                    reward_id = %reward.id,
                    marketer_id = %marketer_id,
                    "reward grant failed: {e:?}"
                );
            }
        }
    }

    Ok((considered, created))
}

/// Inserts one grant per unmet sequence number in (already, desired].
#[allow(clippy::too_many_arguments)]
async fn grant_range(
    store: &dyn Store,
    audit: &dyn AuditLog,
    notifier: &dyn Notifier,
    reward: &Reward,
    project: &Project,
    marketer_id: Uuid,
    already: i64,
    desired: i64,
    now: DateTime<Utc>,
) -> Result<usize> {
    let mut created = 0;
    for sequence in (already + 1)..=desired {
        let grant = store
            .insert_reward_earned(NewRewardEarned {
                reward_id: reward.id,
                marketer_id,
                sequence,
                cash_amount: reward.cash_amount,
                cash_currency: reward.cash_currency.clone(),
                earned_at: now,
            })
            .await?;
        created += 1;

        info!(
            reward_id = %reward.id,
            marketer_id = %marketer_id,
            sequence,
            "reward earned"
        );
        audit
            .record_event(AuditEvent {
                kind: "reward.earned",
                actor: Some(marketer_id),
                project_id: Some(reward.project_id),
                subject_type: "reward_earned",
                subject_id: grant.id.to_string(),
                data: json!({
                    "reward_id": reward.id,
                    "sequence": sequence,
                    "cash_amount": reward.cash_amount,
                    "cash_currency": reward.cash_currency,
                }),
            })
            .await;
        notifier
            .notify(Notification {
                user_id: marketer_id,
                kind: "reward_earned",
                title: format!("You earned \"{}\"", reward.name),
                message: format!("Milestone {} of \"{}\" reached.", sequence, reward.name),
                data: json!({ "reward_id": reward.id, "sequence": sequence }),
            })
            .await;
        notifier
            .notify(Notification {
                user_id: project.creator_id,
                kind: "marketer_reward_earned",
                title: format!("A marketer earned \"{}\"", reward.name),
                message: format!(
                    "Marketer {} reached milestone {} of \"{}\".",
                    marketer_id, sequence, reward.name
                ),
                data: json!({ "reward_id": reward.id, "marketer_id": marketer_id, "sequence": sequence }),
            })
            .await;
    }
    Ok(created)
}

/// Valid claim/pay progression for a grant. Everything else, including
/// repeats, is rejected.
pub fn grant_status_advances(current: RewardEarnedStatus, next: RewardEarnedStatus) -> bool {
    matches!(
        (current, next),
        (RewardEarnedStatus::Unlocked, RewardEarnedStatus::Claimed)
            | (RewardEarnedStatus::Claimed, RewardEarnedStatus::Paid)
    )
}

/// Externally-triggered claim/pay transition on one grant. The grant row
/// stays immutable apart from its status.
pub async fn advance_grant(
    store: &dyn Store,
    audit: &dyn AuditLog,
    id: Uuid,
    next: RewardEarnedStatus,
) -> Result<RewardEarned> {
    let grant = store
        .reward_earned(id)
        .await?
        .ok_or(EngineError::UnknownGrant)?;
    if !grant_status_advances(grant.status, next) {
        return Err(EngineError::InvalidGrantTransition {
            from: grant.status.as_str(),
            to: next.as_str(),
        }
        .into());
    }
    store.set_reward_earned_status(id, next).await?;

    let kind = match next {
        RewardEarnedStatus::Claimed => "reward.claimed",
        RewardEarnedStatus::Paid => "reward.paid",
        RewardEarnedStatus::Unlocked => "reward.earned",
    };
    audit
        .record_event(AuditEvent {
            kind,
            actor: Some(grant.marketer_id),
            project_id: None,
            subject_type: "reward_earned",
            subject_id: grant.id.to_string(),
            data: json!({ "reward_id": grant.reward_id, "sequence": grant.sequence }),
        })
        .await;

    Ok(RewardEarned {
        status: next,
        ..grant
    })
}
