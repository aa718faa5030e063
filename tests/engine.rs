//! End-to-end engine behavior over the in-memory store: ingestion
//! idempotence, refund-window gating, milestone grants, and settlement
//! with per-group failure isolation.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use commission_engine::audit::{AuditEvent, AuditLog};
use commission_engine::gateway::{
    GatewayError, IssuedTransfer, StaticAccounts, TransferGateway, TransferRequest,
};
use commission_engine::memory::MemStore;
use commission_engine::notify::{Notification, Notifier};
use commission_engine::payout::run_payouts;
use commission_engine::rewards::{advance_grant, evaluate_rewards};
use commission_engine::status::{IngestOutcome, apply_refund, ingest_sale};
use commission_engine::store::Store;
use commission_engine::types::{
    Availability, CommissionRate, CommissionStatus, EarnLimit, GroupOutcome, MilestoneType,
    NewAdjustment, NewTransfer, PaymentStatus, Project, RefundEvent, RefundKind, Reward,
    RewardEarnedStatus, RewardStatus, SaleEvent, TransferStatus,
};

struct FakeGateway {
    fail_accounts: Mutex<HashSet<String>>,
    issued: Mutex<Vec<TransferRequest>>,
    counter: AtomicU64,
}

impl FakeGateway {
    fn new() -> Self {
        Self {
            fail_accounts: Mutex::new(HashSet::new()),
            issued: Mutex::new(Vec::new()),
            counter: AtomicU64::new(0),
        }
    }

    fn fail_for(self, account: &str) -> Self {
        self.fail_accounts.lock().unwrap().insert(account.to_string());
        self
    }

    fn clear_failures(&self) {
        self.fail_accounts.lock().unwrap().clear();
    }

    fn issued_count(&self) -> usize {
        self.issued.lock().unwrap().len()
    }
}

#[async_trait]
impl TransferGateway for FakeGateway {
    async fn issue_transfer(&self, req: TransferRequest) -> Result<IssuedTransfer, GatewayError> {
        if self
            .fail_accounts
            .lock()
            .unwrap()
            .contains(&req.destination_account)
        {
            return Err(GatewayError::Rejected("account unavailable".into()));
        }
        self.issued.lock().unwrap().push(req);
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(IssuedTransfer {
            external_id: format!("tr_{n}"),
        })
    }
}

#[derive(Default)]
struct RecordingAudit {
    events: Mutex<Vec<AuditEvent>>,
}

#[async_trait]
impl AuditLog for RecordingAudit {
    async fn record_event(&self, event: AuditEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl RecordingAudit {
    fn kinds(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(|e| e.kind).collect()
    }
}

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: Notification) {
        self.sent.lock().unwrap().push(notification);
    }
}

fn project(creator_id: Uuid, rate: f64, window_days: i32) -> Project {
    Project {
        id: Uuid::new_v4(),
        creator_id,
        name: "course".into(),
        default_commission_rate: CommissionRate::from_raw(rate).unwrap(),
        default_refund_window_days: Some(window_days),
    }
}

fn sale(
    project_id: Uuid,
    marketer_id: Option<Uuid>,
    suffix: &str,
    gross: i64,
    occurred_at: DateTime<Utc>,
) -> SaleEvent {
    SaleEvent {
        event_id: format!("evt_{suffix}"),
        transaction_id: format!("txn_{suffix}"),
        project_id,
        marketer_id,
        coupon: None,
        gross_amount: gross,
        currency: "USD".into(),
        occurred_at,
    }
}

fn reward(
    project_id: Uuid,
    milestone_type: MilestoneType,
    milestone_value: i64,
    earn_limit: EarnLimit,
    availability: Availability,
    starts_at: DateTime<Utc>,
) -> Reward {
    Reward {
        id: Uuid::new_v4(),
        project_id,
        name: "milestone bonus".into(),
        milestone_type,
        milestone_value,
        cash_amount: Some(5_000),
        cash_currency: Some("USD".into()),
        earn_limit,
        availability,
        allowed_marketers: None,
        status: RewardStatus::Active,
        starts_at,
        created_at: starts_at,
    }
}

async fn ingest(store: &MemStore, event: SaleEvent, now: DateTime<Utc>) -> IngestOutcome {
    ingest_sale(store, &RecordingAudit::default(), event, now)
        .await
        .unwrap()
}

#[tokio::test]
async fn same_event_ingested_twice_creates_one_purchase() {
    let store = MemStore::new();
    let creator = Uuid::new_v4();
    let marketer = Uuid::new_v4();
    let project = project(creator, 0.25, 30);
    store.add_project(project.clone());
    let t0 = Utc::now();

    let first = ingest(&store, sale(project.id, Some(marketer), "1", 10_000, t0), t0).await;
    assert!(matches!(first, IngestOutcome::Created(_)));

    let second = ingest(&store, sale(project.id, Some(marketer), "1", 10_000, t0), t0).await;
    assert!(matches!(second, IngestOutcome::Duplicate(_)));

    assert_eq!(store.all_purchases().len(), 1);
}

#[tokio::test]
async fn duplicate_transaction_id_alone_is_enough_to_dedup() {
    let store = MemStore::new();
    let project = project(Uuid::new_v4(), 0.25, 30);
    store.add_project(project.clone());
    let t0 = Utc::now();

    let mut event = sale(project.id, None, "a", 5_000, t0);
    ingest(&store, event.clone(), t0).await;

    // Same transaction delivered under a fresh event id.
    event.event_id = "evt_b".into();
    let outcome = ingest(&store, event, t0).await;
    assert!(matches!(outcome, IngestOutcome::Duplicate(_)));
    assert_eq!(store.all_purchases().len(), 1);
}

#[tokio::test]
async fn direct_sales_settle_immediately_with_zero_commission() {
    let store = MemStore::new();
    let project = project(Uuid::new_v4(), 0.25, 30);
    store.add_project(project.clone());
    let t0 = Utc::now();

    let outcome = ingest(&store, sale(project.id, None, "d", 10_000, t0), t0).await;
    let IngestOutcome::Created(purchase) = outcome else {
        panic!("expected creation");
    };
    assert_eq!(purchase.commission_amount, 0);
    assert_eq!(purchase.commission_status, CommissionStatus::Paid);
    assert_eq!(purchase.payment_status, PaymentStatus::Paid);
}

#[tokio::test]
async fn open_refund_window_is_never_selected_for_payout() {
    let store = MemStore::new();
    let creator = Uuid::new_v4();
    let marketer = Uuid::new_v4();
    let project = project(creator, 0.25, 30);
    store.add_project(project.clone());
    let t0 = Utc::now();

    ingest(&store, sale(project.id, Some(marketer), "1", 10_000, t0), t0).await;

    let accounts = StaticAccounts::new()
        .with_marketer(marketer, "acct_m")
        .with_funded_creator(creator);
    let gateway = FakeGateway::new();
    let audit = RecordingAudit::default();
    let notifier = RecordingNotifier::default();

    // However many times the batcher runs inside the window, nothing moves.
    for day in 0..3 {
        let now = t0 + Duration::days(day * 10);
        let report = run_payouts(&store, &accounts, &gateway, &audit, &notifier, creator, now)
            .await
            .unwrap();
        assert!(report.is_empty());
    }
    assert_eq!(gateway.issued_count(), 0);
    assert_eq!(
        store.all_purchases()[0].commission_status,
        CommissionStatus::AwaitingRefundWindow
    );
}

#[tokio::test]
async fn worked_example_nets_adjustment_and_settles_both_purchases() {
    let store = MemStore::new();
    let creator = Uuid::new_v4();
    let marketer = Uuid::new_v4();
    let project = project(creator, 0.25, 30);
    store.add_project(project.clone());
    let t0 = Utc::now();

    // 10000 * 0.25 = 2500 and 6000 * 0.25 = 1500.
    ingest(&store, sale(project.id, Some(marketer), "1", 10_000, t0), t0).await;
    ingest(&store, sale(project.id, Some(marketer), "2", 6_000, t0), t0).await;
    store
        .insert_adjustment(
            NewAdjustment {
                creator_id: creator,
                marketer_id: marketer,
                amount: -500,
                currency: "USD".into(),
                note: Some("clawback".into()),
            },
            t0,
        )
        .await
        .unwrap();

    let accounts = StaticAccounts::new()
        .with_marketer(marketer, "acct_m")
        .with_funded_creator(creator);
    let gateway = FakeGateway::new();
    let audit = RecordingAudit::default();
    let notifier = RecordingNotifier::default();

    let now = t0 + Duration::days(31);
    let report = run_payouts(&store, &accounts, &gateway, &audit, &notifier, creator, now)
        .await
        .unwrap();

    assert_eq!(report.len(), 1);
    assert_eq!(report[0].purchase_count, 2);
    assert_eq!(report[0].amount, 3_500);
    assert!(matches!(report[0].outcome, GroupOutcome::Paid { .. }));

    let purchases = store.all_purchases();
    assert!(purchases.iter().all(|p| {
        p.commission_status == CommissionStatus::Paid && p.payment_status == PaymentStatus::Paid
    }));
    assert!(purchases.iter().all(|p| p.transfer_id.is_some()));

    let transfers = store.all_transfers();
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].amount, 3_500);
    assert_eq!(transfers[0].status, TransferStatus::Paid);

    assert!(audit.kinds().contains(&"payout.paid"));
    // One notification each for the marketer and the creator.
    assert_eq!(notifier.sent.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn failing_group_does_not_affect_sibling_groups() {
    let store = MemStore::new();
    let creator = Uuid::new_v4();
    let m_ok = Uuid::new_v4();
    let m_bad = Uuid::new_v4();
    let project = project(creator, 0.25, 30);
    store.add_project(project.clone());
    let t0 = Utc::now();

    ingest(&store, sale(project.id, Some(m_ok), "1", 10_000, t0), t0).await;
    ingest(&store, sale(project.id, Some(m_bad), "2", 8_000, t0), t0).await;

    let accounts = StaticAccounts::new()
        .with_marketer(m_ok, "acct_ok")
        .with_marketer(m_bad, "acct_bad")
        .with_funded_creator(creator);
    let gateway = FakeGateway::new().fail_for("acct_bad");
    let audit = RecordingAudit::default();
    let notifier = RecordingNotifier::default();

    let now = t0 + Duration::days(31);
    let report = run_payouts(&store, &accounts, &gateway, &audit, &notifier, creator, now)
        .await
        .unwrap();

    assert_eq!(report.len(), 2);
    let ok_entry = report.iter().find(|r| r.marketer_id == m_ok).unwrap();
    let bad_entry = report.iter().find(|r| r.marketer_id == m_bad).unwrap();
    assert!(matches!(ok_entry.outcome, GroupOutcome::Paid { .. }));
    assert!(matches!(bad_entry.outcome, GroupOutcome::Failed { .. }));

    let purchases = store.all_purchases();
    let ok_purchase = purchases.iter().find(|p| p.marketer_id == Some(m_ok)).unwrap();
    let bad_purchase = purchases.iter().find(|p| p.marketer_id == Some(m_bad)).unwrap();
    assert_eq!(ok_purchase.commission_status, CommissionStatus::Paid);
    assert_eq!(bad_purchase.payment_status, PaymentStatus::Failed);
    // Commission status untouched so the purchase is retried next run.
    assert_eq!(bad_purchase.commission_status, CommissionStatus::ReadyForPayout);

    // Next run, with the account back, the failed group settles.
    gateway.clear_failures();
    let report = run_payouts(&store, &accounts, &gateway, &audit, &notifier, creator, now)
        .await
        .unwrap();
    assert_eq!(report.len(), 1);
    assert!(matches!(report[0].outcome, GroupOutcome::Paid { .. }));
    let purchases = store.all_purchases();
    assert!(purchases.iter().all(|p| p.commission_status == CommissionStatus::Paid));
}

#[tokio::test]
async fn non_positive_group_is_skipped_without_touching_others() {
    let store = MemStore::new();
    let creator = Uuid::new_v4();
    let m_ok = Uuid::new_v4();
    let m_held = Uuid::new_v4();
    let project = project(creator, 0.25, 30);
    store.add_project(project.clone());
    let t0 = Utc::now();

    ingest(&store, sale(project.id, Some(m_ok), "1", 10_000, t0), t0).await;
    ingest(&store, sale(project.id, Some(m_held), "2", 1_000, t0), t0).await; // 250 owed
    let debit = store
        .insert_adjustment(
            NewAdjustment {
                creator_id: creator,
                marketer_id: m_held,
                amount: -400,
                currency: "USD".into(),
                note: None,
            },
            t0,
        )
        .await
        .unwrap();

    let accounts = StaticAccounts::new()
        .with_marketer(m_ok, "acct_ok")
        .with_marketer(m_held, "acct_held")
        .with_funded_creator(creator);
    let gateway = FakeGateway::new();
    let audit = RecordingAudit::default();
    let notifier = RecordingNotifier::default();

    let now = t0 + Duration::days(31);
    let report = run_payouts(&store, &accounts, &gateway, &audit, &notifier, creator, now)
        .await
        .unwrap();

    let held_entry = report.iter().find(|r| r.marketer_id == m_held).unwrap();
    assert!(matches!(held_entry.outcome, GroupOutcome::Skipped { .. }));
    assert_eq!(held_entry.amount, -150);
    let ok_entry = report.iter().find(|r| r.marketer_id == m_ok).unwrap();
    assert!(matches!(ok_entry.outcome, GroupOutcome::Paid { .. }));

    // The skipped group issued nothing and its adjustment stays pending.
    assert_eq!(gateway.issued_count(), 1);
    assert_eq!(
        store.adjustment(debit.id).unwrap().status,
        commission_engine::types::AdjustmentStatus::Pending
    );
}

#[tokio::test]
async fn creator_without_funding_holds_purchases_until_configured() {
    let store = MemStore::new();
    let creator = Uuid::new_v4();
    let marketer = Uuid::new_v4();
    let project = project(creator, 0.25, 30);
    store.add_project(project.clone());
    let t0 = Utc::now();

    ingest(&store, sale(project.id, Some(marketer), "1", 10_000, t0), t0).await;

    let unfunded = StaticAccounts::new().with_marketer(marketer, "acct_m");
    let gateway = FakeGateway::new();
    let audit = RecordingAudit::default();
    let notifier = RecordingNotifier::default();
    let now = t0 + Duration::days(31);

    let report = run_payouts(&store, &unfunded, &gateway, &audit, &notifier, creator, now)
        .await
        .unwrap();
    assert!(report.is_empty());
    assert_eq!(
        store.all_purchases()[0].commission_status,
        CommissionStatus::PendingCreatorPayment
    );

    // Once funding is configured the held purchase is promoted and paid.
    let funded = StaticAccounts::new()
        .with_marketer(marketer, "acct_m")
        .with_funded_creator(creator);
    let report = run_payouts(&store, &funded, &gateway, &audit, &notifier, creator, now)
        .await
        .unwrap();
    assert_eq!(report.len(), 1);
    assert!(matches!(report[0].outcome, GroupOutcome::Paid { .. }));
}

#[tokio::test]
async fn marketer_without_destination_account_is_left_for_later() {
    let store = MemStore::new();
    let creator = Uuid::new_v4();
    let marketer = Uuid::new_v4();
    let project = project(creator, 0.25, 30);
    store.add_project(project.clone());
    let t0 = Utc::now();

    ingest(&store, sale(project.id, Some(marketer), "1", 10_000, t0), t0).await;

    let accounts = StaticAccounts::new().with_funded_creator(creator);
    let gateway = FakeGateway::new();
    let audit = RecordingAudit::default();
    let notifier = RecordingNotifier::default();
    let now = t0 + Duration::days(31);

    let report = run_payouts(&store, &accounts, &gateway, &audit, &notifier, creator, now)
        .await
        .unwrap();
    assert!(report.is_empty());
    assert_eq!(gateway.issued_count(), 0);
    // Still ready; a later run with an account will pick it up.
    assert_eq!(
        store.all_purchases()[0].commission_status,
        CommissionStatus::ReadyForPayout
    );
}

#[tokio::test]
async fn refund_inside_window_is_terminal_and_never_paid() {
    let store = MemStore::new();
    let creator = Uuid::new_v4();
    let marketer = Uuid::new_v4();
    let project = project(creator, 0.25, 30);
    store.add_project(project.clone());
    let t0 = Utc::now();
    let audit = RecordingAudit::default();

    ingest(&store, sale(project.id, Some(marketer), "1", 10_000, t0), t0).await;

    let refunded = apply_refund(
        &store,
        &audit,
        RefundEvent {
            project_id: project.id,
            transaction_id: Some("txn_1".into()),
            purchase_id: None,
            amount: None,
            reason: Some("buyer request".into()),
            kind: RefundKind::Refund,
            occurred_at: t0 + Duration::days(3),
        },
    )
    .await
    .unwrap();
    assert_eq!(refunded.commission_status, CommissionStatus::Refunded);
    // No amount on the event: falls back to the purchase's gross amount.
    assert_eq!(refunded.refunded_amount, 10_000);
    assert!(audit.kinds().contains(&"purchase.refunded"));

    let accounts = StaticAccounts::new()
        .with_marketer(marketer, "acct_m")
        .with_funded_creator(creator);
    let gateway = FakeGateway::new();
    let notifier = RecordingNotifier::default();
    let report = run_payouts(
        &store,
        &accounts,
        &gateway,
        &audit,
        &notifier,
        creator,
        t0 + Duration::days(40),
    )
    .await
    .unwrap();
    assert!(report.is_empty());
    assert_eq!(gateway.issued_count(), 0);
}

#[tokio::test]
async fn chargebacks_are_tagged_distinctly() {
    let store = MemStore::new();
    let project = project(Uuid::new_v4(), 0.25, 30);
    store.add_project(project.clone());
    let t0 = Utc::now();
    let audit = RecordingAudit::default();

    ingest(&store, sale(project.id, Some(Uuid::new_v4()), "1", 9_000, t0), t0).await;
    let purchase = apply_refund(
        &store,
        &audit,
        RefundEvent {
            project_id: project.id,
            transaction_id: Some("txn_1".into()),
            purchase_id: None,
            amount: Some(9_000),
            reason: Some("disputed".into()),
            kind: RefundKind::Chargeback,
            occurred_at: t0 + Duration::days(1),
        },
    )
    .await
    .unwrap();
    assert_eq!(purchase.commission_status, CommissionStatus::Chargeback);
    assert!(audit.kinds().contains(&"purchase.chargeback"));
}

#[tokio::test]
async fn terminal_purchases_never_move_backwards() {
    let store = MemStore::new();
    let creator = Uuid::new_v4();
    let marketer = Uuid::new_v4();
    let project = project(creator, 0.25, 30);
    store.add_project(project.clone());
    let t0 = Utc::now();
    let audit = RecordingAudit::default();
    let notifier = RecordingNotifier::default();

    ingest(&store, sale(project.id, Some(marketer), "1", 10_000, t0), t0).await;
    let accounts = StaticAccounts::new()
        .with_marketer(marketer, "acct_m")
        .with_funded_creator(creator);
    let gateway = FakeGateway::new();
    run_payouts(
        &store,
        &accounts,
        &gateway,
        &audit,
        &notifier,
        creator,
        t0 + Duration::days(31),
    )
    .await
    .unwrap();
    assert_eq!(store.all_purchases()[0].commission_status, CommissionStatus::Paid);

    // A late refund event cannot claw the settled commission back.
    let after = apply_refund(
        &store,
        &audit,
        RefundEvent {
            project_id: project.id,
            transaction_id: Some("txn_1".into()),
            purchase_id: None,
            amount: None,
            reason: None,
            kind: RefundKind::Refund,
            occurred_at: t0 + Duration::days(35),
        },
    )
    .await
    .unwrap();
    assert_eq!(after.commission_status, CommissionStatus::Paid);
    assert_eq!(after.refunded_amount, 0);
}

#[tokio::test]
async fn crashed_pending_transfer_is_excluded_and_visible() {
    let store = MemStore::new();
    let creator = Uuid::new_v4();
    let marketer = Uuid::new_v4();
    let project = project(creator, 0.25, 30);
    store.add_project(project.clone());
    let t0 = Utc::now();

    ingest(&store, sale(project.id, Some(marketer), "1", 10_000, t0), t0).await;
    let purchase_id = store.all_purchases()[0].id;
    store
        .set_commission_status(purchase_id, CommissionStatus::ReadyForPayout)
        .await
        .unwrap();

    // Simulate a crash between transfer creation and the external call.
    store
        .create_transfer(
            NewTransfer {
                id: Uuid::new_v4(),
                creator_id: creator,
                marketer_id: marketer,
                destination_account: "acct_m".into(),
                amount: 2_500,
                currency: "USD".into(),
                created_at: t0,
            },
            &[purchase_id],
        )
        .await
        .unwrap();

    // A concurrent or later run must not double-issue for that purchase.
    let candidates = store.payout_candidates(creator).await.unwrap();
    assert!(candidates.is_empty());

    let stuck = store.pending_transfers(creator).await.unwrap();
    assert_eq!(stuck.len(), 1);
    assert_eq!(stuck[0].status, TransferStatus::Pending);
}

#[tokio::test]
async fn twelve_sales_with_threshold_five_once_per_marketer_grants_one() {
    let store = MemStore::new();
    let creator = Uuid::new_v4();
    let marketer = Uuid::new_v4();
    let project = project(creator, 0.25, 30);
    store.add_project(project.clone());
    let t0 = Utc::now();

    for i in 0..12 {
        ingest(
            &store,
            sale(project.id, Some(marketer), &format!("s{i}"), 1_000, t0),
            t0,
        )
        .await;
    }
    store.add_reward(reward(
        project.id,
        MilestoneType::CompletedSales,
        5,
        EarnLimit::OncePerMarketer,
        Availability::Unlimited,
        t0 - Duration::days(1),
    ));

    let audit = RecordingAudit::default();
    let notifier = RecordingNotifier::default();
    // Evaluate after the refund windows have elapsed.
    let now = t0 + Duration::days(31);
    let summary = evaluate_rewards(&store, &audit, &notifier, now).await.unwrap();

    assert_eq!(summary.grants_created, 1);
    let grants = store.all_grants();
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0].sequence, 1);
    assert_eq!(grants[0].cash_amount, Some(5_000));
    // One audit event and two notifications per grant.
    assert!(audit.kinds().contains(&"reward.earned"));
    assert_eq!(notifier.sent.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn evaluation_is_idempotent_without_new_activity() {
    let store = MemStore::new();
    let creator = Uuid::new_v4();
    let marketer = Uuid::new_v4();
    let project = project(creator, 0.25, 30);
    store.add_project(project.clone());
    let t0 = Utc::now();

    for i in 0..7 {
        ingest(
            &store,
            sale(project.id, Some(marketer), &format!("s{i}"), 2_000, t0),
            t0,
        )
        .await;
    }
    store.add_reward(reward(
        project.id,
        MilestoneType::CompletedSales,
        3,
        EarnLimit::Multiple,
        Availability::Unlimited,
        t0 - Duration::days(1),
    ));

    let audit = RecordingAudit::default();
    let notifier = RecordingNotifier::default();
    let now = t0 + Duration::days(31);

    let first = evaluate_rewards(&store, &audit, &notifier, now).await.unwrap();
    assert_eq!(first.grants_created, 2); // floor(7 / 3)

    let second = evaluate_rewards(&store, &audit, &notifier, now).await.unwrap();
    assert_eq!(second.grants_created, 0);
    assert_eq!(store.all_grants().len(), 2);
}

#[tokio::test]
async fn new_activity_adds_only_the_missing_sequences() {
    let store = MemStore::new();
    let creator = Uuid::new_v4();
    let marketer = Uuid::new_v4();
    let project = project(creator, 0.25, 30);
    store.add_project(project.clone());
    let t0 = Utc::now();

    // 20000 net revenue: two crossings of a 10000 threshold.
    ingest(&store, sale(project.id, Some(marketer), "a", 20_000, t0), t0).await;
    store.add_reward(reward(
        project.id,
        MilestoneType::NetRevenue,
        10_000,
        EarnLimit::Multiple,
        Availability::Unlimited,
        t0 - Duration::days(1),
    ));

    let audit = RecordingAudit::default();
    let notifier = RecordingNotifier::default();
    let now = t0 + Duration::days(31);
    evaluate_rewards(&store, &audit, &notifier, now).await.unwrap();
    assert_eq!(store.all_grants().len(), 2);

    // A third crossing later adds exactly sequence 3.
    let t1 = t0 + Duration::days(5);
    ingest(&store, sale(project.id, Some(marketer), "b", 12_000, t1), t1).await;
    let later = t1 + Duration::days(31);
    let summary = evaluate_rewards(&store, &audit, &notifier, later).await.unwrap();
    assert_eq!(summary.grants_created, 1);

    let mut sequences: Vec<_> = store.all_grants().iter().map(|g| g.sequence).collect();
    sequences.sort();
    assert_eq!(sequences, vec![1, 2, 3]);
}

#[tokio::test]
async fn first_n_admits_no_more_marketers_than_the_cap() {
    let store = MemStore::new();
    let creator = Uuid::new_v4();
    let project = project(creator, 0.25, 30);
    store.add_project(project.clone());
    let t0 = Utc::now();

    let marketers: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
    for (i, marketer) in marketers.iter().enumerate() {
        for j in 0..5 {
            ingest(
                &store,
                sale(project.id, Some(*marketer), &format!("m{i}_{j}"), 1_000, t0),
                t0,
            )
            .await;
        }
    }
    store.add_reward(reward(
        project.id,
        MilestoneType::CompletedSales,
        5,
        EarnLimit::OncePerMarketer,
        Availability::FirstN(2),
        t0 - Duration::days(1),
    ));

    let audit = RecordingAudit::default();
    let notifier = RecordingNotifier::default();
    let now = t0 + Duration::days(31);

    // Repeated runs must never push past the cap.
    for _ in 0..3 {
        evaluate_rewards(&store, &audit, &notifier, now).await.unwrap();
    }

    let grants = store.all_grants();
    let distinct: HashSet<Uuid> = grants.iter().map(|g| g.marketer_id).collect();
    assert_eq!(distinct.len(), 2);
    assert_eq!(grants.len(), 2);
}

#[tokio::test]
async fn first_n_admitted_marketers_keep_earning_repetitions() {
    let store = MemStore::new();
    let creator = Uuid::new_v4();
    let early = Uuid::new_v4();
    let late = Uuid::new_v4();
    let project = project(creator, 0.25, 30);
    store.add_project(project.clone());
    let t0 = Utc::now();

    for j in 0..3 {
        ingest(&store, sale(project.id, Some(early), &format!("e{j}"), 1_000, t0), t0).await;
    }
    store.add_reward(reward(
        project.id,
        MilestoneType::CompletedSales,
        3,
        EarnLimit::Multiple,
        Availability::FirstN(1),
        t0 - Duration::days(1),
    ));

    let audit = RecordingAudit::default();
    let notifier = RecordingNotifier::default();
    evaluate_rewards(&store, &audit, &notifier, t0 + Duration::days(31))
        .await
        .unwrap();
    assert_eq!(store.all_grants().len(), 1);

    // The cap is reached; a later marketer gets nothing, but the admitted
    // one still earns its next repetition.
    let t1 = t0 + Duration::days(5);
    for j in 0..3 {
        ingest(&store, sale(project.id, Some(early), &format!("e2_{j}"), 1_000, t1), t1).await;
        ingest(&store, sale(project.id, Some(late), &format!("l{j}"), 1_000, t1), t1).await;
    }
    evaluate_rewards(&store, &audit, &notifier, t1 + Duration::days(31))
        .await
        .unwrap();

    let grants = store.all_grants();
    assert_eq!(grants.len(), 2);
    assert!(grants.iter().all(|g| g.marketer_id == early));
}

#[tokio::test]
async fn click_milestones_use_attribution_records() {
    let store = MemStore::new();
    let creator = Uuid::new_v4();
    let marketer = Uuid::new_v4();
    let project = project(creator, 0.25, 30);
    store.add_project(project.clone());
    let t0 = Utc::now();

    for _ in 0..10 {
        store
            .record_attribution(
                project.id,
                marketer,
                commission_engine::types::AttributionKind::Click,
                t0,
            )
            .await
            .unwrap();
    }
    store.add_reward(reward(
        project.id,
        MilestoneType::Clicks,
        4,
        EarnLimit::Multiple,
        Availability::Unlimited,
        t0 - Duration::days(1),
    ));

    let audit = RecordingAudit::default();
    let notifier = RecordingNotifier::default();
    let summary = evaluate_rewards(&store, &audit, &notifier, t0 + Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(summary.grants_created, 2); // floor(10 / 4)
}

#[tokio::test]
async fn grants_claim_then_pay_and_reject_everything_else() {
    let store = MemStore::new();
    let creator = Uuid::new_v4();
    let marketer = Uuid::new_v4();
    let project = project(creator, 0.25, 30);
    store.add_project(project.clone());
    let t0 = Utc::now();

    for i in 0..5 {
        ingest(
            &store,
            sale(project.id, Some(marketer), &format!("s{i}"), 1_000, t0),
            t0,
        )
        .await;
    }
    store.add_reward(reward(
        project.id,
        MilestoneType::CompletedSales,
        5,
        EarnLimit::OncePerMarketer,
        Availability::Unlimited,
        t0 - Duration::days(1),
    ));

    let audit = RecordingAudit::default();
    let notifier = RecordingNotifier::default();
    evaluate_rewards(&store, &audit, &notifier, t0 + Duration::days(31))
        .await
        .unwrap();
    let grant_id = store.all_grants()[0].id;

    // Paying an unclaimed grant is rejected.
    assert!(
        advance_grant(&store, &audit, grant_id, RewardEarnedStatus::Paid)
            .await
            .is_err()
    );

    let claimed = advance_grant(&store, &audit, grant_id, RewardEarnedStatus::Claimed)
        .await
        .unwrap();
    assert_eq!(claimed.status, RewardEarnedStatus::Claimed);

    // Double-claim is rejected; paying a claimed grant goes through.
    assert!(
        advance_grant(&store, &audit, grant_id, RewardEarnedStatus::Claimed)
            .await
            .is_err()
    );
    let paid = advance_grant(&store, &audit, grant_id, RewardEarnedStatus::Paid)
        .await
        .unwrap();
    assert_eq!(paid.status, RewardEarnedStatus::Paid);

    // The snapshot on the grant never changed.
    let grants = store.all_grants();
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0].cash_amount, Some(5_000));
    assert!(audit.kinds().contains(&"reward.claimed"));
    assert!(audit.kinds().contains(&"reward.paid"));
}

#[tokio::test]
async fn activity_before_the_reward_start_does_not_count() {
    let store = MemStore::new();
    let creator = Uuid::new_v4();
    let marketer = Uuid::new_v4();
    let project = project(creator, 0.25, 30);
    store.add_project(project.clone());
    let t0 = Utc::now();

    ingest(&store, sale(project.id, Some(marketer), "old", 50_000, t0), t0).await;
    // Reward starts after that sale.
    store.add_reward(reward(
        project.id,
        MilestoneType::NetRevenue,
        10_000,
        EarnLimit::Multiple,
        Availability::Unlimited,
        t0 + Duration::days(2),
    ));

    let audit = RecordingAudit::default();
    let notifier = RecordingNotifier::default();
    let summary = evaluate_rewards(&store, &audit, &notifier, t0 + Duration::days(40))
        .await
        .unwrap();
    assert_eq!(summary.grants_created, 0);
    assert!(store.all_grants().is_empty());
}
