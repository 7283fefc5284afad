//! End-to-end reconciliation scenarios on the in-memory stores.

use chrono::{NaiveDate, TimeZone, Utc};
use sepa_recon_rs::{
    BankTransaction, BankTransactionStore, BatchKind, BatchLine, BatchStatus, BatchStore, Context,
    Coordinator, EventStore, Invoice, InvoiceStatus, InvoiceStore, ItemKind, MandatePurpose,
    MandateStatus, MandateStore, MatchKind, MemoryStore, Money, OverlapRelation, PaymentKind,
    PaymentStore, ReconError, ReconcileMode, ReconConfig, ReturnStore, SafeTimeProvider,
    SepaBatch, SepaMandate, TimeSource,
};

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn test_time(y: i32, m: u32, day: u32) -> SafeTimeProvider {
    SafeTimeProvider::new(TimeSource::Test(
        Utc.with_ymd_and_hms(y, m, day, 9, 0, 0).unwrap(),
    ))
}

fn seed_member_invoice(store: &MemoryStore, id: &str, member: &str, total: &str, month: u32) {
    InvoiceStore::insert(
        store,
        Invoice {
            id: id.into(),
            member_id: member.into(),
            customer_id: format!("C-{member}"),
            posting_date: d(2025, month, 1),
            grand_total: Money::from_str_exact(total).unwrap(),
            outstanding: Money::from_str_exact(total).unwrap(),
            status: InvoiceStatus::Unpaid,
            period_start: Some(d(2025, month, 1)),
            period_end: Some(sepa_recon_rs::calendar::last_day(d(2025, month, 1))),
            item_kind: ItemKind::Membership,
            description: format!("Membership dues {member}"),
            subscription_id: None,
        },
    )
    .unwrap();
    MandateStore::insert(
        store,
        SepaMandate {
            id: format!("MD-{member}"),
            member_id: member.into(),
            iban: "NL02ABNA0123456789".into(),
            status: MandateStatus::Active,
            purpose: MandatePurpose {
                memberships: true,
                donations: false,
            },
        },
    )
    .unwrap();
}

fn seed_batch(store: &MemoryStore, id: &str, date: NaiveDate, lines: &[(&str, &str, &str)]) {
    let lines: Vec<BatchLine> = lines
        .iter()
        .map(|(invoice, member, amount)| BatchLine {
            invoice_id: invoice.to_string(),
            customer_id: format!("C-{member}"),
            amount: Money::from_str_exact(amount).unwrap(),
            mandate_id: format!("MD-{member}"),
        })
        .collect();
    BatchStore::insert(
        store,
        SepaBatch {
            id: id.into(),
            batch_date: date,
            total_amount: lines.iter().map(|l| l.amount).sum(),
            entry_count: lines.len(),
            status: BatchStatus::Submitted,
            kind: BatchKind::Rcur,
            lines,
        },
    )
    .unwrap();
}

fn seed_transaction(store: &MemoryStore, id: &str, date: NaiveDate, deposit: &str) {
    BankTransactionStore::insert(
        store,
        BankTransaction {
            id: id.into(),
            date,
            description: "SEPA collection".into(),
            deposit: Money::from_str_exact(deposit).unwrap(),
            bank_account: "NL01BANK0000000001".into(),
            matched_batch_ids: Default::default(),
        },
    )
    .unwrap();
}

/// seed S1's world: batch B1 of three lines, deposit BT1 covering it exactly
fn seed_s1(store: &MemoryStore) {
    seed_member_invoice(store, "INV-1", "M1", "25.00", 1);
    seed_member_invoice(store, "INV-2", "M2", "30.00", 1);
    seed_member_invoice(store, "INV-3", "M3", "20.00", 1);
    seed_batch(
        store,
        "B1",
        d(2025, 1, 15),
        &[
            ("INV-1", "M1", "25.00"),
            ("INV-2", "M2", "30.00"),
            ("INV-3", "M3", "20.00"),
        ],
    );
    seed_transaction(store, "BT1", d(2025, 1, 15), "75.00");
}

/// no invoice may collect more than its grand total (P1), and no line is
/// collected twice under the same transaction and batch (P2)
fn assert_payment_invariants(store: &MemoryStore, invoice_ids: &[&str]) {
    let tolerance = ReconConfig::default().amount_tolerance;
    for id in invoice_ids {
        let invoice = InvoiceStore::get(store, &id.to_string()).unwrap();
        let payments = PaymentStore::for_invoice(store, &id.to_string()).unwrap();

        let allocated: Money = payments
            .iter()
            .filter(|p| p.kind == PaymentKind::Receive && !p.is_cancelled())
            .map(|p| p.allocated_to(&id.to_string()))
            .sum();
        assert!(
            allocated <= invoice.grand_total + tolerance,
            "invoice {id} over-allocated: {allocated} > {}",
            invoice.grand_total
        );

        let receives: Vec<_> = payments
            .iter()
            .filter(|p| p.kind == PaymentKind::Receive && !p.is_cancelled())
            .collect();
        for (i, a) in receives.iter().enumerate() {
            for b in receives.iter().skip(i + 1) {
                assert!(
                    (
                        &a.bank_transaction_id,
                        &a.batch_id,
                    ) != (&b.bank_transaction_id, &b.batch_id),
                    "duplicate collection of invoice {id}"
                );
            }
        }
    }
}

#[test]
fn s1_exact_batch_reconciliation() {
    let store = MemoryStore::new();
    let config = ReconConfig::default();
    let time = test_time(2025, 1, 15);
    seed_s1(&store);

    let ctx = Context::with_store(&time, &config, &store);
    let coordinator = Coordinator::new(&config);
    let mut events = EventStore::new();
    let outcome = coordinator
        .execute(&ctx, &mut events, &"BT1".to_string(), ReconcileMode::Conservative)
        .unwrap();

    assert!(outcome.applied);
    assert_eq!(outcome.payment_ids.len(), 3);
    for id in ["INV-1", "INV-2", "INV-3"] {
        let invoice = InvoiceStore::get(&store, &id.to_string()).unwrap();
        assert_eq!(invoice.outstanding, Money::ZERO, "{id} not settled");
        assert_eq!(invoice.status, InvoiceStatus::Paid);
    }
    let tx = BankTransactionStore::get(&store, &"BT1".to_string()).unwrap();
    assert_eq!(
        tx.matched_batch_ids.iter().map(String::as_str).collect::<Vec<_>>(),
        vec!["B1"]
    );
    assert_payment_invariants(&store, &["INV-1", "INV-2", "INV-3"]);
}

#[test]
fn s2_duplicate_batch_processing_refused() {
    let store = MemoryStore::new();
    let config = ReconConfig::default();
    let time = test_time(2025, 1, 15);
    seed_s1(&store);

    let ctx = Context::with_store(&time, &config, &store);
    let coordinator = Coordinator::new(&config);
    let mut events = EventStore::new();
    let first = coordinator
        .execute(&ctx, &mut events, &"BT1".to_string(), ReconcileMode::Conservative)
        .unwrap();
    let second = coordinator
        .execute(&ctx, &mut events, &"BT1".to_string(), ReconcileMode::Conservative)
        .unwrap();

    // the stored result comes back; no new payments appear
    assert_eq!(first, second);
    for id in ["INV-1", "INV-2", "INV-3"] {
        let payments = PaymentStore::for_invoice(&store, &id.to_string()).unwrap();
        assert_eq!(payments.len(), 1, "{id} collected twice");
    }
    assert_payment_invariants(&store, &["INV-1", "INV-2", "INV-3"]);
}

const S3_RETURN_FILE: &[u8] =
    b"Member_ID,Invoice,Amount,Return_Reason,Return_Code\nM2,INV-2,30.00,Insufficient funds,AM04\n";

#[test]
fn s3_return_file_reverses_one_line() {
    let store = MemoryStore::new();
    let config = ReconConfig::default();
    let time = test_time(2025, 1, 15);
    seed_s1(&store);

    let ctx = Context::with_store(&time, &config, &store);
    let coordinator = Coordinator::new(&config);
    let mut events = EventStore::new();
    coordinator
        .execute(&ctx, &mut events, &"BT1".to_string(), ReconcileMode::Conservative)
        .unwrap();

    let report = sepa_recon_rs::process(&ctx, &mut events, S3_RETURN_FILE).unwrap();
    assert_eq!(report.records.len(), 1);
    assert_eq!(report.records[0].invoice_id, "INV-2");
    assert_eq!(report.records[0].reason_code, "AM04");

    let invoice = InvoiceStore::get(&store, &"INV-2".to_string()).unwrap();
    assert_eq!(invoice.outstanding, Money::from_str_exact("30.00").unwrap());

    let refunds: Vec<_> = PaymentStore::for_invoice(&store, &"INV-2".to_string())
        .unwrap()
        .into_iter()
        .filter(|p| p.kind == PaymentKind::Refund)
        .collect();
    assert_eq!(refunds.len(), 1);

    // replaying the identical bytes changes nothing
    let replay = sepa_recon_rs::process(&ctx, &mut events, S3_RETURN_FILE);
    assert!(matches!(
        replay,
        Err(ReconError::ReturnFileAlreadyProcessed { .. })
    ));
    let stored = ReturnStore::for_file(&store, &report.file_hash).unwrap();
    assert_eq!(stored, report.records);
    let refunds_after: Vec<_> = PaymentStore::for_invoice(&store, &"INV-2".to_string())
        .unwrap()
        .into_iter()
        .filter(|p| p.kind == PaymentKind::Refund)
        .collect();
    assert_eq!(refunds_after.len(), 1);
}

#[test]
fn s4_period_overlap_prevented() {
    let store = MemoryStore::new();
    let config = ReconConfig::strict();
    let time = test_time(2025, 1, 15);
    seed_member_invoice(&store, "INV-A", "M", "25.00", 1);

    let ctx = Context::with_store(&time, &config, &store);
    let mut events = EventStore::new();
    let result = sepa_recon_rs::validate_before_create(
        &ctx,
        &mut events,
        &"M".to_string(),
        d(2025, 1, 15),
        d(2025, 2, 14),
    );

    match result {
        Err(ReconError::PeriodDuplicate { conflicts, .. }) => {
            assert_eq!(conflicts.len(), 1);
            assert_eq!(conflicts[0].invoice_id, "INV-A");
            assert_eq!(conflicts[0].relation, OverlapRelation::PartialEnd);
        }
        other => panic!("expected PeriodDuplicate, got {other:?}"),
    }
}

fn seed_s5(store: &MemoryStore) {
    seed_member_invoice(store, "INV-10", "M10", "50.00", 2);
    seed_member_invoice(store, "INV-11", "M11", "75.00", 2);
    seed_member_invoice(store, "INV-12", "M12", "25.00", 2);
    for i in 0..4 {
        seed_member_invoice(store, &format!("INV-2{i}"), &format!("M2{i}"), "25.00", 2);
    }
    seed_batch(store, "B2", d(2025, 2, 1), &[("INV-10", "M10", "50.00")]);
    seed_batch(store, "B3", d(2025, 2, 1), &[("INV-11", "M11", "75.00")]);
    seed_batch(store, "B4", d(2025, 2, 1), &[("INV-12", "M12", "25.00")]);
    seed_batch(
        store,
        "B5",
        d(2025, 2, 1),
        &[
            ("INV-20", "M20", "25.00"),
            ("INV-21", "M21", "25.00"),
            ("INV-22", "M22", "25.00"),
            ("INV-23", "M23", "25.00"),
        ],
    );
    seed_transaction(store, "BT2", d(2025, 2, 1), "150.00");
}

#[test]
fn s5_split_payment() {
    let store = MemoryStore::new();
    let config = ReconConfig::default();
    let time = test_time(2025, 2, 1);
    seed_s5(&store);

    let ctx = Context::with_store(&time, &config, &store);
    let tx = BankTransactionStore::get(&store, &"BT2".to_string()).unwrap();
    let candidates = sepa_recon_rs::find(&ctx, &tx).unwrap();
    let top = &candidates[0];
    assert_eq!(top.kind, MatchKind::Split);
    assert_eq!(
        top.batches,
        vec!["B2".to_string(), "B3".to_string(), "B4".to_string()]
    );
    assert_eq!(top.confidence, 1.0);

    // conservative mode routes the split to review
    let coordinator = Coordinator::new(&config);
    let mut events = EventStore::new();
    let deferred = coordinator
        .execute(&ctx, &mut events, &"BT2".to_string(), ReconcileMode::Conservative)
        .unwrap();
    assert!(!deferred.applied);
    assert!(!deferred.review.is_empty());

    // aggressive mode applies it; a fresh store avoids the conservative
    // run's idempotency record
    let store = MemoryStore::new();
    seed_s5(&store);
    let ctx = Context::with_store(&time, &config, &store);
    let coordinator = Coordinator::new(&config);
    let applied = coordinator
        .execute(&ctx, &mut events, &"BT2".to_string(), ReconcileMode::Aggressive)
        .unwrap();
    assert!(applied.applied);
    assert_eq!(applied.payment_ids.len(), 3);
    for id in ["INV-10", "INV-11", "INV-12"] {
        let invoice = InvoiceStore::get(&store, &id.to_string()).unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Paid);
    }
    assert_payment_invariants(&store, &["INV-10", "INV-11", "INV-12"]);
}

#[test]
fn s6_overpayment_refused() {
    let store = MemoryStore::new();
    let config = ReconConfig::default();
    let time = test_time(2025, 1, 15);
    seed_member_invoice(&store, "INV-X", "MX", "40.00", 1);
    seed_member_invoice(&store, "INV-Y", "MY", "40.00", 2);

    let ctx = Context::with_store(&time, &config, &store);
    let mut events = EventStore::new();

    sepa_recon_rs::post(
        &ctx,
        &mut events,
        &"INV-X".to_string(),
        Money::from_str_exact("40.00").unwrap(),
        &sepa_recon_rs::PostContext::default(),
    )
    .unwrap();
    let refused = sepa_recon_rs::post(
        &ctx,
        &mut events,
        &"INV-X".to_string(),
        Money::from_str_exact("5.00").unwrap(),
        &sepa_recon_rs::PostContext::default(),
    );
    assert!(matches!(refused, Err(ReconError::AlreadyFullyPaid { .. })));

    sepa_recon_rs::post(
        &ctx,
        &mut events,
        &"INV-Y".to_string(),
        Money::from_str_exact("30.00").unwrap(),
        &sepa_recon_rs::PostContext::default(),
    )
    .unwrap();
    let overpay = sepa_recon_rs::post(
        &ctx,
        &mut events,
        &"INV-Y".to_string(),
        Money::from_str_exact("15.00").unwrap(),
        &sepa_recon_rs::PostContext::default(),
    );
    assert!(matches!(overpay, Err(ReconError::WouldOverpay { .. })));
}

#[test]
fn delayed_return_after_fresh_payment_is_refused() {
    // a return file for an old collection arrives after the member already
    // paid the invoice again; the stale reversal must not undo the fresh
    // payment
    let store = MemoryStore::new();
    let config = ReconConfig::default();
    let time = test_time(2025, 1, 15);
    let controller = time.test_control().unwrap();
    seed_member_invoice(&store, "INV-1", "M1", "40.00", 1);

    let ctx = Context::with_store(&time, &config, &store);
    let mut events = EventStore::new();
    sepa_recon_rs::post(
        &ctx,
        &mut events,
        &"INV-1".to_string(),
        Money::from_str_exact("10.00").unwrap(),
        &sepa_recon_rs::PostContext {
            bank_transaction_id: Some("BT1".into()),
            batch_id: Some("B1".into()),
            idempotency_key: None,
        },
    )
    .unwrap();

    controller.advance(chrono::Duration::days(5));
    sepa_recon_rs::post(
        &ctx,
        &mut events,
        &"INV-1".to_string(),
        Money::from_str_exact("30.00").unwrap(),
        &sepa_recon_rs::PostContext {
            bank_transaction_id: Some("BT2".into()),
            batch_id: Some("B2".into()),
            idempotency_key: None,
        },
    )
    .unwrap();

    let file = b"Member_ID,Invoice,Amount,Return_Reason,Return_Code\nM1,INV-1,10.00,Insufficient funds,AM04\n";
    let report = sepa_recon_rs::process(&ctx, &mut events, file).unwrap();
    // the stale row is skipped, not applied and not fatal
    assert!(report.records.is_empty());
    assert_eq!(report.skipped.len(), 1);

    let invoice = InvoiceStore::get(&store, &"INV-1".to_string()).unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Paid);
}
