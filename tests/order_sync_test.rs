mod common;

use std::sync::Arc;

use rust_decimal_macros::dec;
use storefront_sync::models::{
    DocumentState, LineKind, SettlementStatus, SyncMode, SyncOrigin, SyncOutcome,
};
use storefront_sync::repositories::SyncStore;
use tokio::sync::mpsc;

use storefront_sync::events::{Event, EventSender};

use common::{bundle_order, coordinator, order, seeded_store};

#[tokio::test]
async fn same_order_twice_yields_one_document() {
    let store = seeded_store().await;
    let sync = coordinator(store.clone());
    let payload = order(101, "processing");

    let first = sync.sync_order(&payload, SyncOrigin::Webhook, SyncMode::Live).await;
    let second = sync.sync_order(&payload, SyncOrigin::Poll, SyncMode::Live).await;

    assert_eq!(first.outcome, SyncOutcome::Created);
    assert_eq!(second.outcome, SyncOutcome::Skipped);
    assert_eq!(first.document_id, second.document_id);
    assert_eq!(store.document_count(), 1);

    let record = store.get_sync_record(101).await.unwrap().unwrap();
    assert_eq!(record.origin, SyncOrigin::Poll);
    assert_eq!(Some(record.document_id), first.document_id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_backfill_of_order_500_creates_one_document() {
    let store = seeded_store().await;
    let sync = coordinator(store.clone());
    let payload = order(500, "completed");

    let mut handles = Vec::new();
    for _ in 0..2 {
        let sync = sync.clone();
        let payload = payload.clone();
        handles.push(tokio::spawn(async move {
            sync.sync_order(&payload, SyncOrigin::Backfill, SyncMode::Historical)
                .await
        }));
    }
    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.unwrap().outcome);
    }

    assert_eq!(store.document_count(), 1);
    assert_eq!(store.customer_count(), 1);
    assert_eq!(
        outcomes.iter().filter(|o| **o == SyncOutcome::Created).count(),
        1,
        "outcomes: {:?}",
        outcomes
    );
    assert!(outcomes
        .iter()
        .all(|o| matches!(o, SyncOutcome::Created | SyncOutcome::Skipped | SyncOutcome::Updated)));
}

#[tokio::test]
async fn pending_is_deferred_then_created_when_processing() {
    let store = seeded_store().await;
    let sync = coordinator(store.clone());

    let deferred = sync
        .sync_order(&order(7, "pending"), SyncOrigin::Webhook, SyncMode::Live)
        .await;
    assert_eq!(deferred.outcome, SyncOutcome::Deferred);
    assert_eq!(deferred.document_id, None);
    assert_eq!(store.document_count(), 0);

    let created = sync
        .sync_order(&order(7, "processing"), SyncOrigin::Webhook, SyncMode::Live)
        .await;
    assert_eq!(created.outcome, SyncOutcome::Created);
    let doc = store.get_document_by_external_id(7).await.unwrap().unwrap();
    assert_eq!(doc.state, DocumentState::Submitted);
    assert_eq!(doc.settlement_status, SettlementStatus::Unsettled);
}

#[tokio::test]
async fn bundle_lines_are_priced_from_children() {
    let store = seeded_store().await;
    let sync = coordinator(store.clone());

    sync.sync_order(&bundle_order(60, "processing"), SyncOrigin::Webhook, SyncMode::Live)
        .await;
    let doc = store.get_document_by_external_id(60).await.unwrap().unwrap();

    let nets: Vec<_> = doc.lines.iter().map(|l| (l.kind, l.net_amount)).collect();
    assert_eq!(
        nets,
        vec![
            (LineKind::BundleParent, dec!(0)),
            (LineKind::BundleChild { parent_line_id: 10 }, dec!(60.00)),
            (LineKind::BundleChild { parent_line_id: 10 }, dec!(40.00)),
        ]
    );
    // 100.00 of goods plus the Maadi delivery charge.
    assert_eq!(doc.total(), dec!(125.00));
    assert_eq!(doc.charges[0].description, "Shipping Income (EGMAADI)");
}

#[tokio::test]
async fn submitted_document_keeps_lines_and_reports_drift() {
    let store = seeded_store().await;
    let (tx, mut rx) = mpsc::channel(16);
    let sync = coordinator(store.clone()).with_events(EventSender::new(tx));
    sync.sync_order(&order(8, "processing"), SyncOrigin::Webhook, SyncMode::Live)
        .await;
    let before = store.get_document_by_external_id(8).await.unwrap().unwrap();

    let mut edited = order(8, "processing");
    edited.line_items[0].quantity = 3;
    let report = sync.sync_order(&edited, SyncOrigin::Webhook, SyncMode::Live).await;

    assert_ne!(report.outcome, SyncOutcome::Errored);
    assert!(report.error.is_none());
    let after = store.get_document_by_external_id(8).await.unwrap().unwrap();
    assert_eq!(after.lines, before.lines);
    assert_eq!(after.state, DocumentState::Submitted);

    let mut drift = false;
    while let Ok(event) = rx.try_recv() {
        drift |= matches!(
            event,
            Event::StateConflictDetected { external_id: 8, document_id, .. }
                if document_id == Some(before.id)
        );
    }
    assert!(drift);
}

#[tokio::test]
async fn cancellation_with_edited_quantities_still_cancels() {
    let store = seeded_store().await;
    let (tx, mut rx) = mpsc::channel(16);
    let sync = coordinator(store.clone()).with_events(EventSender::new(tx));
    sync.sync_order(&order(800, "processing"), SyncOrigin::Webhook, SyncMode::Live)
        .await;
    let submitted = store.get_document_by_external_id(800).await.unwrap().unwrap();
    assert_eq!(submitted.state, DocumentState::Submitted);
    while rx.try_recv().is_ok() {}

    // Storefronts often zero or trim quantities when an order is cancelled.
    let mut cancelled = order(800, "cancelled");
    cancelled.line_items[0].quantity = 1;
    let report = sync
        .sync_order(&cancelled, SyncOrigin::Webhook, SyncMode::Live)
        .await;

    assert_eq!(report.outcome, SyncOutcome::Updated, "{:?}", report.error);
    let doc = store.get_document_by_external_id(800).await.unwrap().unwrap();
    assert_eq!(doc.state, DocumentState::Cancelled);
    assert_eq!(doc.lines, submitted.lines);
    while let Ok(event) = rx.try_recv() {
        assert!(!matches!(event, Event::StateConflictDetected { .. }));
    }
}

#[tokio::test]
async fn submitted_document_accepts_payment_method_change() {
    let store = seeded_store().await;
    let sync = coordinator(store.clone());
    sync.sync_order(&order(9, "processing"), SyncOrigin::Webhook, SyncMode::Live)
        .await;

    let mut paid_by_card = order(9, "completed");
    paid_by_card.payment_method = Some("kashier_card".into());
    let report = sync
        .sync_order(&paid_by_card, SyncOrigin::Webhook, SyncMode::Live)
        .await;
    assert_eq!(report.outcome, SyncOutcome::Updated);

    let doc = store.get_document_by_external_id(9).await.unwrap().unwrap();
    assert_eq!(doc.state, DocumentState::Submitted);
    assert_eq!(doc.settlement_status, SettlementStatus::Settled);
    assert_eq!(doc.version, 2);
    let settlements = store.settlements_for(doc.id).await.unwrap();
    assert_eq!(settlements.len(), 1);
    assert_eq!(settlements[0].amount, doc.total());

    // Replaying the same delivery never settles twice.
    sync.sync_order(&paid_by_card, SyncOrigin::Poll, SyncMode::Live)
        .await;
    assert_eq!(store.settlements_for(doc.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn outcomes_are_published_as_events() {
    let store = seeded_store().await;
    let (tx, mut rx) = mpsc::channel(16);
    let sync = coordinator(store.clone()).with_events(EventSender::new(tx));

    let mut card = order(11, "processing");
    card.payment_method = Some("kashier_wallet".into());
    sync.sync_order(&card, SyncOrigin::Webhook, SyncMode::Live).await;

    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        seen.push(event);
    }
    assert!(seen
        .iter()
        .any(|e| matches!(e, Event::SettlementCreated { amount, .. } if *amount == dec!(125))));
    assert!(seen
        .iter()
        .any(|e| matches!(e, Event::OrderSynced(r) if r.outcome == SyncOutcome::Created)));
}

#[tokio::test]
async fn orders_without_identity_are_errors_without_ledger_entry() {
    let store = seeded_store().await;
    let sync = coordinator(Arc::clone(&store) as Arc<dyn SyncStore>);

    let mut anonymous = order(12, "processing");
    anonymous.customer_id = None;
    if let Some(billing) = anonymous.billing.as_mut() {
        billing.email = None;
        billing.phone = None;
    }
    let report = sync.sync_order(&anonymous, SyncOrigin::Webhook, SyncMode::Live).await;

    assert_eq!(report.outcome, SyncOutcome::Errored);
    assert!(store.get_sync_record(12).await.unwrap().is_none());
    assert_eq!(store.document_count(), 0);
}

#[tokio::test]
async fn gateway_change_after_settlement_does_not_settle_again() {
    let store = seeded_store().await;
    let sync = coordinator(store.clone());

    let mut card = order(810, "processing");
    card.payment_method = Some("kashier_card".into());
    sync.sync_order(&card, SyncOrigin::Webhook, SyncMode::Live).await;
    let doc = store.get_document_by_external_id(810).await.unwrap().unwrap();
    assert_eq!(store.settlements_for(doc.id).await.unwrap().len(), 1);

    let mut wallet = order(810, "processing");
    wallet.payment_method = Some("kashier_wallet".into());
    let report = sync.sync_order(&wallet, SyncOrigin::Webhook, SyncMode::Live).await;
    assert_ne!(report.outcome, SyncOutcome::Errored, "{:?}", report.error);

    let settlements = store.settlements_for(doc.id).await.unwrap();
    assert_eq!(settlements.len(), 1);
    assert_eq!(settlements[0].amount, doc.total());
}
