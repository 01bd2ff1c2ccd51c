mod common;

use std::collections::HashMap;
use std::sync::Arc;

use storefront_sync::models::{CustomerKey, SyncMode, SyncOrigin, SyncOutcome};
use storefront_sync::repositories::SyncStore;
use storefront_sync::services::CustomerSync;

use common::{account, coordinator, order, seeded_store, FakeStorefront};

fn customer_sync(client: Arc<FakeStorefront>, store: Arc<dyn SyncStore>) -> CustomerSync {
    CustomerSync::new(client, store, HashMap::new()).with_page_size(2)
}

#[tokio::test]
async fn pulls_every_page_and_matches_on_rerun() {
    let store = seeded_store().await;
    let mut no_address = account(3, "sara@example.com");
    no_address.billing = None;
    let client = Arc::new(FakeStorefront::default().with_customer_pages(vec![
        vec![account(1, "hana@example.com"), account(2, "omar@example.com")],
        vec![no_address],
    ]));
    let sync = customer_sync(client.clone(), store.clone());

    let first = sync.sync_all(1, None).await.unwrap();
    assert_eq!(first.created, 3);
    assert_eq!(first.errored, 0);
    assert_eq!(first.pages_processed, 2);
    assert_eq!(client.fetched_customer_pages(), vec![1, 2]);
    assert_eq!(store.customer_count(), 3);

    let second = sync.sync_all(1, None).await.unwrap();
    assert_eq!(second.created, 0);
    assert_eq!(second.updated, 3);
    assert_eq!(store.customer_count(), 3);

    let hana = store
        .find_customer(&CustomerKey::ExternalId("1".into()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(hana.territory.as_deref(), Some("EGMAADI"));
    assert_eq!(store.list_addresses(&[hana.id]).await.unwrap().len(), 1);

    let sara = store
        .find_customer(&CustomerKey::Email("sara@example.com".into()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sara.territory, None);
    assert!(store.list_addresses(&[sara.id]).await.unwrap().is_empty());
}

#[tokio::test]
async fn max_pages_bounds_the_walk() {
    let store = seeded_store().await;
    let client = Arc::new(FakeStorefront::default().with_customer_pages(vec![
        vec![account(1, "hana@example.com")],
        vec![account(2, "omar@example.com")],
        vec![account(3, "sara@example.com")],
    ]));

    let report = customer_sync(client.clone(), store.clone())
        .sync_all(2, Some(1))
        .await
        .unwrap();

    assert_eq!(report.created, 1);
    assert_eq!(client.fetched_customer_pages(), vec![2]);
    assert!(store
        .find_customer(&CustomerKey::ExternalId("2".into()))
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn accounts_and_their_orders_share_one_customer() {
    let store = seeded_store().await;
    let client = Arc::new(FakeStorefront::default());
    let (account_customer, created) = customer_sync(client, store.clone())
        .sync_customer(&account(5, "mona@example.com"))
        .await
        .unwrap();
    assert!(created);

    // Order 4 is placed by storefront customer 5.
    let report = coordinator(store.clone())
        .sync_order(&order(4, "processing"), SyncOrigin::Webhook, SyncMode::Live)
        .await;
    assert_eq!(report.outcome, SyncOutcome::Created, "{:?}", report.error);

    let doc = store.get_document_by_external_id(4).await.unwrap().unwrap();
    assert_eq!(doc.customer_id, account_customer.id);
    assert_eq!(store.customer_count(), 1);
}
