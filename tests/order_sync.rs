use serde_json::json;
use std::sync::Arc;
use storefront_sync::{
    model::timestamp,
    prelude::*,
    test::{eventually, fixtures, MemoryDocumentStore, RecordingObserver},
};

type TestResult = Result<(), Box<dyn std::error::Error>>;

async fn seeded_remote() -> Arc<MemoryDocumentStore> {
    let remote = Arc::new(MemoryDocumentStore::new());
    fixtures::seed_order(&remote, &fixtures::order("o1", "cust_1", OrderStatus::Pending, 10)).await;
    fixtures::seed_order(&remote, &fixtures::order("o2", "cust_2", OrderStatus::Processing, 20)).await;
    remote
}

async fn live_store(
    remote: &Arc<MemoryDocumentStore>,
    scope: OrderScope,
    observer: Option<Arc<RecordingObserver>>,
) -> Result<OrderStore<MemoryDocumentStore>, StoreError> {
    let config = StoreConfig::builder().build().unwrap();
    let mut ctx = StoreContext::new(remote.clone(), AuthSession::signed_in(fixtures::customer()), config);
    if let Some(observer) = observer {
        ctx = ctx.with_observer(observer);
    }
    let orders = OrderStore::new(ctx, scope);
    orders.start().await?;
    assert!(eventually(|| orders.sync_state().is_live()).await);
    Ok(orders)
}

#[tokio::test]
async fn unrelated_update_keeps_order_identity() -> TestResult {
    let remote = seeded_remote().await;
    let orders = live_store(&remote, OrderScope::All, None).await?;
    let before = orders.get_order_by_id("o1").ok_or("o1 missing")?;

    orders.update_order_status("o2", OrderStatus::Shipped).await?;
    assert!(eventually(|| orders.get_order_by_id("o2").is_some_and(|o| o.status == OrderStatus::Shipped)).await);
    assert_eq!(orders.get_order_by_id("o1"), Some(before));

    orders.close().await;
    Ok(())
}

#[tokio::test]
async fn repeated_status_update_advances_timestamp() -> TestResult {
    let remote = seeded_remote().await;
    let orders = live_store(&remote, OrderScope::All, None).await?;

    orders.update_order_status("o1", OrderStatus::Processing).await?;
    let first = orders.get_order_by_id("o1").ok_or("o1 missing")?;
    orders.update_order_status("o1", OrderStatus::Processing).await?;
    let second = orders.get_order_by_id("o1").ok_or("o1 missing")?;

    assert_eq!(second.status, OrderStatus::Processing);
    assert!(second.updated_at > first.updated_at);
    assert!(first.updated_at > first.created_at);
    assert_eq!(
        remote.document("orders", "o1").ok_or("o1 not stored")?["updatedAt"],
        json!(timestamp::format(&second.updated_at))
    );

    orders.close().await;
    Ok(())
}

#[tokio::test]
async fn terminal_orders_stay_terminal() -> TestResult {
    let remote = seeded_remote().await;
    let orders = live_store(&remote, OrderScope::All, None).await?;

    orders.update_order_status("o1", OrderStatus::Cancelled).await?;
    for status in [OrderStatus::Pending, OrderStatus::Shipped, OrderStatus::Delivered] {
        let err = orders.update_order_status("o1", status).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidTransition {
                from: OrderStatus::Cancelled,
                ..
            }
        ));
    }
    // Skipping steps forward is fine.
    orders.update_order_status("o2", OrderStatus::Delivered).await?;

    orders.close().await;
    Ok(())
}

#[tokio::test]
async fn remote_changes_replace_the_view() -> TestResult {
    let remote = seeded_remote().await;
    let orders = live_store(&remote, OrderScope::All, None).await?;

    let collection = CollectionRef::new("orders");
    let mut fields = Fields::new();
    fields.insert("status".to_string(), json!("delivered"));
    remote.update_fields(&collection, "o2", fields).await?;
    remote.delete_document(&collection, "o1").await?;

    assert!(
        eventually(|| {
            let view = orders.orders();
            view.len() == 1 && view[0].id == "o2" && view[0].status == OrderStatus::Delivered
        })
        .await
    );
    assert_eq!(orders.orders_with_status(Some(OrderStatus::Delivered)).len(), 1);
    assert!(orders.orders_with_status(Some(OrderStatus::Pending)).is_empty());

    orders.close().await;
    Ok(())
}

#[tokio::test]
async fn customer_scope_sees_only_own_orders() -> TestResult {
    let remote = seeded_remote().await;
    let orders = live_store(&remote, OrderScope::Customer("cust_1".into()), None).await?;
    assert_eq!(orders.orders().len(), 1);

    let id = orders.create_order(fixtures::new_order()).await?;
    assert!(eventually(|| orders.orders().len() == 2).await);
    assert_eq!(orders.orders()[0].id, id);
    assert_eq!(
        remote.document("orders", &id).ok_or("order not stored")?["customerId"],
        json!("cust_1")
    );

    // Another customer's order never shows up.
    fixtures::seed_order(&remote, &fixtures::order("o3", "cust_2", OrderStatus::Pending, 5)).await;
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert!(orders.get_order_by_id("o3").is_none());

    orders.close().await;
    Ok(())
}

#[tokio::test]
async fn customer_view_follows_the_session() -> TestResult {
    let remote = seeded_remote().await;
    let config = StoreConfig::builder().build().unwrap();
    let auth = AuthSession::signed_in(fixtures::customer());
    let orders = OrderStore::new(
        StoreContext::new(remote.clone(), auth.clone(), config),
        OrderScope::Customer("cust_1".into()),
    );
    orders.start().await?;
    assert!(eventually(|| orders.orders().iter().map(|o| o.id.as_str()).eq(["o1"])).await);

    auth.sign_out();
    assert!(eventually(|| orders.orders().is_empty() && remote.watcher_count() == 0).await);

    auth.sign_in(fixtures::second_customer());
    assert!(
        eventually(|| orders.sync_state().is_live() && orders.orders().iter().map(|o| o.id.as_str()).eq(["o2"]))
            .await
    );
    assert_eq!(orders.scope(), OrderScope::Customer("cust_2".into()));

    let id = orders.create_order(fixtures::new_order()).await?;
    assert!(eventually(|| orders.get_order_by_id(&id).is_some()).await);
    assert_eq!(
        remote.document("orders", &id).ok_or("order not stored")?["customerId"],
        json!("cust_2")
    );

    orders.close().await;
    assert_eq!(remote.watcher_count(), 0);
    Ok(())
}

#[tokio::test]
async fn close_tears_the_subscription_down() -> TestResult {
    let remote = seeded_remote().await;
    let orders = live_store(&remote, OrderScope::All, None).await?;
    assert_eq!(remote.watcher_count(), 1);
    assert!(orders.is_listening());

    orders.close().await;
    assert_eq!(remote.watcher_count(), 0);
    assert!(!orders.is_listening());
    // The last snapshot stays readable.
    assert_eq!(orders.orders().len(), 2);

    // Starting twice keeps a single subscription.
    orders.start().await?;
    orders.start().await?;
    assert_eq!(remote.watcher_count(), 1);

    drop(orders);
    assert!(eventually(|| remote.watcher_count() == 0).await);
    Ok(())
}

#[tokio::test]
async fn broken_subscription_marks_view_stale() -> TestResult {
    let remote = seeded_remote().await;
    let observer = Arc::new(RecordingObserver::new());
    let orders = live_store(&remote, OrderScope::All, Some(observer.clone())).await?;

    remote.break_subscriptions("orders", RemoteError::unavailable("connection lost"));
    assert!(eventually(|| orders.sync_state().is_stale()).await);
    assert!(eventually(|| observer.errors().len() == 1).await);
    assert_eq!(orders.orders().len(), 2);

    // Writes made while stale are not seen until the store is started again.
    fixtures::seed_order(&remote, &fixtures::order("o3", "cust_3", OrderStatus::Pending, 5)).await;
    orders.start().await?;
    assert!(eventually(|| orders.sync_state().is_live() && orders.orders().len() == 3).await);

    orders.close().await;
    Ok(())
}
