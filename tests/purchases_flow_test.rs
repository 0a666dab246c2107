mod common;

use assert_matches::assert_matches;
use rust_decimal_macros::dec;
use stockbook::{
    entities::stock_movement::MovementType,
    errors::ServiceError,
    events::Event,
    services::{
        purchases::{NewPurchase, PURCHASE_DELETED_REASON, PURCHASE_REASON},
        sales::NewSale,
    },
};

use common::{seed_record, TestCtx};

fn purchase_input(product_id: i32, quantity: i32) -> NewPurchase {
    NewPurchase {
        product_id,
        quantity,
        unit_price: dec!(4.50),
        supplier_name: Some("Acme Supply".to_string()),
    }
}

#[tokio::test]
async fn create_purchase_adds_stock_to_an_existing_record() {
    let mut ctx = TestCtx::new().await;
    seed_record(&ctx.db_pool, 1, 10).await;

    let purchase = ctx
        .services
        .purchases
        .create_purchase(purchase_input(1, 25))
        .await
        .expect("create purchase");
    assert_eq!(purchase.total_amount, dec!(112.50));

    let record = ctx.services.records.get_record(1).await.expect("record");
    assert_eq!(record.quantity, 35);

    let trail = ctx
        .services
        .ledger
        .movements_for(record.id, None, None)
        .await
        .expect("movements");
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].movement_type, MovementType::Inbound);
    assert_eq!(trail[0].quantity, 25);
    assert_eq!(trail[0].reason, PURCHASE_REASON);
    assert_eq!(trail[0].notes, Some(format!("purchase {}", purchase.id)));

    let events = ctx.drain_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::PurchaseCreated(id) if *id == purchase.id)));
}

#[tokio::test]
async fn create_purchase_provisions_a_record_for_a_new_product() {
    let mut ctx = TestCtx::new().await;

    ctx.services
        .purchases
        .create_purchase(purchase_input(42, 10))
        .await
        .expect("create purchase");

    let record = ctx.services.records.get_record(42).await.expect("record");
    assert_eq!(record.quantity, 10);

    let trail = ctx
        .services
        .ledger
        .movements_for(record.id, None, None)
        .await
        .expect("movements");
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].previous_quantity, 0);
    assert_eq!(trail[0].new_quantity, 10);

    let events = ctx.drain_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::InventoryRecordCreated { product_id: 42, .. })));
}

#[tokio::test]
async fn update_purchase_quantity_replaces_the_received_amount() {
    let ctx = TestCtx::new().await;
    let purchase = ctx
        .services
        .purchases
        .create_purchase(purchase_input(2, 20))
        .await
        .expect("create purchase");

    let updated = ctx
        .services
        .purchases
        .update_purchase_quantity(purchase.id, 12)
        .await
        .expect("update purchase");
    assert_eq!(updated.quantity, 12);
    assert_eq!(updated.total_amount, dec!(54.00));

    let record = ctx.services.records.get_record(2).await.expect("record");
    assert_eq!(record.quantity, 12);
}

#[tokio::test]
async fn update_purchase_quantity_cannot_shrink_below_consumed_stock() {
    let ctx = TestCtx::new().await;
    let purchase = ctx
        .services
        .purchases
        .create_purchase(purchase_input(3, 20))
        .await
        .expect("create purchase");
    ctx.services
        .sales
        .create_sale(NewSale {
            product_id: 3,
            quantity: 15,
            unit_price: dec!(9.00),
        })
        .await
        .expect("create sale");

    // Only 5 on hand; shrinking the receipt to 10 would mean -5.
    let result = ctx
        .services
        .purchases
        .update_purchase_quantity(purchase.id, 10)
        .await;
    assert_matches!(result, Err(ServiceError::InsufficientStock(_)));

    let record = ctx.services.records.get_record(3).await.expect("record");
    assert_eq!(record.quantity, 5);
    let unchanged = ctx
        .services
        .purchases
        .get_purchase(purchase.id)
        .await
        .expect("purchase");
    assert_eq!(unchanged.quantity, 20);
}

#[tokio::test]
async fn delete_purchase_removes_the_received_stock() {
    let mut ctx = TestCtx::new().await;
    let purchase = ctx
        .services
        .purchases
        .create_purchase(purchase_input(4, 10))
        .await
        .expect("create purchase");
    ctx.drain_events();

    ctx.services
        .purchases
        .delete_purchase(purchase.id)
        .await
        .expect("delete purchase");

    let record = ctx.services.records.get_record(4).await.expect("record");
    assert_eq!(record.quantity, 0);
    assert_matches!(
        ctx.services.purchases.get_purchase(purchase.id).await,
        Err(ServiceError::NotFound(_))
    );

    let trail = ctx
        .services
        .ledger
        .movements_for(record.id, None, None)
        .await
        .expect("movements");
    let removed = trail
        .iter()
        .find(|m| m.reason == PURCHASE_DELETED_REASON)
        .expect("removal movement");
    assert_eq!(removed.movement_type, MovementType::Outbound);
    assert_eq!(removed.quantity, 10);

    let events = ctx.drain_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::PurchaseDeleted(id) if *id == purchase.id)));
}

#[tokio::test]
async fn delete_purchase_is_refused_once_the_stock_was_sold_on() {
    let ctx = TestCtx::new().await;
    let purchase = ctx
        .services
        .purchases
        .create_purchase(purchase_input(5, 10))
        .await
        .expect("create purchase");
    ctx.services
        .sales
        .create_sale(NewSale {
            product_id: 5,
            quantity: 8,
            unit_price: dec!(9.00),
        })
        .await
        .expect("create sale");

    let result = ctx.services.purchases.delete_purchase(purchase.id).await;
    assert_matches!(result, Err(ServiceError::InsufficientStock(_)));

    // The rollback kept the purchase live and the stock untouched.
    let kept = ctx
        .services
        .purchases
        .get_purchase(purchase.id)
        .await
        .expect("purchase");
    assert!(!kept.is_deleted);
    let record = ctx.services.records.get_record(5).await.expect("record");
    assert_eq!(record.quantity, 2);
}

#[tokio::test]
async fn rejects_invalid_supplier_name() {
    let ctx = TestCtx::new().await;

    let result = ctx
        .services
        .purchases
        .create_purchase(NewPurchase {
            product_id: 6,
            quantity: 1,
            unit_price: dec!(1.00),
            supplier_name: Some("x".repeat(256)),
        })
        .await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));
}
