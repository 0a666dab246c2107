mod common;

use assert_matches::assert_matches;
use rust_decimal_macros::dec;
use stockbook::{
    entities::stock_movement::MovementType,
    errors::ServiceError,
    events::Event,
    services::sales::{NewSale, SALE_DELETED_REASON, SALE_REASON, SALE_UPDATED_REASON},
};

use common::{seed_record, TestCtx};

fn sale_input(product_id: i32, quantity: i32) -> NewSale {
    NewSale {
        product_id,
        quantity,
        unit_price: dec!(10.00),
    }
}

#[tokio::test]
async fn create_sale_draws_stock_and_records_movement() {
    let mut ctx = TestCtx::new().await;
    seed_record(&ctx.db_pool, 1, 50).await;

    let sale = ctx
        .services
        .sales
        .create_sale(sale_input(1, 3))
        .await
        .expect("create sale");
    assert_eq!(sale.quantity, 3);
    assert_eq!(sale.total_amount, dec!(30.00));

    let record = ctx.services.records.get_record(1).await.expect("record");
    assert_eq!(record.quantity, 47);

    let trail = ctx
        .services
        .ledger
        .movements_for(record.id, None, None)
        .await
        .expect("movements");
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].movement_type, MovementType::Outbound);
    assert_eq!(trail[0].quantity, 3);
    assert_eq!(trail[0].previous_quantity, 50);
    assert_eq!(trail[0].new_quantity, 47);
    assert_eq!(trail[0].reason, SALE_REASON);
    assert_eq!(trail[0].notes, Some(format!("sale {}", sale.id)));

    let events = ctx.drain_events();
    assert!(events.iter().any(|e| matches!(e, Event::SaleCreated(id) if *id == sale.id)));
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::InventoryAdjusted { product_id: 1, .. })));
}

#[tokio::test]
async fn create_sale_rolls_back_when_stock_is_short() {
    let ctx = TestCtx::new().await;
    seed_record(&ctx.db_pool, 2, 2).await;

    let result = ctx.services.sales.create_sale(sale_input(2, 5)).await;
    assert_matches!(result, Err(ServiceError::InsufficientStock(_)));

    // The sale row went down with the transaction.
    let (_, total) = ctx.services.sales.list_sales(1, 50).await.expect("list");
    assert_eq!(total, 0);
    let record = ctx.services.records.get_record(2).await.expect("record");
    assert_eq!(record.quantity, 2);
    let trail = ctx
        .services
        .ledger
        .movements_for(record.id, None, None)
        .await
        .expect("movements");
    assert!(trail.is_empty());
}

#[tokio::test]
async fn create_sale_requires_an_inventory_record() {
    let ctx = TestCtx::new().await;

    let result = ctx.services.sales.create_sale(sale_input(3, 1)).await;
    assert_matches!(result, Err(ServiceError::NoInventoryRecord(3)));

    let (_, total) = ctx.services.sales.list_sales(1, 50).await.expect("list");
    assert_eq!(total, 0);
}

#[tokio::test]
async fn rejects_invalid_input_before_touching_anything() {
    let ctx = TestCtx::new().await;
    seed_record(&ctx.db_pool, 4, 10).await;

    let result = ctx.services.sales.create_sale(sale_input(4, 0)).await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));

    let result = ctx
        .services
        .sales
        .create_sale(NewSale {
            product_id: 4,
            quantity: 1,
            unit_price: dec!(-1.00),
        })
        .await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));

    let record = ctx.services.records.get_record(4).await.expect("record");
    assert_eq!(record.quantity, 10);
}

#[tokio::test]
async fn update_sale_quantity_replaces_the_original_draw() {
    let mut ctx = TestCtx::new().await;
    seed_record(&ctx.db_pool, 5, 20).await;
    let sale = ctx
        .services
        .sales
        .create_sale(sale_input(5, 4))
        .await
        .expect("create sale");
    ctx.drain_events();

    let updated = ctx
        .services
        .sales
        .update_sale_quantity(sale.id, 9)
        .await
        .expect("update sale");
    assert_eq!(updated.quantity, 9);
    assert_eq!(updated.total_amount, dec!(90.00));

    // 20 - 9, not 20 - 4 - 9.
    let record = ctx.services.records.get_record(5).await.expect("record");
    assert_eq!(record.quantity, 11);

    let trail = ctx
        .services
        .ledger
        .movements_for(record.id, None, None)
        .await
        .expect("movements");
    assert_eq!(trail.len(), 3);
    assert_eq!(
        trail
            .iter()
            .filter(|m| m.reason == SALE_UPDATED_REASON)
            .count(),
        2
    );
    let net: i64 = ctx
        .services
        .ledger
        .signed_total(record.id)
        .await
        .expect("signed total");
    assert_eq!(net, -9);

    let events = ctx.drain_events();
    assert!(events.iter().any(|e| matches!(e, Event::SaleUpdated(id) if *id == sale.id)));
}

#[tokio::test]
async fn update_sale_quantity_with_same_quantity_changes_nothing() {
    let mut ctx = TestCtx::new().await;
    seed_record(&ctx.db_pool, 6, 20).await;
    let sale = ctx
        .services
        .sales
        .create_sale(sale_input(6, 4))
        .await
        .expect("create sale");
    ctx.drain_events();

    ctx.services
        .sales
        .update_sale_quantity(sale.id, 4)
        .await
        .expect("update sale");

    let record = ctx.services.records.get_record(6).await.expect("record");
    assert_eq!(record.quantity, 16);
    let trail = ctx
        .services
        .ledger
        .movements_for(record.id, None, None)
        .await
        .expect("movements");
    assert_eq!(trail.len(), 1);
    assert!(ctx.drain_events().is_empty());
}

#[tokio::test]
async fn update_sale_quantity_rolls_back_on_insufficient_stock() {
    let ctx = TestCtx::new().await;
    seed_record(&ctx.db_pool, 7, 10).await;
    let sale = ctx
        .services
        .sales
        .create_sale(sale_input(7, 8))
        .await
        .expect("create sale");

    // Reversing frees 8, but reapplying 11 overdraws the remaining 10.
    let result = ctx.services.sales.update_sale_quantity(sale.id, 11).await;
    assert_matches!(result, Err(ServiceError::InsufficientStock(_)));

    let record = ctx.services.records.get_record(7).await.expect("record");
    assert_eq!(record.quantity, 2);
    let unchanged = ctx.services.sales.get_sale(sale.id).await.expect("sale");
    assert_eq!(unchanged.quantity, 8);
    let trail = ctx
        .services
        .ledger
        .movements_for(record.id, None, None)
        .await
        .expect("movements");
    assert_eq!(trail.len(), 1);
}

#[tokio::test]
async fn update_sale_product_moves_the_draw() {
    let ctx = TestCtx::new().await;
    seed_record(&ctx.db_pool, 8, 10).await;
    seed_record(&ctx.db_pool, 9, 10).await;
    let sale = ctx
        .services
        .sales
        .create_sale(sale_input(8, 4))
        .await
        .expect("create sale");

    let moved = ctx
        .services
        .sales
        .update_sale_product(sale.id, 9)
        .await
        .expect("move sale");
    assert_eq!(moved.product_id, 9);

    let old_record = ctx.services.records.get_record(8).await.expect("record");
    assert_eq!(old_record.quantity, 10);
    let new_record = ctx.services.records.get_record(9).await.expect("record");
    assert_eq!(new_record.quantity, 6);

    let new_trail = ctx
        .services
        .ledger
        .movements_for(new_record.id, None, None)
        .await
        .expect("movements");
    assert_eq!(new_trail.len(), 1);
    assert_eq!(new_trail[0].reason, SALE_UPDATED_REASON);
    assert_eq!(new_trail[0].movement_type, MovementType::Outbound);
}

#[tokio::test]
async fn update_sale_product_rolls_back_when_target_has_no_record() {
    let ctx = TestCtx::new().await;
    seed_record(&ctx.db_pool, 10, 10).await;
    let sale = ctx
        .services
        .sales
        .create_sale(sale_input(10, 4))
        .await
        .expect("create sale");

    let result = ctx.services.sales.update_sale_product(sale.id, 11).await;
    assert_matches!(result, Err(ServiceError::NoInventoryRecord(11)));

    // The return to product 10 was rolled back along with the move.
    let record = ctx.services.records.get_record(10).await.expect("record");
    assert_eq!(record.quantity, 6);
    let unchanged = ctx.services.sales.get_sale(sale.id).await.expect("sale");
    assert_eq!(unchanged.product_id, 10);
}

#[tokio::test]
async fn delete_sale_returns_stock() {
    let mut ctx = TestCtx::new().await;
    seed_record(&ctx.db_pool, 12, 10).await;
    let sale = ctx
        .services
        .sales
        .create_sale(sale_input(12, 4))
        .await
        .expect("create sale");
    ctx.drain_events();

    ctx.services
        .sales
        .delete_sale(sale.id)
        .await
        .expect("delete sale");

    let record = ctx.services.records.get_record(12).await.expect("record");
    assert_eq!(record.quantity, 10);
    assert_matches!(
        ctx.services.sales.get_sale(sale.id).await,
        Err(ServiceError::NotFound(_))
    );

    let trail = ctx
        .services
        .ledger
        .movements_for(record.id, None, None)
        .await
        .expect("movements");
    assert_eq!(trail.len(), 2);
    let returned = trail
        .iter()
        .find(|m| m.reason == SALE_DELETED_REASON)
        .expect("return movement");
    assert_eq!(returned.movement_type, MovementType::Inbound);
    assert_eq!(returned.quantity, 4);

    let events = ctx.drain_events();
    assert!(events.iter().any(|e| matches!(e, Event::SaleDeleted(id) if *id == sale.id)));

    // Deleting again is a no-op.
    ctx.services
        .sales
        .delete_sale(sale.id)
        .await
        .expect("repeat delete");
    let record = ctx.services.records.get_record(12).await.expect("record");
    assert_eq!(record.quantity, 10);
}
