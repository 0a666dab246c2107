use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveModelBehavior, ActiveValue, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Multiplier over safety stock above which a record counts as overstocked.
pub const EXCESS_MULTIPLIER: i32 = 4;

/// Stock level classification, derived from quantity and safety stock on
/// every write.
#[derive(
    Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum InventoryStatus {
    #[sea_orm(string_value = "Normal")]
    Normal,
    #[sea_orm(string_value = "LowStock")]
    LowStock,
    #[sea_orm(string_value = "OutOfStock")]
    OutOfStock,
    #[sea_orm(string_value = "Excess")]
    Excess,
}

impl InventoryStatus {
    /// Classifies a stock level: OutOfStock at zero, LowStock at or below
    /// safety stock, Excess above `EXCESS_MULTIPLIER` times safety stock.
    pub fn derive(quantity: i32, safety_stock: i32) -> Self {
        if quantity <= 0 {
            InventoryStatus::OutOfStock
        } else if quantity <= safety_stock {
            InventoryStatus::LowStock
        } else if safety_stock > 0 && quantity > safety_stock * EXCESS_MULTIPLIER {
            InventoryStatus::Excess
        } else {
            InventoryStatus::Normal
        }
    }
}

/// How the stock on a record is held.
#[derive(Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum StockType {
    #[sea_orm(string_value = "Stock")]
    Stock,
    #[sea_orm(string_value = "Consignment")]
    Consignment,
    #[sea_orm(string_value = "Demo")]
    Demo,
}

/// The `inventory_records` table: current stock position per product.
///
/// `quantity` is mutated exclusively through the adjustment engine so that
/// every change leaves a movement row behind. `reserved_quantity` is a
/// marker inside `quantity`, never a separate pool.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "inventory_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub product_id: i32,
    pub quantity: i32,
    pub reserved_quantity: i32,
    pub safety_stock: i32,
    pub status: InventoryStatus,
    pub stock_type: StockType,
    pub is_deleted: bool,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    /// Stock not claimed by reservations.
    pub fn free_quantity(&self) -> i32 {
        self.quantity - self.reserved_quantity
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::stock_movement::Entity")]
    StockMovements,
}

impl Related<super::stock_movement::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StockMovements.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C: ConnectionTrait>(self, _db: &C, _insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        let now = Utc::now();
        if let ActiveValue::NotSet = active_model.created_at {
            active_model.created_at = Set(now);
        }
        if let ActiveValue::NotSet = active_model.updated_at {
            active_model.updated_at = Set(now);
        }
        Ok(active_model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0, 5, InventoryStatus::OutOfStock ; "zero on hand")]
    #[test_case(0, 0, InventoryStatus::OutOfStock ; "zero with no safety stock")]
    #[test_case(1, 5, InventoryStatus::LowStock ; "below safety stock")]
    #[test_case(5, 5, InventoryStatus::LowStock ; "exactly at safety stock")]
    #[test_case(6, 5, InventoryStatus::Normal ; "just above safety stock")]
    #[test_case(20, 5, InventoryStatus::Normal ; "at the excess boundary")]
    #[test_case(21, 5, InventoryStatus::Excess ; "past the excess boundary")]
    #[test_case(1, 0, InventoryStatus::Normal ; "no safety stock is never low")]
    #[test_case(1_000_000, 0, InventoryStatus::Normal ; "no safety stock is never excess")]
    fn derive_classifies_stock_levels(quantity: i32, safety_stock: i32, expected: InventoryStatus) {
        assert_eq!(InventoryStatus::derive(quantity, safety_stock), expected);
    }
}
