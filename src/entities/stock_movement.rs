use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveModelBehavior, ActiveValue, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Direction of a stock movement.
#[derive(
    Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum MovementType {
    #[sea_orm(string_value = "Inbound")]
    Inbound,
    #[sea_orm(string_value = "Outbound")]
    Outbound,
}

impl MovementType {
    /// Splits a signed delta into direction and positive magnitude.
    pub fn classify(delta: i32) -> (Self, i32) {
        if delta >= 0 {
            (MovementType::Inbound, delta)
        } else {
            (MovementType::Outbound, -delta)
        }
    }

    /// Signed delta this movement represents given its stored magnitude.
    pub fn signed(&self, magnitude: i32) -> i32 {
        match self {
            MovementType::Inbound => magnitude,
            MovementType::Outbound => -magnitude,
        }
    }
}

/// The `stock_movements` table: append-only audit trail of quantity changes.
///
/// Rows are inserted in the same transaction as the quantity write and are
/// never updated or deleted afterwards.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_movements")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub inventory_id: Uuid,
    pub movement_type: MovementType,
    /// Positive magnitude; direction lives in `movement_type`.
    pub quantity: i32,
    pub previous_quantity: i32,
    pub new_quantity: i32,
    pub reason: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Model {
    /// The signed delta this entry applied.
    pub fn signed_delta(&self) -> i32 {
        self.movement_type.signed(self.quantity)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::inventory_record::Entity",
        from = "Column::InventoryId",
        to = "super::inventory_record::Column::Id"
    )]
    InventoryRecord,
}

impl Related<super::inventory_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::InventoryRecord.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C: ConnectionTrait>(self, _db: &C, _insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        if let ActiveValue::NotSet = active_model.created_at {
            active_model.created_at = Set(Utc::now());
        }
        Ok(active_model)
    }
}
