pub mod inventory_record;
pub mod purchase;
pub mod sale;
pub mod stock_movement;
