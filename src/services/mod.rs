// Core stock engine
pub mod adjustment;
pub mod coordinator;
pub mod drain;
pub mod locks;
pub mod movements;

// Submission guarding
pub mod duplicate_guard;

// Document services
pub mod purchases;
pub mod sales;

// Record management and reporting
pub mod inventory_records;
pub mod reconciliation;

// Service factory for dependency injection
pub mod factory;
