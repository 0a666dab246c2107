use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Everything the engine and the document services announce after a commit.
///
/// Events describe state that already persisted; consumers can act on them
/// but can no longer veto them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Stock
    InventoryAdjusted {
        product_id: i32,
        old_quantity: i32,
        new_quantity: i32,
        reason: String,
        movement_id: Uuid,
    },
    InventoryRecordCreated {
        product_id: i32,
        inventory_id: Uuid,
    },
    InventoryRecordDeleted {
        product_id: i32,
        inventory_id: Uuid,
    },
    StockReserved {
        product_id: i32,
        quantity: i32,
    },
    StockReleased {
        product_id: i32,
        quantity: i32,
    },
    LowStockDetected {
        product_id: i32,
        quantity: i32,
        safety_stock: i32,
    },

    // Documents
    SaleCreated(Uuid),
    SaleUpdated(Uuid),
    SaleDeleted(Uuid),
    PurchaseCreated(Uuid),
    PurchaseUpdated(Uuid),
    PurchaseDeleted(Uuid),

    // Reporting
    ReconciliationCompleted {
        products: usize,
        discrepancies: usize,
    },

    /// Escape hatch for embedders publishing their own messages through the
    /// same channel.
    Generic {
        message: String,
        timestamp: DateTime<Utc>,
        metadata: serde_json::Value,
    },
}

impl Event {
    pub fn generic(message: impl Into<String>) -> Self {
        Event::Generic {
            message: message.into(),
            timestamp: Utc::now(),
            metadata: serde_json::Value::Null,
        }
    }
}

/// Cloneable handle the services publish through.
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Publishes one event, waiting for channel capacity if needed. Fails
    /// only when every receiver is gone.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("event channel closed: {}", e))
    }
}

/// Drains an event channel, logging each event as it arrives. Deployments
/// that fan out to real consumers replace this loop; tests use it to keep
/// the channel from backing up.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Event loop started");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::InventoryAdjusted {
                product_id,
                old_quantity,
                new_quantity,
                reason,
                movement_id,
            } => {
                info!(
                    product_id,
                    old_quantity,
                    new_quantity,
                    reason = %reason,
                    movement_id = %movement_id,
                    source = reason_source(reason),
                    "Stock adjusted"
                );
            }
            Event::LowStockDetected {
                product_id,
                quantity,
                safety_stock,
            } => {
                warn!(product_id, quantity, safety_stock, "Stock below safety level");
            }
            Event::StockReserved {
                product_id,
                quantity,
            } => {
                info!(product_id, quantity, "Stock reserved");
            }
            Event::StockReleased {
                product_id,
                quantity,
            } => {
                info!(product_id, quantity, "Stock released");
            }
            Event::ReconciliationCompleted {
                products,
                discrepancies,
            } => {
                if *discrepancies > 0 {
                    warn!(products, discrepancies, "Reconciliation found drift");
                } else {
                    info!(products, "Reconciliation clean");
                }
            }
            other => info!(event = ?other, "Event received"),
        }
    }

    warn!("Event channel closed; event loop exiting");
}

/// Which side of the ledger drove a movement, judged by its reason string.
fn reason_source(reason: &str) -> &'static str {
    match reason {
        "sale" | "sale updated" | "sale deleted" => "sales",
        "purchase" | "purchase updated" | "purchase deleted" => "purchasing",
        _ => "manual",
    }
}
