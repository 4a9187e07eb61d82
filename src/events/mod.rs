use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Best-effort publish; a full or closed channel is logged and dropped.
    pub fn send_or_log(&self, event: Event) {
        if let Err(err) = self.sender.try_send(event) {
            let reason = match &err {
                mpsc::error::TrySendError::Full(_) => "channel full",
                mpsc::error::TrySendError::Closed(_) => "channel closed",
            };
            warn!(reason, event = ?err.into_inner(), "dropping domain event");
        }
    }
}

// Domain events published after the owning transaction commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ProductCreated {
        product_id: Uuid,
        tracking_id: String,
    },
    CartItemAdded {
        cart_item_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    },
    CartMerged {
        session_id: String,
        user_id: String,
        merged_rows: usize,
    },
    OrderCreated(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    StockDecremented {
        order_id: Uuid,
        product_id: Uuid,
        requested: i32,
        remaining: i32,
    },
    ReturnRequested {
        return_id: Uuid,
        order_id: Uuid,
    },
    ReturnApproved(Uuid),
    ReturnRejected(Uuid),
    DefaultAddressChanged {
        user_id: String,
        address_id: Uuid,
    },
}

/// Drains the event channel until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        if let Event::StockDecremented {
            product_id,
            remaining: 0,
            ..
        } = &event
        {
            warn!(%product_id, "product sold out after shipment");
        }
        info!(event = ?event, "processed event");
    }

    info!("Event processing loop stopped");
}
