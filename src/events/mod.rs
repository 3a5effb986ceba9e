use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the processor is gone.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("{}", e);
        }
    }
}

/// Domain events emitted by the checkout and entitlement flows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    CartItemAdded {
        owner: String,
        catalog_item_id: Uuid,
    },
    CartItemRemoved {
        owner: String,
        catalog_item_id: Uuid,
    },
    CheckoutCreated {
        authorization_id: String,
        amount: i64,
        discount: i64,
        coupon_code: Option<String>,
    },
    EntitlementGranted {
        entitlement_id: Uuid,
        identity_id: Uuid,
        catalog_item_id: Option<Uuid>,
        event_year: i32,
        authorization_id: Option<String>,
    },
    EntitlementRevoked {
        entitlement_id: Uuid,
        revoked_by: Uuid,
    },
    CouponRedeemed {
        coupon_id: Uuid,
        authorization_id: String,
    },
    AccountProvisioned {
        identity_id: Uuid,
    },
    PurchaseConfirmed {
        authorization_id: String,
        identity_id: Uuid,
        granted: usize,
    },
}

/// Drains the event channel, logging each event. Ends when every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::PurchaseConfirmed {
                authorization_id,
                identity_id,
                granted,
            } => info!(
                authorization_id = %authorization_id,
                identity_id = %identity_id,
                granted,
                "Purchase confirmed"
            ),
            Event::EntitlementRevoked {
                entitlement_id,
                revoked_by,
            } => warn!(
                entitlement_id = %entitlement_id,
                revoked_by = %revoked_by,
                "Entitlement revoked"
            ),
            other => info!("Received event: {:?}", other),
        }
    }

    info!("Event processing loop stopped");
}
