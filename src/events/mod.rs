use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Sender half of the notification/audit sink. Services emit events after
/// their transaction commits; delivery failure is logged, never propagated.
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging on failure instead of returning an error.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            error!("event delivery failed: {}", e);
        }
    }
}

/// Events emitted by the matching, approval, and cascade engines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Matching engine
    InvoiceMatched {
        invoice_id: Uuid,
        purchase_order_id: Uuid,
    },
    InvoiceHeld {
        invoice_id: Uuid,
        purchase_order_id: Uuid,
        hold_reason: String,
    },
    InvoiceAwaitingGrn {
        invoice_id: Uuid,
        purchase_order_id: Uuid,
    },
    InvoiceAdminApproved {
        invoice_id: Uuid,
        reason: String,
        approved_by_role: String,
    },

    // Approval engine
    ApprovalAdvanced {
        document_type: String,
        document_id: Uuid,
        level: i32,
        role: String,
        is_final: bool,
    },
    ApprovalRejected {
        document_type: String,
        document_id: Uuid,
        level: i32,
        role: String,
        reason: Option<String>,
    },
    DocumentAutoApproved {
        document_type: String,
        document_id: Uuid,
        amount: Decimal,
    },

    // Quotation flow
    QuotationMarkedBest {
        quotation_id: Uuid,
        purchase_order_id: Option<Uuid>,
    },

    // Goods receipt
    GoodsReceiptPosted {
        goods_receipt_id: Uuid,
        purchase_order_id: Uuid,
    },

    // Cascade orchestrator
    SalesOrderConfirmed(Uuid),
    ProductionOrderTriggered {
        sales_order_id: Uuid,
        production_order_id: Uuid,
        item_id: Uuid,
        quantity_planned: Decimal,
    },
    ProductionOrderStarted(Uuid),
    RequisitionTriggered {
        production_order_id: Uuid,
        requisition_id: Uuid,
        line_count: usize,
        estimated_value: Decimal,
        routed_to_approval: bool,
    },
    StockReserved {
        item_id: Uuid,
        warehouse: String,
        quantity: Decimal,
        reference_type: String,
        reference_id: Uuid,
    },
}

/// Consumes events from the channel and writes them to the audit log. Runs
/// until the channel closes.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::InvoiceHeld {
                invoice_id,
                hold_reason,
                ..
            } => {
                warn!(invoice_id = %invoice_id, reason = %hold_reason, "invoice placed on hold");
            }
            Event::ApprovalRejected {
                document_type,
                document_id,
                role,
                ..
            } => {
                warn!(
                    document_type = %document_type,
                    document_id = %document_id,
                    role = %role,
                    "approval rejected"
                );
            }
            other => {
                info!(event = ?other, "event");
            }
        }
    }
    info!("event channel closed; audit sink stopped");
}
