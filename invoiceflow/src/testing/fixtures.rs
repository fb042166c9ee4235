//! Scenario documents.

use crate::document::{InvoicePayload, LineItem, PurchaseOrder};
use crate::surfaces::SimulatedExternalSurface;

/// PO number shared by the scenario documents.
pub const SCENARIO_PO_NUMBER: &str = "PO-2024-001";

const VENDOR: &str = "Acme Supplies Inc.";

/// The purchase order: 100 widgets and 50 gadgets at 100.00, total 15,000.
#[must_use]
pub fn scenario_po() -> PurchaseOrder {
    PurchaseOrder::new(
        SCENARIO_PO_NUMBER,
        VENDOR,
        15_000.0,
        vec![
            LineItem::new("Widget", 100.0, 100.0),
            LineItem::new("Gadget", 50.0, 100.0),
        ],
    )
}

/// An invoice that matches [`scenario_po`] exactly.
#[must_use]
pub fn scenario_a_invoice() -> InvoicePayload {
    InvoicePayload::new(
        "INV-2024-001",
        VENDOR,
        15_000.0,
        vec![
            LineItem::new("Widget", 100.0, 100.0),
            LineItem::new("Gadget", 50.0, 100.0),
        ],
    )
    .with_po_number(SCENARIO_PO_NUMBER)
    .with_due_date("2024-12-31")
}

/// An invoice 10% under the PO total with one short-shipped line.
///
/// Scores 0.425 against [`scenario_po`] with the default settings.
#[must_use]
pub fn scenario_b_invoice() -> InvoicePayload {
    InvoicePayload::new(
        "INV-2024-002",
        VENDOR,
        13_500.0,
        vec![
            LineItem::new("Widget", 100.0, 100.0),
            LineItem::new("Gadget", 35.0, 100.0),
        ],
    )
    .with_po_number(SCENARIO_PO_NUMBER)
    .with_due_date("2024-12-31")
}

/// Simulated external systems that know [`scenario_po`].
#[must_use]
pub fn simulated_erp() -> SimulatedExternalSurface {
    SimulatedExternalSurface::new().with_purchase_order(scenario_po())
}
