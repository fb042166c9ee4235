//! In-process stand-in for the ERP, storage, OCR, enrichment and email
//! systems.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use serde_json::json;
use uuid::Uuid;

use super::{BackendError, ExecutionSurface, OperationRequest};
use crate::document::{InvoicePayload, PurchaseOrder};
use crate::routing::ExecutionTarget;

/// Default vendor risk when no override is registered.
pub const DEFAULT_VENDOR_RISK: f64 = 0.15;

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..10].to_uppercase()
}

/// Simulated external systems.
///
/// Holds a purchase-order directory and supports failure injection so the
/// retry and failure paths can be exercised.
#[derive(Debug, Default)]
pub struct SimulatedExternalSurface {
    purchase_orders: DashMap<String, PurchaseOrder>,
    vendor_risk: DashMap<String, f64>,
    transient_failures: DashMap<String, usize>,
    permanent_failures: DashSet<String>,
}

impl SimulatedExternalSurface {
    /// Creates an empty surface.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a purchase order, returning the surface for setup code.
    #[must_use]
    pub fn with_purchase_order(self, po: PurchaseOrder) -> Self {
        self.add_purchase_order(po);
        self
    }

    /// Registers a purchase order.
    pub fn add_purchase_order(&self, po: PurchaseOrder) {
        self.purchase_orders.insert(po.po_number.clone(), po);
    }

    /// Overrides the risk score returned for a normalized vendor name.
    #[must_use]
    pub fn with_vendor_risk(self, normalized_name: impl Into<String>, risk: f64) -> Self {
        self.vendor_risk.insert(normalized_name.into(), risk);
        self
    }

    /// Makes the next `times` calls of `operation` fail transiently.
    pub fn fail_transiently(&self, operation: impl Into<String>, times: usize) {
        self.transient_failures.insert(operation.into(), times);
    }

    /// Makes every call of `operation` fail permanently.
    pub fn fail_permanently(&self, operation: impl Into<String>) {
        self.permanent_failures.insert(operation.into());
    }

    fn injected_failure(&self, operation: &str) -> Option<BackendError> {
        if self.permanent_failures.contains(operation) {
            return Some(BackendError::Permanent(format!("{operation} rejected the request")));
        }
        let mut remaining = self.transient_failures.get_mut(operation)?;
        if *remaining == 0 {
            return None;
        }
        *remaining -= 1;
        Some(BackendError::Transient(format!("{operation} timed out")))
    }

    fn persist_raw(request: &OperationRequest) -> Result<serde_json::Value, BackendError> {
        let invoice_id: String = request.param("invoice_id")?;
        let backend = request.backend_name();
        Ok(json!({
            "raw_id": format!("raw-{}", Uuid::new_v4()),
            "uri": format!("{backend}://invoices/{invoice_id}"),
            "placeholder": request.is_placeholder(),
        }))
    }

    fn ocr_extract(request: &OperationRequest) -> Result<serde_json::Value, BackendError> {
        let invoice: InvoicePayload = request.param("invoice")?;
        let text = invoice
            .line_items
            .iter()
            .map(|l| format!("{} x{} @ {}", l.desc, l.qty, l.unit_price))
            .collect::<Vec<_>>()
            .join("\n");
        let confidence = if request.is_placeholder() { 0.0 } else { 0.98 };
        Ok(json!({
            "text": format!("INVOICE {}\n{}\n{text}", invoice.invoice_id, invoice.vendor_name),
            "confidence": confidence,
            "engine": request.backend_name(),
        }))
    }

    fn enrich_vendor(&self, request: &OperationRequest) -> Result<serde_json::Value, BackendError> {
        let name: String = request.param("normalized_name")?;
        let tax_id: Option<String> = request.optional_param("vendor_tax_id")?;
        let risk = self
            .vendor_risk
            .get(&name)
            .map_or(DEFAULT_VENDOR_RISK, |r| *r);
        Ok(json!({
            "normalized_name": name,
            "tax_id": tax_id,
            "risk_score": risk,
            "source": request.backend_name(),
            "placeholder": request.is_placeholder(),
        }))
    }

    fn fetch_po(&self, request: &OperationRequest) -> Result<serde_json::Value, BackendError> {
        let po_number: String = request.param("po_number")?;
        let found: Vec<PurchaseOrder> = self
            .purchase_orders
            .get(&po_number)
            .map(|po| vec![po.clone()])
            .unwrap_or_default();
        Ok(json!({ "purchase_orders": found }))
    }

    fn fetch_grn(&self, request: &OperationRequest) -> Result<serde_json::Value, BackendError> {
        let po_numbers: Vec<String> = request.param("po_numbers")?;
        let grns: Vec<serde_json::Value> = po_numbers
            .iter()
            .filter_map(|n| self.purchase_orders.get(n))
            .map(|po| {
                json!({
                    "grn_number": po.grn_number(),
                    "po_number": po.po_number,
                    "status": "RECEIVED",
                })
            })
            .collect();
        Ok(json!({ "grns": grns }))
    }

    fn create_checkpoint(request: &OperationRequest) -> Result<serde_json::Value, BackendError> {
        Ok(json!({
            "checkpoint_id": format!("ckpt-{}", Uuid::new_v4()),
            "review_id": format!("review-{}", Uuid::new_v4()),
            "review_url": format!("/reviews/{}", request.run_id),
            "store": request.backend_name(),
        }))
    }

    fn post_to_erp(request: &OperationRequest) -> Result<serde_json::Value, BackendError> {
        let entries: Vec<serde_json::Value> = request.param("entries")?;
        if entries.is_empty() {
            return Err(BackendError::Permanent("no entries to post".to_string()));
        }
        Ok(json!({
            "posted": true,
            "erp_txn_id": format!("ERP-TXN-{}", short_id()),
            "entries_posted": entries.len(),
            "erp": request.backend_name(),
        }))
    }

    fn schedule_payment(request: &OperationRequest) -> Result<serde_json::Value, BackendError> {
        let amount: f64 = request.param("amount")?;
        let due_date: Option<String> = request.optional_param("due_date")?;
        Ok(json!({
            "payment_id": format!("PAY-{}", &short_id()[..8]),
            "amount": amount,
            "scheduled_date": due_date,
        }))
    }

    fn send_email(request: &OperationRequest) -> Result<serde_json::Value, BackendError> {
        let to: Vec<String> = request.param("to")?;
        let subject: String = request.param("subject")?;
        Ok(json!({
            "sent": true,
            "recipients": to,
            "subject": subject,
            "message_id": format!("MSG-{}", short_id()),
            "provider": request.backend_name(),
        }))
    }
}

#[async_trait]
impl ExecutionSurface for SimulatedExternalSurface {
    fn target(&self) -> ExecutionTarget {
        ExecutionTarget::External
    }

    async fn invoke(&self, request: &OperationRequest) -> Result<serde_json::Value, BackendError> {
        if let Some(err) = self.injected_failure(&request.operation) {
            return Err(err);
        }
        match request.operation.as_str() {
            "persist_raw" => Self::persist_raw(request),
            "ocr_extract" => Self::ocr_extract(request),
            "enrich_vendor" => self.enrich_vendor(request),
            "fetch_po" => self.fetch_po(request),
            "fetch_grn" => self.fetch_grn(request),
            "create_checkpoint" => Self::create_checkpoint(request),
            "post_to_erp" => Self::post_to_erp(request),
            "schedule_payment" => Self::schedule_payment(request),
            "send_email" => Self::send_email(request),
            other => Err(BackendError::Permanent(format!(
                "external surface has no handler for '{other}'"
            ))),
        }
    }
}
