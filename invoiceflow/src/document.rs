//! Invoice and purchase-order documents.
//!
//! Full schema validation lives outside the executor; the checks here are
//! the minimum the pipeline needs to run safely.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::core::StageId;
use crate::errors::{FieldError, ValidationError};
use crate::matching::{MatchLine, MatchSubject};

fn currency_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Z]{3}$").expect("currency pattern is valid"))
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_po_status() -> String {
    "APPROVED".to_string()
}

/// A single invoice or purchase-order line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    /// Item description.
    #[serde(default)]
    pub desc: String,
    /// Quantity.
    pub qty: f64,
    /// Unit price.
    pub unit_price: f64,
    /// Line total.
    #[serde(default)]
    pub total: f64,
}

impl LineItem {
    /// Creates a line whose total is `qty * unit_price`.
    #[must_use]
    pub fn new(desc: impl Into<String>, qty: f64, unit_price: f64) -> Self {
        Self {
            desc: desc.into(),
            qty,
            unit_price,
            total: qty * unit_price,
        }
    }
}

/// A submitted invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoicePayload {
    /// Unique invoice identifier.
    pub invoice_id: String,
    /// Vendor name as printed on the invoice.
    pub vendor_name: String,
    /// Vendor tax identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_tax_id: Option<String>,
    /// Purchase order the invoice refers to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub po_number: Option<String>,
    /// Invoice date (ISO format).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice_date: Option<String>,
    /// Payment due date (ISO format).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    /// Invoice total.
    pub amount: f64,
    /// ISO currency code.
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Invoice lines.
    #[serde(default)]
    pub line_items: Vec<LineItem>,
    /// Attachment paths or URLs.
    #[serde(default)]
    pub attachments: Vec<String>,
}

impl InvoicePayload {
    /// Creates an invoice with the given lines and the minimum metadata.
    #[must_use]
    pub fn new(
        invoice_id: impl Into<String>,
        vendor_name: impl Into<String>,
        amount: f64,
        line_items: Vec<LineItem>,
    ) -> Self {
        Self {
            invoice_id: invoice_id.into(),
            vendor_name: vendor_name.into(),
            vendor_tax_id: None,
            po_number: None,
            invoice_date: None,
            due_date: None,
            amount,
            currency: default_currency(),
            line_items,
            attachments: Vec::new(),
        }
    }

    /// Sets the referenced purchase order.
    #[must_use]
    pub fn with_po_number(mut self, po_number: impl Into<String>) -> Self {
        self.po_number = Some(po_number.into());
        self
    }

    /// Sets the due date.
    #[must_use]
    pub fn with_due_date(mut self, due_date: impl Into<String>) -> Self {
        self.due_date = Some(due_date.into());
        self
    }

    /// Sets the vendor tax id.
    #[must_use]
    pub fn with_vendor_tax_id(mut self, tax_id: impl Into<String>) -> Self {
        self.vendor_tax_id = Some(tax_id.into());
        self
    }

    /// Parses a payload from a JSON value.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` attributed to `stage` when the value
    /// does not have the invoice shape.
    pub fn from_value(value: &serde_json::Value, stage: StageId) -> Result<Self, ValidationError> {
        serde_json::from_value(value.clone())
            .map_err(|e| ValidationError::single(stage, "invoice_payload", e.to_string()))
    }

    /// The purchase order this invoice refers to.
    ///
    /// Falls back to `PO-<invoice number>` when the invoice carries no
    /// explicit reference.
    #[must_use]
    pub fn po_reference(&self) -> String {
        self.po_number.clone().unwrap_or_else(|| {
            let suffix = self
                .invoice_id
                .strip_prefix("INV-")
                .unwrap_or(&self.invoice_id);
            format!("PO-{suffix}")
        })
    }

    /// Validates the payload.
    ///
    /// # Errors
    ///
    /// Returns every field problem found, attributed to the `INTAKE` stage.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = Vec::new();

        if self.invoice_id.trim().is_empty() {
            errors.push(FieldError::new("invoice_id", "must not be empty"));
        }
        if self.vendor_name.trim().is_empty() {
            errors.push(FieldError::new("vendor_name", "must not be empty"));
        }
        if !self.amount.is_finite() || self.amount <= 0.0 {
            errors.push(FieldError::new("amount", "must be greater than 0"));
        }
        if !currency_pattern().is_match(&self.currency) {
            errors.push(FieldError::new("currency", "must be a 3-letter ISO code"));
        }
        if self.line_items.is_empty() {
            errors.push(FieldError::new("line_items", "must contain at least one line"));
        }
        for (i, line) in self.line_items.iter().enumerate() {
            if !line.qty.is_finite() || line.qty <= 0.0 {
                errors.push(FieldError::new(
                    format!("line_items[{i}].qty"),
                    "must be greater than 0",
                ));
            }
            if !line.unit_price.is_finite() || line.unit_price < 0.0 {
                errors.push(FieldError::new(
                    format!("line_items[{i}].unit_price"),
                    "must not be negative",
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::new(StageId::Intake, errors))
        }
    }

    /// The shape the matching engine compares.
    #[must_use]
    pub fn match_subject(&self) -> MatchSubject {
        MatchSubject::new(self.amount, lines_of(&self.line_items))
            .with_party(&self.vendor_name, &self.currency)
    }
}

/// A purchase order retrieved from the ERP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseOrder {
    /// PO number.
    pub po_number: String,
    /// Vendor name on the PO.
    #[serde(default)]
    pub vendor_name: String,
    /// PO total.
    pub total_amount: f64,
    /// ISO currency code.
    #[serde(default = "default_currency")]
    pub currency: String,
    /// PO status in the ERP.
    #[serde(default = "default_po_status")]
    pub status: String,
    /// PO lines.
    #[serde(default)]
    pub line_items: Vec<LineItem>,
}

impl PurchaseOrder {
    /// Creates an approved purchase order.
    #[must_use]
    pub fn new(
        po_number: impl Into<String>,
        vendor_name: impl Into<String>,
        total_amount: f64,
        line_items: Vec<LineItem>,
    ) -> Self {
        Self {
            po_number: po_number.into(),
            vendor_name: vendor_name.into(),
            total_amount,
            currency: default_currency(),
            status: default_po_status(),
            line_items,
        }
    }

    /// The shape the matching engine compares.
    #[must_use]
    pub fn match_subject(&self) -> MatchSubject {
        MatchSubject::new(self.total_amount, lines_of(&self.line_items))
            .with_party(&self.vendor_name, &self.currency)
    }

    /// Goods receipt number derived from the PO number.
    #[must_use]
    pub fn grn_number(&self) -> String {
        let suffix = self
            .po_number
            .strip_prefix("PO-")
            .unwrap_or(&self.po_number);
        format!("GRN-{suffix}")
    }
}

fn lines_of(items: &[LineItem]) -> Vec<MatchLine> {
    items
        .iter()
        .map(|l| MatchLine::new(l.qty, l.unit_price))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_invoice() -> InvoicePayload {
        InvoicePayload::new(
            "INV-2024-001",
            "Acme Corp",
            15_000.0,
            vec![
                LineItem::new("Software License", 5.0, 1000.0),
                LineItem::new("Support Package", 1.0, 10_000.0),
            ],
        )
    }

    #[test]
    fn test_valid_invoice_passes() {
        assert!(valid_invoice().validate().is_ok());
    }

    #[test]
    fn test_invalid_invoice_reports_every_field() {
        let mut invoice = valid_invoice();
        invoice.amount = 0.0;
        invoice.currency = "usd".into();
        invoice.line_items[1].qty = -1.0;

        let err = invoice.validate().unwrap_err();
        let fields: Vec<_> = err.fields.iter().map(|f| f.field.as_str()).collect();
        assert_eq!(fields, vec!["amount", "currency", "line_items[1].qty"]);
        assert_eq!(err.stage, StageId::Intake);
    }

    #[test]
    fn test_empty_lines_rejected() {
        let mut invoice = valid_invoice();
        invoice.line_items.clear();
        assert!(invoice.validate().is_err());
    }

    #[test]
    fn test_po_reference_fallback() {
        assert_eq!(valid_invoice().po_reference(), "PO-2024-001");
        assert_eq!(
            valid_invoice().with_po_number("PO-77").po_reference(),
            "PO-77"
        );
    }

    #[test]
    fn test_from_value_rejects_wrong_shape() {
        let err = InvoicePayload::from_value(&serde_json::json!({"amount": "lots"}), StageId::Intake)
            .unwrap_err();
        assert_eq!(err.fields[0].field, "invoice_payload");
    }

    #[test]
    fn test_grn_number() {
        let po = PurchaseOrder::new("PO-2024-001", "Acme", 1.0, vec![]);
        assert_eq!(po.grn_number(), "GRN-2024-001");
    }
}
