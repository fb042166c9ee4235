//! Local handlers for operations with no outside-system dependency.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

use super::{BackendError, ExecutionSurface, OperationRequest};
use crate::core::StageId;
use crate::document::{InvoicePayload, PurchaseOrder};
use crate::matching::{self, MatchConfig};
use crate::routing::ExecutionTarget;

const VENDOR_SUFFIXES: &[&str] = &[" INC.", " INC", " LLC", " LTD.", " LTD", " CORP.", " CORP"];

/// Normalizes a vendor name: trimmed, uppercased, whitespace collapsed and
/// a trailing company suffix removed.
#[must_use]
pub fn normalize_vendor_name(name: &str) -> String {
    let collapsed = name
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase();
    let mut normalized = collapsed.trim_end_matches(',').to_string();
    for suffix in VENDOR_SUFFIXES {
        if let Some(stripped) = normalized.strip_suffix(suffix) {
            normalized = stripped.trim_end_matches(',').trim_end().to_string();
            break;
        }
    }
    normalized
}

/// Validation flags attached to the prepared invoice.
#[must_use]
pub fn compute_flags(invoice: &InvoicePayload, risk_score: f64, high_value_limit: f64) -> serde_json::Value {
    let mut missing_info = Vec::new();
    if invoice
        .vendor_tax_id
        .as_deref()
        .map_or(true, |id| id.trim().is_empty())
    {
        missing_info.push("vendor_tax_id");
    }
    if invoice.line_items.is_empty() {
        missing_info.push("line_items");
    }
    if invoice.attachments.is_empty() {
        missing_info.push("attachments");
    }

    json!({
        "missing_info": missing_info,
        "risk_score": risk_score,
        "high_value": invoice.amount > high_value_limit,
    })
}

/// Balanced journal entries for an invoice.
///
/// Entry ids derive from the invoice id so rebuilding them gives the same
/// result.
#[must_use]
pub fn build_accounting_entries(invoice: &InvoicePayload, vendor_name: &str) -> Vec<serde_json::Value> {
    let digest = Sha256::digest(invoice.invoice_id.as_bytes());
    let entry_id = hex::encode(&digest[..4]).to_uppercase();

    vec![
        json!({
            "entry_id": format!("JE-{entry_id}-01"),
            "type": "DEBIT",
            "account": "6000-Expenses",
            "amount": invoice.amount,
            "currency": invoice.currency,
            "reference": invoice.invoice_id,
            "description": format!("Expense for invoice {} - {vendor_name}", invoice.invoice_id),
        }),
        json!({
            "entry_id": format!("JE-{entry_id}-02"),
            "type": "CREDIT",
            "account": "2100-Accounts Payable",
            "amount": invoice.amount,
            "currency": invoice.currency,
            "reference": invoice.invoice_id,
            "description": format!("Payable to {vendor_name}"),
        }),
    ]
}

fn default_auto_approve_limit() -> f64 {
    10_000.0
}

fn default_manager_approve_limit() -> f64 {
    50_000.0
}

fn default_review_risk_threshold() -> f64 {
    0.5
}

/// Approval thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ApprovalPolicy {
    /// Amounts at or below this are approved by the system.
    #[serde(default = "default_auto_approve_limit")]
    pub auto_approve_limit: f64,
    /// Amounts at or below this need a manager.
    #[serde(default = "default_manager_approve_limit")]
    pub manager_approve_limit: f64,
    /// Vendor risk above this always goes to manager review.
    #[serde(default = "default_review_risk_threshold")]
    pub review_risk_threshold: f64,
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self {
            auto_approve_limit: default_auto_approve_limit(),
            manager_approve_limit: default_manager_approve_limit(),
            review_risk_threshold: default_review_risk_threshold(),
        }
    }
}

/// Outcome of [`ApprovalPolicy::decide`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    /// `AUTO_APPROVED`, `APPROVED` or `APPROVED_WITH_REVIEW`.
    pub status: String,
    /// Who approved.
    pub approver_id: String,
    /// Name of the rule that fired.
    pub policy: String,
}

impl ApprovalPolicy {
    /// Applies the policy. Risk is checked before amount.
    #[must_use]
    pub fn decide(&self, amount: f64, risk_score: f64) -> ApprovalDecision {
        let (status, approver, policy) = if risk_score > self.review_risk_threshold {
            ("APPROVED_WITH_REVIEW", "MANAGER-REVIEW", "high_risk_vendor")
        } else if amount <= self.auto_approve_limit {
            ("AUTO_APPROVED", "SYSTEM", "auto_approve")
        } else if amount <= self.manager_approve_limit {
            ("APPROVED", "MGR-001", "manager_approval")
        } else {
            ("APPROVED", "EXEC-001", "executive_approval")
        };
        ApprovalDecision {
            status: status.to_string(),
            approver_id: approver.to_string(),
            policy: policy.to_string(),
        }
    }
}

/// Deterministic local handlers.
#[derive(Debug, Clone, Default)]
pub struct InternalSurface {
    match_config: MatchConfig,
    policy: ApprovalPolicy,
}

impl InternalSurface {
    /// Creates a surface with the given matching and approval settings.
    #[must_use]
    pub fn new(match_config: MatchConfig, policy: ApprovalPolicy) -> Self {
        Self {
            match_config,
            policy,
        }
    }

    fn validate_schema(request: &OperationRequest) -> Result<serde_json::Value, BackendError> {
        let raw: serde_json::Value = request.param("invoice")?;
        let errors = match InvoicePayload::from_value(&raw, StageId::Intake)
            .and_then(|invoice| invoice.validate())
        {
            Ok(()) => Vec::new(),
            Err(err) => err.fields,
        };
        Ok(json!({ "valid": errors.is_empty(), "errors": errors }))
    }

    fn parse_line_items(request: &OperationRequest) -> Result<serde_json::Value, BackendError> {
        let invoice: InvoicePayload = request.param("invoice")?;
        Ok(json!({
            "invoice_id": invoice.invoice_id,
            "line_items": invoice.line_items,
            "line_count": invoice.line_items.len(),
            "detected_po_numbers": [invoice.po_reference()],
        }))
    }

    fn normalize_vendor(request: &OperationRequest) -> Result<serde_json::Value, BackendError> {
        let name: String = request.param("vendor_name")?;
        Ok(json!({ "normalized_name": normalize_vendor_name(&name) }))
    }

    fn compute_flags(&self, request: &OperationRequest) -> Result<serde_json::Value, BackendError> {
        let invoice: InvoicePayload = request.param("invoice")?;
        let risk: f64 = request.optional_param("risk_score")?.unwrap_or(0.0);
        Ok(compute_flags(&invoice, risk, self.policy.auto_approve_limit))
    }

    fn match_engine(&self, request: &OperationRequest) -> Result<serde_json::Value, BackendError> {
        let invoice: InvoicePayload = request.param("invoice")?;
        let reference: Option<PurchaseOrder> = request.optional_param("purchase_order")?;
        let outcome = matching::evaluate(
            &invoice.match_subject(),
            reference.map(|po| po.match_subject()).as_ref(),
            &self.match_config,
        );
        serde_json::to_value(&outcome)
            .map(|mut value| {
                value["tolerance_pct"] = json!(self.match_config.tolerance_pct);
                value["threshold"] = json!(self.match_config.threshold);
                value
            })
            .map_err(|e| BackendError::Permanent(e.to_string()))
    }

    fn build_entries(request: &OperationRequest) -> Result<serde_json::Value, BackendError> {
        let invoice: InvoicePayload = request.param("invoice")?;
        let vendor: String = request
            .optional_param("vendor_name")?
            .unwrap_or_else(|| invoice.vendor_name.clone());
        let entries = build_accounting_entries(&invoice, &vendor);
        let debits: f64 = entries
            .iter()
            .filter(|e| e["type"] == "DEBIT")
            .filter_map(|e| e["amount"].as_f64())
            .sum();
        let credits: f64 = entries
            .iter()
            .filter(|e| e["type"] == "CREDIT")
            .filter_map(|e| e["amount"].as_f64())
            .sum();
        Ok(json!({
            "entries": entries,
            "report": {
                "invoice_id": invoice.invoice_id,
                "vendor": vendor,
                "total_amount": invoice.amount,
                "currency": invoice.currency,
                "entries_count": entries.len(),
                "total_debits": debits,
                "total_credits": credits,
                "balanced": (debits - credits).abs() < 1e-9,
                "status": "RECONCILED",
            },
        }))
    }

    fn apply_policy(&self, request: &OperationRequest) -> Result<serde_json::Value, BackendError> {
        let amount: f64 = request.param("amount")?;
        let risk: f64 = request.optional_param("risk_score")?.unwrap_or(0.0);
        serde_json::to_value(self.policy.decide(amount, risk))
            .map_err(|e| BackendError::Permanent(e.to_string()))
    }

    fn finalize_workflow(request: &OperationRequest) -> Result<serde_json::Value, BackendError> {
        let mut summary: serde_json::Value = request.param("summary")?;
        summary["status"] = json!("COMPLETED");
        summary["stored_in"] = json!(request.backend_name());
        Ok(summary)
    }
}

#[async_trait]
impl ExecutionSurface for InternalSurface {
    fn target(&self) -> ExecutionTarget {
        ExecutionTarget::Internal
    }

    async fn invoke(&self, request: &OperationRequest) -> Result<serde_json::Value, BackendError> {
        match request.operation.as_str() {
            "validate_schema" => Self::validate_schema(request),
            "parse_line_items" => Self::parse_line_items(request),
            "normalize_vendor" => Self::normalize_vendor(request),
            "compute_flags" => self.compute_flags(request),
            "match_engine" => self.match_engine(request),
            "build_accounting_entries" => Self::build_entries(request),
            "apply_policy" => self.apply_policy(request),
            "finalize_workflow" => Self::finalize_workflow(request),
            other => Err(BackendError::Permanent(format!(
                "internal surface has no handler for '{other}'"
            ))),
        }
    }
}
