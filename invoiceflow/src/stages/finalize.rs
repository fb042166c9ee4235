//! Reconciliation, approval, posting, notification and completion.

use async_trait::async_trait;
use serde_json::json;

use super::{response_field, Stage};
use crate::context::StageContext;
use crate::core::{StageId, StageResult};
use crate::errors::Result;
use crate::surfaces::ApprovalDecision;

fn normalized_vendor(ctx: &StageContext, fallback: &str) -> String {
    ctx.state
        .get("vendor_profile")
        .and_then(|p| p["normalized_name"].as_str())
        .map_or_else(|| fallback.to_string(), str::to_string)
}

fn vendor_risk(ctx: &StageContext) -> f64 {
    ctx.state
        .get("vendor_profile")
        .and_then(|p| p["risk_score"].as_f64())
        .or_else(|| ctx.state.get("flags").and_then(|f| f["risk_score"].as_f64()))
        .unwrap_or(0.0)
}

/// `RECONCILE`: builds balanced journal entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileStage;

#[async_trait]
impl Stage for ReconcileStage {
    fn id(&self) -> StageId {
        StageId::Reconcile
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageResult> {
        let invoice = ctx.invoice()?;
        let vendor = normalized_vendor(ctx, &invoice.vendor_name);
        let built = ctx
            .dispatch(
                "build_accounting_entries",
                None,
                json!({ "invoice": invoice, "vendor_name": vendor }),
            )
            .await?;
        let entries: Vec<serde_json::Value> =
            response_field(StageId::Reconcile, "build_accounting_entries", &built, "entries")?;
        let report = built["report"].clone();

        Ok(StageResult::new(StageId::Reconcile)
            .with_audit(
                "entries_built",
                json!({
                    "invoice_id": invoice.invoice_id,
                    "entries_count": entries.len(),
                    "balanced": report["balanced"],
                }),
            )
            .with_field("accounting_entries", json!(entries))
            .with_field("reconciliation_report", report))
    }
}

/// `APPROVE`: applies the approval policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproveStage;

#[async_trait]
impl Stage for ApproveStage {
    fn id(&self) -> StageId {
        StageId::Approve
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageResult> {
        let invoice = ctx.invoice()?;
        let risk_score = vendor_risk(ctx);
        let response = ctx
            .dispatch(
                "apply_policy",
                None,
                json!({ "amount": invoice.amount, "risk_score": risk_score }),
            )
            .await?;
        let decision: ApprovalDecision = serde_json::from_value(response).map_err(|e| {
            crate::errors::StageFailureError::new(StageId::Approve, format!("apply_policy returned {e}"))
        })?;

        Ok(StageResult::new(StageId::Approve)
            .with_audit(
                "approval_applied",
                json!({
                    "amount": invoice.amount,
                    "risk_score": risk_score,
                    "status": decision.status,
                    "approver_id": decision.approver_id,
                    "policy": decision.policy,
                }),
            )
            .with_field("approval_status", json!(decision.status))
            .with_field("approver_id", json!(decision.approver_id))
            .with_field("approval_policy", json!(decision.policy)))
    }
}

/// `POSTING`: posts the entries and schedules payment.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostingStage;

#[async_trait]
impl Stage for PostingStage {
    fn id(&self) -> StageId {
        StageId::Posting
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageResult> {
        let invoice = ctx.invoice()?;
        let entries: Vec<serde_json::Value> = ctx.require("accounting_entries")?;
        let erp = ctx.select("erp_connector");

        let posted = ctx
            .dispatch(
                "post_to_erp",
                Some(&erp),
                json!({ "invoice_id": invoice.invoice_id, "entries": entries }),
            )
            .await?;
        let erp_txn_id: String = response_field(StageId::Posting, "post_to_erp", &posted, "erp_txn_id")?;

        let payment = ctx
            .dispatch(
                "schedule_payment",
                Some(&erp),
                json!({ "amount": invoice.amount, "due_date": invoice.due_date }),
            )
            .await?;
        let payment_id: String =
            response_field(StageId::Posting, "schedule_payment", &payment, "payment_id")?;

        Ok(StageResult::new(StageId::Posting)
            .with_audit(
                "posted_to_erp",
                json!({
                    "erp_txn_id": erp_txn_id,
                    "scheduled_payment_id": payment_id,
                    "scheduled_date": payment["scheduled_date"],
                    "erp": erp.selected,
                }),
            )
            .with_field("posted", json!(posted["posted"].as_bool().unwrap_or(true)))
            .with_field("erp_txn_id", json!(erp_txn_id))
            .with_field("scheduled_payment_id", json!(payment_id))
            .with_selection(erp))
    }
}

/// Address the vendor notification goes to.
fn vendor_address(vendor_name: &str) -> String {
    let local = vendor_name
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(".")
        .to_lowercase();
    format!("{local}@example.com")
}

/// `NOTIFY`: tells the vendor and the finance team.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotifyStage;

#[async_trait]
impl Stage for NotifyStage {
    fn id(&self) -> StageId {
        StageId::Notify
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageResult> {
        let invoice = ctx.invoice()?;
        let email = ctx.select("email");
        let vendor = vendor_address(&normalized_vendor(ctx, &invoice.vendor_name));

        let vendor_mail = ctx
            .dispatch(
                "send_email",
                Some(&email),
                json!({
                    "to": [vendor],
                    "subject": format!("Invoice {} Approved", invoice.invoice_id),
                }),
            )
            .await?;
        let finance_mail = ctx
            .dispatch(
                "send_email",
                Some(&email),
                json!({
                    "to": ctx.config().finance_recipients,
                    "subject": format!("Invoice {} Posted", invoice.invoice_id),
                }),
            )
            .await?;

        let mut parties = vec![vendor];
        parties.extend(ctx.config().finance_recipients.iter().cloned());
        let status = json!({
            "vendor_notified": vendor_mail["sent"].as_bool().unwrap_or(false),
            "finance_notified": finance_mail["sent"].as_bool().unwrap_or(false),
            "provider": email.selected,
        });

        Ok(StageResult::new(StageId::Notify)
            .with_audit(
                "notifications_sent",
                json!({
                    "invoice_id": invoice.invoice_id,
                    "parties_count": parties.len(),
                    "email_tool": email.selected,
                }),
            )
            .with_field("notify_status", status)
            .with_field("notified_parties", json!(parties))
            .with_selection(email))
    }
}

/// `COMPLETE`: assembles and stores the final payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompleteStage;

#[async_trait]
impl Stage for CompleteStage {
    fn id(&self) -> StageId {
        StageId::Complete
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageResult> {
        let invoice = ctx.invoice()?;
        let db = ctx.select("db");
        let state = &ctx.state;

        let selected_tools: serde_json::Map<String, serde_json::Value> = state
            .tool_selections
            .iter()
            .chain(std::iter::once(&db))
            .map(|s| (s.capability.clone(), json!(s.selected)))
            .collect();
        let summary = json!({
            "invoice_id": invoice.invoice_id,
            "vendor": normalized_vendor(ctx, &invoice.vendor_name),
            "amount": invoice.amount,
            "currency": invoice.currency,
            "match_score": state.match_score(),
            "match_result": state.match_result(),
            "human_decision": state.human_decision(),
            "approval_status": state.get("approval_status"),
            "erp_txn_id": state.get("erp_txn_id"),
            "scheduled_payment_id": state.get("scheduled_payment_id"),
            "selected_tools": selected_tools,
            "audit_entries": state.audit_log.len() + 1,
        });

        let final_payload = ctx
            .dispatch("finalize_workflow", Some(&db), json!({ "summary": summary }))
            .await?;

        Ok(StageResult::new(StageId::Complete)
            .with_audit(
                "workflow_completed",
                json!({
                    "invoice_id": invoice.invoice_id,
                    "erp_txn_id": state.get("erp_txn_id"),
                    "db": db.selected,
                }),
            )
            .with_field("final_payload", final_payload)
            .with_selection(db))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::test_support::{run_through, services};
    use crate::surfaces::SimulatedExternalSurface;
    use crate::testing;
    use pretty_assertions::assert_eq;

    const HAPPY_PATH: [StageId; 10] = [
        StageId::Intake,
        StageId::Understand,
        StageId::Prepare,
        StageId::Retrieve,
        StageId::MatchTwoWay,
        StageId::Reconcile,
        StageId::Approve,
        StageId::Posting,
        StageId::Notify,
        StageId::Complete,
    ];

    #[test]
    fn test_vendor_address() {
        assert_eq!(vendor_address("ACME  SUPPLIES"), "acme.supplies@example.com");
    }

    #[tokio::test]
    async fn test_happy_path_outputs() {
        let external = SimulatedExternalSurface::new().with_purchase_order(testing::scenario_po());
        let state = run_through(&HAPPY_PATH, &services(external)).await;

        let entries = state.get("accounting_entries").unwrap().as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(state.get("reconciliation_report").unwrap()["balanced"], true);

        assert_eq!(state.get("approval_status").unwrap(), "APPROVED");
        assert_eq!(state.get("approver_id").unwrap(), "MGR-001");
        assert_eq!(state.get("approval_policy").unwrap(), "manager_approval");

        assert_eq!(state.get("posted").unwrap(), true);
        assert!(state.get("erp_txn_id").unwrap().as_str().unwrap().starts_with("ERP-TXN-"));
        assert!(state
            .get("scheduled_payment_id")
            .unwrap()
            .as_str()
            .unwrap()
            .starts_with("PAY-"));

        assert_eq!(state.get("notified_parties").unwrap().as_array().unwrap().len(), 3);

        let payload = state.get("final_payload").unwrap();
        assert_eq!(payload["status"], "COMPLETED");
        assert_eq!(payload["invoice_id"], "INV-2024-001");
        assert_eq!(payload["match_score"], 1.0);
        assert_eq!(payload["audit_entries"], 10);
        assert_eq!(state.audit_log.len(), 10);
    }
}
