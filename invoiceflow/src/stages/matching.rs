//! Purchase-order retrieval and the two-way match.

use async_trait::async_trait;
use serde_json::json;

use super::{response_field, Stage};
use crate::context::StageContext;
use crate::core::{StageId, StageResult};
use crate::document::PurchaseOrder;
use crate::errors::{Result, StageFailureError};
use crate::matching::MatchOutcome;

/// Rounds a score to four decimals before it enters the state bag.
#[must_use]
pub fn round_score(score: f64) -> f64 {
    (score * 10_000.0).round() / 10_000.0
}

/// `RETRIEVE`: fetches the referenced purchase orders and their receipts.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetrieveStage;

#[async_trait]
impl Stage for RetrieveStage {
    fn id(&self) -> StageId {
        StageId::Retrieve
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageResult> {
        let invoice = ctx.invoice()?;
        let po_number = ctx
            .state
            .get("parsed_invoice")
            .and_then(|p| p["detected_po_numbers"][0].as_str())
            .map_or_else(|| invoice.po_reference(), str::to_string);

        let erp = ctx.select("erp_connector");
        let fetched = ctx
            .dispatch("fetch_po", Some(&erp), json!({ "po_number": po_number }))
            .await?;
        let pos: Vec<PurchaseOrder> =
            response_field(StageId::Retrieve, "fetch_po", &fetched, "purchase_orders")?;

        let po_numbers: Vec<&str> = pos.iter().map(|po| po.po_number.as_str()).collect();
        let grns = if po_numbers.is_empty() {
            Vec::new()
        } else {
            let response = ctx
                .dispatch("fetch_grn", Some(&erp), json!({ "po_numbers": po_numbers }))
                .await?;
            response_field::<Vec<serde_json::Value>>(StageId::Retrieve, "fetch_grn", &response, "grns")?
        };

        if pos.is_empty() {
            tracing::warn!(run_id = %ctx.run_id, po_number = %po_number, "No purchase order found");
        }

        Ok(StageResult::new(StageId::Retrieve)
            .with_audit(
                "erp_data_fetched",
                json!({
                    "po_number": po_number,
                    "po_count": pos.len(),
                    "grn_count": grns.len(),
                    "erp": erp.selected,
                }),
            )
            .with_field("matched_pos", serde_json::to_value(&pos)?)
            .with_field("matched_grns", json!(grns))
            .with_selection(erp))
    }
}

/// `MATCH_TWO_WAY`: scores the invoice against the first matched PO.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchStage;

#[async_trait]
impl Stage for MatchStage {
    fn id(&self) -> StageId {
        StageId::MatchTwoWay
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageResult> {
        let invoice = ctx.invoice()?;
        let pos: Vec<PurchaseOrder> = ctx.require("matched_pos")?;
        let reference = pos.first();

        let response = ctx
            .dispatch(
                "match_engine",
                None,
                json!({ "invoice": invoice, "purchase_order": reference }),
            )
            .await?;
        let outcome: MatchOutcome = serde_json::from_value(response.clone()).map_err(|e| {
            StageFailureError::new(StageId::MatchTwoWay, format!("match_engine returned {e}"))
        })?;
        let tolerance_pct = response["tolerance_pct"].clone();
        let score = round_score(outcome.score);

        let mut evidence = outcome.evidence();
        evidence["po_number"] = json!(reference.map(|po| po.po_number.as_str()));
        evidence["invoice_amount"] = json!(invoice.amount);
        evidence["po_amount"] = json!(reference.map(|po| po.total_amount));

        tracing::info!(
            run_id = %ctx.run_id,
            score,
            verdict = %outcome.verdict,
            "Match computed"
        );

        Ok(StageResult::new(StageId::MatchTwoWay)
            .with_audit(
                "match_computed",
                json!({
                    "score": score,
                    "verdict": outcome.verdict,
                    "threshold": ctx.config().match_threshold,
                    "mismatched_fields": outcome.mismatched_fields,
                }),
            )
            .with_field("match_score", json!(score))
            .with_field("match_result", json!(outcome.verdict))
            .with_field("tolerance_pct", tolerance_pct)
            .with_field("match_evidence", evidence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StateBag;
    use crate::stages::test_support::{context, run_through, services};
    use crate::surfaces::SimulatedExternalSurface;
    use crate::testing;

    const UP_TO_MATCH: [StageId; 5] = [
        StageId::Intake,
        StageId::Understand,
        StageId::Prepare,
        StageId::Retrieve,
        StageId::MatchTwoWay,
    ];

    #[test]
    fn test_round_score() {
        assert_eq!(round_score(0.425_000_000_1), 0.425);
        assert_eq!(round_score(0.999_96), 1.0);
        assert_eq!(round_score(0.0), 0.0);
    }

    #[tokio::test]
    async fn test_exact_po_matches() {
        let external = SimulatedExternalSurface::new().with_purchase_order(testing::scenario_po());
        let state = run_through(&UP_TO_MATCH, &services(external)).await;

        assert_eq!(state.match_score(), Some(1.0));
        assert_eq!(state.match_result(), Some("MATCHED"));
        assert_eq!(state.get("tolerance_pct").unwrap(), &json!(5.0));
        assert_eq!(state.get("matched_grns").unwrap()[0]["grn_number"], "GRN-2024-001");
    }

    #[tokio::test]
    async fn test_missing_po_fails_with_zero() {
        let state = run_through(&UP_TO_MATCH, &services(SimulatedExternalSurface::new())).await;

        assert_eq!(state.get("matched_pos").unwrap(), &json!([]));
        assert_eq!(state.get("matched_grns").unwrap(), &json!([]));
        assert_eq!(state.match_score(), Some(0.0));
        assert_eq!(state.match_result(), Some("FAILED"));
    }

    #[tokio::test]
    async fn test_match_requires_retrieved_pos() {
        let services = services(SimulatedExternalSurface::new());
        let state = StateBag::with_invoice(&testing::scenario_a_invoice()).unwrap();
        let err = MatchStage
            .execute(&context(StageId::MatchTwoWay, state, &services))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "StageFailure");
        assert!(err.to_string().contains("matched_pos"));
    }
}
