//! Intake, text extraction and preparation.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use super::{response_field, Stage};
use crate::context::{StageContext, INVOICE_KEY};
use crate::core::{StageId, StageResult};
use crate::errors::{FieldError, Result, ValidationError};

/// `INTAKE`: validates the payload and stores the raw document.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntakeStage;

#[async_trait]
impl Stage for IntakeStage {
    fn id(&self) -> StageId {
        StageId::Intake
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageResult> {
        let raw = ctx
            .state
            .get(INVOICE_KEY)
            .cloned()
            .ok_or_else(|| ValidationError::single(StageId::Intake, INVOICE_KEY, "missing"))?;

        let check = ctx
            .dispatch("validate_schema", None, json!({ "invoice": raw }))
            .await?;
        if !check["valid"].as_bool().unwrap_or(false) {
            let mut fields: Vec<FieldError> =
                serde_json::from_value(check["errors"].clone()).unwrap_or_default();
            if fields.is_empty() {
                fields.push(FieldError::new(INVOICE_KEY, "failed schema validation"));
            }
            return Err(ValidationError::new(StageId::Intake, fields).into());
        }

        let invoice = ctx.invoice()?;
        let storage = ctx.select("storage");
        let stored = ctx
            .dispatch(
                "persist_raw",
                Some(&storage),
                json!({ "invoice_id": invoice.invoice_id }),
            )
            .await?;
        let raw_id: String = response_field(StageId::Intake, "persist_raw", &stored, "raw_id")?;

        Ok(StageResult::new(StageId::Intake)
            .with_field("raw_id", json!(raw_id))
            .with_field("ingest_ts", json!(Utc::now().to_rfc3339()))
            .with_field("validated", json!(true))
            .with_audit(
                "invoice_ingested",
                json!({
                    "invoice_id": invoice.invoice_id,
                    "vendor_name": invoice.vendor_name,
                    "amount": invoice.amount,
                    "raw_id": raw_id,
                    "uri": stored["uri"],
                    "storage": storage.selected,
                }),
            )
            .with_selection(storage))
    }
}

/// `UNDERSTAND`: extracts text and parses line items.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnderstandStage;

#[async_trait]
impl Stage for UnderstandStage {
    fn id(&self) -> StageId {
        StageId::Understand
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageResult> {
        let invoice = ctx.invoice()?;
        let ocr = ctx.select("ocr");
        let extracted = ctx
            .dispatch("ocr_extract", Some(&ocr), json!({ "invoice": invoice }))
            .await?;
        let mut parsed = ctx
            .dispatch("parse_line_items", None, json!({ "invoice": invoice }))
            .await?;

        let text_length = extracted["text"].as_str().map_or(0, str::len);
        parsed["ocr_confidence"] = extracted["confidence"].clone();
        parsed["ocr_engine"] = json!(ocr.selected);
        parsed["text_length"] = json!(text_length);

        Ok(StageResult::new(StageId::Understand)
            .with_audit(
                "invoice_parsed",
                json!({
                    "invoice_id": invoice.invoice_id,
                    "line_count": parsed["line_count"],
                    "detected_po_numbers": parsed["detected_po_numbers"],
                    "ocr_engine": ocr.selected,
                    "placeholder": ocr.placeholder,
                }),
            )
            .with_field("parsed_invoice", parsed)
            .with_selection(ocr))
    }
}

/// `PREPARE`: vendor normalization, enrichment and flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrepareStage;

#[async_trait]
impl Stage for PrepareStage {
    fn id(&self) -> StageId {
        StageId::Prepare
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageResult> {
        let invoice = ctx.invoice()?;

        let normalized = ctx
            .dispatch(
                "normalize_vendor",
                None,
                json!({ "vendor_name": invoice.vendor_name }),
            )
            .await?;
        let normalized_name: String =
            response_field(StageId::Prepare, "normalize_vendor", &normalized, "normalized_name")?;

        let enrichment = ctx.select("enrichment");
        let profile = ctx
            .dispatch(
                "enrich_vendor",
                Some(&enrichment),
                json!({
                    "normalized_name": normalized_name,
                    "vendor_tax_id": invoice.vendor_tax_id,
                }),
            )
            .await?;
        let risk_score: f64 = response_field(StageId::Prepare, "enrich_vendor", &profile, "risk_score")?;

        let flags = ctx
            .dispatch(
                "compute_flags",
                None,
                json!({ "invoice": invoice, "risk_score": risk_score }),
            )
            .await?;

        let mut normalized_invoice = serde_json::to_value(&invoice)?;
        normalized_invoice["vendor_name"] = json!(normalized_name);
        normalized_invoice["original_vendor_name"] = json!(invoice.vendor_name);

        Ok(StageResult::new(StageId::Prepare)
            .with_audit(
                "vendor_prepared",
                json!({
                    "original_name": invoice.vendor_name,
                    "normalized_name": normalized_name,
                    "risk_score": risk_score,
                    "enrichment": enrichment.selected,
                    "missing_info": flags["missing_info"],
                }),
            )
            .with_field("vendor_profile", profile)
            .with_field("normalized_invoice", normalized_invoice)
            .with_field("flags", flags)
            .with_selection(enrichment))
    }
}
