//! Runs the two reference invoices through the engine.
//!
//! The first matches its purchase order and completes. The second is 10%
//! short and pauses for review; the demo accepts it and lets it finish.
//!
//! Configuration comes from `INVOICEFLOW_*` environment variables, or from
//! the JSON file given as the first argument.

use anyhow::{Context, Result};
use std::sync::Arc;

use invoiceflow::prelude::*;
use invoiceflow::testing;

#[tokio::main]
async fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::from_json_file(&path)
            .with_context(|| format!("loading config from {path}"))?,
        None => EngineConfig::from_env().context("reading INVOICEFLOW_* variables")?,
    };
    init_tracing(config.log_format);

    let engine = InvoiceEngine::builder()
        .with_config(config)
        .with_external_surface(Arc::new(testing::simulated_erp()))
        .build()
        .context("building engine")?;

    let recovered = engine.recover().await?;
    if !recovered.is_empty() {
        println!("recovered {} interrupted run(s)", recovered.len());
    }

    for invoice in [testing::scenario_a_invoice(), testing::scenario_b_invoice()] {
        let run = engine.process(&invoice).await?;
        println!(
            "{}: {} at {} (score {:?}, revision {})",
            invoice.invoice_id,
            run.status,
            run.current_stage,
            run.state.match_score(),
            run.revision
        );
    }

    for review in engine.list_pending_reviews()? {
        println!("review {}: {}", review.review_id, review.reason);
        let response = engine
            .resolve_decision(ResolveRequest::new(
                &review.checkpoint_id,
                Decision::Accept,
                "accepted by the demo",
                "demo-reviewer",
            ))
            .await?;
        println!("{}", serde_json::to_string_pretty(&response)?);

        let record = engine.run_record(response.run_id)?;
        if let Some(payload) = record.state.get("final_payload") {
            println!("{}", serde_json::to_string_pretty(payload)?);
        }
    }

    Ok(())
}
