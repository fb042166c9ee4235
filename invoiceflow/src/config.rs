//! Engine configuration.
//!
//! Defaults match the production settings: threshold 0.90, 5% amount
//! tolerance, approval limits of 10,000 and 50,000.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::errors::{InvoiceflowError, Result};
use crate::matching::{AmountDegradation, MatchConfig};
use crate::observability::LogFormat;
use crate::pipeline::retry::RetryConfig;
use crate::surfaces::ApprovalPolicy;

/// Environment variable overriding the match threshold.
pub const ENV_MATCH_THRESHOLD: &str = "INVOICEFLOW_MATCH_THRESHOLD";
/// Environment variable overriding the amount tolerance.
pub const ENV_TOLERANCE_PCT: &str = "INVOICEFLOW_TOLERANCE_PCT";
/// Environment variable naming the SQLite database.
pub const ENV_DATABASE_URL: &str = "INVOICEFLOW_DATABASE_URL";
/// Environment variable selecting the log format.
pub const ENV_LOG_FORMAT: &str = "INVOICEFLOW_LOG_FORMAT";

fn default_match_threshold() -> f64 {
    0.90
}

fn default_tolerance_pct() -> f64 {
    5.0
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

fn default_finance_recipients() -> Vec<String> {
    vec![
        "finance@company.com".to_string(),
        "accounts.payable@company.com".to_string(),
    ]
}

/// Configuration for an [`InvoiceEngine`](crate::engine::InvoiceEngine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Minimum match score that avoids human review.
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f64,
    /// Amount tolerance in percent.
    #[serde(default = "default_tolerance_pct")]
    pub tolerance_pct: f64,
    /// Amount sub-score curve beyond the tolerance.
    #[serde(default)]
    pub amount_degradation: AmountDegradation,
    /// Invoices at or below this amount are auto-approved.
    #[serde(default = "default_auto_approve_limit")]
    pub auto_approve_limit: f64,
    /// Invoices at or below this amount need manager approval.
    #[serde(default = "default_manager_approve_limit")]
    pub manager_approve_limit: f64,
    /// Vendor risk above this forces manager review.
    #[serde(default = "default_review_risk_threshold")]
    pub review_risk_threshold: f64,
    /// Finance team addresses notified after posting.
    #[serde(default = "default_finance_recipients")]
    pub finance_recipients: Vec<String>,
    /// Retry policy for routed operations.
    #[serde(default)]
    pub retry: RetryConfig,
    /// SQLite database path; in-memory store when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            match_threshold: default_match_threshold(),
            tolerance_pct: default_tolerance_pct(),
            amount_degradation: AmountDegradation::default(),
            auto_approve_limit: default_auto_approve_limit(),
            manager_approve_limit: default_manager_approve_limit(),
            review_risk_threshold: default_review_risk_threshold(),
            finance_recipients: default_finance_recipients(),
            retry: RetryConfig::default(),
            database_url: None,
            log_format: LogFormat::default(),
        }
    }
}

impl EngineConfig {
    /// Creates the default config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the match threshold.
    #[must_use]
    pub fn with_match_threshold(mut self, threshold: f64) -> Self {
        self.match_threshold = threshold;
        self
    }

    /// Sets the amount tolerance.
    #[must_use]
    pub fn with_tolerance_pct(mut self, tolerance_pct: f64) -> Self {
        self.tolerance_pct = tolerance_pct;
        self
    }

    /// Sets the degradation curve.
    #[must_use]
    pub fn with_amount_degradation(mut self, degradation: AmountDegradation) -> Self {
        self.amount_degradation = degradation;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the database path.
    #[must_use]
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    /// Matching parameters derived from this config.
    #[must_use]
    pub fn match_config(&self) -> MatchConfig {
        MatchConfig::new()
            .with_threshold(self.match_threshold)
            .with_tolerance_pct(self.tolerance_pct)
            .with_degradation(self.amount_degradation)
    }

    /// Approval policy derived from this config.
    #[must_use]
    pub fn approval_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy {
            auto_approve_limit: self.auto_approve_limit,
            manager_approve_limit: self.manager_approve_limit,
            review_risk_threshold: self.review_risk_threshold,
        }
    }

    /// Checks the config for values the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns `InvoiceflowError::Config` describing the first problem.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.match_threshold) {
            return Err(InvoiceflowError::Config(format!(
                "match_threshold must be within [0, 1], got {}",
                self.match_threshold
            )));
        }
        if !self.tolerance_pct.is_finite() || self.tolerance_pct < 0.0 {
            return Err(InvoiceflowError::Config(format!(
                "tolerance_pct must not be negative, got {}",
                self.tolerance_pct
            )));
        }
        if let AmountDegradation::Linear { cutoff_multiplier } = self.amount_degradation {
            if cutoff_multiplier < 1.0 {
                return Err(InvoiceflowError::Config(format!(
                    "cutoff_multiplier must be at least 1, got {cutoff_multiplier}"
                )));
            }
        }
        if self.manager_approve_limit < self.auto_approve_limit {
            return Err(InvoiceflowError::Config(
                "manager_approve_limit must not be below auto_approve_limit".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(InvoiceflowError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Loads a JSON config file. A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns `InvoiceflowError::Config` if the file cannot be read or
    /// parsed, or fails validation.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::warn!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| InvoiceflowError::Config(format!("{}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| InvoiceflowError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Builds a config from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `InvoiceflowError::Config` if a variable cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::default().apply_env(|key| std::env::var(key).ok())
    }

    /// Applies environment-style overrides from `lookup`.
    ///
    /// # Errors
    ///
    /// Returns `InvoiceflowError::Config` if a value cannot be parsed or the
    /// result fails validation.
    pub fn apply_env<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_MATCH_THRESHOLD) {
            self.match_threshold = parse_env(ENV_MATCH_THRESHOLD, &raw)?;
        }
        if let Some(raw) = lookup(ENV_TOLERANCE_PCT) {
            self.tolerance_pct = parse_env(ENV_TOLERANCE_PCT, &raw)?;
        }
        if let Some(raw) = lookup(ENV_DATABASE_URL) {
            if !raw.trim().is_empty() {
                self.database_url = Some(raw);
            }
        }
        if let Some(raw) = lookup(ENV_LOG_FORMAT) {
            self.log_format = raw
                .parse()
                .map_err(|e: String| InvoiceflowError::Config(format!("{ENV_LOG_FORMAT}: {e}")))?;
        }
        self.validate()?;
        Ok(self)
    }
}

fn parse_env(key: &str, raw: &str) -> Result<f64> {
    raw.trim()
        .parse::<f64>()
        .map_err(|e| InvoiceflowError::Config(format!("{key}: {e}")))
}
