//! Two-way matching between an invoice and its purchase order.
//!
//! The score is a weighted sum of three sub-scores:
//!
//! ```text
//! score = 0.40 * amount + 0.35 * quantity + 0.25 * price
//! ```
//!
//! `evaluate` is total: every input, including a missing or empty
//! reference, produces an outcome.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Values closer than this compare equal.
const EPSILON: f64 = 1e-9;

/// Weight of the amount sub-score.
pub const AMOUNT_WEIGHT: f64 = 0.40;
/// Weight of the quantity sub-score.
pub const QUANTITY_WEIGHT: f64 = 0.35;
/// Weight of the unit-price sub-score.
pub const PRICE_WEIGHT: f64 = 0.25;

/// How the amount sub-score falls off beyond the tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AmountDegradation {
    /// 1.0 within tolerance, 0.0 at `tolerance * cutoff_multiplier`, linear in between.
    Linear {
        /// Multiple of the tolerance at which the score reaches zero.
        cutoff_multiplier: f64,
    },
    /// 1.0 within tolerance, 0.0 outside.
    Step,
}

impl Default for AmountDegradation {
    fn default() -> Self {
        Self::Linear {
            cutoff_multiplier: 2.0,
        }
    }
}

impl AmountDegradation {
    /// Score for a relative difference `diff_pct`, given `tolerance_pct`.
    fn score(self, diff_pct: f64, tolerance_pct: f64) -> f64 {
        if diff_pct <= tolerance_pct + EPSILON {
            return 1.0;
        }
        match self {
            Self::Step => 0.0,
            Self::Linear { cutoff_multiplier } => {
                let cutoff = tolerance_pct * cutoff_multiplier;
                if cutoff <= tolerance_pct || diff_pct >= cutoff {
                    0.0
                } else {
                    ((cutoff - diff_pct) / (cutoff - tolerance_pct)).clamp(0.0, 1.0)
                }
            }
        }
    }
}

fn default_threshold() -> f64 {
    0.90
}

fn default_tolerance_pct() -> f64 {
    5.0
}

/// Matching parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchConfig {
    /// Minimum score for a `MATCHED` verdict.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// Amount tolerance, in percent of the PO total.
    #[serde(default = "default_tolerance_pct")]
    pub tolerance_pct: f64,
    /// Degradation curve beyond the tolerance.
    #[serde(default)]
    pub degradation: AmountDegradation,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            tolerance_pct: default_tolerance_pct(),
            degradation: AmountDegradation::default(),
        }
    }
}

impl MatchConfig {
    /// Creates the default config (threshold 0.90, tolerance 5%).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the threshold.
    #[must_use]
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Sets the tolerance percentage.
    #[must_use]
    pub fn with_tolerance_pct(mut self, tolerance_pct: f64) -> Self {
        self.tolerance_pct = tolerance_pct;
        self
    }

    /// Sets the degradation curve.
    #[must_use]
    pub fn with_degradation(mut self, degradation: AmountDegradation) -> Self {
        self.degradation = degradation;
        self
    }
}

/// One line as the matcher sees it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchLine {
    /// Quantity.
    pub qty: f64,
    /// Unit price.
    pub unit_price: f64,
}

impl MatchLine {
    /// Creates a line.
    #[must_use]
    pub fn new(qty: f64, unit_price: f64) -> Self {
        Self { qty, unit_price }
    }
}

/// A document total plus its lines.
///
/// Vendor and currency are compared for evidence only; they do not affect
/// the score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchSubject {
    /// Document total.
    pub total: f64,
    /// Lines, in document order.
    pub lines: Vec<MatchLine>,
    /// Vendor name as printed on the document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    /// ISO currency code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

impl MatchSubject {
    /// Creates a subject.
    #[must_use]
    pub fn new(total: f64, lines: Vec<MatchLine>) -> Self {
        Self {
            total,
            lines,
            vendor: None,
            currency: None,
        }
    }

    /// Sets the vendor and currency.
    #[must_use]
    pub fn with_party(mut self, vendor: impl Into<String>, currency: impl Into<String>) -> Self {
        self.vendor = Some(vendor.into());
        self.currency = Some(currency.into());
        self
    }
}

/// Vendor names agree when one contains the other, ignoring case. `None`
/// when either side is blank.
fn vendors_agree(invoice: &MatchSubject, reference: &MatchSubject) -> Option<bool> {
    let normalize = |v: &Option<String>| {
        v.as_deref()
            .map(|name| name.trim().to_uppercase())
            .filter(|name| !name.is_empty())
    };
    let (a, b) = (normalize(&invoice.vendor)?, normalize(&reference.vendor)?);
    Some(a.contains(&b) || b.contains(&a))
}

fn currencies_agree(invoice: &MatchSubject, reference: &MatchSubject) -> Option<bool> {
    let (a, b) = (invoice.currency.as_deref()?, reference.currency.as_deref()?);
    Some(a.trim().eq_ignore_ascii_case(b.trim()))
}

/// Pass/fail verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    /// Score at or above the threshold.
    Matched,
    /// Score below the threshold, or no usable reference.
    Failed,
}

impl Verdict {
    /// Returns the wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Matched => "MATCHED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchOutcome {
    /// Weighted score in [0, 1].
    pub score: f64,
    /// Verdict against the threshold.
    pub verdict: Verdict,
    /// Amount sub-score.
    pub amount_score: f64,
    /// Quantity sub-score.
    pub quantity_score: f64,
    /// Unit-price sub-score.
    pub price_score: f64,
    /// Relative amount difference in percent, when computable.
    pub amount_diff_pct: Option<f64>,
    /// Dimensions that fully matched.
    pub matched_fields: Vec<String>,
    /// Dimensions that did not.
    pub mismatched_fields: Vec<String>,
}

impl MatchOutcome {
    fn no_reference() -> Self {
        Self {
            score: 0.0,
            verdict: Verdict::Failed,
            amount_score: 0.0,
            quantity_score: 0.0,
            price_score: 0.0,
            amount_diff_pct: None,
            matched_fields: Vec::new(),
            mismatched_fields: vec![
                "amount".to_string(),
                "quantity".to_string(),
                "price".to_string(),
            ],
        }
    }

    /// Evidence object recorded in the state bag.
    #[must_use]
    pub fn evidence(&self) -> serde_json::Value {
        serde_json::json!({
            "amount_score": self.amount_score,
            "quantity_score": self.quantity_score,
            "price_score": self.price_score,
            "amount_diff_pct": self.amount_diff_pct,
            "matched_fields": self.matched_fields,
            "mismatched_fields": self.mismatched_fields,
        })
    }
}

fn same(a: f64, b: f64) -> bool {
    (a - b).abs() <= EPSILON
}

/// Fraction of positions where `eq` holds. Lines correspond by index; a
/// line present on only one side counts as a mismatch.
fn line_fraction(
    invoice: &[MatchLine],
    reference: &[MatchLine],
    eq: impl Fn(&MatchLine, &MatchLine) -> bool,
) -> f64 {
    let denominator = invoice.len().max(reference.len());
    if denominator == 0 {
        return 0.0;
    }
    let hits = invoice
        .iter()
        .zip(reference)
        .filter(|(a, b)| eq(a, b))
        .count();
    #[allow(clippy::cast_precision_loss)]
    let fraction = hits as f64 / denominator as f64;
    fraction
}

/// Scores `invoice` against `reference`.
///
/// A missing reference, or one without lines, is an automatic `FAILED`
/// with score 0.
#[must_use]
pub fn evaluate(
    invoice: &MatchSubject,
    reference: Option<&MatchSubject>,
    config: &MatchConfig,
) -> MatchOutcome {
    let Some(reference) = reference.filter(|r| !r.lines.is_empty()) else {
        return MatchOutcome::no_reference();
    };

    let amount_diff_pct = if reference.total.is_finite()
        && reference.total > 0.0
        && invoice.total.is_finite()
    {
        Some((invoice.total - reference.total).abs() / reference.total * 100.0)
    } else {
        None
    };
    let amount_score = amount_diff_pct
        .map_or(0.0, |diff| config.degradation.score(diff, config.tolerance_pct));

    let quantity_score = line_fraction(&invoice.lines, &reference.lines, |a, b| same(a.qty, b.qty));
    let price_score = line_fraction(&invoice.lines, &reference.lines, |a, b| {
        same(a.unit_price, b.unit_price)
    });

    let score = (AMOUNT_WEIGHT * amount_score
        + QUANTITY_WEIGHT * quantity_score
        + PRICE_WEIGHT * price_score)
        .clamp(0.0, 1.0);

    let mut matched_fields = Vec::new();
    let mut mismatched_fields = Vec::new();
    for (name, sub) in [
        ("amount", amount_score),
        ("quantity", quantity_score),
        ("price", price_score),
    ] {
        if same(sub, 1.0) {
            matched_fields.push(name.to_string());
        } else {
            mismatched_fields.push(name.to_string());
        }
    }
    for (name, agrees) in [
        ("vendor", vendors_agree(invoice, reference)),
        ("currency", currencies_agree(invoice, reference)),
    ] {
        match agrees {
            Some(true) => matched_fields.push(name.to_string()),
            Some(false) => mismatched_fields.push(name.to_string()),
            None => {}
        }
    }

    let verdict = if score + EPSILON >= config.threshold {
        Verdict::Matched
    } else {
        Verdict::Failed
    };

    MatchOutcome {
        score,
        verdict,
        amount_score,
        quantity_score,
        price_score,
        amount_diff_pct,
        matched_fields,
        mismatched_fields,
    }
}
