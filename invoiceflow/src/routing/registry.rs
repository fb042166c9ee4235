//! Capability pools and backend availability.

use dashmap::DashMap;
use std::collections::HashMap;
use std::fmt::Debug;

/// Decides whether a backend can currently take work.
///
/// Implementations may be stale; the selector tolerates unavailable
/// backends.
pub trait Availability: Send + Sync + Debug {
    /// Returns `Ok(())` when usable, or the reason it is not.
    fn check(&self, capability: &str, backend: &str) -> Result<(), String>;
}

/// Every backend is available.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysAvailable;

impl Availability for AlwaysAvailable {
    fn check(&self, _capability: &str, _backend: &str) -> Result<(), String> {
        Ok(())
    }
}

/// A health table updated by an external checker.
///
/// Backends not listed are assumed available.
#[derive(Debug, Default)]
pub struct AvailabilityTable {
    flags: DashMap<String, (bool, String)>,
}

impl AvailabilityTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a backend available.
    pub fn set_available(&self, backend: &str) {
        self.flags.insert(backend.to_string(), (true, String::new()));
    }

    /// Marks a backend unavailable with a reason.
    pub fn set_unavailable(&self, backend: &str, reason: impl Into<String>) {
        self.flags
            .insert(backend.to_string(), (false, reason.into()));
    }

    /// Marks a backend unavailable and returns the table, for setup code.
    #[must_use]
    pub fn with_unavailable(self, backend: &str, reason: impl Into<String>) -> Self {
        self.set_unavailable(backend, reason);
        self
    }

    /// Returns the current flag.
    #[must_use]
    pub fn is_available(&self, backend: &str) -> bool {
        self.flags.get(backend).map_or(true, |entry| entry.0)
    }
}

impl Availability for AvailabilityTable {
    fn check(&self, _capability: &str, backend: &str) -> Result<(), String> {
        match self.flags.get(backend) {
            Some(entry) if !entry.0 => Err(if entry.1.is_empty() {
                "unavailable".to_string()
            } else {
                entry.1.clone()
            }),
            _ => Ok(()),
        }
    }
}

/// Static mapping of capability name to backends in priority order.
#[derive(Debug, Clone)]
pub struct CapabilityRegistry {
    pools: HashMap<String, Vec<String>>,
}

fn pool(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| (*s).to_string()).collect()
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        let mut pools = HashMap::new();
        pools.insert("storage".to_string(), pool(&["s3", "gcs", "local_fs"]));
        pools.insert(
            "ocr".to_string(),
            pool(&["google_vision", "tesseract", "aws_textract"]),
        );
        pools.insert(
            "enrichment".to_string(),
            pool(&["clearbit", "people_data_labs", "vendor_db"]),
        );
        pools.insert(
            "erp_connector".to_string(),
            pool(&["sap_sandbox", "netsuite", "mock_erp"]),
        );
        pools.insert("db".to_string(), pool(&["postgres", "sqlite", "dynamodb"]));
        pools.insert(
            "email".to_string(),
            pool(&["sendgrid", "ses", "smartlead"]),
        );
        Self { pools }
    }
}

impl CapabilityRegistry {
    /// Creates the default registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with no pools.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            pools: HashMap::new(),
        }
    }

    /// Adds or replaces a pool.
    #[must_use]
    pub fn with_pool<I, S>(mut self, capability: impl Into<String>, backends: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pools.insert(
            capability.into(),
            backends.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// The pool for a capability, empty if unknown.
    #[must_use]
    pub fn pool(&self, capability: &str) -> &[String] {
        self.pools
            .get(capability)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Registered capability names, sorted.
    #[must_use]
    pub fn capabilities(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.pools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// The no-op backend used when a pool is exhausted.
    #[must_use]
    pub fn placeholder(capability: &str) -> String {
        format!("{capability}:placeholder")
    }
}
