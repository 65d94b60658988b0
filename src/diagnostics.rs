//! Findings reported by a single probe run.
//!
//! A [`DiagnosticContext`] is created fresh for every probe invocation and handed to the
//! probe body, so findings are always attributed to the probe that produced them and
//! never leak between runs. Cloning yields another handle to the same findings.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Findings {
    pub failures: Vec<String>,
    pub infos: Vec<String>,
}

impl Findings {
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty() && self.infos.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct DiagnosticContext {
    probe: Arc<str>,
    findings: Arc<Mutex<Findings>>,
}

impl DiagnosticContext {
    pub fn new(probe: &str) -> Self {
        Self {
            probe: Arc::from(probe),
            findings: Arc::new(Mutex::new(Findings::default())),
        }
    }

    pub fn probe(&self) -> &str {
        &self.probe
    }

    /// Record a problem with the checked subsystem. Logged at WARN immediately.
    ///
    /// Probes report expected, diagnosable problems through this call rather than by
    /// returning an error; errors are reserved for faults in the probe itself.
    pub fn failure(&self, message: impl fmt::Display) {
        let message = message.to_string();
        warn!("{}: {}", self.probe, message);
        self.lock().failures.push(message);
    }

    /// Record a non-failure observation. Logged at INFO immediately.
    pub fn info(&self, message: impl fmt::Display) {
        let message = message.to_string();
        info!("{}: {}", self.probe, message);
        self.lock().infos.push(message);
    }

    pub fn findings(&self) -> Findings {
        self.lock().clone()
    }

    pub fn failure_count(&self) -> usize {
        self.lock().failures.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Findings> {
        self.findings.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
