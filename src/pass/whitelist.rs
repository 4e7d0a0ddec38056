//! Name-based exclusion of functions from analysis and instrumentation.

use super::REWRITTEN_SUFFIX;

/// Decides which functions the pass leaves alone. A *fully*
/// whitelisted function is skipped by both analysis and signature
/// rewriting; a function whitelisted *for instrumentation* is still
/// analyzed but gets no checks or metadata calls.
#[derive(Debug, Clone)]
pub struct Whitelist {
    configured: Vec<String>,
}

impl Default for Whitelist {
    /// The simulation and instrumentation support functions excluded
    /// out of the box
    fn default() -> Self {
        Self::with_functions(&[
            "active_message_deliver",
            "arrangeKey",
            "fillInOutput",
            "is_empty",
            "makeNoiseModel",
            "makePmfDistr",
            "RandomInitialise",
            "RandomUniform",
        ])
    }
}

impl Whitelist {
    pub fn with_functions(names: &[&str]) -> Self {
        Self {
            configured: names.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Excluded from both analysis and signature rewriting
    pub fn is_fully_whitelisted(&self, name: &str) -> bool {
        name.starts_with("sim_")
            || name.starts_with("hashtable_")
            || name.contains("heap")
            || name.ends_with("_hashtable")
    }

    /// Excluded from instrumentation (checks and metadata calls) but
    /// still analyzed. The configured set matches with or without the
    /// rewritten-function suffix.
    pub fn is_whitelisted_for_instrumentation(&self, name: &str) -> bool {
        if self.is_fully_whitelisted(name) {
            return true;
        }
        if self.configured.iter().any(|c| c == name) {
            return true;
        }
        match name.strip_suffix(REWRITTEN_SUFFIX) {
            Some(stripped) => self.configured.iter().any(|c| c == stripped),
            None => false,
        }
    }
}
