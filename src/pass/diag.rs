//! Diagnostic sink for the pass.
//!
//! Anomalies always go to stderr; the verbose per-instruction trace is
//! off unless the `NESCHECK_TRACE` environment variable is set. All
//! output is advisory - nothing the pass prints affects its result.

use colored::Colorize;

#[derive(Debug)]
pub(super) struct Diag {
    trace_on: bool,
}

impl Diag {
    pub fn from_env() -> Self {
        Self {
            trace_on: std::env::var("NESCHECK_TRACE").is_ok(),
        }
    }

    /// Low-value flow tracing, dimmed
    pub fn trace(&self, msg: impl AsRef<str>) {
        if self.trace_on {
            eprintln!("{}", msg.as_ref().dimmed());
        }
    }

    /// Classification and rewriting notes
    pub fn note(&self, msg: impl AsRef<str>) {
        if self.trace_on {
            eprintln!("{}", msg.as_ref().green());
        }
    }

    /// Anomalies: missing records, leftover uses, statically-proven
    /// memory bugs. Always printed.
    pub fn warn(&self, msg: impl AsRef<str>) {
        eprintln!("{}", msg.as_ref().red());
    }

    /// The final statistics report
    pub fn report(&self, msg: impl AsRef<str>) {
        eprintln!("{}", msg.as_ref());
    }
}
