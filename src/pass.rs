//! The nescheck module pass.
//!
//! A two-phase whole-module transformation:
//! 1. Signature rewriting: every eligible function taking or returning
//!    pointers gets a `_nesCheck` twin with one trailing size parameter
//!    per pointer parameter and a `{pointer, size}` return
//! 2. Analysis and instrumentation: every instruction of every twin is
//!    walked once, classifying pointer values SAFE/SEQ/DYN, propagating
//!    size metadata (through stack slots across basic blocks and a
//!    runtime table across type-varying casts), rewriting call sites,
//!    and inserting bounds checks that branch to a per-function trap
//!    block

mod diag;
mod driver;
mod signatures;
mod sizes;
mod state;
mod stats;
mod walker;
mod whitelist;

pub use sizes::SizeOracle;
pub use state::{AnalysisState, ClassCounts, PtrClass, VarInfo};
pub use stats::CheckStats;
pub use whitelist::Whitelist;

use crate::ir::Module;

/// Name the pass registers under with a host pass manager
pub const PASS_NAME: &str = "nescheck";

/// Runtime library symbol: record `{ptr, size}` in the metadata table
pub const SET_METADATA_FN: &str = "setMetadataTableEntry";
/// Runtime library symbol: fetch the recorded size for a pointer
pub const LOOKUP_METADATA_FN: &str = "lookupMetadataTableEntry";
/// Runtime library symbol: report the source line of a failed check
pub const PRINT_ERROR_LINE_FN: &str = "printErrorLine";
/// Runtime library symbol: debug marker emitted before each check
pub const PRINT_CHECK_FN: &str = "printCheck";

/// Functions the driver never analyzes or rewrites: the runtime
/// library itself.
pub(crate) const RUNTIME_FN_NAMES: &[&str] = &[
    PRINT_CHECK_FN,
    PRINT_ERROR_LINE_FN,
    "printFaultInjectionExecuted",
    SET_METADATA_FN,
    LOOKUP_METADATA_FN,
    "findMetadataTableEntry",
];

/// Suffix of rewritten function twins
pub const REWRITTEN_SUFFIX: &str = "_nesCheck";

/// Size recorded for pointers whose allocation cannot be modeled
/// (e.g. results of uninstrumented calls). Large enough that ordinary
/// checks succeed vacuously.
pub const UNKNOWN_SIZE: i64 = 10_000_000;

/// Size assumed when a metadata lookup is skipped inside a function
/// whitelisted for instrumentation
pub const WHITELISTED_LOOKUP_SIZE: i64 = 10_000;

/// Behavior switches
#[derive(Debug, Clone, Copy, Default)]
pub struct PassConfig {
    /// Inject a `printCheck` call before every inserted comparison
    pub debug_checks: bool,
    /// Emit provably-false checks instead of eliding them
    pub naive_checks: bool,
}

/// The pass. State and statistics stay readable after a run.
#[derive(Debug, Default)]
pub struct NesCheckPass {
    pub config: PassConfig,
    pub state: AnalysisState,
    pub stats: CheckStats,
}

impl NesCheckPass {
    pub fn new(config: PassConfig) -> Self {
        Self {
            config,
            state: AnalysisState::new(),
            stats: CheckStats::default(),
        }
    }

    /// Run over a whole module. Returns true if any IR was changed.
    pub fn run_on_module(&mut self, m: &mut Module) -> bool {
        self.state = AnalysisState::new();
        self.stats = CheckStats::default();
        driver::run(m, self.config, &mut self.state, &mut self.stats)
    }
}
