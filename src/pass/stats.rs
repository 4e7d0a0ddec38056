//! Counters for the final report.
//!
//! The conservation rule the counters obey (outside naive mode):
//! `checks_considered = checks_added + checks_skipped_safe +
//! checks_unable + checks_always_false`, with always-true checks
//! counted inside `checks_added`.

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckStats {
    pub functions_found: u64,
    pub safe_ptrs: u64,
    pub seq_ptrs: u64,
    pub dyn_ptrs: u64,
    pub vars_with_table_entries: u64,
    pub checks_considered: u64,
    pub checks_added: u64,
    pub checks_always_true: u64,
    pub checks_always_false: u64,
    pub checks_skipped_safe: u64,
    pub checks_unable: u64,
    pub table_lookups: u64,
    pub table_updates: u64,
    pub signatures_rewritten: u64,
    pub call_sites_rewritten: u64,
}

impl CheckStats {
    /// The human-readable summary plus the machine-readable `STATS;`
    /// line, appended after the state store's own summary.
    pub fn report(&self, state_summary: &str) -> String {
        let mut out = String::new();
        out.push_str("\n*********\n STATS SUMMARY: \n");
        out.push_str(state_summary);
        out.push('\n');
        out.push_str(&format!(
            "-->) Number of functions found\t\t{}\n",
            self.functions_found
        ));
        out.push_str(&format!(
            "-->) Checks considered\t\t{}\n",
            self.checks_considered
        ));
        out.push_str(&format!("-->) Checks added\t\t{}\n", self.checks_added));
        out.push_str(&format!(
            "-->) Checks always true (memory bugs)\t\t{}\n",
            self.checks_always_true
        ));
        out.push_str(&format!(
            "-->) Checks always false (unnecessary)\t\t{}\n",
            self.checks_always_false
        ));
        out.push_str(&format!(
            "-->) Checks skipped (SAFE pointer)\t\t{}\n",
            self.checks_skipped_safe
        ));
        out.push_str(&format!(
            "-->) Bounds checks unable to add\t\t{}\n",
            self.checks_unable
        ));
        out.push_str(&format!(
            "-->) Metadata table lookups\t\t{}\n",
            self.table_lookups
        ));
        out.push_str(&format!(
            "-->) Metadata table updates\t\t{}\n",
            self.table_updates
        ));
        out.push_str(&format!(
            "-->) Function signatures rewritten\t\t{}\n",
            self.signatures_rewritten
        ));
        out.push_str(&format!(
            "-->) Function call sites rewritten\t\t{}\n\n",
            self.call_sites_rewritten
        ));
        out.push_str(&format!(
            "STATS;{};{};{};{};{};{};{};{};{};0\n",
            self.safe_ptrs,
            self.seq_ptrs,
            self.dyn_ptrs,
            self.vars_with_table_entries,
            self.checks_considered,
            self.checks_added,
            self.checks_skipped_safe,
            self.checks_always_false,
            self.checks_always_true,
        ));
        out
    }
}
