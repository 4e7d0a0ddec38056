//! Per-module driver: setup, the two traversal phases, shell removal,
//! and the final report.

use crate::ir::{Callee, FuncId, InstKind, Module, Ty, ValueId};

use super::diag::Diag;
use super::sizes::SizeOracle;
use super::state::AnalysisState;
use super::stats::CheckStats;
use super::whitelist::Whitelist;
use super::{PassConfig, LOOKUP_METADATA_FN, PRINT_CHECK_FN, PRINT_ERROR_LINE_FN,
    RUNTIME_FN_NAMES, SET_METADATA_FN};

/// Handles to the runtime support functions, located (or declared)
/// once per module.
pub(super) struct RuntimeHooks {
    pub set_metadata: FuncId,
    pub lookup_metadata: FuncId,
    pub print_error_line: FuncId,
    pub print_check: FuncId,
}

/// Everything one pass invocation owns while rewriting a module. The
/// walker and the signature transformer are `impl` blocks on this type
/// in their own files.
pub(super) struct Instrumenter<'m> {
    pub m: &'m mut Module,
    pub config: PassConfig,
    pub state: &'m mut AnalysisState,
    pub stats: &'m mut CheckStats,
    pub diag: Diag,
    pub oracle: SizeOracle,
    pub whitelist: Whitelist,
    pub size_ty: Ty,
    pub unknown_size: ValueId,
    pub hooks: RuntimeHooks,
    /// Old function shells superseded by a `_nesCheck` twin
    pub funcs_to_remove: Vec<FuncId>,
    /// Twins whose return type was widened to `{pointer, size}`
    pub funcs_with_widened_ret: Vec<FuncId>,
    /// Trap block of the function currently being walked
    pub trap_block: Option<crate::ir::BlockId>,
    pub cur_fully_whitelisted: bool,
    pub cur_instr_whitelisted: bool,
    pub changed: bool,
}

pub(super) fn run(
    m: &mut Module,
    config: PassConfig,
    state: &mut AnalysisState,
    stats: &mut CheckStats,
) -> bool {
    let diag = Diag::from_env();
    diag.trace(format!("\n\n#############\n MODULE: {}", m.name));

    let size_ty = m.layout.int_ptr_ty();
    let zero = m.const_int(size_ty.clone(), 0);
    state.set_size_zero(zero);
    let oracle = SizeOracle::new(m);
    let unknown_size = oracle.unknown();
    let hooks = locate_runtime_hooks(m, &size_ty);

    let mut instr = Instrumenter {
        m,
        config,
        state,
        stats,
        diag,
        oracle,
        whitelist: Whitelist::default(),
        size_ty,
        unknown_size,
        hooks,
        funcs_to_remove: Vec::new(),
        funcs_with_widened_ret: Vec::new(),
        trap_block: None,
        cur_fully_whitelisted: false,
        cur_instr_whitelisted: false,
        changed: false,
    };
    instr.run();
    instr.changed
}

fn locate_runtime_hooks(m: &mut Module, size_ty: &Ty) -> RuntimeHooks {
    let word = size_ty.clone();
    RuntimeHooks {
        set_metadata: m.get_or_declare_function(
            SET_METADATA_FN,
            &[word.clone(), word.clone(), word.clone()],
            Ty::Void,
        ),
        lookup_metadata: m.get_or_declare_function(
            LOOKUP_METADATA_FN,
            &[word.clone()],
            word.clone(),
        ),
        print_error_line: m.get_or_declare_function(
            PRINT_ERROR_LINE_FN,
            &[word],
            Ty::Void,
        ),
        print_check: m.get_or_declare_function(PRINT_CHECK_FN, &[], Ty::Void),
    }
}

impl<'m> Instrumenter<'m> {
    fn run(&mut self) {
        self.register_globals();

        // Phase 1: rewrite signatures. Every call the walker later sees
        // whose callee is marked for deletion already has its twin.
        let mut to_analyze: Vec<FuncId> = Vec::new();
        for f in self.m.func_ids() {
            if self.m.func(f).is_declaration {
                continue;
            }
            if RUNTIME_FN_NAMES.contains(&self.m.func(f).name.as_str()) {
                continue;
            }
            self.stats.functions_found += 1;
            self.state.register_function();
            self.cur_fully_whitelisted =
                self.whitelist.is_fully_whitelisted(&self.m.func(f).name);
            let nf = self.rewrite_function_signature(f);
            if nf != f {
                self.changed = true;
            }
            to_analyze.push(nf);
        }

        // Phase 2: analyze and instrument
        for f in to_analyze {
            let name = self.m.func(f).name.clone();
            self.cur_fully_whitelisted = self.whitelist.is_fully_whitelisted(&name);
            self.cur_instr_whitelisted = self.cur_fully_whitelisted
                || self.whitelist.is_whitelisted_for_instrumentation(&name);
            self.analyze_function(f);
        }

        self.remove_dead_shells();
        self.print_stats();
    }

    fn print_stats(&mut self) {
        let counts = self.state.counts();
        self.stats.safe_ptrs += counts.safe as u64;
        self.stats.seq_ptrs += counts.seq as u64;
        self.stats.dyn_ptrs += counts.dyn_ as u64;
        self.stats.vars_with_table_entries += counts.table_entries as u64;
        self.diag.report(self.stats.report(&self.state.summary()));
    }

    fn register_globals(&mut self) {
        for i in 0..self.m.globals.len() {
            let gv = self.m.globals[i].value;
            self.state.register(gv);
            let size = self.oracle.size_of(self.m, gv);
            self.state.set_size(gv, Some(size));
        }
    }

    fn analyze_function(&mut self, f: FuncId) {
        self.diag
            .trace(format!("\n\n*********\n ANALYZING FUNCTION: {}", self.m.func(f).name));
        if self.cur_fully_whitelisted {
            self.diag.trace("\t[whitelisted]");
        }
        if self.cur_instr_whitelisted {
            self.diag.trace("\t[whitelisted for instrumentation]");
        }

        self.trap_block = None;

        // The walker inserts instructions and splits blocks, so it runs
        // over a snapshot taken up front.
        let snapshot = self.m.func(f).snapshot_insts();
        let before = self.m.func(f).insts.len();
        for inst in snapshot {
            self.process_instruction(f, inst);
        }
        if self.m.func(f).insts.len() != before {
            self.changed = true;
        }
    }

    fn remove_dead_shells(&mut self) {
        self.diag.trace("\n\n*********\n REMOVING OLD FUNCTIONS");
        for f in std::mem::take(&mut self.funcs_to_remove) {
            let uses = self.m.count_function_uses(f);
            if uses == 0 {
                self.m.erase_function(f);
                continue;
            }
            // A shell with live users cannot be erased; report where
            // they are and move on.
            self.diag.warn(format!(
                "Leftover uses of {} ({}):",
                self.m.func(f).name,
                uses
            ));
            let addr = self.m.func(f).value;
            for holder in &self.m.funcs {
                if holder.deleted {
                    continue;
                }
                for data in holder.insts.iter().filter(|d| !d.detached) {
                    let is_direct_call = matches!(
                        &data.kind,
                        InstKind::Call {
                            callee: Callee::Direct(c),
                            ..
                        } if *c == f
                    );
                    if is_direct_call || data.kind.operands().contains(&addr) {
                        self.diag.warn(format!(
                            "  [line {}] {} in {}",
                            data.line,
                            data.kind.opcode(),
                            holder.name
                        ));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests;
