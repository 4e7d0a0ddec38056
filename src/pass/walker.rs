//! Instruction walker: one visit per instruction, in snapshot order.
//!
//! Each opcode handler updates the abstract state and may emit IR:
//! size computations, metadata-table calls, explicit-size-slot stores
//! and loads, and - at GEP sites - bounds checks that split the block
//! and branch to the per-function trap block.

use crate::ir::{
    BlockId, Builder, Callee, CastOp, FuncId, IcmpCond, InstId, InstKind, Ty, ValueId,
};

use super::driver::Instrumenter;
use super::state::PtrClass;
use super::WHITELISTED_LOOKUP_SIZE;

impl<'m> Instrumenter<'m> {
    pub(super) fn process_instruction(&mut self, f: FuncId, inst: InstId) {
        if self.m.func(f).inst(inst).detached {
            return;
        }
        let line = self.m.func(f).inst(inst).line;
        if line > -1 {
            self.diag.trace(format!("{}]", line));
        }

        let kind = self.m.func(f).inst(inst).kind.clone();
        match kind {
            InstKind::Alloca { allocated, count } => self.handle_alloca(f, inst, allocated, count),
            InstKind::Call { callee, args, .. } => self.handle_call(f, inst, callee, args),
            InstKind::Ret { value } => self.handle_ret(f, inst, value),
            InstKind::Store { value, ptr } => self.handle_store(f, inst, value, ptr),
            InstKind::Load { ptr } => self.handle_load(f, inst, ptr),
            InstKind::Gep { base, indices } => self.handle_gep(f, inst, base, indices),
            InstKind::Cast { op, value } => self.handle_cast(f, inst, op, value),
            // everything else leaves the state untouched
            other => self.diag.trace(format!("( ) {}", other.opcode())),
        }
    }

    fn classify_traced(&mut self, v: ValueId, class: PtrClass) {
        let name = self.m.value_name(v);
        if self.state.classify(v, class) {
            self.diag
                .note(format!("\t=> Classified {} as {}", name, class.name()));
        } else {
            self.diag.trace(format!(
                "\t=> Ignored classification of {} as {}",
                name,
                class.name()
            ));
        }
    }

    /// Walk backwards through load and cast instructions until a
    /// tracked value is found
    fn find_tracked_through_chain(&self, start: ValueId, casts: bool) -> Option<ValueId> {
        let mut cur = start;
        loop {
            if self.state.get(self.m, cur).is_some() {
                return Some(cur);
            }
            let (df, di) = self.m.def_inst(cur)?;
            cur = match &self.m.func(df).inst(di).kind {
                InstKind::Load { ptr } => *ptr,
                InstKind::Cast { value, .. } if casts => *value,
                _ => return None,
            };
        }
    }

    fn handle_alloca(&mut self, f: FuncId, inst: InstId, allocated: Ty, count: ValueId) {
        let result = self.m.func(f).inst(inst).result.expect("alloca has a result");
        self.diag.trace(format!("(+) alloca ({})", allocated));
        if allocated.is_ptr() {
            self.state.register(result);
            return;
        }
        // element count times element size, widened to the size type
        let elem_size = self.m.layout.alloc_size(&allocated) as i64;
        let count_ty = self.m.value_ty(count).clone();
        let size_ty = self.size_ty.clone();
        let mut b = Builder::before(self.m, f, inst);
        let elem_size = b.module().const_int(count_ty, elem_size);
        let total = b.build_mul(elem_size, count);
        let total = b.build_int_cast(total, size_ty, false);
        self.state.set_size(result, Some(total));
    }

    fn handle_call(&mut self, f: FuncId, inst: InstId, callee: Callee, args: Vec<ValueId>) {
        let direct = match callee {
            Callee::Direct(c) => Some(c),
            Callee::Indirect(_) => None,
        };
        let result = self.m.func(f).inst(inst).result;
        let recognized = direct.map(|c| {
            let callee = self.m.func(c);
            (callee.name.clone(), callee.param_tys().len())
        });

        match recognized.as_ref().map(|(n, c)| (n.as_str(), *c)) {
            Some(("malloc", 1)) => {
                self.diag.trace("(M) malloc");
                if let (Some(res), Some(&n)) = (result, args.first()) {
                    self.state.set_size(res, Some(n));
                }
            }
            Some(("realloc", 2)) => {
                self.diag.trace("(M) realloc");
                if let (Some(res), Some(&n)) = (result, args.get(1)) {
                    self.state.set_size(res, Some(n));
                }
            }
            Some(("free", 1)) => {
                self.diag.trace("(F) free");
                if let Some(&p) = args.first() {
                    self.state.set_size(p, None);
                    // the freed size propagates backwards through load
                    // and bitcast chains
                    let mut varr = p;
                    while let Some((df, di)) = self.m.def_inst(varr) {
                        varr = match &self.m.func(df).inst(di).kind {
                            InstKind::Load { ptr } => *ptr,
                            InstKind::Cast {
                                op: CastOp::Bitcast,
                                value,
                            } => *value,
                            _ => break,
                        };
                        self.state.set_size(varr, None);
                    }
                }
            }
            _ => {
                self.diag.trace("( ) call");
                if let Some(res) = result {
                    if self.m.value_ty(res).is_ptr() {
                        let size = self.oracle.size_of(self.m, res);
                        self.state.set_size(res, Some(size));
                    }
                }
            }
        }

        if let Some(c) = direct {
            if self.funcs_to_remove.contains(&c) {
                self.diag.trace("Call needs rewriting!");
                self.rewrite_call_site(f, inst);
            }
        }
    }

    fn handle_ret(&mut self, f: FuncId, inst: InstId, value: Option<ValueId>) {
        self.diag.trace("(R) ret");
        if !self.funcs_with_widened_ret.contains(&f) {
            return;
        }
        let Some(retval) = value else {
            return;
        };
        // the widened return carries the size of the pointer being
        // returned; find it through the load/cast chain
        let Some(tracked) = self.find_tracked_through_chain(retval, true) else {
            self.diag.warn(format!(
                "no size record found for return value {} in {}; return left unwidened",
                self.m.value_name(retval),
                self.m.func(f).name
            ));
            return;
        };
        let size = self.state.get(self.m, tracked).expect("tracked value has a record").size;
        let ret_ty = self.m.func(f).ret_ty().clone();
        let mut b = Builder::before(self.m, f, inst);
        let seed = b.module().undef(ret_ty);
        let with_ptr = b.build_insert_value(seed, retval, 0);
        let with_size = b.build_insert_value(with_ptr, size, 1);
        drop(b);
        if let InstKind::Ret { value } = &mut self.m.func_mut(f).inst_mut(inst).kind {
            *value = Some(with_size);
        }
    }

    fn handle_store(&mut self, f: FuncId, inst: InstId, value: ValueId, ptr: ValueId) {
        self.diag.trace(format!(
            "(~) store {} -> {}",
            self.m.value_name(value),
            self.m.value_name(ptr)
        ));
        if !self.m.value_ty(value).is_ptr() {
            return;
        }

        let mut varinfo = self.state.get(self.m, value);
        if varinfo.is_none() && self.m.is_constant(value) {
            let size = self.oracle.size_of(self.m, value);
            varinfo = Some(self.state.set_size(value, Some(size)));
        }
        let Some(varinfo) = varinfo else {
            self.diag.warn(format!(
                "store of untracked pointer {}; no size to propagate",
                self.m.value_name(value)
            ));
            return;
        };

        // If the destination was defined in another basic block, its
        // size cannot flow through the local SSA chain: reify it in a
        // stack slot materialised in the defining block.
        let cur_block = self.m.func(f).inst(inst).block;
        let mut crosses_blocks = false;
        if let Some((df, di)) = self.m.def_inst(ptr) {
            let def_block = self.m.func(df).inst(di).block;
            if def_block != cur_block {
                crosses_blocks = true;
                self.diag.trace(format!(
                    "\t{} comes from a different basic block",
                    self.m.value_name(ptr)
                ));
                self.state.register(ptr);
                let dest_info = self.state.get(self.m, ptr).expect("just registered");
                let slot = match dest_info.explicit_size_slot {
                    Some(slot) if dest_info.has_explicit_size_slot => slot,
                    _ => {
                        let slot = self.materialize_size_slot(df, def_block, ptr, dest_info.size);
                        self.state.set_explicit_size_slot(ptr, slot);
                        slot
                    }
                };
                // record the size flowing along this path
                let mut b = Builder::before(self.m, f, inst);
                b.build_store(varinfo.size, slot);
            }
        }

        if !crosses_blocks {
            self.classify_traced(ptr, varinfo.class);
            self.state.set_size(ptr, Some(varinfo.size));

            // a pointer stored anywhere but a stack slot must survive
            // in the runtime table
            let dest_is_alloca = self
                .m
                .def_inst(ptr)
                .map(|(df, di)| {
                    matches!(self.m.func(df).inst(di).kind, InstKind::Alloca { .. })
                })
                .unwrap_or(false);
            if !dest_is_alloca {
                self.set_metadata_entry(f, inst, ptr, varinfo.size);
            }
        }
    }

    /// Create the explicit size slot for `ptr` in its defining block:
    /// the alloca plus a store of the currently-known size, placed at
    /// the end of that block.
    fn materialize_size_slot(
        &mut self,
        func: FuncId,
        def_block: BlockId,
        ptr: ValueId,
        initial_size: ValueId,
    ) -> ValueId {
        let name = match &self.m.value(ptr).name {
            Some(n) => format!("{}_size_nesCheck", n),
            None => format!("{}_size_nesCheck", ptr),
        };
        let size_ty = self.size_ty.clone();
        let mut b = Builder::at_end(self.m, func, def_block);
        let one = b.module().const_int(Ty::Int(32), 1);
        let slot = b.build_named_alloca(size_ty, one, &name);
        b.build_store(initial_size, slot);
        slot
    }

    fn handle_load(&mut self, f: FuncId, inst: InstId, ptr: ValueId) {
        self.diag.trace("(~) load");
        let result = self.m.func(f).inst(inst).result.expect("load has a result");
        if !self.m.value_ty(result).is_ptr() {
            return;
        }

        let mut varinfo = self.state.get(self.m, ptr);
        if varinfo.is_none() && self.m.is_constant(ptr) {
            let size = self.oracle.size_of(self.m, ptr);
            varinfo = Some(self.state.set_size(ptr, Some(size)));
        }
        let Some(varinfo) = varinfo else {
            self.diag.warn(format!(
                "load through untracked pointer {}; no size to propagate",
                self.m.value_name(ptr)
            ));
            return;
        };

        if varinfo.has_explicit_size_slot {
            // reload the size if no load is live yet, or the live one
            // belongs to a different basic block
            let cur_block = self.m.func(f).inst(inst).block;
            let size_elsewhere = self
                .m
                .def_inst(varinfo.size)
                .map(|(df, di)| self.m.func(df).inst(di).block != cur_block)
                .unwrap_or(false);
            if !varinfo.slot_instantiated || size_elsewhere {
                let slot = varinfo.explicit_size_slot.expect("slot is set");
                let mut b = Builder::before(self.m, f, inst);
                let loaded = b.build_load(slot);
                drop(b);
                self.state.set_size(ptr, Some(loaded));
                self.state.set_slot_instantiated(ptr, true);
            }
        }

        let varinfo = self.state.get(self.m, ptr).expect("record exists");
        self.classify_traced(result, varinfo.class);
        self.state.set_size(result, Some(varinfo.size));
    }

    fn handle_gep(&mut self, f: FuncId, inst: InstId, base: ValueId, indices: Vec<ValueId>) {
        let result = self.m.func(f).inst(inst).result.expect("gep has a result");
        self.diag.trace(format!(
            "(*) gep {} ({} indices)",
            self.m.value_name(base),
            indices.len()
        ));

        // a non-zero offset means pointer arithmetic: at least SEQ
        let all_zero = self.m.has_all_zero_indices(&indices);
        if !all_zero {
            self.classify_traced(base, PtrClass::Seq);
        }

        self.state.register(result);
        let elem_is_ptr = self
            .m
            .value_ty(result)
            .pointee()
            .map(Ty::is_ptr)
            .unwrap_or(false);
        if elem_is_ptr {
            // a pointer loaded out of here has a size only the runtime
            // table can supply
            self.lookup_metadata_entry(f, inst, result);
        } else {
            self.state.register(base);
            let base_info = self.state.get(self.m, base).expect("base is registered");
            let size = if all_zero {
                base_info.size
            } else {
                let size_ty = self.m.value_ty(base_info.size).clone();
                let mut b = Builder::before(self.m, f, inst);
                let offset = self.oracle.offset_for_gep(&mut b, f, inst);
                let offset_ty = b.module().value_ty(offset).clone();
                let diff = b.build_sub(base_info.size, offset);
                drop(b);
                if size_ty != offset_ty {
                    self.diag.warn(format!(
                        "size type {} does not match offset type {} at {}",
                        size_ty,
                        offset_ty,
                        self.m.value_name(result)
                    ));
                }
                diff
            };
            self.state.set_size(result, Some(size));
        }

        self.instrument_gep(f, inst, base, &indices);
    }

    fn handle_cast(&mut self, f: FuncId, inst: InstId, op: CastOp, value: ValueId) {
        let src_ty = self.m.value_ty(value).clone();
        let result = self.m.func(f).inst(inst).result.expect("cast has a result");
        let dst_ty = self.m.value_ty(result).clone();
        self.diag.trace(format!(
            "(>) {} {} ({} -> {})",
            self.m.func(f).inst(inst).kind.opcode(),
            self.m.value_name(value),
            src_ty,
            dst_ty
        ));
        if !src_ty.is_ptr() {
            return;
        }

        let varinfo = self.state.get(self.m, value);

        // a change in indirection depth, or in the integer-ness of the
        // innermost type, is a type-varying cast: DYN territory
        let varies_type = src_ty.indirections() != dst_ty.indirections()
            || src_ty.unwrap_ptr().is_int() != dst_ty.unwrap_ptr().is_int();
        if varies_type {
            match self.m.def_inst(value).map(|(df, di)| self.m.func(df).inst(di).kind.clone()) {
                Some(InstKind::Load { ptr }) => {
                    // the pointed-at location must carry its size in
                    // the metadata table across the cast
                    self.classify_traced(ptr, PtrClass::Dyn);
                }
                Some(InstKind::Call { .. }) => {
                    let trivial_size = varinfo
                        .map(|vi| self.m.const_value(vi.size) == Some(1))
                        .unwrap_or(false);
                    if op == CastOp::Bitcast && trivial_size {
                        let size = self.oracle.size_of(self.m, result);
                        self.state.set_size(value, Some(size));
                    }
                    self.classify_traced(value, PtrClass::Dyn);
                    self.classify_traced(result, PtrClass::Dyn);
                }
                _ => {
                    self.diag
                        .trace("=> no defining instruction; classification unchanged");
                }
            }
        }

        // propagate size from operand to result
        match self.state.get(self.m, value) {
            Some(vi) => {
                self.state.set_size(result, Some(vi.size));
            }
            None => {
                self.diag.warn(format!(
                    "cast of untracked pointer {}; no size to propagate",
                    self.m.value_name(value)
                ));
            }
        }
    }

    /// Inject a metadata-table lookup right after `after`, recording
    /// its result as the size of `ptr`.
    pub(super) fn lookup_metadata_entry(
        &mut self,
        f: FuncId,
        after: InstId,
        ptr: ValueId,
    ) -> ValueId {
        if self.cur_instr_whitelisted {
            self.diag.trace(format!(
                "\tSKIPPING metadata table lookup for {} (whitelisted)",
                self.m.value_name(ptr)
            ));
            let size_ty = self.size_ty.clone();
            let assumed = self.m.const_int(size_ty, WHITELISTED_LOOKUP_SIZE);
            self.state.set_size(ptr, Some(assumed));
            return assumed;
        }

        self.diag.trace(format!(
            "\tInjecting metadata table lookup for {}",
            self.m.value_name(ptr)
        ));
        let int_ty = self.size_ty.clone();
        let lookup = self.hooks.lookup_metadata;
        let mut b = Builder::after(self.m, f, after);
        let key = b.build_ptr_to_int(ptr, int_ty);
        let size = b.build_call(lookup, vec![key]).expect("lookup returns a size");
        drop(b);
        self.stats.table_lookups += 1;
        self.state.set_size(ptr, Some(size));
        self.state.mark_table_entry(ptr);
        size
    }

    /// Inject a metadata-table update before `before`
    pub(super) fn set_metadata_entry(
        &mut self,
        f: FuncId,
        before: InstId,
        ptr: ValueId,
        size: ValueId,
    ) {
        if self.cur_instr_whitelisted {
            self.diag.trace(format!(
                "\tSKIPPING metadata table update for {} (whitelisted)",
                self.m.value_name(ptr)
            ));
            return;
        }

        self.diag.trace(format!(
            "\tInjecting metadata table update for {}",
            self.m.value_name(ptr)
        ));
        let int_ty = self.size_ty.clone();
        // the update is tagged with the id of the updating instruction
        let addr = self.m.const_int(int_ty.clone(), before.0 as i64);
        let set = self.hooks.set_metadata;
        let mut b = Builder::before(self.m, f, before);
        let key = b.build_ptr_to_int(ptr, int_ty);
        b.build_call(set, vec![key, size, addr]);
        drop(b);
        self.stats.table_updates += 1;
        self.state.mark_table_entry(ptr);
    }

    /// The per-function trap block, created on first use: report the
    /// triggering source line, trap, unreachable.
    fn trap_block(&mut self, f: FuncId, line: i64) -> BlockId {
        if let Some(bb) = self.trap_block {
            self.diag.trace("\tReusing existing trap block");
            return bb;
        }
        self.diag.trace("\tCreating trap block");
        let size_ty = self.size_ty.clone();
        let print_error_line = self.hooks.print_error_line;
        let bb = self.m.func_mut(f).add_block(Some("trap"));
        let mut b = Builder::at_end(self.m, f, bb);
        b.set_line(line);
        let ln = b.module().const_int(size_ty, line);
        b.build_call(print_error_line, vec![ln]);
        b.build_trap();
        b.build_unreachable();
        self.trap_block = Some(bb);
        bb
    }

    /// Bounds-check emission for one GEP. `size - elemsize < offset`,
    /// signed, branching to the trap block when true. Folds away when
    /// provably false; folds to an unconditional trap when provably
    /// true (a statically-diagnosed memory bug).
    fn instrument_gep(&mut self, f: FuncId, gep: InstId, base: ValueId, indices: &[ValueId]) {
        if self.cur_fully_whitelisted || self.cur_instr_whitelisted {
            self.diag
                .trace("Skipping instrumentation of GEP (whitelisted)");
            return;
        }

        self.stats.checks_considered += 1;

        if indices.is_empty() {
            self.stats.checks_unable += 1;
            self.diag.trace("\tUnable, no indices");
            return;
        }

        let Some(varinfo) = self.state.get(self.m, base) else {
            self.stats.checks_unable += 1;
            self.diag.warn(format!(
                "no size known for {}; bounds check skipped",
                self.m.value_name(base)
            ));
            return;
        };
        if varinfo.class == PtrClass::Safe {
            self.stats.checks_skipped_safe += 1;
            self.diag
                .trace(format!("\tSkipping, SAFE variable {}", self.m.value_name(base)));
            return;
        }

        let base_ty = self.m.value_ty(base).clone();
        let elem_ty = self.m.gep_result_elem_ty(&base_ty, indices);
        let elem_size = self.m.layout.store_size(&elem_ty);
        let int_ty = self.size_ty.clone();

        let cmp = {
            let size_const = self.m.const_value(varinfo.size);
            let mut b = Builder::before(self.m, f, gep);
            let offset = self.oracle.offset_for_gep(&mut b, f, gep);
            let lhs = match size_const {
                // folded up front; the subtraction wraps, so a freed
                // (zero-size) pointer yields the bit pattern of
                // -elem_size here
                Some(c) => b
                    .module()
                    .const_int(int_ty.clone(), (c as u64).wrapping_sub(elem_size) as i64),
                None => {
                    let rhs = b.module().const_int(int_ty.clone(), elem_size as i64);
                    b.build_sub(varinfo.size, rhs)
                }
            };
            b.build_icmp(IcmpCond::Slt, lhs, offset)
        };

        let mut cond = Some(cmp);
        if let Some(folded) = self.m.const_value(cmp) {
            if folded == 0 {
                self.stats.checks_always_false += 1;
                self.diag.trace("\tCheck is always false -> unneeded");
                if !self.config.naive_checks {
                    return;
                }
            } else {
                self.stats.checks_always_true += 1;
                self.diag.warn(format!(
                    "bounds check at {} is always true -> unconditional memory bug",
                    self.m.value_name(base)
                ));
                cond = None;
            }
        }
        self.stats.checks_added += 1;

        if self.config.debug_checks {
            let print_check = self.hooks.print_check;
            let mut b = Builder::before(self.m, f, gep);
            b.build_call(print_check, vec![]);
        }

        // splice the branch in: split at the GEP, then terminate the
        // predecessor half with the check
        let line = self.m.func(f).inst(gep).line;
        let old_block = self.m.func(f).inst(gep).block;
        let cont = self.m.func_mut(f).split_block(old_block, gep);
        let trap = self.trap_block(f, line);
        let mut b = Builder::at_end(self.m, f, old_block);
        match cond {
            Some(c) => b.build_cond_br(c, trap, cont),
            None => b.build_br(trap),
        };
    }
}
