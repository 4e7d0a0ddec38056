//! Instruction builder with constant folding.
//!
//! The builder holds a mutable borrow of the module plus an insertion
//! position (function, block, index). Arithmetic, comparisons, and
//! integer casts fold when their operands are constants, so emitted
//! size computations collapse to constants whenever they can - the
//! bounds-check emitter relies on this to elide provably-false checks.

use super::*;

pub struct Builder<'m> {
    m: &'m mut Module,
    func: FuncId,
    block: BlockId,
    index: usize,
    line: i64,
}

impl<'m> Builder<'m> {
    /// Position the builder immediately before `at`
    pub fn before(m: &'m mut Module, func: FuncId, at: InstId) -> Self {
        let block = m.func(func).inst(at).block;
        let index = m.func(func).block(block).insts.iter().position(|&i| i == at);
        // A terminator is not in the instruction list; inserting before
        // it means appending to the list.
        let index = index.unwrap_or_else(|| m.func(func).block(block).insts.len());
        Self {
            m,
            func,
            block,
            index,
            line: -1,
        }
    }

    /// Position the builder immediately after `at`
    pub fn after(m: &'m mut Module, func: FuncId, at: InstId) -> Self {
        let block = m.func(func).inst(at).block;
        let index = m
            .func(func)
            .block(block)
            .insts
            .iter()
            .position(|&i| i == at)
            .expect("cannot insert after a terminator");
        Self {
            m,
            func,
            block,
            index: index + 1,
            line: -1,
        }
    }

    /// Position the builder at the end of `block`, before its terminator
    pub fn at_end(m: &'m mut Module, func: FuncId, block: BlockId) -> Self {
        let index = m.func(func).block(block).insts.len();
        Self {
            m,
            func,
            block,
            index,
            line: -1,
        }
    }

    pub fn module(&mut self) -> &mut Module {
        self.m
    }

    pub fn block(&self) -> BlockId {
        self.block
    }

    /// Source line attached to subsequently built instructions
    pub fn set_line(&mut self, line: i64) {
        self.line = line;
    }

    fn insert(&mut self, kind: InstKind, ty: Ty) -> InstId {
        let func = self.func;
        let id = InstId(self.m.func(func).insts.len() as u32);
        let result = if ty == Ty::Void {
            None
        } else {
            Some(self.m.push_inst_result(func, id, ty.clone()))
        };
        let data = InstData {
            kind,
            ty,
            result,
            block: self.block,
            line: self.line,
            detached: false,
        };
        let f = self.m.func_mut(func);
        f.insts.push(data);
        f.block_mut(self.block).insts.insert(self.index, id);
        self.index += 1;
        id
    }

    fn result_of(&self, inst: InstId) -> ValueId {
        self.m
            .func(self.func)
            .inst(inst)
            .result
            .expect("instruction has no result")
    }

    fn set_terminator(&mut self, kind: InstKind) -> InstId {
        let func = self.func;
        let id = InstId(self.m.func(func).insts.len() as u32);
        let data = InstData {
            kind,
            ty: Ty::Void,
            result: None,
            block: self.block,
            line: self.line,
            detached: false,
        };
        let f = self.m.func_mut(func);
        assert!(
            f.block(self.block).term.is_none(),
            "block {} already has a terminator",
            self.block
        );
        f.insts.push(data);
        f.block_mut(self.block).term = Some(id);
        id
    }

    pub fn build_alloca(&mut self, allocated: Ty, count: ValueId) -> ValueId {
        let ty = Ty::ptr_to(allocated.clone());
        let inst = self.insert(InstKind::Alloca { allocated, count }, ty);
        self.result_of(inst)
    }

    /// Alloca with a name, for slots the pass materialises itself
    pub fn build_named_alloca(
        &mut self,
        allocated: Ty,
        count: ValueId,
        name: &str,
    ) -> ValueId {
        let v = self.build_alloca(allocated, count);
        self.m.value_mut(v).name = Some(name.to_string());
        v
    }

    pub fn build_load(&mut self, ptr: ValueId) -> ValueId {
        let ty = self
            .m
            .value_ty(ptr)
            .pointee()
            .unwrap_or_else(|| panic!("load from non-pointer {}", self.m.value_ty(ptr)))
            .clone();
        let inst = self.insert(InstKind::Load { ptr }, ty);
        self.result_of(inst)
    }

    pub fn build_store(&mut self, value: ValueId, ptr: ValueId) -> InstId {
        self.insert(InstKind::Store { value, ptr }, Ty::Void)
    }

    pub fn build_gep(&mut self, base: ValueId, indices: Vec<ValueId>) -> ValueId {
        let base_ty = self.m.value_ty(base).clone();
        let ty = self.m.gep_result_ty(&base_ty, &indices);
        let inst = self.insert(InstKind::Gep { base, indices }, ty);
        self.result_of(inst)
    }

    fn fold_binop(&self, op: BinOpKind, lhs: ValueId, rhs: ValueId) -> Option<i64> {
        let a = self.m.const_value(lhs)?;
        let b = self.m.const_value(rhs)?;
        Some(match op {
            BinOpKind::Add => a.wrapping_add(b),
            BinOpKind::Sub => a.wrapping_sub(b),
            BinOpKind::Mul => a.wrapping_mul(b),
        })
    }

    pub fn build_binop(&mut self, op: BinOpKind, lhs: ValueId, rhs: ValueId) -> ValueId {
        if let Some(folded) = self.fold_binop(op, lhs, rhs) {
            let ty = self.m.value_ty(lhs).clone();
            return self.m.const_int(ty, folded);
        }
        let ty = self.m.value_ty(lhs).clone();
        let inst = self.insert(InstKind::BinOp { op, lhs, rhs }, ty);
        self.result_of(inst)
    }

    pub fn build_add(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.build_binop(BinOpKind::Add, lhs, rhs)
    }

    pub fn build_sub(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.build_binop(BinOpKind::Sub, lhs, rhs)
    }

    pub fn build_mul(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.build_binop(BinOpKind::Mul, lhs, rhs)
    }

    pub fn build_icmp(&mut self, cond: IcmpCond, lhs: ValueId, rhs: ValueId) -> ValueId {
        if let (Some(a), Some(b)) = (self.m.const_value(lhs), self.m.const_value(rhs)) {
            let r = match cond {
                IcmpCond::Eq => a == b,
                IcmpCond::Ne => a != b,
                IcmpCond::Slt => a < b,
                IcmpCond::Sle => a <= b,
                IcmpCond::Sgt => a > b,
                IcmpCond::Sge => a >= b,
                IcmpCond::Ult => (a as u64) < (b as u64),
                IcmpCond::Ugt => (a as u64) > (b as u64),
            };
            return self.m.const_int(Ty::Int(1), r as i64);
        }
        let inst = self.insert(InstKind::Icmp { cond, lhs, rhs }, Ty::Int(1));
        self.result_of(inst)
    }

    /// Widen or truncate an integer to `to_ty`. A no-op cast returns the
    /// value unchanged; constants fold.
    pub fn build_int_cast(&mut self, value: ValueId, to_ty: Ty, signed: bool) -> ValueId {
        let from_ty = self.m.value_ty(value).clone();
        if from_ty == to_ty {
            return value;
        }
        let from_bits = match from_ty {
            Ty::Int(b) => b,
            other => panic!("int cast from non-integer {}", other),
        };
        let to_bits = match to_ty {
            Ty::Int(b) => b,
            ref other => panic!("int cast to non-integer {}", other),
        };
        if let Some(c) = self.m.const_value(value) {
            let folded = if signed || from_bits >= 64 {
                c
            } else {
                c & ((1i64 << from_bits) - 1)
            };
            return self.m.const_int(to_ty, folded);
        }
        let op = if to_bits < from_bits {
            CastOp::Trunc
        } else if signed {
            CastOp::Sext
        } else {
            CastOp::Zext
        };
        let inst = self.insert(InstKind::Cast { op, value }, to_ty);
        self.result_of(inst)
    }

    pub fn build_ptr_to_int(&mut self, value: ValueId, to_ty: Ty) -> ValueId {
        if self.m.is_null_const(value) {
            return self.m.const_int(to_ty, 0);
        }
        let inst = self.insert(
            InstKind::Cast {
                op: CastOp::PtrToInt,
                value,
            },
            to_ty,
        );
        self.result_of(inst)
    }

    pub fn build_bitcast(&mut self, value: ValueId, to_ty: Ty) -> ValueId {
        let inst = self.insert(
            InstKind::Cast {
                op: CastOp::Bitcast,
                value,
            },
            to_ty,
        );
        self.result_of(inst)
    }

    /// Direct call. Returns the result value, or None for void callees.
    pub fn build_call(&mut self, callee: FuncId, args: Vec<ValueId>) -> Option<ValueId> {
        self.build_call_inst(callee, args, false).1
    }

    /// Direct call, exposing the instruction id and the tail-call flag
    pub fn build_call_inst(
        &mut self,
        callee: FuncId,
        args: Vec<ValueId>,
        tail: bool,
    ) -> (InstId, Option<ValueId>) {
        let ret = self.m.func(callee).ret_ty().clone();
        let inst = self.insert(
            InstKind::Call {
                callee: Callee::Direct(callee),
                args,
                tail,
            },
            ret,
        );
        (inst, self.m.func(self.func).inst(inst).result)
    }

    pub fn build_indirect_call(
        &mut self,
        target: ValueId,
        args: Vec<ValueId>,
    ) -> Option<ValueId> {
        let ret = match self.m.value_ty(target).unwrap_ptr() {
            Ty::Func { ret, .. } => (**ret).clone(),
            other => panic!("indirect call through non-function {}", other),
        };
        let inst = self.insert(
            InstKind::Call {
                callee: Callee::Indirect(target),
                args,
                tail: false,
            },
            ret,
        );
        self.m.func(self.func).inst(inst).result
    }

    pub fn build_extract_value(&mut self, agg: ValueId, index: u32) -> ValueId {
        let ty = match self.m.value_ty(agg) {
            Ty::Struct { fields } => fields[index as usize].clone(),
            other => panic!("extractvalue from non-struct {}", other),
        };
        let inst = self.insert(InstKind::ExtractValue { agg, index }, ty);
        self.result_of(inst)
    }

    pub fn build_insert_value(&mut self, agg: ValueId, elem: ValueId, index: u32) -> ValueId {
        let ty = self.m.value_ty(agg).clone();
        let inst = self.insert(InstKind::InsertValue { agg, elem, index }, ty);
        self.result_of(inst)
    }

    pub fn build_trap(&mut self) -> InstId {
        self.insert(InstKind::Trap, Ty::Void)
    }

    pub fn build_ret(&mut self, value: Option<ValueId>) -> InstId {
        self.set_terminator(InstKind::Ret { value })
    }

    pub fn build_br(&mut self, dest: BlockId) -> InstId {
        self.set_terminator(InstKind::Br { dest })
    }

    pub fn build_cond_br(
        &mut self,
        cond: ValueId,
        then_dest: BlockId,
        else_dest: BlockId,
    ) -> InstId {
        self.set_terminator(InstKind::CondBr {
            cond,
            then_dest,
            else_dest,
        })
    }

    pub fn build_unreachable(&mut self) -> InstId {
        self.set_terminator(InstKind::Unreachable)
    }
}

impl Module {
    pub(super) fn push_inst_result(&mut self, func: FuncId, inst: InstId, ty: Ty) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(ValueData {
            kind: ValueKind::Inst { func, inst },
            ty,
            name: None,
        });
        id
    }
}
