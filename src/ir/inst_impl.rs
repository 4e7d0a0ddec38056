use super::*;

impl InstKind {
    /// Returns true if this instruction ends a basic block
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstKind::Ret { .. }
                | InstKind::Br { .. }
                | InstKind::CondBr { .. }
                | InstKind::Unreachable
        )
    }

    /// All value operands, in operand order
    pub fn operands(&self) -> Vec<ValueId> {
        let mut out = Vec::new();
        let mut clone = self.clone();
        clone.visit_operands_mut(|v| out.push(*v));
        out
    }

    /// Visit every value operand mutably. Walks use sites only, so
    /// passes can rewrite operands in place.
    pub fn visit_operands_mut<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut ValueId),
    {
        match self {
            InstKind::Alloca { count, .. } => f(count),
            InstKind::Load { ptr } => f(ptr),
            InstKind::Store { value, ptr } => {
                f(value);
                f(ptr);
            }
            InstKind::Gep { base, indices } => {
                f(base);
                for idx in indices {
                    f(idx);
                }
            }
            InstKind::Cast { value, .. } => f(value),
            InstKind::Call { callee, args, .. } => {
                if let Callee::Indirect(target) = callee {
                    f(target);
                }
                for arg in args {
                    f(arg);
                }
            }
            InstKind::BinOp { lhs, rhs, .. } | InstKind::Icmp { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            InstKind::ExtractValue { agg, .. } => f(agg),
            InstKind::InsertValue { agg, elem, .. } => {
                f(agg);
                f(elem);
            }
            InstKind::Trap => {}
            InstKind::Ret { value } => {
                if let Some(v) = value {
                    f(v);
                }
            }
            InstKind::Br { .. } => {}
            InstKind::CondBr { cond, .. } => f(cond),
            InstKind::Unreachable => {}
        }
    }

    /// Opcode name for diagnostics
    pub fn opcode(&self) -> &'static str {
        match self {
            InstKind::Alloca { .. } => "alloca",
            InstKind::Load { .. } => "load",
            InstKind::Store { .. } => "store",
            InstKind::Gep { .. } => "gep",
            InstKind::Cast { op, .. } => match op {
                CastOp::Bitcast => "bitcast",
                CastOp::PtrToInt => "ptrtoint",
                CastOp::IntToPtr => "inttoptr",
                CastOp::Zext => "zext",
                CastOp::Sext => "sext",
                CastOp::Trunc => "trunc",
            },
            InstKind::Call { .. } => "call",
            InstKind::BinOp { op, .. } => match op {
                BinOpKind::Add => "add",
                BinOpKind::Sub => "sub",
                BinOpKind::Mul => "mul",
            },
            InstKind::Icmp { .. } => "icmp",
            InstKind::ExtractValue { .. } => "extractvalue",
            InstKind::InsertValue { .. } => "insertvalue",
            InstKind::Trap => "trap",
            InstKind::Ret { .. } => "ret",
            InstKind::Br { .. } => "br",
            InstKind::CondBr { .. } => "condbr",
            InstKind::Unreachable => "unreachable",
        }
    }
}
