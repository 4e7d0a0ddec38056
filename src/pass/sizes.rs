//! Size and offset oracle.
//!
//! Preferred source is the static evaluator over the value graph
//! (globals, constant-count allocas, constant-size allocation calls);
//! when it cannot answer, a chain of manual fallbacks takes over. All
//! results are IR values of the platform size type, folded to
//! constants whenever possible.

use crate::ir::{
    Builder, Callee, CastOp, FuncId, InstId, InstKind, Module, Ty, ValueId, ValueKind,
};

use super::UNKNOWN_SIZE;

pub struct SizeOracle {
    size_ty: Ty,
    unknown: ValueId,
}

impl SizeOracle {
    pub fn new(m: &mut Module) -> Self {
        let size_ty = m.layout.int_ptr_ty();
        let unknown = m.const_int(size_ty.clone(), UNKNOWN_SIZE);
        Self { size_ty, unknown }
    }

    pub fn size_ty(&self) -> &Ty {
        &self.size_ty
    }

    /// The unknown-size sentinel constant
    pub fn unknown(&self) -> ValueId {
        self.unknown
    }

    /// Statically-known allocation size of the object `v` points at,
    /// looking through bitcasts and address arithmetic.
    pub fn known_size(&self, m: &Module, v: ValueId) -> Option<u64> {
        match &m.value(v).kind {
            ValueKind::NullPtr => Some(0),
            ValueKind::Global(g) => Some(m.layout.alloc_size(&m.global(*g).ty)),
            ValueKind::Inst { func, inst } => {
                match &m.func(*func).inst(*inst).kind {
                    InstKind::Alloca { allocated, count } => {
                        let n = m.const_value(*count)?;
                        Some(n as u64 * m.layout.alloc_size(allocated))
                    }
                    InstKind::Cast {
                        op: CastOp::Bitcast,
                        value,
                    } => self.known_size(m, *value),
                    InstKind::Gep { base, .. } => self.known_size(m, *base),
                    InstKind::Call {
                        callee: Callee::Direct(f),
                        args,
                        ..
                    } => {
                        let callee = m.func(*f);
                        match (callee.name.as_str(), callee.param_tys().len()) {
                            ("malloc", 1) => {
                                m.const_value(*args.first()?).map(|n| n as u64)
                            }
                            ("realloc", 2) => {
                                m.const_value(*args.get(1)?).map(|n| n as u64)
                            }
                            ("calloc", 2) => {
                                let count = m.const_value(*args.first()?)?;
                                let each = m.const_value(*args.get(1)?)?;
                                Some(count as u64 * each as u64)
                            }
                            _ => None,
                        }
                    }
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Best available size for `v` in bytes. Falls back, in order, to
    /// array totals, the pointer width for function types, the unknown
    /// sentinel for uninstrumented pointer-returning calls, the type's
    /// own size, and finally zero.
    pub fn size_of(&self, m: &mut Module, v: ValueId) -> ValueId {
        if let Some(size) = self.known_size(m, v) {
            return m.const_int(self.size_ty.clone(), size as i64);
        }
        let mut t = m.value_ty(v).clone();
        if let Some(pointee) = t.pointee() {
            t = pointee.clone();
        }
        if let Ty::Array { elem, len } = &t {
            let total = m.layout.alloc_size(elem) * len;
            return m.const_int(self.size_ty.clone(), total as i64);
        }
        if t.is_func() {
            let width = m.layout.ptr_bytes as i64;
            return m.const_int(self.size_ty.clone(), width);
        }
        let is_call = m
            .def_inst(v)
            .map(|(f, i)| matches!(m.func(f).inst(i).kind, InstKind::Call { .. }))
            .unwrap_or(false);
        if is_call && m.value_ty(v).is_ptr() {
            // a call into uninstrumented code returning a pointer: no info
            return self.unknown;
        }
        if t.is_sized() {
            let size = m.layout.alloc_size(&t) as i64;
            return m.const_int(self.size_ty.clone(), size);
        }
        m.const_int(self.size_ty.clone(), 0)
    }

    /// Byte offset a GEP applies to its base pointer. Constant-folded
    /// when every index is constant, otherwise emitted as
    /// `lastIndex * sizeof(elementType)` at the builder's position.
    pub fn offset_for_gep(&self, b: &mut Builder<'_>, func: FuncId, gep: InstId) -> ValueId {
        let (base, indices) = match b.module().func(func).inst(gep).kind.clone() {
            InstKind::Gep { base, indices } => (base, indices),
            other => unreachable!("offset_for_gep on {:?}", other.opcode()),
        };
        let m = b.module();
        let base_ty = m.value_ty(base).clone();
        if let Some(offset) = m.accumulate_constant_offset(&base_ty, &indices) {
            return m.const_int(self.size_ty.clone(), offset);
        }
        let elem_ty = m.gep_result_elem_ty(&base_ty, &indices);
        let elem_size = m.layout.store_size(&elem_ty) as i64;
        let last = *indices.last().expect("GEP has indices");
        let idx = b.build_int_cast(last, self.size_ty.clone(), false);
        let elem_size = b.module().const_int(self.size_ty.clone(), elem_size);
        b.build_mul(idx, elem_size)
    }
}
