//! Function-signature transformer and call-site rewriter.
//!
//! Every non-declaration, non-whitelisted function taking or returning
//! pointers gets a `_nesCheck` twin: one trailing size parameter per
//! pointer parameter, and a `{pointer, size}` aggregate return when
//! the original returned a pointer. The body moves across whole; the
//! old shell sticks around until the driver's final sweep so leftover
//! uses can be reported instead of dangling.

use crate::ir::{Builder, Callee, FuncId, InstId, InstKind, Ty};

use super::driver::Instrumenter;
use super::REWRITTEN_SUFFIX;

/// Pointer parameters and returns get a size companion; pointers to
/// functions carry no meaningful byte size and are left alone.
pub(super) fn needs_size_companion(ty: &Ty) -> bool {
    match ty.pointee() {
        Some(pointee) => !pointee.is_func(),
        None => false,
    }
}

impl<'m> Instrumenter<'m> {
    pub(super) fn rewrite_function_signature(&mut self, f: FuncId) -> FuncId {
        if self.cur_fully_whitelisted {
            // parameters still get records, with the unknown-size
            // sentinel, so analysis of callers stays coherent
            for p in self.m.func(f).params.clone() {
                if needs_size_companion(self.m.value_ty(p)) {
                    self.state.register(p);
                    self.state.set_size(p, Some(self.unknown_size));
                }
            }
            self.diag.trace(format!(
                "SKIPPED signature rewriting for {} (whitelisted)",
                self.m.func(f).name
            ));
            return f;
        }

        let old_params = self.m.func(f).params.clone();
        let mut size_param_names: Vec<String> = Vec::new();
        for (i, &p) in old_params.iter().enumerate() {
            if needs_size_companion(self.m.value_ty(p)) {
                let base = match &self.m.value(p).name {
                    Some(n) => n.clone(),
                    None => format!("arg{}", i),
                };
                size_param_names.push(format!("{}_size", base));
            }
        }
        let old_ret = self.m.func(f).ret_ty().clone();
        let widen_ret = needs_size_companion(&old_ret);
        if size_param_names.is_empty() && !widen_ret {
            return f;
        }

        self.stats.signatures_rewritten += 1;
        self.diag.trace(format!(
            "\n\n*********\n REWRITING SIGNATURE FOR FUNCTION: {}",
            self.m.func(f).name
        ));

        // assemble the new signature: original parameters (names kept),
        // then the size parameters, in pointer-parameter order
        let mut new_params: Vec<(Option<String>, Ty)> = old_params
            .iter()
            .map(|&p| {
                let data = self.m.value(p);
                (data.name.clone(), data.ty.clone())
            })
            .collect();
        for name in &size_param_names {
            new_params.push((Some(name.clone()), self.size_ty.clone()));
        }
        let new_ret = if widen_ret {
            Ty::Struct {
                fields: vec![old_ret, self.size_ty.clone()],
            }
        } else {
            old_ret
        };

        let name = format!("{}{}", self.m.func(f).name, REWRITTEN_SUFFIX);
        let linkage = self.m.func(f).linkage;
        let var_arg = self.m.func(f).is_var_arg();
        let param_refs: Vec<(Option<&str>, Ty)> = new_params
            .iter()
            .map(|(n, t)| (n.as_deref(), t.clone()))
            .collect();
        let nf = self.m.add_function(name, &param_refs, new_ret, var_arg, linkage);

        // splice the body across and re-home its values
        let blocks = std::mem::take(&mut self.m.func_mut(f).blocks);
        let insts = std::mem::take(&mut self.m.func_mut(f).insts);
        let entry = self.m.func(f).entry;
        let new_func = self.m.func_mut(nf);
        new_func.blocks = blocks;
        new_func.insts = insts;
        new_func.entry = entry;
        self.m.reparent_insts(f, nf);

        // redirect parameter uses, and bind each pointer parameter to
        // its size companion as an already-instantiated size slot
        let new_param_values = self.m.func(nf).params.clone();
        let mut next_size = old_params.len();
        for (i, &old_p) in old_params.iter().enumerate() {
            let new_p = new_param_values[i];
            self.m.replace_all_uses(old_p, new_p);
            if needs_size_companion(self.m.value_ty(new_p)) {
                let size_p = new_param_values[next_size];
                next_size += 1;
                self.state.register(new_p);
                self.state.set_size(new_p, Some(size_p));
                self.state.set_explicit_size_slot(new_p, size_p);
                self.state.set_slot_instantiated(new_p, true);
            }
        }

        self.diag.trace(format!(
            "New signature: {}",
            self.m.func(nf).ty
        ));

        if widen_ret {
            self.funcs_with_widened_ret.push(nf);
        }
        self.funcs_to_remove.push(f);

        nf
    }

    /// Rebuild a call whose callee has been superseded by its twin:
    /// original arguments, then a size argument per pointer argument,
    /// then any varargs. A widened return is split back apart with two
    /// extracts.
    pub(super) fn rewrite_call_site(&mut self, f: FuncId, call: InstId) {
        let (callee, args, tail) = match self.m.func(f).inst(call).kind.clone() {
            InstKind::Call {
                callee: Callee::Direct(c),
                args,
                tail,
            } => (c, args, tail),
            _ => return,
        };
        self.diag
            .trace(format!("Rewriting call to {}", self.m.func(callee).name));

        let fixed = self.m.func(callee).param_tys().len();
        let mut new_args = Vec::with_capacity(args.len());
        let mut size_args = Vec::new();
        for &arg in args.iter().take(fixed) {
            if needs_size_companion(self.m.value_ty(arg)) {
                // sizes live on the tracked value behind any loads
                let mut varr = arg;
                let mut varinfo = self.state.get(self.m, varr);
                while varinfo.is_none() {
                    match self
                        .m
                        .def_inst(varr)
                        .map(|(df, di)| self.m.func(df).inst(di).kind.clone())
                    {
                        Some(InstKind::Load { ptr }) => {
                            varr = ptr;
                            varinfo = self.state.get(self.m, varr);
                        }
                        _ => break,
                    }
                }
                if varinfo.is_none() && self.m.is_constant(varr) {
                    let size = self.oracle.size_of(self.m, varr);
                    varinfo = Some(self.state.set_size(varr, Some(size)));
                }
                match varinfo {
                    Some(vi) => size_args.push(vi.size),
                    None => {
                        self.diag.warn(format!(
                            "no size record for argument {} of call to {}; call left unrewritten",
                            self.m.value_name(arg),
                            self.m.func(callee).name
                        ));
                        return;
                    }
                }
            }
            new_args.push(arg);
        }
        // size arguments go after the fixed arguments, varargs last
        new_args.extend(size_args);
        new_args.extend(args.iter().skip(fixed).copied());

        let twin_name = format!("{}{}", self.m.func(callee).name, REWRITTEN_SUFFIX);
        let Some(twin) = self.m.get_function(&twin_name) else {
            self.diag.warn(format!(
                "rewritten twin {} not found; call left unrewritten",
                twin_name
            ));
            return;
        };

        let old_result = self.m.func(f).inst(call).result;
        let old_ret = self.m.func(callee).ret_ty().clone();
        let mut b = Builder::before(self.m, f, call);
        let (_, new_result) = b.build_call_inst(twin, new_args, tail);

        if needs_size_companion(&old_ret) {
            // split {pointer, size} back apart
            let agg = new_result.expect("widened callee returns a value");
            let orig = b.build_extract_value(agg, 0);
            let size = b.build_extract_value(agg, 1);
            drop(b);
            if let Some(old) = old_result {
                let name = self.m.value(old).name.clone();
                self.m.value_mut(orig).name =
                    name.or_else(|| Some(format!("{}.ret", twin_name)));
                self.m.replace_all_uses(old, orig);
            }
            self.state.register(orig);
            self.state.set_size(orig, Some(size));
        } else {
            drop(b);
            if let (Some(old), Some(new)) = (old_result, new_result) {
                let name = self.m.value(old).name.clone();
                if name.is_some() {
                    self.m.value_mut(new).name = name;
                }
                self.m.replace_all_uses(old, new);
            }
        }

        self.m.func_mut(f).detach_inst(call);
        self.stats.call_sites_rewritten += 1;
    }
}

#[cfg(test)]
mod tests;
