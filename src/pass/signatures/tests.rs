use crate::ir::{
    Builder, Callee, InstKind, Linkage, Module, Ty, verify_module,
};
use crate::pass::{NesCheckPass, UNKNOWN_SIZE};

fn pointer_identity_module() -> (Module, crate::ir::FuncId) {
    // int* g(int* q, int n) { return &q[1]; }
    let mut m = Module::new("t");
    let i32p = Ty::ptr_to(Ty::Int(32));
    let g = m.add_function(
        "g",
        &[(Some("q"), i32p.clone()), (Some("n"), Ty::Int(32))],
        i32p,
        false,
        Linkage::External,
    );
    let q = m.func(g).params[0];
    let entry = m.func(g).entry;
    let one = m.const_int(Ty::Int(64), 1);
    let mut b = Builder::at_end(&mut m, g, entry);
    let gep = b.build_gep(q, vec![one]);
    b.build_ret(Some(gep));
    (m, g)
}

#[test]
fn pointer_params_get_trailing_size_companions() {
    let (mut m, _) = pointer_identity_module();
    let mut pass = NesCheckPass::default();
    pass.run_on_module(&mut m);

    let twin = m.get_function("g_nesCheck").expect("twin exists");
    let func = m.func(twin);
    // old param count + one size param per pointer param
    assert_eq!(func.params.len(), 3);
    let names: Vec<_> = func
        .params
        .iter()
        .map(|&p| m.value(p).name.clone().unwrap())
        .collect();
    assert_eq!(names, vec!["q", "n", "q_size"]);
    assert_eq!(*m.value_ty(func.params[2]), Ty::Int(64));
    assert_eq!(pass.stats.signatures_rewritten, 1);

    // the original shell had no uses left and is gone
    assert!(m.get_function("g").is_none());
    assert!(verify_module(&m).is_ok());
}

#[test]
fn pointer_return_is_widened_to_an_aggregate() {
    let (mut m, _) = pointer_identity_module();
    let mut pass = NesCheckPass::default();
    pass.run_on_module(&mut m);

    let twin = m.get_function("g_nesCheck").unwrap();
    assert_eq!(
        *m.func(twin).ret_ty(),
        Ty::Struct {
            fields: vec![Ty::ptr_to(Ty::Int(32)), Ty::Int(64)],
        }
    );
}

#[test]
fn pointer_params_are_bound_to_their_size_companions() {
    let (mut m, _) = pointer_identity_module();
    let mut pass = NesCheckPass::default();
    pass.run_on_module(&mut m);

    let twin = m.get_function("g_nesCheck").unwrap();
    let q = m.func(twin).params[0];
    let q_size = m.func(twin).params[2];
    let info = pass.state.get(&m, q).expect("param is registered");
    assert_eq!(info.size, q_size);
    assert!(info.has_explicit_size_slot);
    assert_eq!(info.explicit_size_slot, Some(q_size));
    assert!(info.slot_instantiated);
}

#[test]
fn return_instruction_builds_the_widened_aggregate() {
    let (mut m, _) = pointer_identity_module();
    let mut pass = NesCheckPass::default();
    pass.run_on_module(&mut m);

    let twin = m.get_function("g_nesCheck").unwrap();
    let func = m.func(twin);
    let ret = func
        .blocks
        .iter()
        .filter_map(|b| b.term)
        .find(|&t| matches!(func.inst(t).kind, InstKind::Ret { .. }))
        .expect("twin returns");
    let InstKind::Ret { value: Some(agg) } = func.inst(ret).kind.clone() else {
        panic!("return carries a value");
    };
    // insertvalue of the size at field 1, on top of an insertvalue of
    // the original pointer at field 0
    let (_, outer) = m.def_inst(agg).unwrap();
    let InstKind::InsertValue {
        agg: inner,
        index: 1,
        elem,
    } = func.inst(outer).kind.clone()
    else {
        panic!("outer insert is the size field");
    };
    // the size is q_size minus the element size the GEP stepped over
    let (_, size_def) = m.def_inst(elem).unwrap();
    assert!(matches!(
        func.inst(size_def).kind,
        InstKind::BinOp { op: crate::ir::BinOpKind::Sub, .. }
    ));
    let (_, inner) = m.def_inst(inner).unwrap();
    assert!(matches!(
        func.inst(inner).kind,
        InstKind::InsertValue { index: 0, .. }
    ));
    assert!(verify_module(&m).is_ok());
}

#[test]
fn call_sites_are_rewritten_against_the_twin() {
    let (mut m, g) = pointer_identity_module();
    let i8p = Ty::ptr_to(Ty::Int(8));
    let malloc = m.declare_function("malloc", &[Ty::Int(64)], i8p, false);
    let caller = m.add_function("main", &[], Ty::Void, false, Linkage::External);
    let entry = m.func(caller).entry;
    let n = m.const_int(Ty::Int(64), 12);
    let seven = m.const_int(Ty::Int(32), 7);
    {
        let mut b = Builder::at_end(&mut m, caller, entry);
        let raw = b.build_call(malloc, vec![n]).unwrap();
        let p = b.build_bitcast(raw, Ty::ptr_to(Ty::Int(32)));
        let r = b.build_call(g, vec![p, seven]).unwrap();
        b.build_load(r);
        b.build_ret(None);
    }

    let mut pass = NesCheckPass::default();
    pass.run_on_module(&mut m);

    assert_eq!(pass.stats.call_sites_rewritten, 1);
    let twin = m.get_function("g_nesCheck").unwrap();

    // no live call names the old function anymore; the new call passes
    // the pointer's size after the fixed arguments
    let func = m.func(caller);
    let mut saw_twin_call = false;
    for data in func.insts.iter().filter(|d| !d.detached) {
        if let InstKind::Call {
            callee: Callee::Direct(c),
            args,
            ..
        } = &data.kind
        {
            assert_ne!(*c, g, "old callee still referenced");
            if *c == twin {
                saw_twin_call = true;
                assert_eq!(args.len(), 3);
                assert_eq!(m.const_value(args[2]), Some(12));
            }
        }
    }
    assert!(saw_twin_call);

    // the widened return was split apart and the original result's
    // uses now flow from the extract
    let extracts: Vec<_> = func
        .insts
        .iter()
        .filter(|d| !d.detached)
        .filter_map(|d| match d.kind {
            InstKind::ExtractValue { index, .. } => Some(index),
            _ => None,
        })
        .collect();
    assert_eq!(extracts, vec![0, 1]);
    let load_ptr = func
        .insts
        .iter()
        .filter(|d| !d.detached)
        .find_map(|d| match d.kind {
            InstKind::Load { ptr } => Some(ptr),
            _ => None,
        })
        .expect("load survives");
    let (_, load_src) = m.def_inst(load_ptr).unwrap();
    assert!(matches!(
        m.func(caller).inst(load_src).kind,
        InstKind::ExtractValue { index: 0, .. }
    ));
    assert!(m.get_function("g").is_none());
    assert!(verify_module(&m).is_ok());
}

#[test]
fn size_arguments_come_before_varargs() {
    let mut m = Module::new("t");
    let i32p = Ty::ptr_to(Ty::Int(32));
    let v = m.add_function(
        "logv",
        &[(Some("buf"), i32p.clone())],
        Ty::Void,
        true,
        Linkage::External,
    );
    {
        let entry = m.func(v).entry;
        let mut b = Builder::at_end(&mut m, v, entry);
        b.build_ret(None);
    }
    let caller = m.add_function("main", &[], Ty::Void, false, Linkage::External);
    let entry = m.func(caller).entry;
    let one = m.const_int(Ty::Int(64), 1);
    let extra1 = m.const_int(Ty::Int(32), 41);
    let extra2 = m.const_int(Ty::Int(32), 42);
    {
        let mut b = Builder::at_end(&mut m, caller, entry);
        let arr = b.build_alloca(Ty::Int(32), one);
        b.build_call(v, vec![arr, extra1, extra2]);
        b.build_ret(None);
    }

    let mut pass = NesCheckPass::default();
    pass.run_on_module(&mut m);

    let twin = m.get_function("logv_nesCheck").unwrap();
    assert!(m.func(twin).is_var_arg());
    let func = m.func(caller);
    let args = func
        .insts
        .iter()
        .filter(|d| !d.detached)
        .find_map(|d| match &d.kind {
            InstKind::Call {
                callee: Callee::Direct(c),
                args,
                ..
            } if *c == twin => Some(args.clone()),
            _ => None,
        })
        .expect("rewritten call exists");
    // buf, buf_size, then the two varargs in their original order
    assert_eq!(args.len(), 4);
    assert_eq!(m.const_value(args[1]), Some(4));
    assert_eq!(args[2], extra1);
    assert_eq!(args[3], extra2);
}

#[test]
fn functions_without_pointers_are_left_alone() {
    let mut m = Module::new("t");
    let f = m.add_function(
        "add",
        &[(Some("a"), Ty::Int(32)), (Some("b"), Ty::Int(32))],
        Ty::Int(32),
        false,
        Linkage::External,
    );
    let a = m.func(f).params[0];
    let b_param = m.func(f).params[1];
    let entry = m.func(f).entry;
    {
        let mut b = Builder::at_end(&mut m, f, entry);
        let sum = b.build_add(a, b_param);
        b.build_ret(Some(sum));
    }

    let mut pass = NesCheckPass::default();
    let changed = pass.run_on_module(&mut m);

    assert!(!changed);
    assert_eq!(pass.stats.signatures_rewritten, 0);
    assert!(m.get_function("add").is_some());
    assert!(m.get_function("add_nesCheck").is_none());
}

#[test]
fn function_pointer_parameters_get_no_size_companion() {
    let mut m = Module::new("t");
    let callback = Ty::ptr_to(Ty::Func {
        params: vec![Ty::Int(32)],
        ret: Box::new(Ty::Int(32)),
        var_arg: false,
    });
    let f = m.add_function(
        "apply",
        &[(Some("cb"), callback)],
        Ty::Void,
        false,
        Linkage::External,
    );
    let entry = m.func(f).entry;
    {
        let mut b = Builder::at_end(&mut m, f, entry);
        b.build_ret(None);
    }

    let mut pass = NesCheckPass::default();
    pass.run_on_module(&mut m);

    assert_eq!(pass.stats.signatures_rewritten, 0);
    assert!(m.get_function("apply_nesCheck").is_none());
}

#[test]
fn whitelisted_function_params_carry_the_unknown_sentinel() {
    let mut m = Module::new("t");
    let i32p = Ty::ptr_to(Ty::Int(32));
    let f = m.add_function(
        "hashtable_insert",
        &[(Some("table"), i32p)],
        Ty::Void,
        false,
        Linkage::External,
    );
    let table = m.func(f).params[0];
    let entry = m.func(f).entry;
    {
        let mut b = Builder::at_end(&mut m, f, entry);
        b.build_ret(None);
    }

    let mut pass = NesCheckPass::default();
    pass.run_on_module(&mut m);

    assert!(m.get_function("hashtable_insert_nesCheck").is_none());
    let info = pass.state.get(&m, table).unwrap();
    assert_eq!(m.const_value(info.size), Some(UNKNOWN_SIZE));
}

#[test]
fn shells_with_remaining_uses_are_kept() {
    let mut m = Module::new("t");
    let i32p = Ty::ptr_to(Ty::Int(32));
    let w = m.add_function(
        "w",
        &[(Some("p"), i32p.clone())],
        Ty::Void,
        false,
        Linkage::External,
    );
    {
        let entry = m.func(w).entry;
        let mut b = Builder::at_end(&mut m, w, entry);
        b.build_ret(None);
    }
    // the function's address escapes into a global slot, a use the
    // rewriter cannot redirect
    let w_ty = m.func(w).ty.clone();
    let g = m.add_global("handler", Ty::ptr_to(w_ty));
    let gv = m.global(g).value;
    let main = m.add_function("main", &[], Ty::Void, false, Linkage::External);
    let entry = m.func(main).entry;
    let w_addr = m.func(w).value;
    {
        let mut b = Builder::at_end(&mut m, main, entry);
        b.build_store(w_addr, gv);
        b.build_ret(None);
    }

    let mut pass = NesCheckPass::default();
    pass.run_on_module(&mut m);

    // the twin exists, but the old shell survives because its address
    // is still taken
    assert!(m.get_function("w_nesCheck").is_some());
    assert!(m.get_function("w").is_some());
}
