use crate::ir::{Builder, Linkage, Module, Ty, verify_module};
use crate::pass::{NesCheckPass, PtrClass};

#[test]
fn runtime_support_functions_are_declared_when_absent() {
    let mut m = Module::new("t");
    let mut pass = NesCheckPass::default();
    pass.run_on_module(&mut m);

    for name in [
        "setMetadataTableEntry",
        "lookupMetadataTableEntry",
        "printErrorLine",
        "printCheck",
    ] {
        let f = m.get_function(name).unwrap_or_else(|| panic!("{} missing", name));
        assert!(m.func(f).is_declaration);
    }
}

#[test]
fn runtime_support_functions_are_never_analyzed() {
    let mut m = Module::new("t");
    // a module that carries the runtime library as definitions
    let word = Ty::Int(64);
    let f = m.add_function(
        "printErrorLine",
        &[(Some("ln"), word)],
        Ty::Void,
        false,
        Linkage::External,
    );
    {
        let entry = m.func(f).entry;
        let mut b = Builder::at_end(&mut m, f, entry);
        b.build_ret(None);
    }

    let mut pass = NesCheckPass::default();
    pass.run_on_module(&mut m);

    assert_eq!(pass.stats.functions_found, 0);
    assert!(m.get_function("printErrorLine_nesCheck").is_none());
}

#[test]
fn module_globals_are_registered_with_their_sizes() {
    let mut m = Module::new("t");
    let g = m.add_global(
        "table",
        Ty::Array {
            elem: Box::new(Ty::Int(32)),
            len: 10,
        },
    );
    let gv = m.global(g).value;

    let mut pass = NesCheckPass::default();
    pass.run_on_module(&mut m);

    let info = pass.state.get(&m, gv).expect("global is registered");
    assert_eq!(info.class, PtrClass::Safe);
    assert_eq!(m.const_value(info.size), Some(40));
}

#[test]
fn pointer_free_modules_are_reported_unchanged() {
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
    {
        let entry = m.func(f).entry;
        let mut b = Builder::at_end(&mut m, f, entry);
        let sum = b.build_add(a, b_param);
        b.build_ret(Some(sum));
    }

    let mut pass = NesCheckPass::default();
    let changed = pass.run_on_module(&mut m);

    assert!(!changed);
    assert_eq!(pass.stats.functions_found, 1);
    assert!(verify_module(&m).is_ok());
}

#[test]
fn declarations_are_skipped() {
    let mut m = Module::new("t");
    let i8p = Ty::ptr_to(Ty::Int(8));
    m.declare_function("memcpy", &[i8p.clone(), i8p.clone(), Ty::Int(64)], i8p, false);

    let mut pass = NesCheckPass::default();
    pass.run_on_module(&mut m);

    assert_eq!(pass.stats.functions_found, 0);
    assert!(m.get_function("memcpy_nesCheck").is_none());
    assert!(m.get_function("memcpy").is_some());
}

#[test]
fn class_totals_flow_into_the_stats() {
    let mut m = Module::new("t");
    let i8p = Ty::ptr_to(Ty::Int(8));
    let malloc = m.declare_function("malloc", &[Ty::Int(64)], i8p, false);
    let f = m.add_function("main", &[], Ty::Void, false, Linkage::External);
    let entry = m.func(f).entry;
    let n = m.const_int(Ty::Int(64), 32);
    let two = m.const_int(Ty::Int(64), 2);
    {
        let mut b = Builder::at_end(&mut m, f, entry);
        let raw = b.build_call(malloc, vec![n]).unwrap();
        let p = b.build_bitcast(raw, Ty::ptr_to(Ty::Int(32)));
        b.build_gep(p, vec![two]);
        b.build_ret(None);
    }

    let mut pass = NesCheckPass::default();
    pass.run_on_module(&mut m);

    let counts = pass.state.counts();
    assert_eq!(pass.stats.seq_ptrs, counts.seq as u64);
    assert_eq!(pass.stats.safe_ptrs, counts.safe as u64);
    assert_eq!(pass.stats.dyn_ptrs, counts.dyn_ as u64);
    assert!(counts.seq >= 1);
}
