use super::*;
use crate::ir::{Module, Ty, ValueId};

fn state_with_zero(m: &mut Module) -> (AnalysisState, ValueId) {
    let zero = m.const_int(Ty::Int(64), 0);
    let mut state = AnalysisState::new();
    state.set_size_zero(zero);
    (state, zero)
}

#[test]
fn register_defaults_safe_with_zero_size() {
    let mut m = Module::new("t");
    let (mut state, zero) = state_with_zero(&mut m);
    let v = m.const_int(Ty::Int(64), 42);
    state.register(v);
    let info = state.get(&m, v).unwrap();
    assert_eq!(info.class, PtrClass::Safe);
    assert_eq!(info.size, zero);
    assert!(!info.has_table_entry);
    assert!(!info.has_explicit_size_slot);
}

#[test]
fn classification_is_monotonic() {
    let mut m = Module::new("t");
    let (mut state, _) = state_with_zero(&mut m);
    let v = m.const_int(Ty::Int(64), 1);

    assert!(state.classify(v, PtrClass::Seq));
    assert_eq!(state.get(&m, v).unwrap().class, PtrClass::Seq);

    // lesser and equal requests are ignored
    assert!(!state.classify(v, PtrClass::Safe));
    assert!(!state.classify(v, PtrClass::Seq));
    assert_eq!(state.get(&m, v).unwrap().class, PtrClass::Seq);

    assert!(state.classify(v, PtrClass::Dyn));
    assert_eq!(state.get(&m, v).unwrap().class, PtrClass::Dyn);
    assert!(!state.classify(v, PtrClass::Seq));
    assert_eq!(state.get(&m, v).unwrap().class, PtrClass::Dyn);
}

#[test]
fn final_class_is_max_of_all_requests() {
    let mut m = Module::new("t");
    let (mut state, _) = state_with_zero(&mut m);
    let v = m.const_int(Ty::Int(64), 1);
    for class in [
        PtrClass::Seq,
        PtrClass::Safe,
        PtrClass::Dyn,
        PtrClass::Seq,
        PtrClass::Safe,
    ] {
        state.classify(v, class);
    }
    assert_eq!(state.get(&m, v).unwrap().class, PtrClass::Dyn);
}

#[test]
fn set_size_none_resets_to_zero() {
    let mut m = Module::new("t");
    let (mut state, zero) = state_with_zero(&mut m);
    let v = m.const_int(Ty::Int(64), 1);
    let size = m.const_int(Ty::Int(64), 64);
    state.set_size(v, Some(size));
    assert_eq!(state.get(&m, v).unwrap().size, size);
    state.set_size(v, None);
    assert_eq!(state.get(&m, v).unwrap().size, zero);
}

#[test]
fn null_pointer_gets_ephemeral_record() {
    let mut m = Module::new("t");
    let (state, zero) = state_with_zero(&mut m);
    let null = m.null_ptr(Ty::ptr_to(Ty::Int(8)));
    let info = state.get(&m, null).unwrap();
    assert_eq!(info.class, PtrClass::Safe);
    assert_eq!(info.size, zero);
    // nothing was recorded
    assert!(!state.contains(null));
    assert_eq!(state.counts().total, 0);
}

#[test]
fn unknown_values_have_no_record() {
    let mut m = Module::new("t");
    let (state, _) = state_with_zero(&mut m);
    let v = m.const_int(Ty::Int(64), 9);
    assert!(state.get(&m, v).is_none());
}

#[test]
fn counts_group_by_class_and_table_entries() {
    let mut m = Module::new("t");
    let (mut state, _) = state_with_zero(&mut m);
    let a = m.const_int(Ty::Int(64), 1);
    let b = m.const_int(Ty::Int(64), 2);
    let c = m.const_int(Ty::Int(64), 3);
    state.register(a);
    state.classify(b, PtrClass::Seq);
    state.classify(c, PtrClass::Dyn);
    state.mark_table_entry(c);
    let counts = state.counts();
    assert_eq!(counts.total, 3);
    assert_eq!(counts.safe, 1);
    assert_eq!(counts.seq, 1);
    assert_eq!(counts.dyn_, 1);
    assert_eq!(counts.table_entries, 1);
}

#[test]
fn explicit_slot_bookkeeping() {
    let mut m = Module::new("t");
    let (mut state, _) = state_with_zero(&mut m);
    let v = m.const_int(Ty::Int(64), 1);
    let slot = m.const_int(Ty::Int(64), 2);
    state.set_explicit_size_slot(v, slot);
    let info = state.get(&m, v).unwrap();
    assert!(info.has_explicit_size_slot);
    assert_eq!(info.explicit_size_slot, Some(slot));
    assert!(!info.slot_instantiated);
    state.set_slot_instantiated(v, true);
    assert!(state.get(&m, v).unwrap().slot_instantiated);
}
