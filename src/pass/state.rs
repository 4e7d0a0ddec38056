//! Per-value abstract state: safety classification and size metadata.

use std::collections::HashMap;

use crate::ir::{Module, ValueId};

/// Safety class of a pointer value. Totally ordered; classification
/// during analysis only ever moves up the lattice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PtrClass {
    Unknown,
    /// Never offset, never cast across types: no check needed
    Safe,
    /// Used with pointer arithmetic: bounds check against known size
    Seq,
    /// Crosses a type-varying cast: size must survive in the runtime
    /// metadata table
    Dyn,
}

impl PtrClass {
    pub fn name(self) -> &'static str {
        match self {
            PtrClass::Unknown => "UNKNOWN",
            PtrClass::Safe => "SAFE",
            PtrClass::Seq => "SEQ",
            PtrClass::Dyn => "DYN",
        }
    }
}

/// What the pass knows about one SSA pointer value
#[derive(Debug, Clone, Copy)]
pub struct VarInfo {
    pub class: PtrClass,
    /// IR value computing the allocation size in bytes
    pub size: ValueId,
    pub has_table_entry: bool,
    pub has_explicit_size_slot: bool,
    /// Stack slot carrying the size across basic blocks, when present
    pub explicit_size_slot: Option<ValueId>,
    /// True while a load from the slot is live in the current block
    pub slot_instantiated: bool,
}

/// Per-class totals for the statistics report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassCounts {
    pub total: usize,
    pub safe: usize,
    pub seq: usize,
    pub dyn_: usize,
    pub table_entries: usize,
}

/// The abstract state store, keyed by SSA value identity. Records are
/// created lazily, default `{SAFE, 0}`, and are never removed.
#[derive(Debug, Default)]
pub struct AnalysisState {
    vars: HashMap<ValueId, VarInfo>,
    zero: Option<ValueId>,
    functions_seen: usize,
}

impl AnalysisState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the zero constant of the platform size type. Must be called
    /// before any record is created.
    pub fn set_size_zero(&mut self, zero: ValueId) {
        self.zero = Some(zero);
    }

    fn zero(&self) -> ValueId {
        self.zero.expect("size zero constant not set")
    }

    pub fn register_function(&mut self) {
        self.functions_seen += 1;
    }

    pub fn functions_seen(&self) -> usize {
        self.functions_seen
    }

    /// Create a record for `v` if none exists. Idempotent.
    pub fn register(&mut self, v: ValueId) {
        let zero = self.zero();
        self.vars.entry(v).or_insert(VarInfo {
            class: PtrClass::Safe,
            size: zero,
            has_table_entry: false,
            has_explicit_size_slot: false,
            explicit_size_slot: None,
            slot_instantiated: false,
        });
    }

    /// Raise the classification of `v`. Requests below or equal to the
    /// current class are ignored. Returns whether the request took.
    pub fn classify(&mut self, v: ValueId, class: PtrClass) -> bool {
        self.register(v);
        let info = self.vars.get_mut(&v).unwrap();
        if info.class < class {
            info.class = class;
            true
        } else {
            false
        }
    }

    /// Record the size of `v`; `None` resets it to zero (used on free).
    /// Returns a copy of the updated record.
    pub fn set_size(&mut self, v: ValueId, size: Option<ValueId>) -> VarInfo {
        self.register(v);
        let zero = self.zero();
        let info = self.vars.get_mut(&v).unwrap();
        info.size = size.unwrap_or(zero);
        *info
    }

    pub fn set_explicit_size_slot(&mut self, v: ValueId, slot: ValueId) {
        self.register(v);
        let info = self.vars.get_mut(&v).unwrap();
        info.has_explicit_size_slot = true;
        info.explicit_size_slot = Some(slot);
    }

    pub fn set_slot_instantiated(&mut self, v: ValueId, instantiated: bool) {
        self.register(v);
        self.vars.get_mut(&v).unwrap().slot_instantiated = instantiated;
    }

    pub fn mark_table_entry(&mut self, v: ValueId) {
        self.register(v);
        self.vars.get_mut(&v).unwrap().has_table_entry = true;
    }

    /// Fetch the record for `v`. The null pointer constant gets an
    /// ephemeral `{SAFE, 0}` record without anything being stored.
    pub fn get(&self, m: &Module, v: ValueId) -> Option<VarInfo> {
        if m.is_null_const(v) {
            return Some(VarInfo {
                class: PtrClass::Safe,
                size: self.zero(),
                has_table_entry: false,
                has_explicit_size_slot: false,
                explicit_size_slot: None,
                slot_instantiated: false,
            });
        }
        self.vars.get(&v).copied()
    }

    pub fn contains(&self, v: ValueId) -> bool {
        self.vars.contains_key(&v)
    }

    pub fn counts(&self) -> ClassCounts {
        let mut counts = ClassCounts {
            total: self.vars.len(),
            ..ClassCounts::default()
        };
        for info in self.vars.values() {
            match info.class {
                PtrClass::Safe => counts.safe += 1,
                PtrClass::Seq => counts.seq += 1,
                PtrClass::Dyn => counts.dyn_ += 1,
                PtrClass::Unknown => {}
            }
            if info.has_table_entry {
                counts.table_entries += 1;
            }
        }
        counts
    }

    /// Textual summary for the final report
    pub fn summary(&self) -> String {
        let counts = self.counts();
        let pct = |n: usize| {
            if counts.total > 0 {
                n as f64 * 100.0 / counts.total as f64
            } else {
                0.0
            }
        };
        let mut out = String::new();
        out.push_str(&format!("Found {} functions.\n", self.functions_seen));
        out.push_str(&format!("Found {} pointer variables:\n", counts.total));
        out.push_str(&format!(
            "-->) TOTAL Safe pointer variables:\t{} ({:.1}%)\n",
            counts.safe,
            pct(counts.safe)
        ));
        out.push_str(&format!(
            "-->) TOTAL Seq pointer variables:\t{} ({:.1}%)\n",
            counts.seq,
            pct(counts.seq)
        ));
        out.push_str(&format!(
            "-->) TOTAL Dyn pointer variables:\t{} ({:.1}%)\n",
            counts.dyn_,
            pct(counts.dyn_)
        ));
        out.push_str(&format!(
            "-->) TOTAL variables with metadata table entries:\t{}\n",
            counts.table_entries
        ));
        out
    }
}

#[cfg(test)]
mod tests;
