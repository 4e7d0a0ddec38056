//! Runtime support library for instrumented programs.
//!
//! Instrumented IR calls four symbols with the C calling convention,
//! all taking platform word-sized integers:
//! - `setMetadataTableEntry(p, size, addr)`: record or overwrite the
//!   size for pointer `p`
//! - `lookupMetadataTableEntry(p)`: fetch the recorded size, 0 on miss
//! - `printErrorLine(ln)`: report a failed bounds check
//! - `printCheck()`: debug marker, compiled out without the
//!   `runtime-debug` feature
//!
//! The table is a process-global array of `{ptr, size}` records with
//! linear scan and append-on-miss. That is quadratic in the worst
//! case; this is instrumentation, not a production data structure.

use std::sync::{Mutex, OnceLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetadataEntry {
    pub ptr: i64,
    pub size: i64,
}

/// Linear-scan pointer-to-size table
#[derive(Debug, Default)]
pub struct MetadataTable {
    entries: Vec<MetadataEntry>,
}

impl MetadataTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn find_mut(&mut self, ptr: i64) -> Option<&mut MetadataEntry> {
        self.entries.iter_mut().find(|e| e.ptr == ptr)
    }

    /// Record `size` for `ptr`: overwrite if present, append if not
    pub fn set(&mut self, ptr: i64, size: i64) {
        match self.find_mut(ptr) {
            Some(entry) => entry.size = size,
            None => self.entries.push(MetadataEntry { ptr, size }),
        }
    }

    /// Recorded size for `ptr`, or zero when absent
    pub fn lookup(&self, ptr: i64) -> i64 {
        self.entries
            .iter()
            .find(|e| e.ptr == ptr)
            .map(|e| e.size)
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn global_table() -> &'static Mutex<MetadataTable> {
    static TABLE: OnceLock<Mutex<MetadataTable>> = OnceLock::new();
    TABLE.get_or_init(|| Mutex::new(MetadataTable::new()))
}

// The exported names are fixed by the instrumented-IR ABI.

#[allow(non_snake_case)]
#[no_mangle]
pub extern "C" fn setMetadataTableEntry(p: i64, size: i64, addr: i64) {
    #[cfg(feature = "runtime-debug")]
    println!("[{},{},{}]", addr, p, size);
    let _ = addr;
    let mut table = global_table().lock().expect("metadata table poisoned");
    table.set(p, size);
}

#[allow(non_snake_case)]
#[no_mangle]
pub extern "C" fn lookupMetadataTableEntry(p: i64) -> i64 {
    let table = global_table().lock().expect("metadata table poisoned");
    table.lookup(p)
}

#[allow(non_snake_case)]
#[no_mangle]
pub extern "C" fn printErrorLine(ln: i64) {
    println!("Memory error near line {}.", ln);
}

#[allow(non_snake_case)]
#[no_mangle]
pub extern "C" fn printCheck() {
    // disabled by default or the output of a real program gets
    // gigabytes big
    #[cfg(feature = "runtime-debug")]
    print!("?");
}
