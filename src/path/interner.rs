// src/path/interner.rs

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Deduplicating string store for paths.
///
/// Equal strings come back as the same `Arc<str>`, so hot comparisons can use
/// [`Arc::ptr_eq`] instead of comparing bytes.
#[derive(Debug, Default)]
pub struct Interner {
    strings: Mutex<HashSet<Arc<str>>>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&self, s: &str) -> Arc<str> {
        let mut strings = self.strings.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = strings.get(s) {
            return Arc::clone(existing);
        }
        let interned: Arc<str> = Arc::from(s);
        strings.insert(Arc::clone(&interned));
        interned
    }

    pub fn len(&self) -> usize {
        self.strings.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
