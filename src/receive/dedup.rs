//! Duplicate elimination
//!
//! A distributed scan may return the same logical row from more than one
//! shard (for example while a partition migrates). Rows are identified by
//! the canonical encoding of their primary-key fields; the set only grows
//! for the lifetime of the query and is charged to the memory ledger.

use std::collections::HashSet;
use std::mem;

use crate::errors::{QueryError, QueryResult};
use crate::runtime::MemoryLedger;
use crate::value::Value;

#[derive(Debug)]
pub struct DuplicateSet {
    key_fields: Vec<String>,
    seen: HashSet<Vec<u8>>,
    memory: u64,
}

impl DuplicateSet {
    pub fn new(key_fields: Vec<String>) -> Self {
        Self {
            key_fields,
            seen: HashSet::new(),
            memory: 0,
        }
    }

    /// Records the row's key; returns true if it was already returned
    pub fn is_duplicate(&mut self, row: &Value, ledger: &MemoryLedger) -> QueryResult<bool> {
        let record = row.as_record().ok_or_else(|| {
            QueryError::defect(format!(
                "duplicate elimination needs records, got {}",
                row.type_name()
            ))
        })?;
        let mut key = Vec::with_capacity(16 * self.key_fields.len());
        for field in &self.key_fields {
            record
                .get(field)
                .unwrap_or(&Value::Empty)
                .write_key_bytes(&mut key);
        }
        if self.seen.contains(&key) {
            return Ok(true);
        }
        let size = (key.capacity() + mem::size_of::<Vec<u8>>()) as u64;
        ledger.charge(size)?;
        self.memory += size;
        self.seen.insert(key);
        Ok(false)
    }

    /// Bytes charged for the set
    pub fn memory(&self) -> u64 {
        self.memory
    }

    pub fn release(&mut self, ledger: &MemoryLedger) {
        ledger.release(self.memory);
        self.memory = 0;
        self.seen.clear();
    }
}
