//! Existence ledger with operation tracing.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use herald_core::{Error, ExistenceLedger, LedgerKey, Result};

/// Record of a ledger operation for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerOp {
    /// Existence check.
    Exists(String),
    /// Touch.
    Touch(String),
}

/// In-memory [`ExistenceLedger`] recording every operation.
#[derive(Debug, Clone, Default)]
pub struct RecordingLedger {
    keys: Arc<Mutex<HashSet<String>>>,
    operations: Arc<Mutex<Vec<LedgerOp>>>,
    exists_failure: Arc<Mutex<Option<String>>>,
    touch_failure: Arc<Mutex<Option<String>>>,
}

impl RecordingLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a ledger that already holds `keys`.
    pub fn with_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ledger = Self::default();
        ledger
            .keys
            .lock()
            .expect("lock")
            .extend(keys.into_iter().map(Into::into));
        ledger
    }

    /// Makes every `exists` call fail with a storage error carrying `message`.
    pub fn fail_exists(&self, message: impl Into<String>) {
        *self.exists_failure.lock().expect("lock") = Some(message.into());
    }

    /// Makes every `touch` call fail with a storage error carrying `message`.
    pub fn fail_touch(&self, message: impl Into<String>) {
        *self.touch_failure.lock().expect("lock") = Some(message.into());
    }

    /// Returns all recorded operations.
    pub fn operations(&self) -> Vec<LedgerOp> {
        self.operations.lock().expect("lock").clone()
    }

    /// Returns recorded touches.
    pub fn touches(&self) -> Vec<String> {
        self.operations()
            .into_iter()
            .filter_map(|op| match op {
                LedgerOp::Touch(key) => Some(key),
                LedgerOp::Exists(_) => None,
            })
            .collect()
    }

    /// Returns true if the key is present.
    pub fn contains(&self, key: &str) -> bool {
        self.keys.lock().expect("lock").contains(key)
    }

    fn record(&self, op: LedgerOp) {
        self.operations.lock().expect("lock").push(op);
    }

    fn check_failure(slot: &Mutex<Option<String>>) -> Result<()> {
        match slot.lock().expect("lock").as_ref() {
            Some(message) => Err(Error::storage(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ExistenceLedger for RecordingLedger {
    async fn exists(&self, key: &LedgerKey) -> Result<bool> {
        self.record(LedgerOp::Exists(key.to_string()));
        Self::check_failure(&self.exists_failure)?;
        Ok(self.contains(key.as_str()))
    }

    async fn touch(&self, key: &LedgerKey) -> Result<()> {
        self.record(LedgerOp::Touch(key.to_string()));
        Self::check_failure(&self.touch_failure)?;
        self.keys.lock().expect("lock").insert(key.to_string());
        Ok(())
    }
}
