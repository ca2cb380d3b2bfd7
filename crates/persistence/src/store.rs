//! Call store contract and in-memory implementation

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use call_agent_core::{CallId, TerminalCause, Turn};

use crate::PersistenceError;

/// Everything persisted about one call
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub call_id: CallId,
    pub tenant: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub cause: Option<TerminalCause>,
    pub turns: Vec<Turn>,
}

/// Append-only call storage
#[async_trait]
pub trait CallStore: Send + Sync {
    /// Register a call before its first turn
    async fn create_call(&self, call_id: &CallId, tenant: &str) -> Result<(), PersistenceError>;

    /// Append one finalized turn; turns arrive in strictly increasing
    /// sequence order within a call
    async fn append_turn(&self, call_id: &CallId, turn: &Turn) -> Result<(), PersistenceError>;

    /// Record the terminal status; exactly once per call
    async fn finish_call(
        &self,
        call_id: &CallId,
        cause: TerminalCause,
    ) -> Result<(), PersistenceError>;
}

/// In-memory store for tests and the dev server
#[derive(Default)]
pub struct MemoryCallStore {
    calls: RwLock<HashMap<String, CallRecord>>,
}

impl MemoryCallStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot one call's record
    pub fn get(&self, call_id: &CallId) -> Option<CallRecord> {
        self.calls.read().get(call_id.as_str()).cloned()
    }

    pub fn len(&self) -> usize {
        self.calls.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.read().is_empty()
    }
}

#[async_trait]
impl CallStore for MemoryCallStore {
    async fn create_call(&self, call_id: &CallId, tenant: &str) -> Result<(), PersistenceError> {
        let mut calls = self.calls.write();
        calls.insert(
            call_id.as_str().to_string(),
            CallRecord {
                call_id: call_id.clone(),
                tenant: tenant.to_string(),
                started_at: Utc::now(),
                ended_at: None,
                cause: None,
                turns: Vec::new(),
            },
        );
        Ok(())
    }

    async fn append_turn(&self, call_id: &CallId, turn: &Turn) -> Result<(), PersistenceError> {
        let mut calls = self.calls.write();
        let record = calls
            .get_mut(call_id.as_str())
            .ok_or_else(|| PersistenceError::UnknownCall(call_id.to_string()))?;

        record.turns.push(turn.clone());
        Ok(())
    }

    async fn finish_call(
        &self,
        call_id: &CallId,
        cause: TerminalCause,
    ) -> Result<(), PersistenceError> {
        let mut calls = self.calls.write();
        let record = calls
            .get_mut(call_id.as_str())
            .ok_or_else(|| PersistenceError::UnknownCall(call_id.to_string()))?;

        if record.cause.is_some() {
            return Err(PersistenceError::AlreadyFinished(call_id.to_string()));
        }

        record.ended_at = Some(Utc::now());
        record.cause = Some(cause);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_round_trip() {
        let store = MemoryCallStore::new();
        let call_id = CallId::generate();

        store.create_call(&call_id, "default").await.unwrap();
        store
            .append_turn(&call_id, &Turn::caller(1, "hello", 0.9))
            .await
            .unwrap();
        store
            .append_turn(&call_id, &Turn::agent(2, "hi", false))
            .await
            .unwrap();
        store
            .finish_call(&call_id, TerminalCause::CallerHangup)
            .await
            .unwrap();

        let record = store.get(&call_id).unwrap();
        assert_eq!(record.turns.len(), 2);
        assert_eq!(record.turns[0].seq, 1);
        assert_eq!(record.cause, Some(TerminalCause::CallerHangup));
        assert!(record.ended_at.is_some());
    }

    #[tokio::test]
    async fn test_unknown_call_rejected() {
        let store = MemoryCallStore::new();
        let err = store
            .append_turn(&CallId::generate(), &Turn::caller(1, "x", 0.5))
            .await;
        assert!(matches!(err, Err(PersistenceError::UnknownCall(_))));
    }

    #[tokio::test]
    async fn test_double_finish_rejected() {
        let store = MemoryCallStore::new();
        let call_id = CallId::generate();
        store.create_call(&call_id, "default").await.unwrap();
        store
            .finish_call(&call_id, TerminalCause::AgentHangup)
            .await
            .unwrap();
        assert!(store
            .finish_call(&call_id, TerminalCause::Error)
            .await
            .is_err());
    }
}
