//! Process-wide registry of active calls

use crate::domain::session::SessionState;
use crate::domain::shared::error::RelayError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{AiSessionId, CallSid, SessionId, StreamSid};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Summary of one active call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveCall {
    pub session_id: SessionId,
    pub stream_sid: StreamSid,
    pub call_id: CallSid,
    pub ai_session_id: Option<AiSessionId>,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
}

impl ActiveCall {
    pub fn duration_seconds(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds().max(0)
    }
}

struct Entry {
    call: ActiveCall,
    shutdown: CancellationToken,
}

/// Active calls keyed by telephony stream identifier
#[derive(Clone, Default)]
pub struct CallRegistry {
    calls: Arc<RwLock<HashMap<StreamSid, Entry>>>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a call. The token is cancelled on process shutdown.
    pub async fn insert(&self, call: ActiveCall, shutdown: CancellationToken) -> Result<()> {
        let mut calls = self.calls.write().await;
        if calls.contains_key(&call.stream_sid) {
            return Err(RelayError::AlreadyExists(format!(
                "Call with stream {} is already active",
                call.stream_sid
            )));
        }
        calls.insert(call.stream_sid.clone(), Entry { call, shutdown });
        Ok(())
    }

    /// Update state and the realtime session id of a registered call
    pub async fn update(
        &self,
        stream_sid: &StreamSid,
        state: SessionState,
        ai_session_id: Option<AiSessionId>,
    ) -> Result<()> {
        let mut calls = self.calls.write().await;
        let entry = calls
            .get_mut(stream_sid)
            .ok_or_else(|| RelayError::NotFound(format!("Call with stream {}", stream_sid)))?;
        entry.call.state = state;
        if ai_session_id.is_some() {
            entry.call.ai_session_id = ai_session_id;
        }
        Ok(())
    }

    pub async fn remove(&self, stream_sid: &StreamSid) -> Option<ActiveCall> {
        self.calls.write().await.remove(stream_sid).map(|e| e.call)
    }

    pub async fn get(&self, stream_sid: &StreamSid) -> Option<ActiveCall> {
        self.calls.read().await.get(stream_sid).map(|e| e.call.clone())
    }

    /// Active calls, oldest first
    pub async fn list(&self) -> Vec<ActiveCall> {
        let mut calls: Vec<ActiveCall> = self
            .calls
            .read()
            .await
            .values()
            .map(|e| e.call.clone())
            .collect();
        calls.sort_by_key(|c| c.started_at);
        calls
    }

    pub async fn len(&self) -> usize {
        self.calls.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.calls.read().await.is_empty()
    }

    /// Ask every active session to end with `server-shutdown`
    pub async fn shutdown_all(&self) -> usize {
        let calls = self.calls.read().await;
        for entry in calls.values() {
            entry.shutdown.cancel();
        }
        info!(calls = calls.len(), "Shutting down active calls");
        calls.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(stream: &str) -> ActiveCall {
        ActiveCall {
            session_id: SessionId::new(),
            stream_sid: StreamSid::new(stream),
            call_id: CallSid::new(format!("CA-{}", stream)),
            ai_session_id: None,
            state: SessionState::Created,
            started_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_stream_rejected() {
        let registry = CallRegistry::new();
        registry
            .insert(call("MZ1"), CancellationToken::new())
            .await
            .unwrap();

        let err = registry
            .insert(call("MZ1"), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::AlreadyExists(_)));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_update_get_remove() {
        let registry = CallRegistry::new();
        let sid = StreamSid::new("MZ2");
        registry.insert(call("MZ2"), CancellationToken::new()).await.unwrap();

        registry
            .update(&sid, SessionState::Active, Some(AiSessionId::new("sess_9")))
            .await
            .unwrap();
        let found = registry.get(&sid).await.unwrap();
        assert_eq!(found.state, SessionState::Active);
        assert_eq!(found.ai_session_id, Some(AiSessionId::new("sess_9")));

        assert!(registry.remove(&sid).await.is_some());
        assert!(registry.is_empty().await);
        assert!(matches!(
            registry.update(&sid, SessionState::Terminating, None).await,
            Err(RelayError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_all_cancels_every_session() {
        let registry = CallRegistry::new();
        let a = CancellationToken::new();
        let b = CancellationToken::new();
        registry.insert(call("MZa"), a.clone()).await.unwrap();
        registry.insert(call("MZb"), b.clone()).await.unwrap();

        assert_eq!(registry.shutdown_all().await, 2);
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
        assert_eq!(registry.list().await.len(), 2);
    }
}
