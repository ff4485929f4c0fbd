//! Shared handler state

use crate::application::session::{CallRegistry, CallSessionManager};
use chrono::{DateTime, Utc};

#[derive(Clone)]
pub struct AppState {
    pub sessions: CallSessionManager,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(sessions: CallSessionManager) -> Self {
        Self {
            sessions,
            started_at: Utc::now(),
        }
    }

    pub fn registry(&self) -> &CallRegistry {
        self.sessions.registry()
    }
}
