// ============================================
// Session Tracker
// ============================================
//
// Determines whether a client is in a new or continuing viewing session
// from a prior session record and the current time. Resolution is a
// pure function; persisting the returned record is the caller's
// responsibility via the SessionStore port (last-writer-wins under
// concurrent activity from multiple devices).

use crate::models::SessionInfo;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

/// Persistence port for session records. Implementations are external
/// (Redis, client-local storage); a load returning `None` covers both
/// "no record" and "corrupt record" so resolution can recover silently.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, user_id: Uuid) -> Option<SessionInfo>;
    async fn save(&self, user_id: Uuid, session: &SessionInfo);
}

pub struct SessionTracker {
    session_timeout_ms: i64,
}

impl SessionTracker {
    pub fn new(session_timeout_ms: i64) -> Self {
        Self { session_timeout_ms }
    }

    /// Resolve the session for an activity observed at `now`.
    ///
    /// A gap since the last recorded activity of less than the timeout
    /// continues the prior session and preserves its start time. A gap
    /// at or past the timeout, a missing record, or a record from the
    /// future (a concurrent-writer race) starts a fresh session.
    pub fn resolve_session(&self, prior: Option<&SessionInfo>, now: DateTime<Utc>) -> SessionInfo {
        if let Some(record) = prior {
            let gap_ms = (now - record.last_activity).num_milliseconds();
            if (0..self.session_timeout_ms).contains(&gap_ms) {
                return SessionInfo {
                    session_id: record.session_id,
                    is_new_session: false,
                    session_start_time: record.session_start_time,
                    last_activity: now,
                };
            }
            debug!(
                session_id = %record.session_id,
                gap_ms,
                timeout_ms = self.session_timeout_ms,
                "Session expired, starting new session"
            );
        }

        SessionInfo {
            session_id: Uuid::new_v4(),
            is_new_session: true,
            session_start_time: now,
            last_activity: now,
        }
    }

    /// Load, resolve, and persist in one step. The store write is
    /// last-writer-wins; a concurrent device racing this call at worst
    /// produces an extra new session, never corrupt state.
    pub async fn touch(
        &self,
        store: &dyn SessionStore,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> SessionInfo {
        let prior = store.load(user_id).await;
        let session = self.resolve_session(prior.as_ref(), now);
        store.save(user_id, &session).await;
        session
    }
}
