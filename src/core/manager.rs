//! Session pool
//!
//! The manager bounds how many sessions exist at once and optionally hands
//! back an existing live session for the same host and port.

use crate::core::prompt::PromptDetector;
use crate::core::session::{Session, SessionError, SessionId, SessionOptions};
use crate::core::transport::TelnetConfig;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Default session limit
pub const DEFAULT_MAX_SESSIONS: usize = 10;

/// Parameters for [`SessionManager::create_session`]
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub telnet: TelnetConfig,
    pub options: SessionOptions,
    /// Return a live session already connected to the same host and port
    pub reuse: bool,
}

impl SessionRequest {
    pub fn new(telnet: TelnetConfig) -> Self {
        Self {
            telnet,
            options: SessionOptions::default(),
            reuse: false,
        }
    }

    #[must_use]
    pub fn options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn reuse(mut self, reuse: bool) -> Self {
        self.reuse = reuse;
        self
    }
}

#[derive(Default)]
struct Table {
    sessions: HashMap<SessionId, Arc<Session>>,
}

/// A slot held by an in-flight connect, released on drop
struct SlotReservation<'a> {
    reserved: &'a AtomicUsize,
}

impl<'a> SlotReservation<'a> {
    fn take(reserved: &'a AtomicUsize) -> Self {
        reserved.fetch_add(1, Ordering::AcqRel);
        Self { reserved }
    }
}

impl Drop for SlotReservation<'_> {
    fn drop(&mut self) {
        self.reserved.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Table {
    fn find_live(&self, host: &str, port: u16) -> Option<Arc<Session>> {
        self.sessions
            .values()
            .find(|s| s.is_connected() && s.host() == host && s.port() == port)
            .cloned()
    }
}

/// Owns every session of a process
pub struct SessionManager {
    table: RwLock<Table>,
    // Connects in flight; only incremented under the table write lock
    reserved: AtomicUsize,
    max_sessions: usize,
    detector: Arc<PromptDetector>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("max_sessions", &self.max_sessions)
            .field("patterns", &self.detector.patterns().len())
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Manager whose sessions share `detector`
    pub fn new(max_sessions: usize, detector: Arc<PromptDetector>) -> Self {
        Self {
            table: RwLock::new(Table::default()),
            reserved: AtomicUsize::new(0),
            max_sessions: max_sessions.max(1),
            detector,
        }
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    pub fn detector(&self) -> &Arc<PromptDetector> {
        &self.detector
    }

    fn check_capacity(&self, table: &Table) -> Result<(), SessionError> {
        if table.sessions.len() + self.reserved.load(Ordering::Acquire) >= self.max_sessions {
            return Err(SessionError::Capacity {
                max: self.max_sessions,
            });
        }
        Ok(())
    }

    /// Return a reusable session or connect a new one.
    ///
    /// A slot is reserved before connecting, so concurrent callers can never
    /// exceed the limit. Dropping the future mid-connect frees the slot.
    pub async fn create_session(
        &self,
        request: SessionRequest,
    ) -> Result<Arc<Session>, SessionError> {
        let reservation = {
            let table = self.table.write().await;
            if request.reuse {
                if let Some(existing) = table.find_live(&request.telnet.host, request.telnet.port) {
                    tracing::debug!(session = %existing.id(), "reusing session");
                    return Ok(existing);
                }
            }
            self.check_capacity(&table)?;
            SlotReservation::take(&self.reserved)
        };

        let connected = Session::connect(
            request.telnet,
            request.options,
            Arc::clone(&self.detector),
        )
        .await;

        let mut table = self.table.write().await;
        let session = Arc::new(connected?);
        table.sessions.insert(session.id(), Arc::clone(&session));
        drop(reservation);
        tracing::info!(session = %session.id(), total = table.sessions.len(), "session created");
        Ok(session)
    }

    /// Register a session built elsewhere, subject to the same limit
    pub async fn adopt(&self, session: Session) -> Result<Arc<Session>, SessionError> {
        let mut table = self.table.write().await;
        self.check_capacity(&table)?;
        let session = Arc::new(session);
        table.sessions.insert(session.id(), Arc::clone(&session));
        Ok(session)
    }

    pub async fn get_session(&self, id: SessionId) -> Result<Arc<Session>, SessionError> {
        self.table
            .read()
            .await
            .sessions
            .get(&id)
            .cloned()
            .ok_or(SessionError::NotFound(id))
    }

    /// Close and forget a session. Unknown ids return false.
    pub async fn close_session(&self, id: SessionId) -> bool {
        let removed = self.table.write().await.sessions.remove(&id);
        match removed {
            Some(session) => {
                if let Err(e) = session.close().await {
                    tracing::warn!(session = %id, error = %e, "close failed");
                }
                true
            }
            None => false,
        }
    }

    /// Close every session
    pub async fn close_all_sessions(&self) {
        let sessions: Vec<_> = self.table.write().await.sessions.drain().collect();
        let closing = sessions.into_iter().map(|(id, session)| async move {
            if let Err(e) = session.close().await {
                tracing::warn!(session = %id, error = %e, "close failed");
            }
        });
        futures::future::join_all(closing).await;
    }

    /// Drop sessions whose link is gone; returns how many were removed
    pub async fn prune_disconnected(&self) -> usize {
        let mut table = self.table.write().await;
        let before = table.sessions.len();
        table.sessions.retain(|_, s| s.is_connected());
        let pruned = before - table.sessions.len();
        if pruned > 0 {
            tracing::debug!(pruned, "pruned disconnected sessions");
        }
        pruned
    }

    pub async fn session_ids(&self) -> Vec<SessionId> {
        self.table.read().await.sessions.keys().copied().collect()
    }

    pub async fn len(&self) -> usize {
        self.table.read().await.sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
