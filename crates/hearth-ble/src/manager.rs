// ── Adapter manager ──

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::bus::HostBus;
use crate::classic::ClassicProbe;
use crate::error::BleError;
use crate::session::{AdapterSession, SessionTiming};

/// Process-wide registry of adapter sessions, keyed by adapter name.
///
/// Constructed once at startup and passed by dependency injection; its
/// lifetime equals the process. Sessions are created on first lookup
/// with the manager's timing configuration and never evicted.
pub struct AdapterManager {
    bus: Arc<dyn HostBus>,
    classic: Arc<dyn ClassicProbe>,
    timing: SessionTiming,
    sessions: Mutex<HashMap<String, Arc<AdapterSession>>>,
}

impl AdapterManager {
    pub fn new(
        bus: Arc<dyn HostBus>,
        classic: Arc<dyn ClassicProbe>,
        timing: SessionTiming,
    ) -> Result<Self, BleError> {
        timing.validate()?;

        Ok(Self {
            bus,
            classic,
            timing,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    /// Return the cached session for an adapter, or open a new one.
    pub async fn lookup(&self, name: &str) -> Result<Arc<AdapterSession>, BleError> {
        let mut sessions = self.sessions.lock().await;

        if let Some(session) = sessions.get(name) {
            return Ok(Arc::clone(session));
        }

        debug!(adapter = name, "opening new adapter session");
        let session = AdapterSession::open(
            self.bus.as_ref(),
            Arc::clone(&self.classic),
            name,
            self.timing,
        )
        .await?;

        sessions.insert(name.to_string(), Arc::clone(&session));
        Ok(session)
    }

    /// Shut down every session. Called once at process exit.
    pub async fn shutdown(&self) {
        let sessions = std::mem::take(&mut *self.sessions.lock().await);
        for session in sessions.into_values() {
            session.shutdown().await;
        }
    }
}
