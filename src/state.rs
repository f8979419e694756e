use std::sync::Arc;

use crate::config::Config;
use crate::input::InputBackend;
use crate::supervisor::Supervisor;
use crate::viewers::ViewerCount;
use crate::webrtc::{MediaRelay, ViewerSessions};

/// Application-wide state shared across handlers
///
/// Built once by the binary; every component receives its handles from here.
pub struct AppState {
    pub config: Config,
    /// Desktop and encoder processes
    pub supervisor: Arc<Supervisor>,
    /// Shared WebRTC API and tracks
    pub relay: Arc<MediaRelay>,
    /// Live WHEP sessions
    pub sessions: ViewerSessions,
    pub viewers: Arc<ViewerCount>,
    /// Input injection for `/api/ws`
    pub input: Arc<dyn InputBackend>,
}

impl AppState {
    pub fn new(
        config: Config,
        supervisor: Arc<Supervisor>,
        relay: Arc<MediaRelay>,
        viewers: Arc<ViewerCount>,
        input: Arc<dyn InputBackend>,
    ) -> Arc<Self> {
        let sessions = ViewerSessions::new(relay.clone(), viewers.clone());
        Arc::new(Self {
            config,
            supervisor,
            relay,
            sessions,
            viewers,
            input,
        })
    }

    /// Close every viewer session and stop every process
    pub async fn shutdown(&self) {
        self.supervisor.stop_all();
        self.sessions.close_all().await;
    }
}
