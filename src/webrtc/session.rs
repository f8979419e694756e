//! Viewer sessions
//!
//! One WHEP request creates one peer connection carrying both shared tracks.
//! Negotiation is not trickled: the answer is returned once ICE gathering
//! has completed. The connection stays registered until it fails or closes.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::TrackLocal;

use super::relay::MediaRelay;
use crate::error::{AppError, Result};
use crate::viewers::{ViewerCount, ViewerTicket};

type SessionMap = Arc<Mutex<HashMap<String, Arc<RTCPeerConnection>>>>;

/// Result of a successful negotiation
#[derive(Debug, Clone)]
pub struct SessionAnswer {
    pub session_id: String,
    pub sdp: String,
}

/// Registry of live viewer sessions
pub struct ViewerSessions {
    relay: Arc<MediaRelay>,
    viewers: Arc<ViewerCount>,
    sessions: SessionMap,
}

impl ViewerSessions {
    pub fn new(relay: Arc<MediaRelay>, viewers: Arc<ViewerCount>) -> Self {
        Self {
            relay,
            viewers,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of registered (not yet closed) sessions
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Answer a WHEP offer with a fully gathered SDP answer
    pub async fn negotiate(&self, offer: String) -> Result<SessionAnswer> {
        if offer.trim().is_empty() {
            return Err(AppError::BadRequest("empty SDP offer".to_string()));
        }

        let session_id = uuid::Uuid::new_v4().to_string();
        let pc = Arc::new(
            self.relay
                .api()
                .new_peer_connection(RTCConfiguration::default())
                .await
                .map_err(|e| AppError::WebRtc(format!("Failed to create peer connection: {}", e)))?,
        );

        self.sessions.lock().insert(session_id.clone(), pc.clone());

        match self.answer(&session_id, &pc, offer).await {
            Ok(sdp) => {
                info!(session = %session_id, "Viewer session negotiated");
                Ok(SessionAnswer { session_id, sdp })
            }
            Err(e) => {
                self.sessions.lock().remove(&session_id);
                if let Err(close_err) = pc.close().await {
                    debug!(session = %session_id, "Close after failed negotiation: {}", close_err);
                }
                Err(e)
            }
        }
    }

    async fn answer(
        &self,
        session_id: &str,
        pc: &Arc<RTCPeerConnection>,
        offer: String,
    ) -> Result<String> {
        for track in self.relay.tracks() {
            let sender = pc
                .add_track(track as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| AppError::WebRtc(format!("Failed to add track: {}", e)))?;
            tokio::spawn(drain_rtcp(sender));
        }

        self.install_handlers(session_id, pc);

        let offer = RTCSessionDescription::offer(offer)
            .map_err(|e| AppError::WebRtc(format!("Invalid offer: {}", e)))?;
        pc.set_remote_description(offer)
            .await
            .map_err(|e| AppError::WebRtc(format!("Failed to set remote description: {}", e)))?;

        let answer = pc
            .create_answer(None)
            .await
            .map_err(|e| AppError::WebRtc(format!("Failed to create answer: {}", e)))?;

        let mut gather_complete = pc.gathering_complete_promise().await;
        pc.set_local_description(answer)
            .await
            .map_err(|e| AppError::WebRtc(format!("Failed to set local description: {}", e)))?;
        let _ = gather_complete.recv().await;

        pc.local_description()
            .await
            .map(|desc| desc.sdp)
            .ok_or_else(|| AppError::WebRtc("No local description after gathering".to_string()))
    }

    fn install_handlers(&self, session_id: &str, pc: &Arc<RTCPeerConnection>) {
        // Held from the first connected state until teardown
        let ticket: Arc<Mutex<Option<ViewerTicket>>> = Arc::new(Mutex::new(None));

        let weak_pc: Weak<RTCPeerConnection> = Arc::downgrade(pc);
        let viewers = self.viewers.clone();
        let ice_ticket = ticket.clone();
        let id = session_id.to_string();
        pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
            info!(session = %id, "ICE connection state: {}", state);
            match state {
                RTCIceConnectionState::Connected | RTCIceConnectionState::Completed => {
                    let mut slot = ice_ticket.lock();
                    if slot.is_none() {
                        *slot = Some(viewers.join());
                    }
                }
                RTCIceConnectionState::Failed => {
                    ice_ticket.lock().take();
                    if let Some(pc) = weak_pc.upgrade() {
                        let id = id.clone();
                        tokio::spawn(async move {
                            if let Err(e) = pc.close().await {
                                warn!(session = %id, "Failed to close peer connection: {}", e);
                            }
                        });
                    }
                }
                RTCIceConnectionState::Closed => {
                    ice_ticket.lock().take();
                }
                _ => {}
            }
            Box::pin(async {})
        }));

        let sessions = self.sessions.clone();
        let id = session_id.to_string();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            debug!(session = %id, "Peer connection state: {}", state);
            if matches!(
                state,
                RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed
            ) {
                ticket.lock().take();
                if sessions.lock().remove(&id).is_some() {
                    info!(session = %id, "Viewer session ended");
                }
            }
            Box::pin(async {})
        }));
    }

    /// Close every session, used on shutdown
    pub async fn close_all(&self) {
        let sessions: Vec<_> = self.sessions.lock().drain().collect();
        for (id, pc) in sessions {
            if let Err(e) = pc.close().await {
                warn!(session = %id, "Failed to close peer connection: {}", e);
            }
        }
    }
}

/// Read and discard RTCP so sender interceptors keep working.
/// Returns once the connection is closed.
async fn drain_rtcp(sender: Arc<RTCRtpSender>) {
    let mut buf = vec![0u8; 1500];
    while sender.read(&mut buf).await.is_ok() {}
}
