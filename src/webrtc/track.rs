//! Shared outbound tracks

use std::sync::Arc;

use async_trait::async_trait;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocalWriter;

use super::config::{MediaKind, STREAM_ID};
use crate::error::{AppError, Result};

/// Destination for raw RTP packets coming from the encoder
#[async_trait]
pub trait RtpSink: Send + Sync {
    /// Forward one marshalled RTP packet to every attached viewer.
    /// Succeeds when nobody is attached.
    async fn send(&self, packet: &[u8]) -> Result<()>;
}

#[async_trait]
impl RtpSink for TrackLocalStaticRTP {
    async fn send(&self, packet: &[u8]) -> Result<()> {
        TrackLocalWriter::write(self, packet)
            .await
            .map(|_| ())
            .map_err(|e| AppError::WebRtc(format!("RTP write failed: {}", e)))
    }
}

/// Create the track for `kind`, shared by every session
pub fn new_track(kind: MediaKind) -> Arc<TrackLocalStaticRTP> {
    Arc::new(TrackLocalStaticRTP::new(
        kind.capability(),
        kind.name().to_string(),
        STREAM_ID.to_string(),
    ))
}

/// Minimal RTP header check: version 2 and a fixed header present
pub fn looks_like_rtp(packet: &[u8]) -> bool {
    packet.len() >= 12 && packet[0] >> 6 == 2
}
