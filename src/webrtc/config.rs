//! WebRTC configuration

use std::net::Ipv4Addr;
use std::time::Duration;

use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::RTCPFeedback;

use crate::config::Config;
use crate::error::Result;

/// Payload type of the H.264 video codec
pub const VIDEO_PAYLOAD_TYPE: u8 = 96;
/// Payload type of the Opus audio codec
pub const AUDIO_PAYLOAD_TYPE: u8 = 111;

pub const H264_FMTP: &str = "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f";
pub const OPUS_FMTP: &str = "minptime=10;useinbandfec=1";

/// Media stream id shared by both tracks
pub const STREAM_ID: &str = "deskcast";

/// Requested `SO_RCVBUF` for the loopback ingest sockets
pub const INGEST_RECV_BUFFER: usize = 300_000;
/// Largest RTP datagram accepted from the encoder
pub const INGEST_DATAGRAM_SIZE: usize = 1600;
/// Pause after a receive error that is not a one-off
pub const INGEST_ERROR_PAUSE: Duration = Duration::from_millis(100);

/// Kind of a relayed media stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    pub fn name(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }

    pub fn payload_type(&self) -> u8 {
        match self {
            MediaKind::Video => VIDEO_PAYLOAD_TYPE,
            MediaKind::Audio => AUDIO_PAYLOAD_TYPE,
        }
    }

    pub fn capability(&self) -> RTCRtpCodecCapability {
        match self {
            MediaKind::Video => h264_capability(),
            MediaKind::Audio => opus_capability(),
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

fn feedback(typ: &str, parameter: &str) -> RTCPFeedback {
    RTCPFeedback {
        typ: typ.to_string(),
        parameter: parameter.to_string(),
    }
}

/// H.264 constrained baseline, 90 kHz
pub fn h264_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: "video/H264".to_string(),
        clock_rate: 90000,
        channels: 0,
        sdp_fmtp_line: H264_FMTP.to_string(),
        rtcp_feedback: vec![
            feedback("goog-remb", ""),
            feedback("ccm", "fir"),
            feedback("nack", ""),
            feedback("nack", "pli"),
        ],
    }
}

/// Opus stereo, 48 kHz
pub fn opus_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: "audio/opus".to_string(),
        clock_rate: 48000,
        channels: 2,
        sdp_fmtp_line: OPUS_FMTP.to_string(),
        rtcp_feedback: vec![],
    }
}

/// Settings for the shared WebRTC API
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// ICE/UDP mux port; 0 picks a free port
    pub udp_port: u16,
    /// Address substituted into host candidates
    pub public_ip: Option<Ipv4Addr>,
}

impl RelayConfig {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            udp_port: config.udp_port,
            public_ip: config.public_ipv4()?,
        })
    }
}
