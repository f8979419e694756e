//! Media relay: shared WebRTC API, shared tracks and loopback RTP ingest
//!
//! ```text
//! gst-launch (video) --udp--> ingest :N --> video track --+
//! gst-launch (audio) --udp--> ingest :M --> audio track --+--> every viewer session
//! ```

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice::network_type::NetworkType;
use webrtc::ice::udp_mux::{UDPMuxDefault, UDPMuxParams};
use webrtc::ice::udp_network::UDPNetwork;
use webrtc::ice_transport::ice_candidate_type::RTCIceCandidateType;
use webrtc::interceptor::registry::Registry;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecParameters, RTPCodecType};
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;

use super::config::{
    MediaKind, RelayConfig, INGEST_DATAGRAM_SIZE, INGEST_ERROR_PAUSE, INGEST_RECV_BUFFER,
};
use super::track::{looks_like_rtp, new_track, RtpSink};
use crate::error::{AppError, Result};
use crate::utils::{bind_udp_socket, LogThrottler};
use crate::warn_throttled;

/// Owns the WebRTC API and the two shared tracks
pub struct MediaRelay {
    api: API,
    ice_port: u16,
    video: Arc<TrackLocalStaticRTP>,
    audio: Arc<TrackLocalStaticRTP>,
    video_ingest_port: u16,
    audio_ingest_port: u16,
    ingest_tasks: Vec<JoinHandle<()>>,
}

impl MediaRelay {
    /// Build the API, bind the ICE mux and both ingest sockets.
    ///
    /// Any failure here leaves the gateway without media and should abort startup.
    pub async fn new(config: &RelayConfig) -> Result<Self> {
        let (api, ice_port) = build_api(config).await?;

        let video = new_track(MediaKind::Video);
        let audio = new_track(MediaKind::Audio);

        let video_socket = bind_ingest().await?;
        let audio_socket = bind_ingest().await?;
        let video_ingest_port = video_socket.local_addr()?.port();
        let audio_ingest_port = audio_socket.local_addr()?.port();

        info!(
            "RTP ingest listening on 127.0.0.1:{} (video), 127.0.0.1:{} (audio)",
            video_ingest_port, audio_ingest_port
        );

        let ingest_tasks = vec![
            tokio::spawn(run_ingest(
                video_socket,
                MediaKind::Video,
                video.clone() as Arc<dyn RtpSink>,
            )),
            tokio::spawn(run_ingest(
                audio_socket,
                MediaKind::Audio,
                audio.clone() as Arc<dyn RtpSink>,
            )),
        ];

        Ok(Self {
            api,
            ice_port,
            video,
            audio,
            video_ingest_port,
            audio_ingest_port,
            ingest_tasks,
        })
    }

    pub fn api(&self) -> &API {
        &self.api
    }

    /// Port the ICE mux is bound to
    pub fn ice_port(&self) -> u16 {
        self.ice_port
    }

    /// Both tracks, video first
    pub fn tracks(&self) -> [Arc<TrackLocalStaticRTP>; 2] {
        [self.video.clone(), self.audio.clone()]
    }

    pub fn ingest_port(&self, kind: MediaKind) -> u16 {
        match kind {
            MediaKind::Video => self.video_ingest_port,
            MediaKind::Audio => self.audio_ingest_port,
        }
    }
}

impl Drop for MediaRelay {
    fn drop(&mut self) {
        for task in &self.ingest_tasks {
            task.abort();
        }
    }
}

/// Register codecs and interceptors and configure ICE lite on a single UDP mux
async fn build_api(config: &RelayConfig) -> Result<(API, u16)> {
    let mut media = MediaEngine::default();
    for (kind, codec_type) in [
        (MediaKind::Video, RTPCodecType::Video),
        (MediaKind::Audio, RTPCodecType::Audio),
    ] {
        media
            .register_codec(
                RTCRtpCodecParameters {
                    capability: kind.capability(),
                    payload_type: kind.payload_type(),
                    ..Default::default()
                },
                codec_type,
            )
            .map_err(|e| AppError::WebRtc(format!("Failed to register {} codec: {}", kind, e)))?;
    }

    let registry = register_default_interceptors(Registry::new(), &mut media)
        .map_err(|e| AppError::WebRtc(format!("Failed to register interceptors: {}", e)))?;

    let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.udp_port))).await?;
    let ice_port = socket.local_addr()?.port();
    info!("ICE/UDP mux listening on 0.0.0.0:{}", ice_port);
    let mux = UDPMuxDefault::new(UDPMuxParams::new(socket));

    let mut settings = SettingEngine::default();
    settings.set_lite(true);
    settings.set_udp_network(UDPNetwork::Muxed(mux));
    settings.set_include_loopback_candidate(false);
    settings.set_network_types(vec![NetworkType::Udp4]);
    match config.public_ip {
        Some(ip) => {
            info!("Advertising host candidates as {}", ip);
            settings.set_nat_1to1_ips(vec![ip.to_string()], RTCIceCandidateType::Host);
        }
        None => warn!("No public IP configured, advertising local interface addresses"),
    }

    let api = APIBuilder::new()
        .with_media_engine(media)
        .with_interceptor_registry(registry)
        .with_setting_engine(settings)
        .build();

    Ok((api, ice_port))
}

/// Bind a loopback socket on a free port with an enlarged receive buffer
pub async fn bind_ingest() -> Result<UdpSocket> {
    let std_socket = bind_udp_socket(
        SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
        Some(INGEST_RECV_BUFFER),
    )?;
    Ok(UdpSocket::from_std(std_socket)?)
}

/// How long to wait before receiving again after `err`.
///
/// ICMP errors queued on the socket and interrupted calls are one-offs; any
/// other error is likely to repeat immediately.
fn recv_error_pause(err: &io::Error) -> Option<Duration> {
    match err.kind() {
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock => None,
        _ => Some(INGEST_ERROR_PAUSE),
    }
}

/// Forward every datagram on `socket` into `sink`, in receipt order.
///
/// Loss is accepted: nothing is retried and malformed datagrams are dropped.
pub async fn run_ingest(socket: UdpSocket, kind: MediaKind, sink: Arc<dyn RtpSink>) {
    let throttler = LogThrottler::with_secs(5);
    let mut buf = vec![0u8; INGEST_DATAGRAM_SIZE];

    loop {
        let n = match socket.recv(&mut buf).await {
            Ok(n) => n,
            Err(e) => {
                warn_throttled!(throttler, "recv", "{} ingest receive failed: {}", kind, e);
                if let Some(pause) = recv_error_pause(&e) {
                    tokio::time::sleep(pause).await;
                }
                continue;
            }
        };

        let packet = &buf[..n];
        if !looks_like_rtp(packet) {
            warn_throttled!(throttler, "malformed", "Dropping {} byte non-RTP {} datagram", n, kind);
            continue;
        }

        match sink.send(packet).await {
            // Report the next failure right away once writes recover
            Ok(()) => throttler.clear("write"),
            Err(e) => warn_throttled!(throttler, "write", "{} relay: {}", kind, e),
        }
    }
}

impl std::fmt::Debug for MediaRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaRelay")
            .field("ice_port", &self.ice_port)
            .field("video_ingest_port", &self.video_ingest_port)
            .field("audio_ingest_port", &self.audio_ingest_port)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use webrtc::util::Marshal;

    struct ChannelSink(mpsc::UnboundedSender<Vec<u8>>);

    #[async_trait]
    impl RtpSink for ChannelSink {
        async fn send(&self, packet: &[u8]) -> Result<()> {
            let _ = self.0.send(packet.to_vec());
            Ok(())
        }
    }

    fn packet(seq: u16, payload: &'static [u8]) -> Vec<u8> {
        rtp::packet::Packet {
            header: rtp::header::Header {
                version: 2,
                payload_type: 96,
                sequence_number: seq,
                timestamp: u32::from(seq) * 3000,
                ssrc: 42,
                ..Default::default()
            },
            payload: Bytes::from_static(payload),
        }
        .marshal()
        .unwrap()
        .to_vec()
    }

    #[tokio::test]
    async fn test_ingest_forwards_in_order() {
        let socket = bind_ingest().await.unwrap();
        let port = socket.local_addr().unwrap().port();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_ingest(socket, MediaKind::Video, Arc::new(ChannelSink(tx))));

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let packets: Vec<_> = (0..20).map(|seq| packet(seq, b"frame")).collect();
        for p in &packets {
            sender.send_to(p, ("127.0.0.1", port)).await.unwrap();
        }

        for expected in &packets {
            let got = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(&got, expected);
        }
        task.abort();
    }

    #[tokio::test]
    async fn test_ingest_drops_malformed() {
        let socket = bind_ingest().await.unwrap();
        let port = socket.local_addr().unwrap().port();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_ingest(socket, MediaKind::Audio, Arc::new(ChannelSink(tx))));

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.send_to(b"hello", ("127.0.0.1", port)).await.unwrap();
        let valid = packet(9, b"opus");
        sender.send_to(&valid, ("127.0.0.1", port)).await.unwrap();

        let got = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, valid);
        task.abort();
    }

    #[test]
    fn test_recv_error_pause() {
        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert_eq!(recv_error_pause(&refused), None);
        let interrupted = io::Error::from(io::ErrorKind::Interrupted);
        assert_eq!(recv_error_pause(&interrupted), None);

        let broken = io::Error::from_raw_os_error(nix::libc::EBADF);
        assert_eq!(recv_error_pause(&broken), Some(INGEST_ERROR_PAUSE));
        let other = io::Error::other("no buffer space");
        assert_eq!(recv_error_pause(&other), Some(INGEST_ERROR_PAUSE));
    }

    #[tokio::test]
    async fn test_relay_setup() {
        let relay = MediaRelay::new(&RelayConfig {
            udp_port: 0,
            public_ip: Some(Ipv4Addr::new(203, 0, 113, 10)),
        })
        .await
        .unwrap();

        assert_ne!(relay.ice_port(), 0);
        let video = relay.ingest_port(MediaKind::Video);
        let audio = relay.ingest_port(MediaKind::Audio);
        assert_ne!(video, 0);
        assert_ne!(video, audio);

        // No viewers attached: datagrams are accepted and dropped silently
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.send_to(&packet(1, b"idr"), ("127.0.0.1", video)).await.unwrap();
    }
}
