//! WebRTC media relay and WHEP viewer sessions
//!
//! ```text
//! encoder (gst-launch) --RTP/UDP loopback--> MediaRelay ingest
//!                                                 |
//!                                      shared video/audio tracks
//!                                                 |
//! Browser --POST /whep (SDP offer)--> ViewerSessions --> RTCPeerConnection
//!         <------- ICE lite, single UDP mux port --------'
//! ```

pub mod config;
pub mod relay;
pub mod session;
pub mod track;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{MediaKind, RelayConfig};
pub use relay::MediaRelay;
pub use session::{SessionAnswer, ViewerSessions};
pub use track::RtpSink;
