//! deskcast - stream a virtual Linux desktop to the browser
//!
//! A WHEP gateway relaying RTP from local encoder pipelines to any number of
//! WebRTC viewers over one UDP port, plus the supervisor that keeps the
//! desktop session and encoders running.

pub mod config;
pub mod desktop;
pub mod error;
pub mod input;
pub mod state;
pub mod supervisor;
pub mod utils;
pub mod viewers;
pub mod web;
pub mod webrtc;

pub use error::{AppError, Result};
