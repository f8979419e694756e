use std::net::Ipv4Addr;
use std::path::PathBuf;

use clap::builder::FalseyValueParser;
use clap::Args;
use serde::Serialize;

use crate::error::{AppError, Result};

/// Runtime configuration
///
/// Every field can be given as a command line flag or through the
/// environment variable named next to it. Boolean flags read from the
/// environment treat `0`, `false`, `no` and `off` as unset.
#[derive(Debug, Clone, Args, Serialize)]
pub struct Config {
    /// HTTP listen port
    #[arg(long, env = "WEB_PORT", default_value_t = 4845)]
    pub web_port: u16,

    /// Public ICE/UDP port shared by all viewer sessions
    #[arg(long, env = "UDP_PORT", default_value_t = 4845)]
    pub udp_port: u16,

    /// Public IPv4 address advertised in host candidates
    #[arg(long, env = "PUBLIC_IP")]
    pub public_ip: Option<String>,

    /// Desktop width in pixels
    #[arg(long, env = "SCREEN_WIDTH", default_value_t = 1920)]
    pub screen_width: u32,

    /// Desktop height in pixels
    #[arg(long, env = "SCREEN_HEIGHT", default_value_t = 1080)]
    pub screen_height: u32,

    /// Capture framerate
    #[arg(long, env = "FRAMERATE", default_value_t = 60)]
    pub framerate: u32,

    /// Hardware-accelerated (NVIDIA) encoding is available
    #[arg(long, env = "USE_NVIDIA", value_parser = FalseyValueParser::new())]
    pub use_nvidia: bool,

    /// Forward child process output into the log
    #[arg(long, env = "SUPERVISOR_LOGS", value_parser = FalseyValueParser::new())]
    pub supervisor_logs: bool,

    /// Run the full desktop inside a container
    #[arg(long, env = "IN_CONTAINER", value_parser = FalseyValueParser::new())]
    pub in_container: bool,

    /// Directory holding the static web client
    #[arg(long, env = "ASSETS_DIR", default_value = "assets")]
    pub assets_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            web_port: 4845,
            udp_port: 4845,
            public_ip: None,
            screen_width: 1920,
            screen_height: 1080,
            framerate: 60,
            use_nvidia: false,
            supervisor_logs: false,
            in_container: false,
            assets_dir: PathBuf::from("assets"),
        }
    }
}

impl Config {
    /// Check value ranges, the public address and the assets directory
    pub fn validate(&self) -> Result<()> {
        if self.screen_width == 0 || self.screen_height == 0 {
            return Err(AppError::Config(format!(
                "Invalid screen size {}x{}",
                self.screen_width, self.screen_height
            )));
        }

        if !(1..=240).contains(&self.framerate) {
            return Err(AppError::Config(format!(
                "Framerate must be between 1 and 240, got {}",
                self.framerate
            )));
        }

        self.public_ipv4()?;

        if !self.assets_dir.is_dir() {
            return Err(AppError::Config(format!(
                "Assets directory {} does not exist",
                self.assets_dir.display()
            )));
        }
        Ok(())
    }

    /// Parsed public address, `None` when unset or empty
    pub fn public_ipv4(&self) -> Result<Option<Ipv4Addr>> {
        match self.public_ip.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| AppError::Config(format!("Invalid public IPv4 address: {}", raw))),
        }
    }

    pub fn screen(&self) -> ScreenSize {
        ScreenSize::new(self.screen_width, self.screen_height)
    }
}

/// Desktop resolution used to scale normalized pointer coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
}

impl ScreenSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for ScreenSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        config: Config,
    }

    fn with_assets(assets: &tempfile::TempDir) -> Config {
        Config {
            assets_dir: assets.path().to_path_buf(),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_validate() {
        let assets = tempfile::tempdir().unwrap();
        let config = with_assets(&assets);
        assert!(config.validate().is_ok());
        assert_eq!(config.screen(), ScreenSize::new(1920, 1080));
        assert_eq!(config.public_ipv4().unwrap(), None);
    }

    #[test]
    fn test_cli_flags() {
        let cli = TestCli::parse_from([
            "deskcast",
            "--web-port",
            "8080",
            "--public-ip",
            "203.0.113.7",
            "--use-nvidia",
            "--framerate",
            "30",
        ]);
        assert_eq!(cli.config.web_port, 8080);
        assert_eq!(cli.config.udp_port, 4845);
        assert!(cli.config.use_nvidia);
        assert!(!cli.config.in_container);
        assert_eq!(
            cli.config.public_ipv4().unwrap(),
            Some(Ipv4Addr::new(203, 0, 113, 7))
        );
    }

    #[test]
    fn test_rejects_bad_values() {
        let assets = tempfile::tempdir().unwrap();
        let config = Config {
            screen_width: 0,
            ..with_assets(&assets)
        };
        assert!(matches!(config.validate(), Err(AppError::Config(_))));

        let config = Config {
            framerate: 0,
            ..with_assets(&assets)
        };
        assert!(config.validate().is_err());

        let config = Config {
            public_ip: Some("not-an-ip".into()),
            ..with_assets(&assets)
        };
        assert!(config.validate().is_err());

        let config = Config {
            public_ip: Some("  ".into()),
            ..with_assets(&assets)
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_missing_assets() {
        let assets = tempfile::tempdir().unwrap();
        let config = Config {
            assets_dir: assets.path().join("missing"),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, AppError::Config(ref msg) if msg.contains("missing")));

        let file = assets.path().join("index.html");
        std::fs::write(&file, "").unwrap();
        let config = Config {
            assets_dir: file,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
