//! The virtual desktop fleet
//!
//! Inside a container the supervisor runs a full X11 session: `Xvfb`, the
//! system D-Bus, PulseAudio and Xfce, the last two as the unprivileged desktop
//! user. The video and audio encoders are `gst-launch-1.0` pipelines sending
//! RTP to the relay's loopback ingest ports. They are registered stopped and
//! only run while someone is watching.

use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::supervisor::{CommandSpec, Supervisor};

/// Process ids of the encoder pipelines
pub const VIDEO_ENCODER: &str = "video-encoder";
pub const AUDIO_ENCODER: &str = "audio-encoder";

/// Unprivileged user owning the desktop session
pub const DESKTOP_USER: &str = "inu";

/// X display served by Xvfb
pub const DISPLAY: &str = ":0";

const VIDEO_BITRATE_KBPS: u32 = 6000;
const AUDIO_BITRATE_BPS: u32 = 320_000;

/// Loopback ports the encoders send RTP to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestPorts {
    pub video: u16,
    pub audio: u16,
}

/// Register every desktop process with `supervisor`
pub fn register_fleet(supervisor: &Supervisor, config: &Config, ports: IngestPorts) -> Result<()> {
    if config.in_container {
        for spec in desktop_processes(config) {
            supervisor.add_command(spec)?;
        }
    }

    if config.use_nvidia {
        info!("Using NVIDIA for video encoding");
    } else {
        info!("Using CPU for video encoding");
    }

    for spec in encoder_processes(config, ports) {
        supervisor.add_command(spec)?;
    }
    Ok(())
}

fn with_nvidia_env(spec: CommandSpec, config: &Config) -> CommandSpec {
    if config.use_nvidia {
        spec.env("LIBVA_DRIVER_NAME", "nvidia")
            .env("VGL_DISPLAY", "egl")
    } else {
        spec
    }
}

fn vglrun(command: String, config: &Config) -> String {
    if config.use_nvidia {
        format!("vglrun {}", command)
    } else {
        command
    }
}

/// X server, D-Bus, audio server and window manager, in start order
pub fn desktop_processes(config: &Config) -> Vec<CommandSpec> {
    let xvfb = vglrun(
        format!(
            "Xvfb {} -screen 0 {}x{}x24",
            DISPLAY, config.screen_width, config.screen_height
        ),
        config,
    );
    let xfce = vglrun(format!("dbus-launch xfce4-session --display {}", DISPLAY), config);

    vec![
        with_nvidia_env(CommandSpec::shell("xvfb", xvfb), config),
        CommandSpec::new("dbus", "dbus-daemon").args(["--system", "--nofork", "--nopidfile"]),
        CommandSpec::as_user(
            "pulseaudio",
            DESKTOP_USER,
            "dbus-launch pulseaudio --disallow-module-loading --disallow-exit --exit-idle-time=-1",
        ),
        with_nvidia_env(CommandSpec::as_user("xfce", DESKTOP_USER, xfce), config),
    ]
}

fn gst_launch(elements: &[String]) -> String {
    format!("gst-launch-1.0 --no-position {}", elements.join(" ! "))
}

/// H.264 pipeline: screen capture (or a test pattern) to RTP on `port`
pub fn video_pipeline(config: &Config, port: u16) -> String {
    let source = if config.in_container {
        "ximagesrc use-damage=false"
    } else {
        "videotestsrc"
    };

    let encoder = if config.use_nvidia {
        // rc-mode=2 is CBR, tune=3 ultra low latency, preset=5 low latency high performance
        format!(
            "nvh264enc bitrate={} rc-mode=2 tune=3 multi-pass=2 preset=5 zerolatency=true gop-size={}",
            VIDEO_BITRATE_KBPS, config.framerate
        )
    } else {
        format!(
            "x264enc bitrate={} pass=cbr tune=zerolatency speed-preset=veryfast key-int-max={}",
            VIDEO_BITRATE_KBPS, config.framerate
        )
    };

    gst_launch(&[
        source.to_string(),
        format!(
            "video/x-raw,width={},height={},framerate={}/1",
            config.screen_width, config.screen_height, config.framerate
        ),
        "videoconvert".to_string(),
        encoder,
        "h264parse config-interval=-1".to_string(),
        "video/x-h264,stream-format=byte-stream,profile=constrained-baseline".to_string(),
        "rtph264pay".to_string(),
        format!("udpsink host=127.0.0.1 port={}", port),
    ])
}

/// Opus pipeline: the null sink monitor (or a test tone) to RTP on `port`
pub fn audio_pipeline(config: &Config, port: u16) -> String {
    let source = if config.in_container {
        "pulsesrc device=auto_null.monitor"
    } else {
        "audiotestsrc freq=220"
    };

    gst_launch(&[
        source.to_string(),
        "audioconvert".to_string(),
        format!("opusenc bitrate={}", AUDIO_BITRATE_BPS),
        "rtpopuspay".to_string(),
        format!("udpsink host=127.0.0.1 port={}", port),
    ])
}

/// Both encoders, registered stopped
pub fn encoder_processes(config: &Config, ports: IngestPorts) -> Vec<CommandSpec> {
    let video = with_nvidia_env(
        CommandSpec::shell(VIDEO_ENCODER, video_pipeline(config, ports.video)),
        config,
    );

    // PulseAudio belongs to the desktop user
    let audio_command = audio_pipeline(config, ports.audio);
    let audio = if config.in_container {
        CommandSpec::as_user(AUDIO_ENCODER, DESKTOP_USER, audio_command)
    } else {
        CommandSpec::shell(AUDIO_ENCODER, audio_command)
    };

    vec![video.auto_start(false), audio.auto_start(false)]
}

#[cfg(test)]
mod tests {
    use super::*;

    const PORTS: IngestPorts = IngestPorts {
        video: 40001,
        audio: 40002,
    };

    fn container(use_nvidia: bool) -> Config {
        Config {
            in_container: true,
            use_nvidia,
            screen_width: 1280,
            screen_height: 720,
            framerate: 30,
            ..Default::default()
        }
    }

    #[test]
    fn test_video_pipeline_cpu() {
        let pipeline = video_pipeline(&container(false), 40001);
        assert_eq!(
            pipeline,
            "gst-launch-1.0 --no-position ximagesrc use-damage=false \
             ! video/x-raw,width=1280,height=720,framerate=30/1 \
             ! videoconvert \
             ! x264enc bitrate=6000 pass=cbr tune=zerolatency speed-preset=veryfast key-int-max=30 \
             ! h264parse config-interval=-1 \
             ! video/x-h264,stream-format=byte-stream,profile=constrained-baseline \
             ! rtph264pay \
             ! udpsink host=127.0.0.1 port=40001"
        );
    }

    #[test]
    fn test_video_pipeline_nvidia_and_test_source() {
        let pipeline = video_pipeline(&container(true), 5000);
        assert!(pipeline.contains(
            "! nvh264enc bitrate=6000 rc-mode=2 tune=3 multi-pass=2 preset=5 zerolatency=true gop-size=30 !"
        ));
        assert!(!pipeline.contains("x264enc bitrate"));

        let pipeline = video_pipeline(&Config::default(), 5000);
        assert!(pipeline.starts_with("gst-launch-1.0 --no-position videotestsrc ! "));
        assert!(pipeline.contains("width=1920,height=1080,framerate=60/1"));
    }

    #[test]
    fn test_audio_pipeline() {
        assert_eq!(
            audio_pipeline(&container(false), 40002),
            "gst-launch-1.0 --no-position pulsesrc device=auto_null.monitor \
             ! audioconvert ! opusenc bitrate=320000 ! rtpopuspay \
             ! udpsink host=127.0.0.1 port=40002"
        );
        assert!(audio_pipeline(&Config::default(), 1)
            .starts_with("gst-launch-1.0 --no-position audiotestsrc freq=220 ! "));
    }

    #[test]
    fn test_encoders_registered_stopped() {
        let specs = encoder_processes(&container(false), PORTS);
        assert_eq!(specs.len(), 2);

        assert_eq!(specs[0].id, VIDEO_ENCODER);
        assert_eq!(specs[0].program, "sh");
        assert!(!specs[0].auto_start);

        assert_eq!(specs[1].id, AUDIO_ENCODER);
        assert_eq!(specs[1].program, "su");
        assert_eq!(specs[1].args[0], DESKTOP_USER);
        assert!(!specs[1].auto_start);

        let specs = encoder_processes(&Config::default(), PORTS);
        assert_eq!(specs[1].program, "sh");
    }

    #[test]
    fn test_desktop_processes() {
        let specs = desktop_processes(&container(false));
        let ids: Vec<_> = specs.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["xvfb", "dbus", "pulseaudio", "xfce"]);
        assert_eq!(specs[0].display(), "sh -c Xvfb :0 -screen 0 1280x720x24");
        assert_eq!(
            specs[1].display(),
            "dbus-daemon --system --nofork --nopidfile"
        );
        assert_eq!(
            specs[3].display(),
            "su inu -c dbus-launch xfce4-session --display :0"
        );
        assert!(specs.iter().all(|s| s.auto_start && s.env.is_empty()));
    }

    #[test]
    fn test_nvidia_wraps_display_and_session() {
        let specs = desktop_processes(&container(true));
        assert_eq!(specs[0].args[1], "vglrun Xvfb :0 -screen 0 1280x720x24");
        assert_eq!(specs[3].args[2], "vglrun dbus-launch xfce4-session --display :0");
        assert!(specs[0]
            .env
            .contains(&("VGL_DISPLAY".to_string(), "egl".to_string())));
        assert!(specs[3]
            .env
            .contains(&("LIBVA_DRIVER_NAME".to_string(), "nvidia".to_string())));
        assert!(specs[2].env.is_empty());
    }

    #[test]
    fn test_register_fleet() {
        let supervisor = Supervisor::new(false);
        register_fleet(&supervisor, &Config::default(), PORTS).unwrap();
        let status = supervisor.status();
        assert_eq!(status.len(), 2);
        assert!(status.iter().all(|s| !s.running));

        let supervisor = Supervisor::new(false);
        register_fleet(&supervisor, &container(false), PORTS).unwrap();
        let ids: Vec<_> = supervisor.status().into_iter().map(|s| s.id).collect();
        assert_eq!(
            ids,
            ["xvfb", "dbus", "pulseaudio", "xfce", VIDEO_ENCODER, AUDIO_ENCODER]
        );
    }
}
