use clap::{Parser, Subcommand};
use std::path::PathBuf;

// Video backend info (compile-time)
#[cfg(feature = "video")]
const VIDEO_BACKEND: &str = "playa-ffmpeg 8.0 (static)";
#[cfg(not(feature = "video"))]
const VIDEO_BACKEND: &str = "none (numbered stills only)";

// Build version with backend info
const VERSION_INFO: &str = const_format::concatcp!(
    env!("CARGO_PKG_VERSION"), "\n",
    "Video:  ", VIDEO_BACKEND, "\n",
    "Target: ", std::env::consts::ARCH, "-", std::env::consts::OS
);

/// Drive a small LCD panel with themes, video and live overlays
#[derive(Parser, Debug)]
#[command(author, version = VERSION_INFO, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Enable debug logging to file (default: panelcast.log in the data dir)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE", global = true)]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbosity: u8,

    /// Custom configuration directory (overrides default platform paths)
    #[arg(short = 'c', long = "config-dir", value_name = "DIR", global = true)]
    pub config_dir: Option<PathBuf>,

    /// Device node to write to (default: last selected device)
    #[arg(short = 'd', long = "device", value_name = "PATH", global = true)]
    pub device: Option<PathBuf>,

    /// Panel resolution, e.g. 320x320
    #[arg(
        short = 'r',
        long = "resolution",
        value_name = "WxH",
        value_parser = parse_resolution,
        global = true
    )]
    pub resolution: Option<(u32, u32)>,

    /// Panel rotation in degrees (0, 90, 180, 270)
    #[arg(long = "rotation", value_name = "DEG", allow_hyphen_values = true, global = true)]
    pub rotation: Option<i32>,

    /// Brightness percent (0-100)
    #[arg(short = 'b', long = "brightness", value_name = "PERCENT", global = true)]
    pub brightness: Option<i32>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Fill the panel with a solid color (#rrggbb)
    Color {
        #[arg(value_name = "HEX")]
        hex: String,
    },
    /// Send one image through the transform chain
    Send {
        #[arg(value_name = "IMAGE")]
        image: PathBuf,
    },
    /// Play a video file or a directory of numbered frames
    Play {
        #[arg(value_name = "SOURCE")]
        source: PathBuf,

        /// Stop after N seconds (default: run until interrupted)
        #[arg(short = 's', long = "seconds", value_name = "N")]
        seconds: Option<u64>,

        /// Draw live CPU/memory metrics over the video
        #[arg(short = 'm', long = "metrics")]
        metrics: bool,
    },
    /// List themes found under a directory
    Themes {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
    },
    /// Remember a device path as the selected device
    Select {
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },
    /// Print current host metrics
    Info,
}

/// `WxH` -> (w, h)
pub fn parse_resolution(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WxH, got '{}'", s))?;
    let w: u32 = w.trim().parse().map_err(|_| format!("invalid width '{}'", w))?;
    let h: u32 = h.trim().parse().map_err(|_| format!("invalid height '{}'", h))?;
    if w == 0 || h == 0 {
        return Err(format!("resolution must be non-zero, got '{}'", s));
    }
    Ok((w, h))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_resolution() {
        assert_eq!(parse_resolution("320x240"), Ok((320, 240)));
        assert_eq!(parse_resolution("480X480"), Ok((480, 480)));
        assert!(parse_resolution("320").is_err());
        assert!(parse_resolution("0x10").is_err());
        assert!(parse_resolution("axb").is_err());
    }

    #[test]
    fn test_no_subcommand() {
        let args = Args::try_parse_from(["panelcast"]).unwrap();
        assert!(args.command.is_none());
        assert_eq!(args.verbosity, 0);
    }

    #[test]
    fn test_play_with_global_flags() {
        let args = Args::try_parse_from([
            "panelcast", "-vv", "play", "clip.mp4", "--seconds", "5", "--metrics", "-r", "480x480",
        ])
        .unwrap();
        assert_eq!(args.verbosity, 2);
        assert_eq!(args.resolution, Some((480, 480)));
        match args.command {
            Some(Command::Play { source, seconds, metrics }) => {
                assert_eq!(source, PathBuf::from("clip.mp4"));
                assert_eq!(seconds, Some(5));
                assert!(metrics);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_color_command() {
        let args =
            Args::try_parse_from(["panelcast", "--device", "/dev/sg1", "color", "#ff0000"])
                .unwrap();
        assert_eq!(args.device, Some(PathBuf::from("/dev/sg1")));
        assert!(matches!(args.command, Some(Command::Color { ref hex }) if hex == "#ff0000"));
    }
}
