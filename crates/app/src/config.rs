//! Translation of CLI arguments into validated runtime configuration.

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Args;
use traffic_analytics::stream::DEFAULT_QUEUE_CAPACITY;
use video_ingest::SourceDescriptor;

pub const DEFAULT_MODEL_PATH: &str = "models/yolov10n.torchscript";

#[derive(Clone, Debug, Default)]
/// Optional telemetry knobs for tracing.
pub struct TelemetryOptions {
    /// Write a Chrome trace JSON file capturing session and frame spans.
    pub chrome_trace_path: Option<PathBuf>,
}

#[derive(Clone, Debug)]
/// Settings for the HTTP service.
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Directory `file` sources and the file listing are resolved against.
    pub videos_dir: PathBuf,
    /// Detector loaded by every session.
    pub model_path: PathBuf,
    pub jpeg_quality: u8,
    pub queue_capacity: usize,
    pub telemetry: TelemetryOptions,
}

/// CLI arguments accepted by the `serve` subcommand.
#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Address to listen on.
    #[arg(long = "bind", value_name = "ADDR", default_value = "0.0.0.0")]
    pub bind: String,
    #[arg(long = "port", value_name = "PORT", default_value_t = 5000)]
    pub port: u16,
    /// Directory holding recorded videos.
    #[arg(long = "videos-dir", value_name = "DIR", default_value = "./videos")]
    pub videos_dir: PathBuf,
    /// Detector for all sessions: a TorchScript model or a `.jsonl` replay of tracker output.
    #[arg(long = "model", value_name = "PATH")]
    pub model: Option<PathBuf>,
    /// JPEG quality for served frames (1-100).
    #[arg(long = "jpeg-quality", value_name = "QUALITY", default_value_t = 85)]
    pub jpeg_quality: i32,
    /// Capacity of each per-session frame queue.
    #[arg(long = "queue-capacity", value_name = "N")]
    pub queue_capacity: Option<usize>,
    /// Emit Chrome trace JSON for post-mortem analysis.
    #[arg(long = "chrome-trace", value_name = "PATH")]
    pub chrome_trace: Option<PathBuf>,
}

impl TryFrom<ServeArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: ServeArgs) -> Result<Self> {
        if args.bind.trim().is_empty() {
            bail!("--bind must not be empty");
        }
        if !(1..=100).contains(&args.jpeg_quality) {
            bail!("--jpeg-quality must be an integer between 1 and 100");
        }
        let queue_capacity = args.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY);
        if queue_capacity == 0 {
            bail!("--queue-capacity must be at least 1");
        }

        Ok(Self {
            bind: args.bind,
            port: args.port,
            videos_dir: args.videos_dir,
            model_path: args.model.unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
            jpeg_quality: args.jpeg_quality as u8,
            queue_capacity,
            telemetry: TelemetryOptions {
                chrome_trace_path: args.chrome_trace,
            },
        })
    }
}

#[derive(Clone, Debug)]
pub struct SnapshotConfig {
    pub source: SourceDescriptor,
    pub output: PathBuf,
    pub jpeg_quality: u8,
}

/// CLI arguments accepted by the `snapshot` subcommand.
#[derive(Debug, Args)]
pub struct SnapshotArgs {
    /// `camera`, `ip_camera` or `file`.
    #[arg(long = "cap-type", value_name = "TYPE")]
    pub cap_type: String,
    /// Device index, stream URL, or file name inside `--videos-dir`.
    #[arg(long = "cap-path", value_name = "PATH")]
    pub cap_path: String,
    #[arg(long = "videos-dir", value_name = "DIR", default_value = "./videos")]
    pub videos_dir: PathBuf,
    /// Where to write the JPEG.
    #[arg(long = "output", short = 'o', value_name = "PATH", default_value = "snapshot.jpg")]
    pub output: PathBuf,
    #[arg(long = "jpeg-quality", value_name = "QUALITY", default_value_t = 90)]
    pub jpeg_quality: i32,
}

impl TryFrom<SnapshotArgs> for SnapshotConfig {
    type Error = anyhow::Error;

    fn try_from(args: SnapshotArgs) -> Result<Self> {
        if !(1..=100).contains(&args.jpeg_quality) {
            bail!("--jpeg-quality must be an integer between 1 and 100");
        }
        let source = SourceDescriptor::from_request(&args.cap_type, &args.cap_path, &args.videos_dir)?;
        Ok(Self {
            source,
            output: args.output,
            jpeg_quality: args.jpeg_quality as u8,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn serve_args() -> ServeArgs {
        ServeArgs {
            bind: "127.0.0.1".into(),
            port: 5000,
            videos_dir: PathBuf::from("./videos"),
            model: None,
            jpeg_quality: 85,
            queue_capacity: None,
            chrome_trace: None,
        }
    }

    #[test]
    fn test_serve_defaults() {
        let config = ServerConfig::try_from(serve_args()).unwrap();
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(config.model_path, PathBuf::from(DEFAULT_MODEL_PATH));
        assert_eq!(config.jpeg_quality, 85);
    }

    #[test]
    fn test_out_of_range_values_are_rejected() {
        let mut args = serve_args();
        args.jpeg_quality = 0;
        assert!(ServerConfig::try_from(args).is_err());

        let mut args = serve_args();
        args.queue_capacity = Some(0);
        assert!(ServerConfig::try_from(args).is_err());
    }

    #[test]
    fn test_snapshot_requires_known_cap_type() {
        let args = SnapshotArgs {
            cap_type: "webcam".into(),
            cap_path: "0".into(),
            videos_dir: PathBuf::from("./videos"),
            output: PathBuf::from("out.jpg"),
            jpeg_quality: 90,
        };
        assert!(SnapshotConfig::try_from(args).is_err());
    }
}
