use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use traffic_analytics::SessionManager;

use crate::{
    config::{ServeArgs, ServerConfig, SnapshotArgs, SnapshotConfig, TelemetryOptions},
    encoding::encode_capture,
    server, telemetry,
};

#[derive(Debug, Parser)]
#[command(name = "traffic-monitor", version, about = "Road traffic analytics service")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP API.
    Serve(ServeArgs),
    /// Grab one frame from a source and write it as JPEG.
    Snapshot(SnapshotArgs),
}

pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Serve(args) => {
            let config = ServerConfig::try_from(args)?;
            let _guard = telemetry::install(&config.telemetry)?;
            telemetry::init_metrics_recorder()?;
            server::run(config)
        }
        Command::Snapshot(args) => {
            let config = SnapshotConfig::try_from(args)?;
            let _guard = telemetry::install(&TelemetryOptions::default())?;
            snapshot(&config)
        }
    }
}

fn snapshot(config: &SnapshotConfig) -> Result<()> {
    let frame = SessionManager::new().probe_frame(&config.source)?;
    let jpeg = encode_capture(&frame, config.jpeg_quality)?;
    std::fs::write(&config.output, &jpeg)
        .with_context(|| format!("failed to write {}", config.output.display()))?;
    info!(
        "wrote {}x{} frame from {} to {}",
        frame.width,
        frame.height,
        config.source,
        config.output.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_serve_subcommand_parses() {
        let cli = Cli::try_parse_from([
            "traffic-monitor",
            "serve",
            "--port",
            "8080",
            "--videos-dir",
            "/data/videos",
        ])
        .unwrap();
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        let config = ServerConfig::try_from(args).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.bind, "0.0.0.0");
        assert_eq!(config.videos_dir, PathBuf::from("/data/videos"));
    }

    #[test]
    fn test_snapshot_writes_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        image::RgbImage::from_pixel(20, 10, image::Rgb([0, 0, 255]))
            .save(dir.path().join("frame.png"))
            .unwrap();
        let output = dir.path().join("out.jpg");
        let cli = Cli::try_parse_from([
            "traffic-monitor",
            "snapshot",
            "--cap-type",
            "file",
            "--cap-path",
            "frame.png",
            "--videos-dir",
            dir.path().to_str().unwrap(),
            "-o",
            output.to_str().unwrap(),
        ])
        .unwrap();
        let Command::Snapshot(args) = cli.command else {
            panic!("expected snapshot");
        };
        snapshot(&SnapshotConfig::try_from(args).unwrap()).unwrap();

        let written = image::open(&output).unwrap();
        assert_eq!((written.width(), written.height()), (20, 10));
    }
}
