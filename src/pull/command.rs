//! Transcoder invocation builder
//!
//! Builds the ffmpeg command line for a pull. Transport is forced to TCP
//! regardless of the origin's native transport so lossy camera uplinks
//! don't shred the elementary stream, and the encode settings favor
//! latency and CPU over quality.

use std::process::Stdio;

use tokio::process::{Child, Command};

use crate::config::IngestConfig;

use super::handle::PullOutput;

/// HLS rolling window: 2-second segments, 3 kept, old ones deleted.
const HLS_SEGMENT_SECS: &str = "2";
const HLS_WINDOW: &str = "3";

/// A fully-resolved transcoder command line.
#[derive(Debug, Clone)]
pub struct PullCommand {
    program: String,
    args: Vec<String>,
}

impl PullCommand {
    /// Build the invocation for one pull.
    pub fn build(config: &IngestConfig, origin: &str, output: &PullOutput) -> Self {
        let mut args: Vec<String> = vec![
            "-rtsp_transport".into(),
            "tcp".into(),
            "-i".into(),
            origin.to_string(),
            "-c:v".into(),
            "libx264".into(),
            "-preset".into(),
            "veryfast".into(),
            "-tune".into(),
            "zerolatency".into(),
            "-c:a".into(),
            "aac".into(),
        ];

        match output {
            PullOutput::Hls { dir, .. } => {
                args.extend([
                    "-f".into(),
                    "hls".into(),
                    "-hls_time".into(),
                    HLS_SEGMENT_SECS.into(),
                    "-hls_list_size".into(),
                    HLS_WINDOW.into(),
                    "-hls_flags".into(),
                    "delete_segments+append_list".into(),
                    "-hls_segment_filename".into(),
                    dir.join("%03d.ts").to_string_lossy().into_owned(),
                    dir.join("index.m3u8").to_string_lossy().into_owned(),
                ]);
            }
            PullOutput::Relay { url } => {
                args.extend(["-f".into(), "flv".into(), url.clone()]);
            }
        }

        Self {
            program: config.ffmpeg_path.clone(),
            args,
        }
    }

    /// Spawn the subprocess with stderr piped for the error scan.
    pub fn spawn(&self) -> std::io::Result<Child> {
        Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}
