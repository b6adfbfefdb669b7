//! Transcoder supervisor
//!
//! Owns the lifecycle of one ffmpeg subprocess per pulled source. Each
//! pull runs under its own monitor task, so a stalled origin or a slow
//! registry write for one stream never delays another. The supervisor is
//! the only component allowed to hold or signal the subprocess.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::ChildStderr;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{IngestConfig, PullOutputKind};
use crate::registry::{masked_origin, SourceDescriptor, StreamRegistry, StreamUpdate};

use super::command::PullCommand;
use super::handle::{ActivePull, PullHandle, PullOutput};
use super::store::{ActivePulls, ProcessStore};

/// What to do after a subprocess exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitAction {
    /// Relaunch after the fixed backoff
    Restart,
    /// Mark the stream offline
    Offline,
}

/// Restart only on a failed exit with the policy enabled. A requested
/// stop reports no exit code and never restarts.
fn exit_action(auto_restart: bool, exit_code: Option<i32>) -> ExitAction {
    match exit_code {
        Some(code) if code != 0 && auto_restart => ExitAction::Restart,
        _ => ExitAction::Offline,
    }
}

/// Supervisor for pulled streams.
pub struct PullSupervisor {
    processes: Arc<ProcessStore>,
    pulls: Arc<ActivePulls>,
    registry: Arc<dyn StreamRegistry>,
    config: Arc<IngestConfig>,
    restart_tx: mpsc::UnboundedSender<SourceDescriptor>,
}

impl PullSupervisor {
    /// Create the supervisor and its restart worker.
    ///
    /// The worker re-enters `start_pull` for sources whose monitor task
    /// requested a relaunch; the backoff sleep happens on the per-pull
    /// monitor task so restarts of unrelated sources never queue behind
    /// each other.
    pub fn new(registry: Arc<dyn StreamRegistry>, config: Arc<IngestConfig>) -> Arc<Self> {
        let (restart_tx, mut restart_rx) = mpsc::unbounded_channel();

        let supervisor = Arc::new(Self {
            processes: Arc::new(ProcessStore::new()),
            pulls: Arc::new(ActivePulls::new()),
            registry,
            config,
            restart_tx,
        });

        let worker = Arc::clone(&supervisor);
        tokio::spawn(async move {
            while let Some(source) = restart_rx.recv().await {
                worker.start_pull(source).await;
            }
        });

        supervisor
    }

    /// The process registry, shared with shutdown handling.
    pub fn processes(&self) -> Arc<ProcessStore> {
        Arc::clone(&self.processes)
    }

    /// The active-pull trust markers, shared with the authorization gate.
    pub fn active_pulls(&self) -> Arc<ActivePulls> {
        Arc::clone(&self.pulls)
    }

    /// Start pulling a source, idempotently.
    ///
    /// A second start for an already-registered admission token returns
    /// without side effects. Registration happens before the subprocess
    /// launches so two racing starts cannot both spawn.
    pub async fn start_pull(self: &Arc<Self>, source: SourceDescriptor) {
        if self.processes.lookup(&source.stream_key).await.is_some() {
            info!(stream = %source.stream_name, "already pulling");
            return;
        }

        let output = self.resolve_output(&source).await;

        let cancel = CancellationToken::new();
        let handle = PullHandle::new(&source, output.clone(), cancel.clone());

        if !self.processes.register(&source.stream_key, handle).await {
            info!(stream = %source.stream_name, "already pulling");
            return;
        }

        let (origin, origin_log) = match source.origin_url() {
            Ok(url) => {
                let masked = masked_origin(&url);
                (url.to_string(), masked)
            }
            Err(e) => {
                // Let the subprocess fail on the raw address; launch
                // problems surface through the exit path like any other
                // runtime failure.
                warn!(stream = %source.stream_name, error = %e, "origin address unusable");
                (
                    source.rtsp_url.clone().unwrap_or_default(),
                    "<unparsed>".to_string(),
                )
            }
        };

        info!(stream = %source.stream_name, origin = %origin_log, "starting pull");

        self.pulls.insert(ActivePull::new(&source)).await;

        let update = StreamUpdate::live(output.playback_url());
        if let Err(e) = self.registry.update_stream(&source.id, &update).await {
            warn!(stream = %source.stream_name, error = %e, "registry write failed");
        }

        let command = PullCommand::build(&self.config, &origin, &output);
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            monitor.monitor_pull(source, command, cancel).await;
        });
    }

    /// Request termination of a pull.
    ///
    /// Unregisters immediately without waiting for the subprocess to
    /// confirm exit; the monitor task's exit handling runs on its own and
    /// tolerates the double unregister. Unknown tokens are a no-op.
    pub async fn stop_pull(&self, token: &str) {
        match self.processes.lookup(token).await {
            Some(handle) => {
                info!(stream = %handle.stream_name, "stopping pull");
                handle.request_stop();
                self.processes.unregister(token).await;
            }
            None => {
                debug!("stop requested for token with no active pull");
            }
        }
    }

    /// Best-effort drain: request termination of every registered pull.
    ///
    /// Does not wait for exits to be confirmed.
    pub async fn shutdown(&self) {
        for handle in self.processes.drain().await {
            info!(stream = %handle.stream_name, "stopping pull");
            handle.request_stop();
        }
    }

    async fn resolve_output(&self, source: &SourceDescriptor) -> PullOutput {
        match self.config.pull_output {
            PullOutputKind::Hls => {
                let dir = self.config.hls_dir(&source.stream_name);
                if let Err(e) = tokio::fs::create_dir_all(&dir).await {
                    // Non-fatal: the subprocess fails on its own if the
                    // path is truly unusable.
                    warn!(stream = %source.stream_name, error = %e, "failed to create output directory");
                }
                PullOutput::Hls {
                    dir,
                    playlist_url: self.config.hls_url(&source.stream_name),
                }
            }
            PullOutputKind::Relay => PullOutput::Relay {
                url: self
                    .config
                    .relay_url(&source.stream_name, &source.stream_key),
            },
        }
    }

    /// Per-pull monitor: runs the subprocess to completion, then applies
    /// the exit policy.
    async fn monitor_pull(
        self: Arc<Self>,
        source: SourceDescriptor,
        command: PullCommand,
        cancel: CancellationToken,
    ) {
        let exit_code = match command.spawn() {
            Err(e) => {
                // Missing binary / invalid arguments land here; fold them
                // into the exit path with a synthetic failure code.
                warn!(stream = %source.stream_name, error = %e, "transcoder failed to launch");
                Some(-1)
            }
            Ok(mut child) => {
                if let Some(stderr) = child.stderr.take() {
                    tokio::spawn(scan_stderr(source.stream_name.clone(), stderr));
                }

                tokio::select! {
                    _ = cancel.cancelled() => {
                        let _ = child.kill().await;
                        None
                    }
                    status = child.wait() => match status {
                        Ok(status) => Some(status.code().unwrap_or(-1)),
                        Err(e) => {
                            warn!(stream = %source.stream_name, error = %e, "failed waiting for transcoder");
                            Some(-1)
                        }
                    },
                }
            }
        };

        info!(stream = %source.stream_name, code = ?exit_code, "transcoder exited");

        self.processes.unregister(&source.stream_key).await;
        self.pulls.remove(&source.stream_name).await;

        match exit_action(source.auto_restart, exit_code) {
            ExitAction::Restart => {
                warn!(
                    stream = %source.stream_name,
                    delay_secs = self.config.restart_backoff.as_secs(),
                    "pull failed, scheduling restart"
                );
                tokio::time::sleep(self.config.restart_backoff).await;
                let _ = self.restart_tx.send(source);
            }
            ExitAction::Offline => {
                let update = StreamUpdate::offline();
                if let Err(e) = self.registry.update_stream(&source.id, &update).await {
                    warn!(stream = %source.stream_name, error = %e, "registry write failed");
                }
            }
        }
    }
}

/// Surface transcoder stderr lines that carry the error marker; drop the
/// rest of its log noise.
async fn scan_stderr(stream_name: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        if line.contains("error") || line.contains("Error") {
            warn!(stream = %stream_name, "{}", line);
        }
    }
}
