//! Transcode worker supervision
//!
//! One external transcoder per live session. The supervisor owns the
//! registry (livestream id -> worker), the UDP ports each worker listens on
//! and the SDP file describing them. A UDP port belongs to at most one
//! registered worker. Each child process is owned by a watcher task; `stop`
//! reaches it through a oneshot channel, and every exit, requested or not,
//! goes through the same cleanup and is published as a [`WorkerExit`].

mod launcher;

pub use launcher::{transcoder_args, FfmpegLauncher, WorkerLauncher, WorkerSpec};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use resilience::with_timeout;
use serde::Serialize;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::metrics;
use crate::services::sdp::{self, SdpError};

const EXIT_CHANNEL_CAPACITY: usize = 64;
/// Default port pairs tried before giving up.
const PORT_SEARCH_LIMIT: u16 = 64;
/// Distance between successive default port pairs.
const PORT_PAIR_STRIDE: u16 = 4;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("transcode worker already running for livestream {0}")]
    AlreadyRunning(i64),
    #[error("UDP port {port} is held by the transcode worker of livestream {owner}")]
    PortInUse { port: u16, owner: i64 },
    #[error("no free UDP port pair for a transcode worker")]
    NoFreePorts,
    #[error(transparent)]
    Sdp(#[from] SdpError),
    #[error("failed to write SDP file {path}: {source}")]
    SdpWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to spawn transcode worker: {0}")]
    Spawn(#[source] io::Error),
    /// `stop` ran while the worker was still being spawned
    #[error("start of transcode worker for livestream {0} was cancelled by stop")]
    Cancelled(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgePorts {
    pub audio_port: u16,
    pub video_port: u16,
}

/// Published whenever a worker process ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerExit {
    pub livestream_id: i64,
    /// None when killed by a signal or the status could not be read
    pub exit_code: Option<i32>,
    /// True when the exit followed a `stop` call
    pub requested: bool,
}

struct WorkerEntry {
    generation: u64,
    ports: BridgePorts,
    sdp_path: PathBuf,
    pid: Option<u32>,
    /// None while the process is still being spawned
    stop_tx: Option<oneshot::Sender<()>>,
}

impl WorkerEntry {
    fn holds_port(&self, port: u16) -> bool {
        self.ports.audio_port == port || self.ports.video_port == port
    }
}

struct Registry {
    workers: Mutex<HashMap<i64, WorkerEntry>>,
    exits: broadcast::Sender<WorkerExit>,
}

impl Registry {
    /// Remove the entry if it still belongs to `generation`; returns whether
    /// it did. The SDP file goes with the entry, under the same lock, so a
    /// later start for the id never loses its fresh file.
    fn release(&self, livestream_id: i64, generation: u64) -> bool {
        let mut workers = self.workers.lock();
        if workers.get(&livestream_id).map(|e| e.generation) != Some(generation) {
            return false;
        }
        if let Some(entry) = workers.remove(&livestream_id) {
            remove_sdp_file(&entry.sdp_path);
        }
        metrics::set_active_workers(workers.len());
        true
    }

    /// Hand the spawned process to its reservation. False when `stop` removed
    /// the reservation in the meantime.
    fn attach(
        &self,
        livestream_id: i64,
        generation: u64,
        pid: Option<u32>,
        stop_tx: oneshot::Sender<()>,
    ) -> bool {
        let mut workers = self.workers.lock();
        match workers.get_mut(&livestream_id) {
            Some(entry) if entry.generation == generation => {
                entry.pid = pid;
                entry.stop_tx = Some(stop_tx);
                true
            }
            _ => false,
        }
    }

    /// Drop a start that never became a running worker: release its
    /// reservation if still held, and delete the SDP file unless a newer start
    /// has claimed the id.
    fn abandon(&self, livestream_id: i64, generation: u64, sdp_path: &Path) {
        if self.release(livestream_id, generation) {
            return;
        }
        let workers = self.workers.lock();
        if !workers.contains_key(&livestream_id) {
            remove_sdp_file(sdp_path);
        }
    }
}

/// First registered worker holding either of `ports`.
fn port_owner(workers: &HashMap<i64, WorkerEntry>, ports: BridgePorts) -> Option<(u16, i64)> {
    workers.iter().find_map(|(id, entry)| {
        [ports.audio_port, ports.video_port]
            .into_iter()
            .find(|port| entry.holds_port(*port))
            .map(|port| (port, *id))
    })
}

#[derive(Clone)]
pub struct BridgeSupervisor {
    launcher: Arc<dyn WorkerLauncher>,
    registry: Arc<Registry>,
    next_generation: Arc<AtomicU64>,
    default_ports: BridgePorts,
    sdp_dir: PathBuf,
    stop_grace: Duration,
}

impl BridgeSupervisor {
    pub fn new(config: &BridgeConfig, launcher: Arc<dyn WorkerLauncher>) -> Self {
        let (exits, _) = broadcast::channel(EXIT_CHANNEL_CAPACITY);
        Self {
            launcher,
            registry: Arc::new(Registry {
                workers: Mutex::new(HashMap::new()),
                exits,
            }),
            next_generation: Arc::new(AtomicU64::new(1)),
            default_ports: BridgePorts {
                audio_port: config.default_audio_port,
                video_port: config.default_video_port,
            },
            sdp_dir: config.sdp_dir.clone(),
            stop_grace: config.stop_grace,
        }
    }

    /// Spawn the worker for `livestream_id`, pushing to `egress_url`.
    ///
    /// The id and ports are reserved in one lock acquisition, so concurrent
    /// starts for the same id (or the same ports) cannot both succeed. Writing
    /// the SDP file and spawning the process happen after the lock is
    /// released. Omitted ports take the first free default pair.
    pub fn start(
        &self,
        livestream_id: i64,
        egress_url: &str,
        audio_port: Option<u16>,
        video_port: Option<u16>,
    ) -> Result<BridgePorts, BridgeError> {
        let sdp_path = self.sdp_path(livestream_id);
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        let (ports, description) = {
            let mut workers = self.registry.workers.lock();
            if workers.contains_key(&livestream_id) {
                return Err(BridgeError::AlreadyRunning(livestream_id));
            }
            let ports = self.choose_ports(&workers, audio_port, video_port)?;
            let description = sdp::synthesize(ports.audio_port, ports.video_port)?;

            workers.insert(
                livestream_id,
                WorkerEntry {
                    generation,
                    ports,
                    sdp_path: sdp_path.clone(),
                    pid: None,
                    stop_tx: None,
                },
            );
            metrics::set_active_workers(workers.len());
            (ports, description)
        };

        let mut child = match self.spawn_worker(livestream_id, egress_url, &sdp_path, description)
        {
            Ok(child) => child,
            Err(e) => {
                self.registry.abandon(livestream_id, generation, &sdp_path);
                return Err(e);
            }
        };

        let pid = child.id();
        drain_output(livestream_id, &mut child);

        let (stop_tx, stop_rx) = oneshot::channel();
        let attached = self.registry.attach(livestream_id, generation, pid, stop_tx);

        // Not attached: the sender was dropped, so the watcher terminates it.
        tokio::spawn(watch_worker(
            self.registry.clone(),
            livestream_id,
            generation,
            child,
            stop_rx,
            self.stop_grace,
        ));

        if !attached {
            self.registry.abandon(livestream_id, generation, &sdp_path);
            warn!(livestream_id, pid = ?pid, "Transcode worker stopped while starting");
            return Err(BridgeError::Cancelled(livestream_id));
        }

        info!(
            livestream_id,
            pid = ?pid,
            audio_port = ports.audio_port,
            video_port = ports.video_port,
            "Transcode worker started"
        );
        Ok(ports)
    }

    /// Explicit ports must be free; with none given, walk the default pairs.
    fn choose_ports(
        &self,
        workers: &HashMap<i64, WorkerEntry>,
        audio_port: Option<u16>,
        video_port: Option<u16>,
    ) -> Result<BridgePorts, BridgeError> {
        if audio_port.is_some() || video_port.is_some() {
            let ports = BridgePorts {
                audio_port: audio_port.unwrap_or(self.default_ports.audio_port),
                video_port: video_port.unwrap_or(self.default_ports.video_port),
            };
            return match port_owner(workers, ports) {
                Some((port, owner)) => Err(BridgeError::PortInUse { port, owner }),
                None => Ok(ports),
            };
        }

        (0..PORT_SEARCH_LIMIT)
            .filter_map(|step| {
                let offset = step.checked_mul(PORT_PAIR_STRIDE)?;
                Some(BridgePorts {
                    audio_port: self.default_ports.audio_port.checked_add(offset)?,
                    video_port: self.default_ports.video_port.checked_add(offset)?,
                })
            })
            .find(|ports| port_owner(workers, *ports).is_none())
            .ok_or(BridgeError::NoFreePorts)
    }

    fn spawn_worker(
        &self,
        livestream_id: i64,
        egress_url: &str,
        sdp_path: &Path,
        description: String,
    ) -> Result<Child, BridgeError> {
        std::fs::write(sdp_path, description).map_err(|source| BridgeError::SdpWrite {
            path: sdp_path.to_path_buf(),
            source,
        })?;

        let spec = WorkerSpec {
            livestream_id,
            egress_url,
            sdp_path,
        };
        self.launcher.launch(&spec).map_err(BridgeError::Spawn)
    }

    /// Deregister the worker and ask it to terminate. Returns false when no
    /// worker was registered; never fails.
    pub fn stop(&self, livestream_id: i64) -> bool {
        let entry = {
            let mut workers = self.registry.workers.lock();
            let entry = workers.remove(&livestream_id);
            if let Some(entry) = &entry {
                remove_sdp_file(&entry.sdp_path);
            }
            metrics::set_active_workers(workers.len());
            entry
        };

        let Some(entry) = entry else {
            debug!(livestream_id, "No transcode worker registered");
            return false;
        };

        match entry.stop_tx {
            Some(stop_tx) => {
                if stop_tx.send(()).is_err() {
                    debug!(livestream_id, "Transcode worker already exiting");
                }
            }
            None => debug!(livestream_id, "Transcode worker still spawning, start will cancel it"),
        }

        info!(livestream_id, pid = ?entry.pid, "Transcode worker stop requested");
        true
    }

    /// Stop every registered worker.
    pub fn stop_all(&self) -> usize {
        let ids: Vec<i64> = self.registry.workers.lock().keys().copied().collect();
        ids.into_iter().filter(|id| self.stop(*id)).count()
    }

    /// Stop every worker and wait (bounded by the stop grace) for their exits.
    pub async fn shutdown(&self) -> usize {
        let mut exits = self.subscribe_exits();
        let stopped = self.stop_all();

        let wait_for_exits = async {
            let mut seen = 0;
            while seen < stopped {
                match exits.recv().await {
                    Ok(_) => seen += 1,
                    Err(RecvError::Lagged(skipped)) => seen += skipped as usize,
                    Err(RecvError::Closed) => break,
                }
            }
        };
        if with_timeout(self.stop_grace + Duration::from_secs(1), wait_for_exits)
            .await
            .is_err()
        {
            warn!(stopped, "Timed out waiting for transcode workers to exit");
        }

        stopped
    }

    pub fn is_running(&self, livestream_id: i64) -> bool {
        self.registry.workers.lock().contains_key(&livestream_id)
    }

    pub fn ports(&self, livestream_id: i64) -> Option<BridgePorts> {
        self.registry
            .workers
            .lock()
            .get(&livestream_id)
            .map(|entry| entry.ports)
    }

    pub fn active_count(&self) -> usize {
        self.registry.workers.lock().len()
    }

    pub fn subscribe_exits(&self) -> broadcast::Receiver<WorkerExit> {
        self.registry.exits.subscribe()
    }

    pub fn sdp_path(&self, livestream_id: i64) -> PathBuf {
        self.sdp_dir
            .join(format!("janus_forward_{}.sdp", livestream_id))
    }
}

async fn watch_worker(
    registry: Arc<Registry>,
    livestream_id: i64,
    generation: u64,
    mut child: Child,
    mut stop_rx: oneshot::Receiver<()>,
    grace: Duration,
) {
    // A dropped sender counts as a stop request.
    let exited = tokio::select! {
        status = child.wait() => Some(status),
        _ = &mut stop_rx => None,
    };
    let status = match exited {
        Some(status) => status,
        None => terminate(livestream_id, &mut child, grace).await,
    };

    let exit_code = match &status {
        Ok(status) => status.code(),
        Err(e) => {
            warn!(livestream_id, error = %e, "Failed to read transcode worker exit status");
            None
        }
    };

    let requested = !registry.release(livestream_id, generation);
    metrics::record_worker_exit(requested);

    if requested {
        info!(livestream_id, exit_code = ?exit_code, "Transcode worker exited");
    } else {
        warn!(livestream_id, exit_code = ?exit_code, "Transcode worker exited unexpectedly");
    }

    // No subscribers is fine.
    let _ = registry.exits.send(WorkerExit {
        livestream_id,
        exit_code,
        requested,
    });
}

/// SIGTERM, then SIGKILL once `grace` runs out.
async fn terminate(livestream_id: i64, child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
    let Some(pid) = child.id() else {
        return child.wait().await;
    };

    if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        warn!(livestream_id, pid, error = %e, "Failed to send SIGTERM to transcode worker");
    }

    match with_timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!(
                livestream_id,
                pid,
                grace_ms = grace.as_millis() as u64,
                "Transcode worker ignored SIGTERM, killing"
            );
            child.kill().await?;
            child.wait().await
        }
    }
}

fn remove_sdp_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Removed SDP file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove SDP file"),
    }
}

fn drain_output(livestream_id: i64, child: &mut Child) {
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(log_output(livestream_id, "stdout", stdout));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(log_output(livestream_id, "stderr", stderr));
    }
}

async fn log_output<R>(livestream_id: i64, stream: &'static str, reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut record = Vec::new();
    loop {
        record.clear();
        match read_record(&mut reader, &mut record).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&record);
                let line = line.trim();
                if !line.is_empty() {
                    debug!(livestream_id, stream, "{}", line);
                }
            }
            Err(e) => {
                debug!(livestream_id, stream, error = %e, "Transcode worker output closed");
                break;
            }
        }
    }
}

/// Read up to the next `\n` or `\r`. ffmpeg redraws its progress line with
/// bare carriage returns, so splitting on `\n` alone would buffer forever.
async fn read_record<R>(reader: &mut R, out: &mut Vec<u8>) -> io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut consumed = 0;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(consumed);
        }
        match available.iter().position(|b| *b == b'\n' || *b == b'\r') {
            Some(i) => {
                out.extend_from_slice(&available[..i]);
                reader.consume(i + 1);
                return Ok(consumed + i + 1);
            }
            None => {
                let n = available.len();
                out.extend_from_slice(available);
                reader.consume(n);
                consumed += n;
            }
        }
    }
}
