use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::{Child, Command};

/// What a worker process needs to know at spawn time.
#[derive(Debug, Clone, Copy)]
pub struct WorkerSpec<'a> {
    pub livestream_id: i64,
    pub egress_url: &'a str,
    pub sdp_path: &'a Path,
}

/// Spawns the external process behind a transcode worker.
///
/// The returned child must have its stdout/stderr piped (or null); the
/// supervisor takes ownership of both the handle and the pipes.
pub trait WorkerLauncher: Send + Sync {
    fn launch(&self, spec: &WorkerSpec<'_>) -> io::Result<Child>;
}

/// Runs ffmpeg: RTP in (described by the SDP file), H.264/AAC MPEG-TS out.
#[derive(Debug, Clone)]
pub struct FfmpegLauncher {
    program: PathBuf,
}

impl FfmpegLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl WorkerLauncher for FfmpegLauncher {
    fn launch(&self, spec: &WorkerSpec<'_>) -> io::Result<Child> {
        Command::new(&self.program)
            .args(transcoder_args(spec.sdp_path, spec.egress_url))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
    }
}

pub fn transcoder_args(sdp_path: &Path, egress_url: &str) -> Vec<String> {
    let mut args: Vec<String> = Vec::with_capacity(32);
    let mut push = |items: &[&str]| args.extend(items.iter().map(|s| s.to_string()));

    // Input: RTP described by a local SDP file
    push(&["-protocol_whitelist", "file,udp,rtp", "-fflags", "+genpts"]);
    let input = sdp_path.to_string_lossy();
    push(&["-i", input.as_ref()]);
    // Video
    push(&[
        "-c:v", "libx264", "-preset", "veryfast", "-b:v", "2500k", "-maxrate", "2500k",
        "-bufsize", "5000k", "-pix_fmt", "yuv420p", "-g", "50",
    ]);
    // Audio
    push(&["-c:a", "aac", "-b:a", "128k", "-ar", "44100"]);
    // Output
    push(&["-f", "mpegts", egress_url]);

    args
}
