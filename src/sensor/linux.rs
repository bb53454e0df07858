//! Linux capture detection
//!
//! Primary source is ALSA's procfs view of capture substreams; PulseAudio
//! and PipeWire clients are counted through `pactl` when procfs is absent.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

const ASOUND_ROOT: &str = "/proc/asound";

#[derive(Debug)]
pub struct CaptureProbe {
    root: PathBuf,
}

impl CaptureProbe {
    pub fn new() -> Self {
        Self::with_root(PathBuf::from(ASOUND_ROOT))
    }

    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn is_capturing(&self) -> bool {
        match alsa_capture_running(&self.root) {
            Some(running) => running,
            None => pactl_source_outputs() > 0,
        }
    }
}

/// Whether a substream `status` file reports an active stream
pub fn status_is_running(status: &str) -> bool {
    status.lines().any(|line| {
        let mut parts = line.splitn(2, ':');
        matches!(
            (parts.next(), parts.next()),
            (Some(key), Some(value)) if key.trim() == "state" && value.trim() == "RUNNING"
        )
    })
}

/// Scan `card*/pcm*c/sub*/status` under `root`
///
/// Returns `None` if `root` cannot be read at all.
pub fn alsa_capture_running(root: &Path) -> Option<bool> {
    let cards = fs::read_dir(root).ok()?;

    for card in cards.flatten() {
        if !card.file_name().to_string_lossy().starts_with("card") {
            continue;
        }
        let Ok(pcms) = fs::read_dir(card.path()) else {
            continue;
        };
        for pcm in pcms.flatten() {
            let name = pcm.file_name().to_string_lossy().into_owned();
            if !(name.starts_with("pcm") && name.ends_with('c')) {
                continue;
            }
            let Ok(subs) = fs::read_dir(pcm.path()) else {
                continue;
            };
            for sub in subs.flatten() {
                if !sub.file_name().to_string_lossy().starts_with("sub") {
                    continue;
                }
                if let Ok(status) = fs::read_to_string(sub.path().join("status")) {
                    if status_is_running(&status) {
                        return Some(true);
                    }
                }
            }
        }
    }

    Some(false)
}

/// Number of active recording streams known to PulseAudio/PipeWire
fn pactl_source_outputs() -> usize {
    let output = Command::new("pactl")
        .args(["list", "short", "source-outputs"])
        .output();

    match output {
        Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|line| !line.trim().is_empty())
            .count(),
        Ok(output) => {
            tracing::debug!("pactl exited with {}", output.status);
            0
        }
        Err(e) => {
            tracing::debug!("pactl unavailable: {}", e);
            0
        }
    }
}
