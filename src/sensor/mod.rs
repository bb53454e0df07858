//! Microphone activity sensor
//!
//! Reports whether any application is currently capturing from a
//! microphone. Polled about once a second by the coordinator; every
//! platform failure reads as inactive.

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "windows")]
mod win_audio;

/// Source of the boolean "active" signal
pub trait SensorPoll: Send {
    /// Whether the condition currently holds; never blocks for long
    fn is_active(&self) -> bool;
}

/// Platform microphone-in-use detector
#[derive(Debug)]
pub struct MicrophoneSensor {
    #[cfg(target_os = "linux")]
    inner: linux::CaptureProbe,
}

impl MicrophoneSensor {
    pub fn new() -> Self {
        #[cfg(not(any(target_os = "linux", target_os = "windows")))]
        tracing::warn!("Microphone detection is not supported on this platform; reporting inactive");

        Self {
            #[cfg(target_os = "linux")]
            inner: linux::CaptureProbe::new(),
        }
    }
}

impl Default for MicrophoneSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorPoll for MicrophoneSensor {
    fn is_active(&self) -> bool {
        #[cfg(target_os = "linux")]
        {
            self.inner.is_capturing()
        }
        #[cfg(target_os = "windows")]
        {
            win_audio::any_capture_session_active()
        }
        #[cfg(not(any(target_os = "linux", target_os = "windows")))]
        {
            false
        }
    }
}
