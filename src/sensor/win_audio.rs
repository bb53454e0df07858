//! Windows capture detection via Core Audio sessions

use windows::Win32::Media::Audio::{
    eCapture, eConsole, AudioSessionStateActive, IAudioSessionManager2, IMMDeviceEnumerator,
    MMDeviceEnumerator,
};
use windows::Win32::System::Com::{
    CoCreateInstance, CoInitializeEx, CoUninitialize, CLSCTX_ALL, COINIT_MULTITHREADED,
};

/// Whether any audio session on the default capture endpoint is active
///
/// COM objects are created per poll so nothing thread-bound outlives the call.
pub fn any_capture_session_active() -> bool {
    // SAFETY: COM is initialised for this thread for the duration of the
    // query and every interface is released before uninitialising.
    unsafe {
        let initialised = CoInitializeEx(None, COINIT_MULTITHREADED).is_ok();
        let result = query_sessions();
        if initialised {
            CoUninitialize();
        }

        match result {
            Ok(active) => active,
            Err(e) => {
                tracing::debug!("Audio session query failed: {}", e);
                false
            }
        }
    }
}

unsafe fn query_sessions() -> windows::core::Result<bool> {
    let enumerator: IMMDeviceEnumerator = CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)?;
    let device = enumerator.GetDefaultAudioEndpoint(eCapture, eConsole)?;
    let manager: IAudioSessionManager2 = device.Activate(CLSCTX_ALL, None)?;
    let sessions = manager.GetSessionEnumerator()?;

    for index in 0..sessions.GetCount()? {
        let control = sessions.GetSession(index)?;
        if control.GetState()? == AudioSessionStateActive {
            return Ok(true);
        }
    }
    Ok(false)
}
