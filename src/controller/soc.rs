//! Worker for sensors that run autofocus on-board.
//!
//! Sensor commands can take seconds (firmware download), so they run on a
//! dedicated thread with the lens borrowed out of the session context. The
//! session lock is never held across a sensor call.

use super::commands::SocCommand;
use super::Inner;
use crate::errors::AfError;
use crate::lens::SocFocusCommand;
use crate::types::{AfEvent, AfState};
use crossbeam_channel::Receiver;
use std::sync::Arc;
use std::thread::JoinHandle;

pub(super) fn spawn(
    inner: Arc<Inner>,
    rx: Receiver<SocCommand>,
) -> Result<JoinHandle<()>, AfError> {
    std::thread::Builder::new()
        .name("isp-autofocus-soc".to_string())
        .spawn(move || run(&inner, rx))
        .map_err(|e| {
            AfError::OutOfMemory(format!(
                "failed to spawn on-board autofocus worker: {}",
                e
            ))
        })
}

fn run(inner: &Inner, rx: Receiver<SocCommand>) {
    log::debug!("on-board autofocus worker started");
    while let Ok(command) = rx.recv() {
        match command {
            SocCommand::Exit => break,
            SocCommand::Firmware => {
                let result = execute(
                    inner,
                    SocFocusCommand::DownloadFirmware,
                    AfState::DownloadingFirmware,
                );
                match result {
                    Ok(()) => log::info!("on-board autofocus firmware downloaded"),
                    Err(e) => log::error!("on-board autofocus firmware download failed: {}", e),
                }
            }
            SocCommand::Focus => {
                let focus = match execute(inner, SocFocusCommand::Focus, AfState::Running) {
                    Ok(()) => true,
                    Err(e) => {
                        log::warn!("on-board autofocus failed: {}", e);
                        false
                    }
                };
                inner.events.publish(AfEvent::AutofocusFinished { focus });
            }
            SocCommand::Stop => {
                inner
                    .context
                    .lock()
                    .expect("lock poisoned")
                    .set_state(AfState::Stopped);
            }
        }
    }
    log::debug!("on-board autofocus worker exiting");
}

/// Run one sensor command in `busy` state, leaving the session stopped.
fn execute(inner: &Inner, command: SocFocusCommand, busy: AfState) -> Result<(), AfError> {
    let lens = inner.context.lock().expect("lock poisoned").lend_lens(busy);
    let Some(mut lens) = lens else {
        inner
            .context
            .lock()
            .expect("lock poisoned")
            .set_state(AfState::Stopped);
        return Err(AfError::WrongHandle);
    };

    let result = lens.soc_focus_command(command);
    inner
        .context
        .lock()
        .expect("lock poisoned")
        .return_lens(Some(lens), AfState::Stopped);
    result
}
