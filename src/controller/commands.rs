//! Requests passed from caller threads to the frame-processing thread.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Command drained by `process_frame`, at most one per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfmCommand {
    Tracking,
    Stop,
    OneShot,
    /// Shot check tagged with the ticket its answer must carry.
    ShotCheck(u64),
}

/// Command for the on-board autofocus worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocCommand {
    Firmware,
    Focus,
    Stop,
    Exit,
}

/// Single-slot answer to a shot check. A new answer overwrites an unread one.
///
/// Answers carry the ticket of the request they reply to, so a late answer to
/// a request that already timed out is never taken by a later caller.
#[derive(Default)]
pub struct AckMailbox {
    slot: Mutex<Option<(u64, bool)>>,
    cv: Condvar,
}

impl AckMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&self, ticket: u64, shot: bool) {
        *self.slot.lock().expect("lock poisoned") = Some((ticket, shot));
        self.cv.notify_all();
    }

    /// Take the answer for `ticket`, waiting at most `timeout` for it.
    /// Answers to older tickets are discarded.
    pub fn take_timeout(&self, ticket: u64, timeout: Duration) -> Option<bool> {
        let mut slot = self.slot.lock().expect("lock poisoned");
        let deadline = Instant::now() + timeout;
        loop {
            match *slot {
                Some((answered, shot)) if answered == ticket => {
                    slot.take();
                    return Some(shot);
                }
                Some((answered, _)) if answered < ticket => {
                    log::debug!("dropping stale shot-check answer {}", answered);
                    slot.take();
                }
                _ => {}
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self
                .cv
                .wait_timeout(slot, deadline - now)
                .expect("lock poisoned");
            slot = guard;
        }
    }
}
