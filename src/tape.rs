//! Adjoint-recording switch.
//!
//! The forward model records its operations only while a
//! [`RecordingSession`] is alive.  Dropping the session restores whatever
//! state the tape was in before, so an early return or a failed solve
//! never leaves recording switched on.

use std::cell::Cell;
use tracing::debug;

#[derive(Debug, Default)]
pub struct Tape {
    recording: Cell<bool>,
    sessions: Cell<usize>,
}

impl Tape {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_recording(&self) -> bool {
        self.recording.get()
    }

    /// Number of sessions opened over the tape's lifetime.
    pub fn sessions_started(&self) -> usize {
        self.sessions.get()
    }

    /// Switch recording on until the returned guard is dropped.
    #[must_use = "recording stops as soon as the session is dropped"]
    pub fn start(&self) -> RecordingSession<'_> {
        let previous = self.recording.replace(true);
        self.sessions.set(self.sessions.get() + 1);
        debug!("start annotating");
        RecordingSession { tape: self, previous }
    }
}

/// Scoped recording; see [`Tape::start`].
#[derive(Debug)]
pub struct RecordingSession<'a> {
    tape: &'a Tape,
    previous: bool,
}

impl Drop for RecordingSession<'_> {
    fn drop(&mut self) {
        self.tape.recording.set(self.previous);
        debug!("stop annotating");
    }
}
