use crate::status::Status;

/// Shared stream lifecycle: open/closed plus an optionally latched failure.
///
/// A stream is healthy (`ok`) until the first failure; later failures are
/// ignored so the root cause stays observable. Closing is idempotent and
/// does not clear a latched failure.
#[derive(Debug)]
pub struct StreamState {
    open: bool,
    error: Option<Status>,
}

impl StreamState {
    pub fn new() -> Self {
        StreamState {
            open: true,
            error: None,
        }
    }

    /// Creates a state that is already failed, for constructors that detect
    /// an error before the stream ever becomes usable.
    pub fn failed(status: Status) -> Self {
        StreamState {
            open: true,
            error: Some(status),
        }
    }

    /// `true` while no failure is latched, whether open or closed.
    pub fn ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn status(&self) -> Option<&Status> {
        self.error.as_ref()
    }

    /// Latches `status` as the stream failure. The first failure wins.
    /// Returns `false` for use in `return state.fail(...)` positions.
    pub fn fail(&mut self, status: Status) -> bool {
        if self.error.is_none() {
            self.error = Some(status);
        }
        false
    }

    /// Marks the stream closed. Safe to call repeatedly.
    pub fn close(&mut self) {
        self.open = false;
    }

    /// The result of closing: `Ok` unless a failure was latched.
    pub fn close_result(&self) -> Result<(), Status> {
        match &self.error {
            None => Ok(()),
            Some(status) => Err(status.clone()),
        }
    }
}

impl Default for StreamState {
    fn default() -> Self {
        StreamState::new()
    }
}
