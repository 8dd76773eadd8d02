//! Final-status observation for one inbound request
//!
//! Wraps the response sink rather than subclassing it: the first observed
//! status wins, mirroring "headers already sent" semantics, and later writes
//! are ignored. The recorder never alters the bytes delivered to the client;
//! it only exposes the code for logging once the response is complete.

use http::StatusCode;

/// Records the first status code written for a request
#[derive(Debug, Default)]
pub struct StatusRecorder {
    code: Option<StatusCode>,
}

impl StatusRecorder {
    pub fn new() -> Self {
        StatusRecorder { code: None }
    }

    /// Observe a status write; only the first call has any effect
    pub fn observe(&mut self, status: StatusCode) {
        if self.code.is_none() {
            self.code = Some(status);
        }
    }

    /// The recorded code, if a response has been written
    pub fn recorded(&self) -> Option<StatusCode> {
        self.code
    }
}
