//! per connection tunables.

use std::time::Duration;

/// Configuration of a single connection's exchange coordination.
#[derive(Clone, Copy, Debug)]
pub struct ServiceConfig {
    pub(crate) keep_alive_dur: Duration,
    pub(crate) body_buffer_capacity: usize,
    pub(crate) write_queue_capacity: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceConfig {
    pub const fn new() -> Self {
        Self {
            keep_alive_dur: Duration::from_secs(75),
            body_buffer_capacity: 32_768,
            write_queue_capacity: 8,
        }
    }

    /// How long an idle keep-alive connection waits for the next request head
    /// before shutting down.
    pub fn keep_alive_dur(mut self, dur: Duration) -> Self {
        self.keep_alive_dur = dur;
        self
    }

    /// Byte budget buffered in the request body channel before the inbound
    /// side stops pulling framed parts. Clamped to make room for at least
    /// one byte, otherwise the first chunk could never be accepted.
    pub fn body_buffer_capacity(mut self, cap: usize) -> Self {
        self.body_buffer_capacity = cap.max(1);
        self
    }

    /// Depth of the ordered outbound part queue between the response writer
    /// and the framed sink. Clamped to hold at least one part.
    pub fn write_queue_capacity(mut self, cap: usize) -> Self {
        self.write_queue_capacity = cap.max(1);
        self
    }
}
