//! Registrations made before a connection opens.

/// Event names waiting for the handshake.
///
/// Append-only until [`flush`](Self::flush), which drains it exactly once.
#[derive(Debug, Default)]
pub struct PendingRegistrations {
    names: Vec<String>,
    flushed: bool,
}

impl PendingRegistrations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer a name. Returns `false` once the queue has been flushed.
    pub fn push(&mut self, name: impl Into<String>) -> bool {
        if self.flushed {
            return false;
        }
        self.names.push(name.into());
        true
    }

    /// Take every buffered name, in registration order.
    pub fn flush(&mut self) -> Vec<String> {
        self.flushed = true;
        std::mem::take(&mut self.names)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
