//! Cache limits of the ratchet.

/// Bounds of the ratchet's caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatchetConfig {
    /// Skipped message keys kept per receiver chain.
    pub max_message_keys: usize,
    /// Receiver chains kept per session state.
    pub max_receiver_chains: usize,
    /// Archived session states kept per record.
    pub max_previous_states: usize,
    /// How far ahead of a chain's position a message index may be.
    pub max_forward_jump: u32,
    /// Sender key states kept per group and sender.
    pub max_sender_key_states: usize,
}

impl Default for RatchetConfig {
    fn default() -> Self {
        Self {
            max_message_keys: 2000,
            max_receiver_chains: 5,
            max_previous_states: 40,
            max_forward_jump: 2000,
            max_sender_key_states: 5,
        }
    }
}

impl RatchetConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_message_keys(mut self, max: usize) -> Self {
        self.max_message_keys = max;
        self
    }

    pub fn with_max_receiver_chains(mut self, max: usize) -> Self {
        self.max_receiver_chains = max;
        self
    }

    pub fn with_max_previous_states(mut self, max: usize) -> Self {
        self.max_previous_states = max;
        self
    }

    pub fn with_max_forward_jump(mut self, max: u32) -> Self {
        self.max_forward_jump = max;
        self
    }

    pub fn with_max_sender_key_states(mut self, max: usize) -> Self {
        self.max_sender_key_states = max;
        self
    }
}
