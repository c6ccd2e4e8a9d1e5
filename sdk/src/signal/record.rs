//! Per-peer session records.

use {
    super::{config::RatchetConfig, state::SessionState},
    log::debug,
    serde::{Deserialize, Serialize},
    std::collections::VecDeque,
    x25519_dalek::PublicKey,
};

/// All session states with one peer device: the current one plus a bounded
/// history of archived states, newest first.
///
/// Archived states stay decryptable so that messages sent under an older
/// session (for example both sides initiating at once) are not lost. An
/// archived state only becomes current again by decrypting a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    current: Option<SessionState>,
    previous: VecDeque<SessionState>,
    max_previous: usize,
}

impl SessionRecord {
    /// A record with no state and no history.
    pub fn new_fresh(config: &RatchetConfig) -> Self {
        Self {
            current: None,
            previous: VecDeque::new(),
            max_previous: config.max_previous_states,
        }
    }

    pub fn new(state: SessionState, config: &RatchetConfig) -> Self {
        Self {
            current: Some(state),
            ..Self::new_fresh(config)
        }
    }

    pub fn is_fresh(&self) -> bool {
        self.current.is_none() && self.previous.is_empty()
    }

    pub fn session_state(&self) -> Option<&SessionState> {
        self.current.as_ref()
    }

    pub fn session_state_mut(&mut self) -> Option<&mut SessionState> {
        self.current.as_mut()
    }

    /// Replace the current state without archiving it.
    pub fn set_session_state(&mut self, state: SessionState) {
        self.current = Some(state);
    }

    pub fn take_session_state(&mut self) -> Option<SessionState> {
        self.current.take()
    }

    /// Archived states, newest first.
    pub fn previous_session_states(&self) -> impl Iterator<Item = &SessionState> {
        self.previous.iter()
    }

    pub fn previous_session_count(&self) -> usize {
        self.previous.len()
    }

    /// Whether the current or an archived state was created by the handshake
    /// identified by `version` and `base_key`.
    pub fn has_session_state(&self, version: u8, base_key: &PublicKey) -> bool {
        self.current
            .iter()
            .chain(self.previous.iter())
            .any(|state| state.version() == version && state.base_key() == base_key)
    }

    /// Push the current state to the head of the history, dropping the oldest
    /// archived state beyond the bound. The current slot is left empty.
    pub fn archive_current_state(&mut self) {
        let Some(mut state) = self.current.take() else {
            debug!("Skipping archive, record has no current state");
            return;
        };
        state.clear_pending_pre_key();
        self.previous.push_front(state);
        if self.previous.len() > self.max_previous {
            self.previous.truncate(self.max_previous);
            debug!("Dropped oldest archived session state");
        }
    }

    /// Archive the current state and make `state` current.
    pub fn promote_state(&mut self, state: SessionState) {
        self.archive_current_state();
        self.current = Some(state);
    }

    /// Replace the archived state at `index` by `updated_state` and promote
    /// it to current.
    pub fn promote_old_session(&mut self, index: usize, updated_state: SessionState) {
        if self.previous.remove(index).is_some() {
            debug!("Promoting archived session state {index}");
        }
        self.promote_state(updated_state);
    }
}
