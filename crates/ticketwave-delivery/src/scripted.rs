//! In-memory transport with per-recipient scripted results.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use ticketwave_types::UserId;

use crate::transport::{Transport, TransportError};

/// One successful send, in the order it happened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Sent {
    Document(UserId),
    Message(UserId),
}

#[derive(Default)]
struct State {
    scripts: HashMap<UserId, VecDeque<Result<(), TransportError>>>,
    fallback: HashMap<UserId, TransportError>,
    documents: Vec<(UserId, PathBuf)>,
    attempts: HashMap<UserId, u32>,
    messages: Vec<(UserId, String)>,
    unreachable: HashMap<UserId, TransportError>,
    journal: Vec<Sent>,
}

/// Succeeds unless told otherwise. Clones share state.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    state: Arc<Mutex<State>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue results for the next sends to `user`; afterwards sends succeed.
    pub fn script(&self, user: UserId, results: impl IntoIterator<Item = Result<(), TransportError>>) {
        self.state().scripts.entry(user).or_default().extend(results);
    }

    /// Fail every unscripted send to `user` with `error`.
    pub fn fail_always(&self, user: UserId, error: TransportError) {
        self.state().fallback.insert(user, error);
    }

    /// Documents successfully delivered, in order.
    pub fn delivered(&self) -> Vec<(UserId, PathBuf)> {
        self.state().documents.clone()
    }

    /// Send attempts made to `user`, successful or not.
    pub fn attempts(&self, user: UserId) -> u32 {
        self.state().attempts.get(&user).copied().unwrap_or(0)
    }

    /// Fail every text message to `user` with `error`.
    pub fn refuse_messages(&self, user: UserId, error: TransportError) {
        self.state().unreachable.insert(user, error);
    }

    pub fn messages(&self) -> Vec<(UserId, String)> {
        self.state().messages.clone()
    }

    /// Documents and messages interleaved as they were sent.
    pub fn journal(&self) -> Vec<Sent> {
        self.state().journal.clone()
    }
}

impl Transport for ScriptedTransport {
    async fn send_document(
        &self,
        recipient: UserId,
        document: &Path,
        _caption: &str,
    ) -> Result<(), TransportError> {
        let mut state = self.state();
        *state.attempts.entry(recipient).or_default() += 1;
        let scripted = state.scripts.get_mut(&recipient).and_then(|q| q.pop_front());
        let result = match scripted {
            Some(result) => result,
            None => match state.fallback.get(&recipient) {
                Some(error) => Err(error.clone()),
                None => Ok(()),
            },
        };
        if result.is_ok() {
            state.documents.push((recipient, document.to_path_buf()));
            state.journal.push(Sent::Document(recipient));
        }
        result
    }

    async fn send_message(&self, recipient: UserId, text: &str) -> Result<(), TransportError> {
        let mut state = self.state();
        if let Some(error) = state.unreachable.get(&recipient) {
            return Err(error.clone());
        }
        state.messages.push((recipient, text.to_string()));
        state.journal.push(Sent::Message(recipient));
        Ok(())
    }
}
