//! Chat view: at most one mounted session at a time.
//!
//! Switching the counterpart closes the current session, waiting for its
//! connection to be torn down, before the replacement opens. Two sessions
//! of one view therefore never have live connections at the same time.

use std::sync::Arc;

use crate::api::ChatBackend;
use crate::chat::session::{ChatSession, SessionContext};
use crate::chat::{LocalParticipant, ParticipantId};
use crate::transport::Connector;
use crate::transport::manager::ReconnectConfig;

/// Why a mount was refused.
#[derive(Debug, thiserror::Error)]
pub enum ViewError {
    /// The local identity is not known yet.
    #[error("no logged-in user")]
    NoIdentity,
    /// The counterpart id is empty.
    #[error("no chat partner selected")]
    NoTarget,
}

/// Owner of the mounted [`ChatSession`].
pub struct ChatView<K, B> {
    local: Option<LocalParticipant>,
    connector: K,
    backend: Arc<B>,
    reconnect: ReconnectConfig,
    session: Option<ChatSession>,
}

impl<K: Connector + Clone, B: ChatBackend> ChatView<K, B> {
    /// Create an unmounted view.
    pub const fn new(
        local: Option<LocalParticipant>,
        connector: K,
        backend: Arc<B>,
        reconnect: ReconnectConfig,
    ) -> Self {
        Self {
            local,
            connector,
            backend,
            reconnect,
            session: None,
        }
    }

    /// Replace the local identity.
    ///
    /// A mounted session opened for a different identity is closed before
    /// this returns; mount again to reopen the conversation.
    pub async fn set_identity(&mut self, local: Option<LocalParticipant>) {
        if self.local != local {
            self.unmount().await;
        }
        self.local = local;
    }

    /// Show the conversation with `target`.
    ///
    /// A session already mounted for `target` and the current identity is
    /// kept. Any other session is closed first.
    ///
    /// # Errors
    ///
    /// - [`ViewError::NoIdentity`] if the local identity is unknown.
    /// - [`ViewError::NoTarget`] if `target` is empty.
    pub async fn mount(&mut self, target: ParticipantId) -> Result<&mut ChatSession, ViewError> {
        let local = self.local.clone().ok_or(ViewError::NoIdentity)?;
        if target.as_str().is_empty() {
            return Err(ViewError::NoTarget);
        }

        if self
            .session
            .as_ref()
            .is_some_and(|s| s.target() != &target || s.local() != &local)
        {
            self.unmount().await;
        }

        let session = match self.session.take() {
            Some(existing) => existing,
            None => ChatSession::open(SessionContext {
                local,
                target,
                connector: self.connector.clone(),
                backend: Arc::clone(&self.backend),
                reconnect: self.reconnect.clone(),
            }),
        };
        Ok(self.session.insert(session))
    }

    /// Close the mounted session, if any, and wait for its teardown.
    pub async fn unmount(&mut self) {
        if let Some(session) = self.session.take() {
            session.close().await;
        }
    }

    /// The mounted session.
    pub const fn session(&mut self) -> Option<&mut ChatSession> {
        self.session.as_mut()
    }

    /// Counterpart of the mounted session.
    #[must_use]
    pub fn target(&self) -> Option<&ParticipantId> {
        self.session.as_ref().map(ChatSession::target)
    }
}
