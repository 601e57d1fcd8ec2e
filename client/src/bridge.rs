//! Messages exchanged with the embedding host page.
//!
//! The host pushes credentials (possibly split across several messages) and
//! is told when the game needs a token, has entered, has exited, or failed.

use crate::{Error, MailboxError, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// A (possibly partial) credential update from the host.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCredential {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(
        default,
        rename = "connectionURI",
        skip_serializing_if = "Option::is_none"
    )]
    pub connection_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl HostCredential {
    /// Fold `update` into `self`; fields absent from the update are kept.
    pub fn merge(&mut self, update: HostCredential) {
        if update.token.is_some() {
            self.token = update.token;
        }
        if update.connection_uri.is_some() {
            self.connection_uri = update.connection_uri;
        }
        if update.namespace.is_some() {
            self.namespace = update.namespace;
        }
    }
}

/// Lifecycle notifications sent to the host.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HostMessage {
    #[serde(rename = "authToken")]
    AuthToken,
    OnEnter,
    OnExit,
    #[serde(rename = "error")]
    Error { message: String },
}

/// Session side of the host channel.
pub struct HostBridge {
    pub(crate) credentials: Option<mpsc::Receiver<HostCredential>>,
    pub(crate) lifecycle: mpsc::Sender<HostMessage>,
}

/// Host side of the channel.
pub struct HostEndpoint {
    credentials: mpsc::Sender<HostCredential>,
    lifecycle: mpsc::Receiver<HostMessage>,
}

impl HostBridge {
    pub fn channel(capacity: usize) -> (HostBridge, HostEndpoint) {
        let (credentials_tx, credentials_rx) = mpsc::channel(capacity);
        let (lifecycle_tx, lifecycle_rx) = mpsc::channel(capacity);
        (
            HostBridge {
                credentials: Some(credentials_rx),
                lifecycle: lifecycle_tx,
            },
            HostEndpoint {
                credentials: credentials_tx,
                lifecycle: lifecycle_rx,
            },
        )
    }
}

impl HostEndpoint {
    pub async fn push(&self, credential: HostCredential) -> Result<()> {
        self.credentials
            .send(credential)
            .await
            .map_err(|_| Error::from(MailboxError::Closed))
    }

    /// Push a raw JSON message as posted by the host page.
    pub async fn push_json(&self, raw: &str) -> Result<()> {
        let credential: HostCredential = serde_json::from_str(raw)?;
        self.push(credential).await
    }

    pub async fn next(&mut self) -> Option<HostMessage> {
        self.lifecycle.recv().await
    }
}
