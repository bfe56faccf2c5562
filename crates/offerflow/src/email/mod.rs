//! Mailbox side of the pipeline.
//!
//! [`Mailbox`] is the seam the orchestrator and listener talk to; [`ImapMailbox`] is the
//! production implementation. Message bytes are turned into content and attachment parts
//! by [`MessageContentExtractor`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

pub mod client;
pub mod error;
pub mod listener;
pub mod parser;
pub mod token;

pub use client::ImapMailbox;
pub use error::EmailError;
pub use listener::{MailboxListener, MessageHandler};
pub use parser::{
    AttachmentPart, AttachmentPolicy, MessageContent, MessageContentExtractor, ParsedMessage,
};
pub use token::{
    token_provider_from_config, RefreshingTokenProvider, StaticTokenProvider, TokenProvider,
};

/// Full RFC 822 bytes of one message.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub uid: u32,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait Mailbox: Send + Sync {
    /// UIDs of messages without the `\Seen` flag, ascending.
    async fn unseen(&self) -> error::Result<Vec<u32>>;

    /// Fetches a message without changing its flags.
    async fn fetch(&self, uid: u32) -> error::Result<RawMessage>;

    async fn mark_seen(&self, uid: u32) -> error::Result<()>;

    async fn mark_unseen(&self, uids: &[u32]) -> error::Result<()>;

    /// UIDs of already-read messages received on or after `since`.
    async fn seen_since(&self, since: NaiveDate) -> error::Result<Vec<u32>>;

    /// Blocks until the server reports new mail or `timeout` elapses; returns whether
    /// anything arrived.
    async fn wait_for_new_mail(&self, timeout: Duration) -> error::Result<bool>;
}
