//! Long-running unseen-mail loop.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::error::Result;
use super::{Mailbox, RawMessage};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Receives every fetched message. Must not fail; problems are its own to log.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: RawMessage);
}

/// Scans unseen mail once on start, then again whenever IDLE reports new data or times
/// out. A UID is handed over at most once while it stays unseen, even if marking it seen
/// failed.
pub struct MailboxListener {
    mailbox: Arc<dyn Mailbox>,
    handler: Arc<dyn MessageHandler>,
    idle_timeout: Duration,
    handled: HashSet<u32>,
}

impl MailboxListener {
    pub fn new(
        mailbox: Arc<dyn Mailbox>,
        handler: Arc<dyn MessageHandler>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            mailbox,
            handler,
            idle_timeout,
            handled: HashSet::new(),
        }
    }

    /// Runs until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Mailbox listener started");
        let mut backoff = INITIAL_BACKOFF;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let outcome = match self.scan().await {
                Ok(count) => {
                    if count > 0 {
                        info!(messages = count, "Handled unseen messages");
                    }
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        waited = self.mailbox.wait_for_new_mail(self.idle_timeout) => waited.map(|_| ()),
                    }
                }
                Err(e) => Err(e),
            };

            match outcome {
                Ok(()) => backoff = INITIAL_BACKOFF,
                Err(e) => {
                    warn!(error = %e, retry_in_secs = backoff.as_secs(), "Mailbox unavailable");
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }

        info!("Mailbox listener stopped");
    }

    /// Fetches and hands over every unseen message not handled yet. Returns how many
    /// were handed over. A fetch failure skips that message unless it lost the connection.
    ///
    /// UIDs no longer unseen are forgotten, so only messages still unseen after being
    /// handled are remembered.
    pub async fn scan(&mut self) -> Result<usize> {
        let uids = self.mailbox.unseen().await?;
        debug!(unseen = uids.len(), "Scanned mailbox");

        let still_unseen: HashSet<u32> = uids.iter().copied().collect();
        self.handled.retain(|uid| still_unseen.contains(uid));

        let mut count = 0;
        for uid in uids {
            if self.handled.contains(&uid) {
                continue;
            }
            match self.mailbox.fetch(uid).await {
                Ok(message) => {
                    self.handled.insert(uid);
                    self.handler.handle(message).await;
                    count += 1;
                }
                Err(e) if e.is_connection_lost() => return Err(e),
                Err(e) => error!(uid, error = %e, "Failed to fetch message"),
            }
        }
        Ok(count)
    }
}
