//! IMAP implementation of [`Mailbox`].

use std::sync::Arc;
use std::time::Duration;

use async_imap::extensions::idle::IdleResponse;
use async_imap::Session;
use async_native_tls::TlsConnector;
use async_trait::async_trait;
use chrono::NaiveDate;
use futures_util::StreamExt;
use log::{debug, info, warn};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Mutex;

use super::error::{EmailError, Result};
use super::token::{RefreshingTokenProvider, TokenProvider};
use super::{Mailbox, RawMessage};
use crate::config::{MailboxAuth, MailboxConfig};
use crate::sanitize::redact_address;

type AsyncTcpStream = async_io::Async<std::net::TcpStream>;
type TlsStream = async_native_tls::TlsStream<AsyncTcpStream>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

struct XOAuth2Authenticator {
    response: String,
}

impl async_imap::Authenticator for XOAuth2Authenticator {
    type Response = String;

    fn process(&mut self, _data: &[u8]) -> Self::Response {
        std::mem::take(&mut self.response)
    }
}

enum Credentials {
    Password(SecretString),
    XOAuth2(Arc<dyn TokenProvider>),
}

/// A single IMAP session over TLS with the configured folder selected.
///
/// The session is opened lazily and re-opened after a connection-level error. Calls
/// are serialized; while [`Mailbox::wait_for_new_mail`] idles, other calls wait.
pub struct ImapMailbox {
    host: String,
    port: u16,
    username: String,
    folder: String,
    credentials: Credentials,
    session: Mutex<Option<Session<TlsStream>>>,
}

impl ImapMailbox {
    pub fn new(config: &MailboxConfig) -> Result<Self> {
        let credentials = match &config.auth {
            MailboxAuth::Password { password } => {
                let password = password
                    .resolve("mailbox password")
                    .map_err(|e| EmailError::CredentialsNotFound(e.to_string()))?;
                Credentials::Password(password)
            }
            MailboxAuth::Oauth2(credentials) => Credentials::XOAuth2(Arc::new(
                RefreshingTokenProvider::from_credentials(credentials)?,
            )),
        };

        Ok(Self {
            host: config.host.clone(),
            port: config.port,
            username: config.username.clone(),
            folder: config.folder.clone(),
            credentials,
            session: Mutex::new(None),
        })
    }

    /// XOAUTH2 with a caller-supplied token provider.
    pub fn with_token_provider(config: &MailboxConfig, tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            username: config.username.clone(),
            folder: config.folder.clone(),
            credentials: Credentials::XOAuth2(tokens),
            session: Mutex::new(None),
        }
    }

    async fn connect(&self) -> Result<Session<TlsStream>> {
        let addr = format!("{}:{}", self.host, self.port);
        info!(
            "Connecting to IMAP server at {} as {}",
            addr,
            redact_address(&self.username)
        );

        let tcp_stream = tokio::time::timeout(CONNECT_TIMEOUT, open_tcp(&addr))
            .await
            .map_err(|_| EmailError::Timeout(format!("connecting to {}", addr)))??;

        let tls_stream = TlsConnector::new()
            .connect(&self.host, tcp_stream)
            .await
            .map_err(|e| EmailError::TlsError(e.to_string()))?;

        let client = async_imap::Client::new(tls_stream);
        let mut session = match &self.credentials {
            Credentials::Password(password) => client
                .login(&self.username, password.expose_secret())
                .await
                .map_err(|(e, _)| EmailError::AuthenticationFailed(e.to_string()))?,
            Credentials::XOAuth2(tokens) => {
                let token = tokens.access_token().await?;
                let auth_string = format!(
                    "user={}\x01auth=Bearer {}\x01\x01",
                    self.username,
                    token.expose_secret()
                );
                let encoded = base64::Engine::encode(
                    &base64::engine::general_purpose::STANDARD,
                    auth_string.as_bytes(),
                );
                client
                    .authenticate("XOAUTH2", XOAuth2Authenticator { response: encoded })
                    .await
                    .map_err(|(e, _)| EmailError::AuthenticationFailed(e.to_string()))?
            }
        };

        // SELECT rather than EXAMINE: the pipeline changes \Seen flags.
        session.select(&self.folder).await.map_err(|e| {
            let message = e.to_string();
            if message.contains("NO") || message.contains("doesn't exist") {
                EmailError::FolderNotFound(self.folder.clone())
            } else {
                EmailError::ProtocolError(message)
            }
        })?;

        info!("Authenticated, folder '{}' selected", self.folder);
        Ok(session)
    }

    /// Runs `op` against a live session, reconnecting first if needed. A
    /// connection-level failure drops the session so the next call starts fresh.
    async fn with_session<T, F>(&self, op: F) -> Result<T>
    where
        F: for<'s> FnOnce(
                &'s mut Session<TlsStream>,
            ) -> futures_util::future::BoxFuture<'s, Result<T>>
            + Send,
    {
        let mut guard = self.session.lock().await;
        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        let session = guard
            .as_mut()
            .ok_or_else(|| EmailError::ConnectionFailed("Not connected".to_string()))?;

        let result = op(session).await;
        if let Err(e) = &result {
            if e.is_connection_lost() {
                warn!("Dropping IMAP session after error: {}", e);
                *guard = None;
            }
        }
        result
    }

    /// Logs out if a session is open.
    pub async fn disconnect(&self) -> Result<()> {
        if let Some(mut session) = self.session.lock().await.take() {
            info!("Disconnecting from IMAP server");
            session.logout().await?;
        }
        Ok(())
    }
}

async fn open_tcp(addr: &str) -> Result<AsyncTcpStream> {
    let mut last_error = None;
    for socket in tokio::net::lookup_host(addr)
        .await
        .map_err(|e| EmailError::ConnectionFailed(e.to_string()))?
    {
        match AsyncTcpStream::connect(socket).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }
    Err(EmailError::ConnectionFailed(match last_error {
        Some(e) => e.to_string(),
        None => format!("{} did not resolve", addr),
    }))
}

async fn uid_search(session: &mut Session<TlsStream>, query: &str) -> Result<Vec<u32>> {
    debug!("Searching with query: {}", query);
    let mut uids: Vec<u32> = session.uid_search(query).await?.into_iter().collect();
    uids.sort_unstable();
    Ok(uids)
}

async fn uid_store(session: &mut Session<TlsStream>, uid_set: &str, query: &str) -> Result<()> {
    let mut updates = session.uid_store(uid_set, query).await?;
    while let Some(update) = updates.next().await {
        update?;
    }
    Ok(())
}

fn uid_set(uids: &[u32]) -> String {
    uids.iter()
        .map(|u| u.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// IMAP `SINCE` takes dates like `05-Jan-2024`.
fn imap_date(date: NaiveDate) -> String {
    date.format("%d-%b-%Y").to_string()
}

#[async_trait]
impl Mailbox for ImapMailbox {
    async fn unseen(&self) -> Result<Vec<u32>> {
        self.with_session(|session| Box::pin(uid_search(session, "UNSEEN")))
            .await
    }

    async fn fetch(&self, uid: u32) -> Result<RawMessage> {
        self.with_session(move |session| {
            Box::pin(async move {
                // PEEK so that fetching alone never marks the message read.
                let mut messages = session.uid_fetch(uid.to_string(), "BODY.PEEK[]").await?;
                let mut bytes = None;
                while let Some(message) = messages.next().await {
                    let message = message?;
                    if bytes.is_none() {
                        bytes = message.body().map(|b| b.to_vec());
                    }
                }
                let bytes = bytes.ok_or(EmailError::MessageNotFound(uid))?;
                Ok(RawMessage { uid, bytes })
            })
        })
        .await
    }

    async fn mark_seen(&self, uid: u32) -> Result<()> {
        self.with_session(move |session| {
            Box::pin(async move {
                uid_store(session, &uid.to_string(), "+FLAGS (\\Seen)").await?;
                debug!("Marked message {} as seen", uid);
                Ok(())
            })
        })
        .await
    }

    async fn mark_unseen(&self, uids: &[u32]) -> Result<()> {
        if uids.is_empty() {
            return Ok(());
        }
        let set = uid_set(uids);
        self.with_session(move |session| {
            Box::pin(async move { uid_store(session, &set, "-FLAGS (\\Seen)").await })
        })
        .await
    }

    async fn seen_since(&self, since: NaiveDate) -> Result<Vec<u32>> {
        let query = format!("SEEN SINCE {}", imap_date(since));
        self.with_session(move |session| Box::pin(async move { uid_search(session, &query).await }))
            .await
    }

    async fn wait_for_new_mail(&self, timeout: Duration) -> Result<bool> {
        let mut guard = self.session.lock().await;
        let session = match guard.take() {
            Some(session) => session,
            None => self.connect().await?,
        };

        let mut idle = session.idle();
        idle.init().await?;
        let (wait, _stop) = idle.wait_with_timeout(timeout);
        let response = wait.await?;
        let session = idle.done().await?;
        *guard = Some(session);

        Ok(match response {
            IdleResponse::NewData(_) => {
                debug!("IDLE reported new data");
                true
            }
            IdleResponse::Timeout => false,
            IdleResponse::ManualInterrupt => false,
        })
    }
}

impl Drop for ImapMailbox {
    fn drop(&mut self) {
        if let Ok(guard) = self.session.try_lock() {
            if guard.is_some() {
                warn!("ImapMailbox dropped without explicit disconnect - session will be closed");
            }
        }
    }
}
