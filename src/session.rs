//! Session state machine and stanza dispatcher.
//!
//! Drives the framed handshake in strict forward order, then hands the
//! connection to the dispatcher receive loop. One task owns the transport,
//! the responder and (through it) the conversation history; stanza
//! processing is strictly serial, so no locking is needed anywhere.

use std::collections::VecDeque;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::{debug, error, info, warn};

use crate::config::Jid;
use crate::error::{SessionError, TransportError};
use crate::responder::Responder;
use crate::stanza::{self, DisplayIdentity, StanzaKind};
use crate::transport::Transport;

/// Bounded wait for each expected handshake reply frame. The handshake
/// consumes exactly one reply per step; an unresponsive server would
/// otherwise hang it forever.
const HANDSHAKE_REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Handshake states, in strict forward order. No backward transitions;
/// any mismatch in a non-terminal state ends the session in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    StreamOpened,
    FeaturesReceived,
    Authenticating,
    Authenticated,
    StreamReopened,
    Binding,
    Bound,
    SessionEstablished,
    JoiningRoom,
    Joined,
    Failed,
}

/// Base64 of `NUL || localpart || NUL || password` (SASL PLAIN, RFC 4616).
fn sasl_plain_token(localpart: &str, password: &str) -> String {
    let mut raw = Vec::with_capacity(2 + localpart.len() + password.len());
    raw.push(0);
    raw.extend_from_slice(localpart.as_bytes());
    raw.push(0);
    raw.extend_from_slice(password.as_bytes());
    BASE64.encode(raw)
}

/// Self-origin check on the `from` attribute of a groupchat message.
///
/// The default is substring containment of the bot localpart, matching the
/// deployed behavior; it also drops messages from unrelated senders whose
/// name happens to contain the localpart. `strict` compares the MUC
/// nickname (the part after `/`) exactly instead.
fn is_self_originated(from: &str, localpart: &str, strict: bool) -> bool {
    if strict {
        from.rsplit_once('/')
            .map(|(_, nick)| nick == localpart)
            .unwrap_or(false)
    } else {
        from.contains(localpart)
    }
}

/// Decode a frame and keep it only if it is a groupchat message with a
/// non-empty body from someone other than the bot itself. Undecodable
/// frames are logged and dropped; they never abort the session.
fn qualify(frame: &str, localpart: &str, strict: bool) -> Option<(String, String)> {
    let stanza = match stanza::decode(frame) {
        Ok(stanza) => stanza,
        Err(e) => {
            warn!(error = %e, "dropping undecodable frame");
            return None;
        }
    };
    if stanza.kind != StanzaKind::Message || stanza.typ.as_deref() != Some("groupchat") {
        return None;
    }
    let body = stanza.body.filter(|b| !b.is_empty())?;
    let from = stanza.from?;
    if is_self_originated(&from, localpart, strict) {
        debug!(from = %from, "ignoring self-originated message");
        return None;
    }
    Some((body, from))
}

pub struct Session<T: Transport> {
    transport: T,
    identity: Jid,
    password: String,
    room: Jid,
    display: DisplayIdentity,
    responder: Box<dyn Responder>,
    state: SessionState,
    strict_self_filter: bool,
}

impl<T: Transport> Session<T> {
    pub fn new(
        transport: T,
        identity: Jid,
        password: String,
        room: Jid,
        display: DisplayIdentity,
        responder: Box<dyn Responder>,
        strict_self_filter: bool,
    ) -> Self {
        Self {
            transport,
            identity,
            password,
            room,
            display,
            responder,
            state: SessionState::Disconnected,
            strict_self_filter,
        }
    }

    /// Run handshake then dispatcher until the connection ends. On any
    /// fatal error the transport is closed before the error is reported.
    pub async fn run(&mut self) -> Result<(), SessionError> {
        let result = self.drive().await;
        if let Err(ref e) = result {
            error!(error = %e, "session failed");
            self.state = SessionState::Failed;
            self.transport.close().await;
        }
        result
    }

    async fn drive(&mut self) -> Result<(), SessionError> {
        self.handshake().await?;
        self.receive_loop().await
    }

    /// One expected reply frame per handshake step, logged and returned.
    async fn expect_reply(&mut self, step: &'static str) -> Result<String, SessionError> {
        let frame = tokio::time::timeout(HANDSHAKE_REPLY_TIMEOUT, self.transport.receive())
            .await
            .map_err(|_| SessionError::Protocol {
                state: step,
                detail: format!(
                    "timed out after {}s waiting for reply",
                    HANDSHAKE_REPLY_TIMEOUT.as_secs()
                ),
            })??;
        debug!(step, frame = %frame, "handshake reply");
        Ok(frame)
    }

    async fn handshake(&mut self) -> Result<(), SessionError> {
        let open = stanza::stream_open(&self.identity.domain);
        debug!(frame = %open, "opening stream");
        self.transport.send(&open).await?;
        self.state = SessionState::StreamOpened;

        // Two frames arrive here: the server's open ack, then its feature
        // advertisement. Neither is inspected beyond logging; receipt is
        // treated as sufficient to proceed.
        let _ack = self.expect_reply("stream-open").await?;
        let _features = self.expect_reply("stream-features").await?;
        self.state = SessionState::FeaturesReceived;

        let token = sasl_plain_token(&self.identity.localpart, &self.password);
        self.transport.send(&stanza::sasl_auth(&token)).await?;
        self.state = SessionState::Authenticating;

        let reply = self.expect_reply("authenticating").await?;
        if !reply.contains("<success") {
            return Err(SessionError::Protocol {
                state: "authenticating",
                detail: format!("authentication failed: {reply}"),
            });
        }
        self.state = SessionState::Authenticated;
        info!(user = %self.identity.localpart, "authentication successful");

        // XMPP requires a fresh stream after SASL negotiation.
        self.transport.send(&open).await?;
        let _reopened = self.expect_reply("stream-restart").await?;
        self.state = SessionState::StreamReopened;

        let resource = self.identity.resource.as_deref().unwrap_or("bot");
        self.transport.send(&stanza::bind(resource)).await?;
        self.state = SessionState::Binding;
        // The server-assigned full JID in the reply is not used.
        let _bound = self.expect_reply("binding").await?;
        self.state = SessionState::Bound;

        self.transport.send(&stanza::establish_session()).await?;
        let _established = self.expect_reply("establishing-session").await?;
        self.state = SessionState::SessionEstablished;

        let join = stanza::muc_join(&self.room.bare(), &self.identity.localpart, &self.display);
        debug!(frame = %join, "joining room");
        self.transport.send(&join).await?;
        // No join confirmation is awaited; proceed optimistically.
        self.state = SessionState::JoiningRoom;

        let welcome = self.responder.welcome(&self.display.full_name);
        let message = stanza::groupchat_message(&self.room.bare(), &welcome, &self.display);
        self.transport.send(&message).await?;
        self.state = SessionState::Joined;
        info!(room = %self.room.bare(), nickname = %self.identity.localpart, "joined room");
        Ok(())
    }

    /// Dispatcher: active only once `Joined`. Messages are processed one at
    /// a time, in arrival order; while a response is in flight the loop
    /// keeps draining the transport and queues further qualifying messages.
    async fn receive_loop(&mut self) -> Result<(), SessionError> {
        let mut pending: VecDeque<(String, String)> = VecDeque::new();

        loop {
            let (body, from) = match pending.pop_front() {
                Some(message) => message,
                None => match self.transport.receive().await {
                    Ok(frame) => {
                        match qualify(&frame, &self.identity.localpart, self.strict_self_filter)
                        {
                            Some(message) => message,
                            None => continue,
                        }
                    }
                    Err(TransportError::Closed) => {
                        warn!("connection closed");
                        return Ok(());
                    }
                    Err(e) => return Err(e.into()),
                },
            };

            info!(from = %from, "processing message");

            if let Some(notice) = self.responder.processing_notice() {
                let notice = stanza::groupchat_message(&self.room.bare(), notice, &self.display);
                self.transport.send(&notice).await?;
            }

            let outcome = {
                let transport = &mut self.transport;
                let responder = &mut self.responder;
                let localpart = self.identity.localpart.as_str();
                let strict = self.strict_self_filter;

                let mut respond = responder.respond(&body, &from);
                loop {
                    tokio::select! {
                        biased;
                        reply = &mut respond => break Ok(reply),
                        frame = transport.receive() => match frame {
                            Ok(frame) => {
                                if let Some(queued) = qualify(&frame, localpart, strict) {
                                    pending.push_back(queued);
                                }
                            }
                            Err(e) => break Err(e),
                        },
                    }
                }
            };

            let reply = match outcome {
                Ok(reply) => reply,
                Err(TransportError::Closed) => {
                    warn!("connection closed while a response was in flight");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            let message = stanza::groupchat_message(&self.room.bare(), &reply, &self.display);
            self.transport.send(&message).await?;
            debug!(frame = %message, "sent reply");
        }
    }
}
