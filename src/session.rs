//! Per-connection state machine.
//!
//! [`Session`] follows a sans-io design: it never touches the transport. The caller
//! feeds it every chunk read from the connection with [`Session::receive`] and then
//! drains [`Session::next_action`] to learn what to write, which messages to hand to
//! the application and when to tear the connection down.
//!
//! ```text
//!   Handshaking ──valid upgrade──▶ Open ──close frame / decode error / EOF──▶ Closed
//!        │                                                                      ▲
//!        └───────────────────────invalid upgrade (400)─────────────────────────┘
//! ```
use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder as _, Encoder as _};

use crate::{
    codec::{Codec, Decoder, Encoder},
    frame::Decoded,
    handshake::{self, HandshakeResponse},
    Options, Result, WebSocketError,
};

/// Lifecycle of a connection.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum State {
    /// Waiting for a complete upgrade request.
    Handshaking,
    /// Handshake response queued, frames are being decoded.
    Open,
    /// Terminal. No more input is accepted and nothing more is sent.
    Closed,
}

/// Something the transport driver has to do on behalf of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Write these bytes to the transport, in order.
    Write(Bytes),
    /// Hand this text message to the application.
    Message(String),
    /// Tear the transport down. Always the last action of a session.
    Close,
}

/// Server side of one WebSocket connection.
pub struct Session {
    state: State,
    subprotocols: Vec<String>,
    max_handshake_size: usize,
    /// Negotiated subprotocol, once the handshake succeeded.
    protocol: Option<String>,
    codec: Codec,
    /// Bytes received but not consumed yet: an incomplete request head or frame.
    read_buf: BytesMut,
    actions: VecDeque<Action>,
    /// Set while the last action handed out was a message, so its reply can still be
    /// queued after a later frame in the same chunk closed the session.
    replying: bool,
}

impl Session {
    /// Creates a session in the [`State::Handshaking`] state.
    pub fn new(options: &Options) -> Self {
        Self {
            state: State::Handshaking,
            subprotocols: options.subprotocols.clone(),
            max_handshake_size: options.max_handshake_size,
            protocol: None,
            codec: Codec::from((Decoder::new(options.max_payload_read), Encoder)),
            read_buf: BytesMut::with_capacity(1024),
            actions: VecDeque::new(),
            replying: false,
        }
    }

    /// Current state of the connection.
    #[inline]
    pub fn state(&self) -> State {
        self.state
    }

    /// Subprotocol agreed on during the handshake, if any.
    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    /// Feeds bytes read from the transport.
    ///
    /// Bytes are accumulated until a whole request head or frame is available, so a
    /// chunk may hold any number of frames or only part of one.
    ///
    /// # Errors
    /// Any handshake or decoding failure. The session is [`State::Closed`] afterwards
    /// and [`Action::Close`] has been queued, preceded by the `400` response when the
    /// handshake was rejected. Feeding a closed session fails with
    /// [`WebSocketError::ConnectionClosed`].
    pub fn receive(&mut self, chunk: &[u8]) -> Result<()> {
        if self.state == State::Closed {
            return Err(WebSocketError::ConnectionClosed);
        }

        self.read_buf.extend_from_slice(chunk);

        let res = self.process();
        if let Err(err) = &res {
            log::warn!("closing connection: {}", err);
            self.close();
        }
        res
    }

    /// Notes that the transport reached end of stream.
    pub fn on_eof(&mut self) {
        if self.state != State::Closed {
            log::debug!("peer closed the transport in state {:?}", self.state);
            self.close();
        }
    }

    /// Pops the next pending action, in the order they were produced.
    ///
    /// After an [`Action::Message`], a reply may be queued with [`Session::send_text`]
    /// or [`Session::send_json`] before the next call, even if the session has closed
    /// since the message was decoded.
    pub fn next_action(&mut self) -> Option<Action> {
        let action = self.actions.pop_front();
        self.replying = matches!(action, Some(Action::Message(_)));
        action
    }

    /// Queues `text` as an outbound text frame.
    ///
    /// A reply to the message just returned by [`Session::next_action`] is queued ahead
    /// of a pending [`Action::Close`], so it goes out whether or not the close frame
    /// arrived in the same read.
    ///
    /// # Errors
    /// - [`WebSocketError::ConnectionClosed`] unless the session is open or replying.
    /// - [`WebSocketError::PayloadTooLarge`] if `text` does not fit in a 16-bit length.
    pub fn send_text(&mut self, text: &str) -> Result<()> {
        if self.state != State::Open && !self.replying {
            return Err(WebSocketError::ConnectionClosed);
        }

        let mut dst = BytesMut::new();
        self.codec.encode(text, &mut dst)?;

        let write = Action::Write(dst.freeze());
        match self.actions.iter().position(|action| *action == Action::Close) {
            Some(at) => self.actions.insert(at, write),
            None => self.actions.push_back(write),
        }

        Ok(())
    }

    /// Serializes `value` to JSON and queues it as an outbound text frame.
    pub fn send_json<T: serde::Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.send_text(&json)
    }

    fn process(&mut self) -> Result<()> {
        loop {
            match self.state {
                State::Handshaking => {
                    if !self.handshake()? {
                        return Ok(());
                    }
                }
                State::Open => match self.codec.decode(&mut self.read_buf)? {
                    Some(Decoded::Text(frame)) => {
                        self.actions.push_back(Action::Message(frame.into_text()));
                    }
                    Some(Decoded::Close) => {
                        log::debug!("received close frame");
                        self.close();
                    }
                    Some(Decoded::Ignored) => {}
                    None => return Ok(()),
                },
                State::Closed => return Ok(()),
            }
        }
    }

    /// Runs the handshake once the request head is complete.
    ///
    /// Returns `false` while more bytes are needed.
    fn handshake(&mut self) -> Result<bool> {
        let len = match handshake::head_len(&self.read_buf) {
            Some(len) if len <= self.max_handshake_size => len,
            None if self.read_buf.len() <= self.max_handshake_size => return Ok(false),
            _ => {
                return Err(self.reject(WebSocketError::BadRequest("request head too large")));
            }
        };

        let head = self.read_buf.split_to(len);
        let response = match handshake::negotiate(&head, self.subprotocols.as_slice()) {
            Ok(response) => response,
            Err(err) => return Err(self.reject(err)),
        };

        self.accept(response);
        Ok(true)
    }

    fn accept(&mut self, response: HandshakeResponse) {
        log::debug!(
            "handshake accepted, subprotocol: {}",
            response.protocol.as_deref().unwrap_or("none")
        );

        self.actions
            .push_back(Action::Write(Bytes::from(response.to_string())));
        self.protocol = response.protocol;
        self.state = State::Open;
    }

    fn reject(&mut self, err: WebSocketError) -> WebSocketError {
        self.actions
            .push_back(Action::Write(Bytes::from_static(handshake::REJECT_RESPONSE)));
        err
    }

    fn close(&mut self) {
        if self.state != State::Closed {
            self.state = State::Closed;
            self.read_buf.clear();
            self.actions.push_back(Action::Close);
        }
    }
}
