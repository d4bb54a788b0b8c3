//! Tokio transport driver.
//!
//! [`serve_connection`] runs a [`Session`] over any `AsyncRead + AsyncWrite` stream,
//! and [`Server`] accepts TCP connections and spawns one driver task per client.
use std::{net::SocketAddr, sync::Arc};

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{TcpListener, ToSocketAddrs},
};

use crate::{Action, Options, Result, Session, WebSocketError};

/// Size of the buffer used for each transport read.
const READ_CHUNK_SIZE: usize = 4096;

/// Application callback invoked for every inbound text message.
///
/// Returning `Some(value)` sends `value` back to the client as a JSON text frame.
///
/// Implemented for any `Fn(&str) -> Option<serde_json::Value>` closure.
pub trait Handler: Send + Sync + 'static {
    fn on_message(&self, text: &str) -> Option<serde_json::Value>;
}

impl<F> Handler for F
where
    F: Fn(&str) -> Option<serde_json::Value> + Send + Sync + 'static,
{
    fn on_message(&self, text: &str) -> Option<serde_json::Value> {
        self(text)
    }
}

/// Serves one WebSocket connection until it closes.
///
/// Reads from `io`, feeds the session, writes whatever it queues and dispatches
/// inbound messages to `handler`. The transport is shut down before returning.
///
/// # Errors
/// The handshake or decode error that closed the session,
/// [`WebSocketError::Timeout`] when the idle timeout elapses, or a transport error.
/// A clean close frame or end of stream returns `Ok(())`.
pub async fn serve_connection<S, H>(mut io: S, options: &Options, handler: &H) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    H: Handler + ?Sized,
{
    let mut session = Session::new(options);
    let res = drive(&mut io, &mut session, options, handler).await;

    if let Err(err) = io.shutdown().await {
        log::debug!("shutdown failed: {}", err);
    }

    res
}

async fn drive<S, H>(
    io: &mut S,
    session: &mut Session,
    options: &Options,
    handler: &H,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    H: Handler + ?Sized,
{
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];

    loop {
        let read = io.read(&mut chunk);
        let n = match options.idle_timeout {
            Some(timeout) => tokio::time::timeout(timeout, read)
                .await
                .map_err(|_| WebSocketError::Timeout)??,
            None => read.await?,
        };

        let received = if n == 0 {
            session.on_eof();
            Ok(())
        } else {
            session.receive(&chunk[..n])
        };

        // a rejected handshake still has its 400 response to flush
        let open = flush(io, session, handler).await?;
        received?;

        if !open {
            return Ok(());
        }
    }
}

/// Executes the pending actions of `session`.
///
/// Returns `false` once [`Action::Close`] was reached.
async fn flush<S, H>(io: &mut S, session: &mut Session, handler: &H) -> Result<bool>
where
    S: AsyncWrite + Unpin,
    H: Handler + ?Sized,
{
    while let Some(action) = session.next_action() {
        match action {
            Action::Write(bytes) => io.write_all(&bytes).await?,
            Action::Message(text) => {
                if let Some(reply) = handler.on_message(&text) {
                    session.send_json(&reply)?;
                }
            }
            Action::Close => {
                io.flush().await?;
                return Ok(false);
            }
        }
    }

    io.flush().await?;
    Ok(true)
}

/// TCP listener that serves every accepted connection on its own task.
pub struct Server {
    listener: TcpListener,
    options: Arc<Options>,
}

impl Server {
    /// Binds a listener to `addr`.
    pub async fn bind(addr: impl ToSocketAddrs, options: Options) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            options: Arc::new(options),
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections forever, dispatching their messages to `handler`.
    ///
    /// Errors of individual connections are logged and never stop the server.
    ///
    /// # Errors
    /// Returns when accepting a connection fails.
    pub async fn run<H: Handler>(self, handler: H) -> Result<()> {
        let handler = Arc::new(handler);

        loop {
            let (stream, peer) = self.listener.accept().await?;
            log::info!("Client connected: {}", peer);

            let handler = Arc::clone(&handler);
            let options = Arc::clone(&self.options);
            tokio::spawn(async move {
                match serve_connection(stream, &options, handler.as_ref()).await {
                    Ok(()) => log::info!("Client disconnected: {}", peer),
                    Err(err) => log::error!("Error in websocket connection {}: {}", peer, err),
                }
            });
        }
    }
}
