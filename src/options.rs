use std::time::Duration;

use crate::frame::MAX_PAYLOAD_LEN;

/// Default size limit for the HTTP upgrade request head, set to 8 KiB.
pub const MAX_HANDSHAKE_SIZE: usize = 8 * 1024;

/// Subprotocol offered by default.
pub const DEFAULT_SUBPROTOCOL: &str = "json";

/// Configuration options for a server and the sessions it runs.
///
/// ```
/// use std::time::Duration;
/// use frameline::Options;
///
/// let options = Options::default()
///     .with_subprotocols(["json", "chat"])
///     .with_max_payload_read(4096)
///     .with_idle_timeout(Duration::from_secs(30));
/// ```
#[derive(Clone, Debug)]
pub struct Options {
    /// Subprotocols the server is willing to speak, in no particular order.
    ///
    /// The first subprotocol requested by the client that appears here is selected.
    ///
    /// Default: `["json"]`
    pub subprotocols: Vec<String>,

    /// Maximum allowed payload size for incoming frames, in bytes.
    ///
    /// Values above 65535 have no effect since 64-bit lengths are never accepted.
    ///
    /// Default: 65535 bytes, as defined in [`MAX_PAYLOAD_LEN`].
    pub max_payload_read: usize,

    /// Maximum size of the HTTP upgrade request head, in bytes.
    ///
    /// Default: 8 KiB, as defined in [`MAX_HANDSHAKE_SIZE`].
    pub max_handshake_size: usize,

    /// Closes the connection when the peer sends nothing for this long.
    ///
    /// Default: `None`
    pub idle_timeout: Option<Duration>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            subprotocols: vec![DEFAULT_SUBPROTOCOL.to_owned()],
            max_payload_read: MAX_PAYLOAD_LEN,
            max_handshake_size: MAX_HANDSHAKE_SIZE,
            idle_timeout: None,
        }
    }
}

impl Options {
    /// Replaces the set of supported subprotocols. An empty set disables negotiation.
    pub fn with_subprotocols<I, S>(self, subprotocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            subprotocols: subprotocols.into_iter().map(Into::into).collect(),
            ..self
        }
    }

    /// Sets the maximum payload size accepted from the client.
    pub fn with_max_payload_read(self, size: usize) -> Self {
        Self {
            max_payload_read: size.min(MAX_PAYLOAD_LEN),
            ..self
        }
    }

    /// Sets the maximum size of the upgrade request head.
    pub fn with_max_handshake_size(self, size: usize) -> Self {
        Self {
            max_handshake_size: size,
            ..self
        }
    }

    /// Closes connections that stay silent for `timeout`.
    pub fn with_idle_timeout(self, timeout: Duration) -> Self {
        Self {
            idle_timeout: Some(timeout),
            ..self
        }
    }
}
