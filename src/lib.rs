//! Client-side bootstrap and session engine for a multiplexed,
//! flow-controlled binary transport.
//!
//! The crate owns the connection lifecycle from an open transport to a
//! live session: it batches the client preface into a single flush,
//! resolves a write-once completion exactly once per handshake, tracks
//! session-level flow-control windows and stream counters, and sweeps
//! every live session on shutdown. Byte-level framing and socket I/O stay
//! behind the ports in [`ports`]; the engine itself never touches a
//! socket.
//!
//! Typical wiring:
//!
//! ```ignore
//! let connector = Connector::new(SessionConfig::default());
//! let (connection, established) =
//!     connector.connect(endpoint, encoder, decoder, listener);
//! tokio::spawn(connection.run());
//! let session = established.await?;
//! ```

#![forbid(unsafe_code)]

mod bootstrap;
mod completion;
mod error;
mod frame;
mod handshake;
mod registry;
mod session;
pub mod settings;
mod window;

pub mod ports;

pub use bootstrap::{CancelHandle, Connection, Connector};
pub use completion::{Completer, Completion, completion};
pub use error::{
    DecodeError, EncodeError, ErrorCode, HandshakeError, SessionError, SettingsError,
    TransportError, WindowError,
};
pub use frame::{Frame, SESSION_STREAM_ID};
pub use handshake::HandshakeState;
pub use registry::{SessionRegistry, ShutdownReport};
pub use session::{Session, SessionConfig};
pub use settings::Settings;
pub use window::{DEFAULT_WINDOW_SIZE, FlowControlWindow};
