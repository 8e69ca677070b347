//! Connection handling: the connection handle, the transport boundary and
//! the per-connection reader/writer pumps.

pub mod handle;
pub(crate) mod pump;
pub mod transport;

pub use handle::{ClientIdentity, ClientInfo, Connection, ConnectionId};
pub use transport::{Frame, TransportError};
