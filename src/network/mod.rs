//! Network Layer
//!
//! Wire protocol, outbound transport and the async server runtime.
//! This layer is **non-deterministic**; all combat logic runs through `game/`.

pub mod protocol;
pub mod transport;
pub mod server;

pub use protocol::{ClientMessage, ErrorCode, GameView, PartyView, ServerMessage};
pub use transport::{ChannelTransport, MemoryTransport, Transport};
pub use server::{GameServer, GameServerError, ServerConfig};
