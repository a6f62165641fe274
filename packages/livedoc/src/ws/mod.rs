//! WebSocket wire protocol
//!
//! The typed envelope exchanged between LiveDoc clients and servers,
//! plus the codec that turns envelopes into JSON text frames and back.

mod protocol;

pub use protocol::{
    ClientMessage, ProtocolError, ResultMetadata, SearchResult, ServerMessage, decode_client,
    decode_server, encode_client, encode_server,
};
