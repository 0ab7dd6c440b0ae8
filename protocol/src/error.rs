//! Protocol error types

use crate::huffman::CodecError;
use crate::packets::PacketError;
use thiserror::Error;

/// Failure to turn a datagram into a packet. Either variant affects only
/// the datagram being decoded.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Corrupt compressed frame: {0}")]
    Codec(#[from] CodecError),

    #[error("Malformed packet: {0}")]
    Packet(#[from] PacketError),
}
