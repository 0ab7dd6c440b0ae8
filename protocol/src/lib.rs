//! RCON Protocol Library
//!
//! Wire-level pieces of the remote console protocol: the fixed-table Huffman
//! codec that frames every datagram, the packet model on top of it, and the
//! salted password digest used by the handshake.

pub mod bitio;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod huffman;
pub mod packets;

pub use constants::*;
pub use error::ProtocolError;

use packets::{ClientPacket, ServerPacket};

/// Protocol version announced in BeginConnection
pub const PROTOCOL_VERSION: u8 = 4;

/// Receive buffer size; larger datagrams are truncated by the OS
pub const MAX_PACKET_SIZE: usize = 8192;

/// Serialize and compress a client packet into a datagram.
pub fn encode_client_packet(packet: &ClientPacket) -> Vec<u8> {
    huffman::encode(&packet.to_bytes())
}

/// Decompress and parse a datagram received from the server.
pub fn decode_server_packet(datagram: &[u8]) -> Result<ServerPacket, ProtocolError> {
    let payload = huffman::decode(datagram)?;
    Ok(ServerPacket::parse(&payload)?)
}

/// Serialize and compress a server packet; used by test servers.
pub fn encode_server_packet(packet: &ServerPacket) -> Vec<u8> {
    huffman::encode(&packet.to_bytes())
}

/// Decompress and parse a client datagram; used by test servers.
pub fn decode_client_packet(datagram: &[u8]) -> Result<ClientPacket, ProtocolError> {
    let payload = huffman::decode(datagram)?;
    Ok(ClientPacket::parse(&payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crypto::Salt;

    #[test]
    fn test_datagram_pipeline() {
        let command = ClientPacket::Command("changemap map07".into());
        let datagram = encode_client_packet(&command);
        assert_eq!(decode_client_packet(&datagram).unwrap(), command);

        let salt = ServerPacket::Salt(Salt([b'a'; SALT_SIZE]));
        let datagram = encode_server_packet(&salt);
        assert_eq!(decode_server_packet(&datagram).unwrap(), salt);
    }

    #[test]
    fn test_pipeline_reports_layer_of_failure() {
        assert!(matches!(
            decode_server_packet(&[0x09]),
            Err(ProtocolError::Codec(_))
        ));
        assert!(matches!(
            decode_server_packet(&[huffman::RAW_MARKER]),
            Err(ProtocolError::Packet(_))
        ));
    }
}
