//! RCON packet structures
//!
//! A packet is the decompressed datagram payload: one tag byte followed by a
//! tag-specific body. Integers are little-endian. Structured strings are
//! NUL-terminated; a string that ends a packet runs to the end of the
//! datagram and may or may not carry the terminator.

use crate::constants::{ClientTag, DIGEST_SIZE, SALT_SIZE, ServerTag, UpdateKind};
use crate::crypto::{Digest, DigestEncoding, DigestError, Salt};
use thiserror::Error;

/// Packet errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("Empty packet")]
    Empty,

    #[error("Truncated packet (tag {tag}): needed {needed} bytes at offset {offset}, {available} available")]
    Truncated {
        tag: u8,
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("Unknown client packet tag: {0}")]
    UnknownClientTag(u8),

    #[error("Unknown update kind {0} in login summary")]
    UnknownUpdateKind(u8),

    #[error("Invalid password digest: {0}")]
    InvalidDigest(#[from] DigestError),
}

/// Packets sent by the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientPacket {
    BeginConnection { version: u8 },
    Password { digest: Digest, encoding: DigestEncoding },
    Command(String),
    Pong,
    Disconnect,
    TabComplete(String),
}

impl ClientPacket {
    pub fn tag(&self) -> ClientTag {
        match self {
            Self::BeginConnection { .. } => ClientTag::BeginConnection,
            Self::Password { .. } => ClientTag::Password,
            Self::Command(_) => ClientTag::Command,
            Self::Pong => ClientTag::Pong,
            Self::Disconnect => ClientTag::Disconnect,
            Self::TabComplete(_) => ClientTag::TabComplete,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![self.tag().to_u8()];
        match self {
            Self::BeginConnection { version } => bytes.push(*version),
            Self::Password { digest, encoding } => match encoding {
                DigestEncoding::Binary => bytes.extend_from_slice(digest.as_bytes()),
                DigestEncoding::Hex => bytes.extend_from_slice(digest.to_hex().as_bytes()),
            },
            Self::Command(text) | Self::TabComplete(text) => {
                bytes.extend_from_slice(text.as_bytes())
            }
            Self::Pong | Self::Disconnect => {}
        }
        bytes
    }

    /// Parse a client packet, as a server would.
    pub fn parse(bytes: &[u8]) -> Result<Self, PacketError> {
        let (&tag, body) = bytes.split_first().ok_or(PacketError::Empty)?;
        let kind = ClientTag::from_u8(tag).ok_or(PacketError::UnknownClientTag(tag))?;
        let mut fields = Fields::new(tag, body);

        let packet = match kind {
            ClientTag::BeginConnection => Self::BeginConnection { version: fields.u8()? },
            ClientTag::Password => {
                let raw = fields.rest();
                match raw.len() {
                    DIGEST_SIZE => {
                        let mut digest = [0u8; DIGEST_SIZE];
                        digest.copy_from_slice(raw);
                        Self::Password {
                            digest: Digest(digest),
                            encoding: DigestEncoding::Binary,
                        }
                    }
                    _ => Self::Password {
                        digest: Digest::from_hex(&String::from_utf8_lossy(raw))?,
                        encoding: DigestEncoding::Hex,
                    },
                }
            }
            ClientTag::Command => Self::Command(fields.rest_string()),
            ClientTag::Pong => Self::Pong,
            ClientTag::Disconnect => Self::Disconnect,
            ClientTag::TabComplete => Self::TabComplete(fields.rest_string()),
        };

        Ok(packet)
    }
}

/// Server-side state change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerUpdate {
    /// Names of every connected player
    PlayerData(Vec<String>),
    /// Number of RCON administrators logged in
    AdminCount(u8),
    /// Current map lump name
    Map(String),
    /// Kind this client does not understand; body kept verbatim
    Unknown { kind: u8, body: Vec<u8> },
}

impl ServerUpdate {
    fn parse_known(kind: UpdateKind, fields: &mut Fields<'_>) -> Result<Self, PacketError> {
        let update = match kind {
            UpdateKind::PlayerData => {
                let count = fields.u8()?;
                let players = (0..count)
                    .map(|_| fields.cstring())
                    .collect::<Result<Vec<_>, _>>()?;
                Self::PlayerData(players)
            }
            UpdateKind::AdminCount => Self::AdminCount(fields.u8()?),
            UpdateKind::Map => Self::Map(fields.cstring()?),
        };
        Ok(update)
    }

    fn write(&self, bytes: &mut Vec<u8>) {
        match self {
            Self::PlayerData(players) => {
                bytes.push(UpdateKind::PlayerData.to_u8());
                bytes.push(players.len().min(u8::MAX as usize) as u8);
                for name in players.iter().take(u8::MAX as usize) {
                    push_cstring(bytes, name);
                }
            }
            Self::AdminCount(count) => {
                bytes.push(UpdateKind::AdminCount.to_u8());
                bytes.push(*count);
            }
            Self::Map(map) => {
                bytes.push(UpdateKind::Map.to_u8());
                push_cstring(bytes, map);
            }
            Self::Unknown { kind, body } => {
                bytes.push(*kind);
                bytes.extend_from_slice(body);
            }
        }
    }
}

/// Server details sent along with a successful login
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginSummary {
    pub protocol_version: u8,
    pub hostname: String,
    pub updates: Vec<ServerUpdate>,
    /// Recent console lines, oldest first
    pub console_history: Vec<String>,
}

impl LoginSummary {
    fn parse(fields: &mut Fields<'_>) -> Result<Self, PacketError> {
        let protocol_version = fields.u8()?;
        let hostname = fields.cstring()?;

        let update_count = fields.u8()?;
        let mut updates = Vec::with_capacity(update_count as usize);
        for _ in 0..update_count {
            let kind = fields.u8()?;
            let kind = UpdateKind::from_u8(kind).ok_or(PacketError::UnknownUpdateKind(kind))?;
            updates.push(ServerUpdate::parse_known(kind, fields)?);
        }

        let line_count = fields.u8()?;
        let console_history = (0..line_count)
            .map(|_| fields.cstring())
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            protocol_version,
            hostname,
            updates,
            console_history,
        })
    }

    fn write(&self, bytes: &mut Vec<u8>) {
        bytes.push(self.protocol_version);
        push_cstring(bytes, &self.hostname);
        bytes.push(self.updates.len() as u8);
        for update in &self.updates {
            update.write(bytes);
        }
        bytes.push(self.console_history.len() as u8);
        for line in &self.console_history {
            push_cstring(bytes, line);
        }
    }
}

/// Packets sent by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerPacket {
    OldProtocol,
    Banned,
    Salt(Salt),
    /// Older servers send a bare tag; newer ones append a summary
    LoggedIn(Option<LoginSummary>),
    InvalidPassword,
    Message(String),
    Update(ServerUpdate),
    TabComplete(Vec<String>),
    TooManyTabCompletes(u16),
    /// Tag this client does not understand
    Unknown { tag: u8, body: Vec<u8> },
}

impl ServerPacket {
    /// Parse a decompressed server packet.
    ///
    /// An unrecognized tag is not an error: it yields [`ServerPacket::Unknown`]
    /// so newer servers degrade gracefully.
    pub fn parse(bytes: &[u8]) -> Result<Self, PacketError> {
        let (&tag, body) = bytes.split_first().ok_or(PacketError::Empty)?;
        let Some(kind) = ServerTag::from_u8(tag) else {
            return Ok(Self::Unknown { tag, body: body.to_vec() });
        };
        let mut fields = Fields::new(tag, body);

        let packet = match kind {
            ServerTag::OldProtocol => Self::OldProtocol,
            ServerTag::Banned => Self::Banned,
            ServerTag::Salt => Self::Salt(Salt(fields.array::<SALT_SIZE>()?)),
            ServerTag::LoggedIn if fields.is_empty() => Self::LoggedIn(None),
            ServerTag::LoggedIn => Self::LoggedIn(Some(LoginSummary::parse(&mut fields)?)),
            ServerTag::InvalidPassword => Self::InvalidPassword,
            ServerTag::Message => Self::Message(fields.rest_string()),
            ServerTag::Update => {
                let kind = fields.u8()?;
                match UpdateKind::from_u8(kind) {
                    Some(known) => Self::Update(ServerUpdate::parse_known(known, &mut fields)?),
                    None => Self::Update(ServerUpdate::Unknown {
                        kind,
                        body: fields.rest().to_vec(),
                    }),
                }
            }
            ServerTag::TabComplete => {
                let count = fields.u8()?;
                let candidates = (0..count)
                    .map(|_| fields.cstring())
                    .collect::<Result<Vec<_>, _>>()?;
                Self::TabComplete(candidates)
            }
            ServerTag::TooManyTabCompletes => Self::TooManyTabCompletes(fields.u16()?),
        };

        Ok(packet)
    }

    /// Serialize a server packet, as a server would.
    pub fn to_bytes(&self) -> Vec<u8> {
        let tag = match self {
            Self::OldProtocol => ServerTag::OldProtocol.to_u8(),
            Self::Banned => ServerTag::Banned.to_u8(),
            Self::Salt(_) => ServerTag::Salt.to_u8(),
            Self::LoggedIn(_) => ServerTag::LoggedIn.to_u8(),
            Self::InvalidPassword => ServerTag::InvalidPassword.to_u8(),
            Self::Message(_) => ServerTag::Message.to_u8(),
            Self::Update(_) => ServerTag::Update.to_u8(),
            Self::TabComplete(_) => ServerTag::TabComplete.to_u8(),
            Self::TooManyTabCompletes(_) => ServerTag::TooManyTabCompletes.to_u8(),
            Self::Unknown { tag, .. } => *tag,
        };

        let mut bytes = vec![tag];
        match self {
            Self::OldProtocol | Self::Banned | Self::InvalidPassword => {}
            Self::Salt(salt) => bytes.extend_from_slice(salt.as_bytes()),
            Self::LoggedIn(summary) => {
                if let Some(summary) = summary {
                    summary.write(&mut bytes);
                }
            }
            Self::Message(text) => push_cstring(&mut bytes, text),
            Self::Update(update) => update.write(&mut bytes),
            Self::TabComplete(candidates) => {
                bytes.push(candidates.len().min(u8::MAX as usize) as u8);
                for candidate in candidates.iter().take(u8::MAX as usize) {
                    push_cstring(&mut bytes, candidate);
                }
            }
            Self::TooManyTabCompletes(count) => bytes.extend_from_slice(&count.to_le_bytes()),
            Self::Unknown { body, .. } => bytes.extend_from_slice(body),
        }
        bytes
    }

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::OldProtocol => "OldProtocol",
            Self::Banned => "Banned",
            Self::Salt(_) => "Salt",
            Self::LoggedIn(_) => "LoggedIn",
            Self::InvalidPassword => "InvalidPassword",
            Self::Message(_) => "Message",
            Self::Update(_) => "Update",
            Self::TabComplete(_) => "TabComplete",
            Self::TooManyTabCompletes(_) => "TooManyTabCompletes",
            Self::Unknown { .. } => "Unknown",
        }
    }
}

fn push_cstring(bytes: &mut Vec<u8>, text: &str) {
    bytes.extend_from_slice(text.as_bytes());
    bytes.push(0);
}

/// Cursor over a packet body that reports truncation with the packet tag.
struct Fields<'a> {
    tag: u8,
    data: &'a [u8],
    offset: usize,
}

impl<'a> Fields<'a> {
    fn new(tag: u8, data: &'a [u8]) -> Self {
        Self { tag, data, offset: 0 }
    }

    fn is_empty(&self) -> bool {
        self.offset >= self.data.len()
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8], PacketError> {
        let available = self.data.len() - self.offset;
        if needed > available {
            return Err(PacketError::Truncated {
                tag: self.tag,
                offset: self.offset,
                needed,
                available,
            });
        }

        let slice = &self.data[self.offset..self.offset + needed];
        self.offset += needed;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, PacketError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, PacketError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], PacketError> {
        let mut array = [0u8; N];
        array.copy_from_slice(self.take(N)?);
        Ok(array)
    }

    /// NUL-terminated string; the end of the packet also terminates it.
    fn cstring(&mut self) -> Result<String, PacketError> {
        let rest = &self.data[self.offset..];
        if rest.is_empty() {
            return Err(PacketError::Truncated {
                tag: self.tag,
                offset: self.offset,
                needed: 1,
                available: 0,
            });
        }

        let (text, consumed) = match rest.iter().position(|&b| b == 0) {
            Some(nul) => (&rest[..nul], nul + 1),
            None => (rest, rest.len()),
        };
        self.offset += consumed;
        Ok(String::from_utf8_lossy(text).into_owned())
    }

    fn rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.offset.min(self.data.len())..];
        self.offset = self.data.len();
        rest
    }

    /// Remainder of the packet as text, minus one trailing NUL.
    fn rest_string(&mut self) -> String {
        let rest = self.rest();
        let text = rest.strip_suffix(&[0]).unwrap_or(rest);
        String::from_utf8_lossy(text).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::password_digest;

    #[test]
    fn test_client_packet_layouts() {
        assert_eq!(ClientPacket::BeginConnection { version: 4 }.to_bytes(), vec![52, 4]);
        assert_eq!(ClientPacket::Command("status".into()).to_bytes(), b"\x36status".to_vec());
        assert_eq!(ClientPacket::Pong.to_bytes(), vec![55]);
        assert_eq!(ClientPacket::Disconnect.to_bytes(), vec![56]);
        assert_eq!(ClientPacket::TabComplete("ki".into()).to_bytes(), b"\x39ki".to_vec());
    }

    #[test]
    fn test_password_encodings() {
        let digest = password_digest(&Salt([0u8; SALT_SIZE]), "secret");

        let binary = ClientPacket::Password { digest, encoding: DigestEncoding::Binary };
        let bytes = binary.to_bytes();
        assert_eq!(bytes.len(), 1 + DIGEST_SIZE);
        assert_eq!(ClientPacket::parse(&bytes).unwrap(), binary);

        let hex = ClientPacket::Password { digest, encoding: DigestEncoding::Hex };
        let bytes = hex.to_bytes();
        assert_eq!(&bytes[1..], digest.to_hex().as_bytes());
        assert_eq!(ClientPacket::parse(&bytes).unwrap(), hex);
    }

    #[test]
    fn test_parse_client_rejects_unknown_tag() {
        assert_eq!(ClientPacket::parse(&[99]), Err(PacketError::UnknownClientTag(99)));
        assert_eq!(ClientPacket::parse(&[]), Err(PacketError::Empty));
    }

    #[test]
    fn test_parse_salt_ignores_trailing_nul() {
        let mut bytes = vec![34];
        bytes.extend_from_slice(b"0123456789abcdef0123456789abcdef");
        bytes.push(0);

        let ServerPacket::Salt(salt) = ServerPacket::parse(&bytes).unwrap() else {
            panic!("expected salt");
        };
        assert_eq!(&salt.0, b"0123456789abcdef0123456789abcdef");
    }

    #[test]
    fn test_truncated_salt_is_malformed() {
        let bytes = [34, 1, 2, 3];
        assert_eq!(
            ServerPacket::parse(&bytes),
            Err(PacketError::Truncated { tag: 34, offset: 0, needed: 32, available: 3 })
        );
    }

    #[test]
    fn test_unknown_tag_is_not_an_error() {
        assert_eq!(
            ServerPacket::parse(&[77, 1, 2]).unwrap(),
            ServerPacket::Unknown { tag: 77, body: vec![1, 2] }
        );
    }

    #[test]
    fn test_message_strips_single_terminator() {
        assert_eq!(
            ServerPacket::parse(b"\x25hello\n\0").unwrap(),
            ServerPacket::Message("hello\n".into())
        );
        assert_eq!(
            ServerPacket::parse(b"\x25no terminator").unwrap(),
            ServerPacket::Message("no terminator".into())
        );
    }

    #[test]
    fn test_message_with_invalid_utf8_is_lossy() {
        let ServerPacket::Message(text) = ServerPacket::parse(&[37, b'a', 0xC3, b'b']).unwrap() else {
            panic!("expected message");
        };
        assert_eq!(text, "a\u{FFFD}b");
    }

    #[test]
    fn test_bare_logged_in() {
        assert_eq!(ServerPacket::parse(&[35]).unwrap(), ServerPacket::LoggedIn(None));
    }

    #[test]
    fn test_logged_in_summary() {
        let summary = LoginSummary {
            protocol_version: 4,
            hostname: "Duel server".into(),
            updates: vec![
                ServerUpdate::PlayerData(vec!["alice".into(), "bob".into()]),
                ServerUpdate::AdminCount(1),
                ServerUpdate::Map("MAP01".into()),
            ],
            console_history: vec!["line one".into(), "line two".into()],
        };
        let packet = ServerPacket::LoggedIn(Some(summary));
        assert_eq!(ServerPacket::parse(&packet.to_bytes()).unwrap(), packet);
    }

    #[test]
    fn test_logged_in_summary_truncated() {
        // version, hostname, then claims two updates but carries none
        let bytes = b"\x23\x04host\0\x02";
        assert!(matches!(
            ServerPacket::parse(bytes),
            Err(PacketError::Truncated { tag: 35, .. })
        ));
    }

    #[test]
    fn test_update_records() {
        assert_eq!(
            ServerPacket::parse(b"\x26\x00\x02alice\0bob\0").unwrap(),
            ServerPacket::Update(ServerUpdate::PlayerData(vec!["alice".into(), "bob".into()]))
        );
        assert_eq!(
            ServerPacket::parse(&[38, 1, 3]).unwrap(),
            ServerPacket::Update(ServerUpdate::AdminCount(3))
        );
        assert_eq!(
            ServerPacket::parse(b"\x26\x02E1M1\0").unwrap(),
            ServerPacket::Update(ServerUpdate::Map("E1M1".into()))
        );
        assert_eq!(
            ServerPacket::parse(&[38, 9, 1, 2]).unwrap(),
            ServerPacket::Update(ServerUpdate::Unknown { kind: 9, body: vec![1, 2] })
        );
    }

    #[test]
    fn test_player_list_short_of_names_is_truncated() {
        assert!(matches!(
            ServerPacket::parse(b"\x26\x00\x03alice\0"),
            Err(PacketError::Truncated { tag: 38, .. })
        ));
    }

    #[test]
    fn test_update_without_kind_is_truncated() {
        assert!(matches!(ServerPacket::parse(&[38]), Err(PacketError::Truncated { .. })));
    }

    #[test]
    fn test_tab_completions() {
        assert_eq!(
            ServerPacket::parse(b"\x27\x02kick\0kick_idx\0").unwrap(),
            ServerPacket::TabComplete(vec!["kick".into(), "kick_idx".into()])
        );
        assert_eq!(
            ServerPacket::parse(&[40, 0x2C, 0x01]).unwrap(),
            ServerPacket::TooManyTabCompletes(300)
        );
    }

    #[test]
    fn test_empty_packet() {
        assert_eq!(ServerPacket::parse(&[]), Err(PacketError::Empty));
    }
}
