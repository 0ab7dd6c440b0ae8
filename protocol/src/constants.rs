//! Protocol constants and packet tag definitions

/// Packets sent by the RCON client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClientTag {
    /// Open a session, carries the client's protocol version
    BeginConnection = 52,

    /// Salted password digest
    Password = 53,

    /// Console command
    Command = 54,

    /// Keep-alive
    Pong = 55,

    /// Leave the session
    Disconnect = 56,

    /// Ask the server to complete a partial command
    TabComplete = 57,
}

impl ClientTag {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            52 => Some(Self::BeginConnection),
            53 => Some(Self::Password),
            54 => Some(Self::Command),
            55 => Some(Self::Pong),
            56 => Some(Self::Disconnect),
            57 => Some(Self::TabComplete),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Packets sent by the game server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerTag {
    /// Client speaks a protocol version the server no longer accepts
    OldProtocol = 32,

    /// Client address is banned
    Banned = 33,

    /// Random salt for the password digest
    Salt = 34,

    /// Password accepted
    LoggedIn = 35,

    /// Password rejected
    InvalidPassword = 36,

    /// Console output
    Message = 37,

    /// Server state change, see [`UpdateKind`]
    Update = 38,

    /// Completion candidates for a TabComplete request
    TabComplete = 39,

    /// Too many candidates to send
    TooManyTabCompletes = 40,
}

impl ServerTag {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            32 => Some(Self::OldProtocol),
            33 => Some(Self::Banned),
            34 => Some(Self::Salt),
            35 => Some(Self::LoggedIn),
            36 => Some(Self::InvalidPassword),
            37 => Some(Self::Message),
            38 => Some(Self::Update),
            39 => Some(Self::TabComplete),
            40 => Some(Self::TooManyTabCompletes),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Sub-record kinds carried by [`ServerTag::Update`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UpdateKind {
    PlayerData = 0,
    AdminCount = 1,
    Map = 2,
}

impl UpdateKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::PlayerData),
            1 => Some(Self::AdminCount),
            2 => Some(Self::Map),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Length of the salt issued by the server
pub const SALT_SIZE: usize = 32;

/// Length of the MD5 password digest
pub const DIGEST_SIZE: usize = 16;
