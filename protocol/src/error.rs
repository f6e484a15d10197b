use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u32),

    #[error("message too large: {size} > {max}")]
    MessageTooLarge { size: usize, max: usize },

    #[error("bad network magic: {0:02x?}")]
    BadMagic([u8; 4]),

    #[error("malformed message: {0}")]
    Malformed(String),
}
