//! Serializer collaborator: turns messages into bytes and back.
//!
//! Transform stages only see this trait; swapping the field-level encoding
//! never touches the pipeline.

use chainwire_messages::Message;

use crate::ProtocolError;

/// Byte-level (de)serialization of wire messages.
pub trait Serializer: Send + Sync {
    fn serialize(&self, message: &Message) -> Result<Vec<u8>, ProtocolError>;
    fn deserialize(&self, bytes: &[u8]) -> Result<Message, ProtocolError>;
}

/// Default serializer backed by `bincode`.
#[derive(Clone, Copy, Debug, Default)]
pub struct BincodeSerializer;

impl Serializer for BincodeSerializer {
    fn serialize(&self, message: &Message) -> Result<Vec<u8>, ProtocolError> {
        bincode::serialize(message).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Message, ProtocolError> {
        bincode::deserialize(bytes).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}
