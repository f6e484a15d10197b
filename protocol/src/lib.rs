//! Wire protocol: message framing, serializer contract, versioning.

pub mod codec;
pub mod error;
pub mod serializer;
pub mod version;

pub use codec::{encode_frame, FrameDecoder, FRAME_HEADER_LEN, MAX_MESSAGE_SIZE};
pub use error::ProtocolError;
pub use serializer::{BincodeSerializer, Serializer};
pub use version::PROTOCOL_VERSION;
