//! Wire codec stages and the standard inbound/outbound pipelines.
//!
//! Inbound:  socket bytes -> [`FrameDecodeStage`] -> [`DeserializeStage`] -> messages
//! Outbound: messages -> [`ChunkingStage`] -> [`SerializeStage`] -> socket bytes

use std::sync::Arc;

use chainwire_messages::Message;
use chainwire_protocol::{encode_frame, FrameDecoder, Serializer};
use chainwire_types::PeerAddress;

use crate::big_object::{BigObjectConfig, ByteChunker, StreamRequest};
use crate::error::StageError;
use crate::stage::{StreamDataEvent, TransformStage};
use crate::stream::{PeerStream, StreamDirection};

/// Splits raw socket reads into frame payloads. Partial frames are kept
/// until the rest arrives.
pub struct FrameDecodeStage {
    decoder: FrameDecoder,
}

impl FrameDecodeStage {
    pub fn new(magic: [u8; 4]) -> Self {
        Self {
            decoder: FrameDecoder::new(magic),
        }
    }

    pub fn with_decoder(decoder: FrameDecoder) -> Self {
        Self { decoder }
    }
}

impl TransformStage for FrameDecodeStage {
    type In = Vec<u8>;
    type Out = Vec<u8>;

    fn name(&self) -> &'static str {
        "frame_decode"
    }

    fn transform(
        &mut self,
        event: StreamDataEvent<Vec<u8>>,
    ) -> Result<Vec<StreamDataEvent<Vec<u8>>>, StageError> {
        let frames = self.decoder.push(&event.data).map_err(|source| StageError::Protocol {
            stage: "frame_decode",
            source,
        })?;
        Ok(frames
            .into_iter()
            .map(|frame| StreamDataEvent {
                data: frame,
                peer: event.peer.clone(),
            })
            .collect())
    }
}

pub struct DeserializeStage {
    serializer: Arc<dyn Serializer>,
}

impl DeserializeStage {
    pub fn new(serializer: Arc<dyn Serializer>) -> Self {
        Self { serializer }
    }
}

impl TransformStage for DeserializeStage {
    type In = Vec<u8>;
    type Out = Message;

    fn name(&self) -> &'static str {
        "deserialize"
    }

    fn transform(
        &mut self,
        event: StreamDataEvent<Vec<u8>>,
    ) -> Result<Vec<StreamDataEvent<Message>>, StageError> {
        let message = self
            .serializer
            .deserialize(&event.data)
            .map_err(|source| StageError::Protocol {
                stage: "deserialize",
                source,
            })?;
        Ok(vec![event.map(|_| message)])
    }
}

pub struct SerializeStage {
    serializer: Arc<dyn Serializer>,
    magic: [u8; 4],
}

impl SerializeStage {
    pub fn new(serializer: Arc<dyn Serializer>, magic: [u8; 4]) -> Self {
        Self { serializer, magic }
    }
}

impl TransformStage for SerializeStage {
    type In = Message;
    type Out = Vec<u8>;

    fn name(&self) -> &'static str {
        "serialize"
    }

    fn transform(
        &mut self,
        event: StreamDataEvent<Message>,
    ) -> Result<Vec<StreamDataEvent<Vec<u8>>>, StageError> {
        let protocol = |source| StageError::Protocol {
            stage: "serialize",
            source,
        };
        let payload = self.serializer.serialize(&event.data).map_err(protocol)?;
        let frame = encode_frame(self.magic, &payload).map_err(protocol)?;
        Ok(vec![event.map(|_| frame)])
    }
}

/// Replaces an `Object` message whose payload exceeds one batch with the
/// equivalent run of `ObjectChunk` messages. Other messages pass through.
pub struct ChunkingStage {
    chunker: ByteChunker,
    batch_size: usize,
}

impl ChunkingStage {
    pub fn new(config: &BigObjectConfig) -> Self {
        Self {
            chunker: ByteChunker::new(config),
            batch_size: config.batch_size(),
        }
    }
}

impl TransformStage for ChunkingStage {
    type In = Message;
    type Out = Message;

    fn name(&self) -> &'static str {
        "chunking"
    }

    fn transform(
        &mut self,
        event: StreamDataEvent<Message>,
    ) -> Result<Vec<StreamDataEvent<Message>>, StageError> {
        let StreamDataEvent { data, peer } = event;
        let object = match data {
            Message::Object(object) if object.payload.len() > self.batch_size => object,
            other => return Ok(vec![StreamDataEvent { data: other, peer }]),
        };

        let failed = |e: crate::error::BigObjectError| StageError::Failed {
            stage: "chunking",
            reason: e.to_string(),
        };
        let request = StreamRequest::from_bytes(object.id, object.kind, object.payload);
        let mut chunks = self.chunker.chunks(request).map_err(failed)?;
        let mut out = Vec::new();
        while let Some(chunk) = chunks.next_message() {
            out.push(StreamDataEvent {
                data: Message::ObjectChunk(chunk.map_err(failed)?),
                peer: peer.clone(),
            });
        }
        Ok(out)
    }
}

/// Socket bytes to messages.
pub fn inbound_stream(
    peer: PeerAddress,
    magic: [u8; 4],
    serializer: Arc<dyn Serializer>,
) -> PeerStream<Vec<u8>, Message> {
    PeerStream::new(peer, StreamDirection::Inbound)
        .with_stage(FrameDecodeStage::new(magic))
        .with_stage(DeserializeStage::new(serializer))
}

/// Messages to socket bytes, chunking oversized objects on the way.
pub fn outbound_stream(
    peer: PeerAddress,
    magic: [u8; 4],
    serializer: Arc<dyn Serializer>,
    big_object: &BigObjectConfig,
) -> PeerStream<Message, Vec<u8>> {
    PeerStream::new(peer, StreamDirection::Outbound)
        .with_stage(ChunkingStage::new(big_object))
        .with_stage(SerializeStage::new(serializer, magic))
}
