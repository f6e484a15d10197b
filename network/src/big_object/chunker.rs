//! Outbound side: turn a lazily produced object into bounded chunks.

use std::io;
use std::time::Duration;

use chainwire_messages::{ObjectChunkMessage, ObjectKind};
use chainwire_types::ObjectId;
use serde::{Deserialize, Serialize};

use super::chunk::BigCollectionChunk;
use crate::error::BigObjectError;

pub const DEFAULT_MAX_OBJECT_SIZE: u64 = 10_000_000;
pub const DEFAULT_BATCH_SIZE: usize = 10_000;
pub const DEFAULT_ASSEMBLY_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_ASSEMBLIES_PER_PEER: usize = 8;

/// What the assembler does when a second peer starts sending chunks for an
/// object already being assembled from another peer. The source-changed
/// event is published in both cases.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceChangePolicy {
    /// Continue the assembly with chunks from the new peer.
    #[default]
    Accept,
    /// Discard the partial object.
    Abort,
}

/// Limits for big-object transport, shared by both directions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BigObjectConfig {
    max_size: u64,
    batch_size: usize,
    assembly_timeout: Duration,
    source_change: SourceChangePolicy,
    max_assemblies_per_peer: usize,
}

impl BigObjectConfig {
    pub fn new(
        max_size: u64,
        batch_size: usize,
        assembly_timeout: Duration,
        source_change: SourceChangePolicy,
    ) -> Result<Self, BigObjectError> {
        if batch_size == 0 {
            return Err(BigObjectError::InvalidConfig("batch_size must be positive".into()));
        }
        if max_size == 0 {
            return Err(BigObjectError::InvalidConfig("max_size must be positive".into()));
        }
        if batch_size as u64 > max_size {
            return Err(BigObjectError::InvalidConfig(format!(
                "batch_size {batch_size} exceeds max_size {max_size}"
            )));
        }
        if assembly_timeout.is_zero() {
            return Err(BigObjectError::InvalidConfig(
                "assembly_timeout must be positive".into(),
            ));
        }
        Ok(Self {
            max_size,
            batch_size,
            assembly_timeout,
            source_change,
            max_assemblies_per_peer: DEFAULT_MAX_ASSEMBLIES_PER_PEER,
        })
    }

    /// Cap the objects one peer may have in flight at once.
    pub fn with_max_assemblies_per_peer(mut self, limit: usize) -> Result<Self, BigObjectError> {
        if limit == 0 {
            return Err(BigObjectError::InvalidConfig(
                "max_assemblies_per_peer must be positive".into(),
            ));
        }
        self.max_assemblies_per_peer = limit;
        Ok(self)
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn assembly_timeout(&self) -> Duration {
        self.assembly_timeout
    }

    pub fn source_change(&self) -> SourceChangePolicy {
        self.source_change
    }

    pub fn max_assemblies_per_peer(&self) -> usize {
        self.max_assemblies_per_peer
    }
}

impl Default for BigObjectConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_OBJECT_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            assembly_timeout: DEFAULT_ASSEMBLY_TIMEOUT,
            source_change: SourceChangePolicy::Accept,
            max_assemblies_per_peer: DEFAULT_MAX_ASSEMBLIES_PER_PEER,
        }
    }
}

type BlockSource = Box<dyn Iterator<Item = io::Result<Vec<u8>>> + Send>;

/// A named object whose bytes are produced block by block.
pub struct StreamRequest {
    pub id: ObjectId,
    pub kind: ObjectKind,
    pub total_len: u64,
    blocks: BlockSource,
}

impl StreamRequest {
    pub fn new<B>(id: ObjectId, kind: ObjectKind, total_len: u64, blocks: B) -> Self
    where
        B: Iterator<Item = io::Result<Vec<u8>>> + Send + 'static,
    {
        Self {
            id,
            kind,
            total_len,
            blocks: Box::new(blocks),
        }
    }

    /// Request over bytes already in memory.
    pub fn from_bytes(id: ObjectId, kind: ObjectKind, bytes: Vec<u8>) -> Self {
        let total_len = bytes.len() as u64;
        Self::new(id, kind, total_len, std::iter::once(Ok(bytes)))
    }
}

impl std::fmt::Debug for StreamRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamRequest")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("total_len", &self.total_len)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug)]
pub struct ByteChunker {
    batch_size: usize,
    max_size: u64,
}

impl ByteChunker {
    pub fn new(config: &BigObjectConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            max_size: config.max_size,
        }
    }

    /// Start chunking `request`. Oversized requests fail before any block
    /// is drawn from the producer.
    pub fn chunks(&self, request: StreamRequest) -> Result<ByteChunks, BigObjectError> {
        if request.total_len > self.max_size {
            return Err(BigObjectError::SizeExceeded {
                id: request.id,
                size: request.total_len,
                max: self.max_size,
            });
        }
        Ok(ByteChunks {
            id: request.id,
            kind: request.kind,
            total_len: request.total_len,
            batch_size: self.batch_size,
            blocks: request.blocks,
            buffer: Vec::with_capacity(self.batch_size),
            consumed: 0,
            emitted: 0,
            next_ordinal: 0,
            done: false,
        })
    }
}

/// Iterator over the chunks of one object.
///
/// Holds at most one batch plus one producer block in memory. Every chunk
/// but the last carries exactly `batch_size` bytes.
pub struct ByteChunks {
    id: ObjectId,
    kind: ObjectKind,
    total_len: u64,
    batch_size: usize,
    blocks: BlockSource,
    buffer: Vec<u8>,
    /// Leading bytes of `buffer` already handed out. Compacted only when
    /// the next block arrives, so a large block is never shifted per chunk.
    consumed: usize,
    emitted: u64,
    next_ordinal: u32,
    done: bool,
}

impl ByteChunks {
    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    pub fn total_len(&self) -> u64 {
        self.total_len
    }

    /// Next chunk wrapped as a wire message.
    pub fn next_message(&mut self) -> Option<Result<ObjectChunkMessage, BigObjectError>> {
        let chunk = match self.next()? {
            Ok(chunk) => chunk,
            Err(e) => return Some(Err(e)),
        };
        Some(Ok(ObjectChunkMessage {
            id: self.id.clone(),
            kind: self.kind,
            ordinal: chunk.ordinal,
            total_len: self.total_len,
            last: self.emitted == self.total_len,
            payload: chunk.items,
        }))
    }

    fn buffered(&self) -> usize {
        self.buffer.len() - self.consumed
    }

    fn fail(
        &mut self,
        err: BigObjectError,
    ) -> Option<Result<BigCollectionChunk<u8>, BigObjectError>> {
        self.done = true;
        self.buffer = Vec::new();
        self.consumed = 0;
        Some(Err(err))
    }
}

impl Iterator for ByteChunks {
    type Item = Result<BigCollectionChunk<u8>, BigObjectError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        while self.buffered() < self.batch_size {
            match self.blocks.next() {
                Some(Ok(block)) => {
                    let produced = self.emitted + (self.buffered() + block.len()) as u64;
                    if produced > self.total_len {
                        let err = BigObjectError::LengthMismatch {
                            id: self.id.clone(),
                            declared: self.total_len,
                            produced,
                        };
                        return self.fail(err);
                    }
                    self.buffer.drain(..self.consumed);
                    self.consumed = 0;
                    self.buffer.extend_from_slice(&block);
                }
                Some(Err(e)) => {
                    let err = BigObjectError::Source {
                        id: self.id.clone(),
                        reason: e.to_string(),
                    };
                    return self.fail(err);
                }
                None => break,
            }
        }

        if self.buffered() == 0 {
            self.done = true;
            if self.emitted != self.total_len {
                let err = BigObjectError::LengthMismatch {
                    id: self.id.clone(),
                    declared: self.total_len,
                    produced: self.emitted,
                };
                return self.fail(err);
            }
            return None;
        }

        let take = self.buffered().min(self.batch_size);
        let items = self.buffer[self.consumed..self.consumed + take].to_vec();
        self.consumed += take;
        self.emitted += take as u64;
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        Some(Ok(BigCollectionChunk { items, ordinal }))
    }
}
