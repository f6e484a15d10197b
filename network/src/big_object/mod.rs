//! Chunked transport for objects too large to move as one message.

pub mod assembler;
pub mod chunk;
pub mod chunker;
pub mod cursor;

pub use assembler::{AcceptOutcome, AssemblyProgress, BigObjectAssembler};
pub use chunk::{chunk_items, BigCollectionChunk, ChunkSequence, SequenceError, SequenceProgress};
pub use chunker::{
    BigObjectConfig, ByteChunker, ByteChunks, SourceChangePolicy, StreamRequest,
    DEFAULT_ASSEMBLY_TIMEOUT, DEFAULT_BATCH_SIZE, DEFAULT_MAX_ASSEMBLIES_PER_PEER,
    DEFAULT_MAX_OBJECT_SIZE,
};
pub use cursor::ObjectCursor;
