//! Ordered slices of a larger collection.

use serde::{Deserialize, Serialize};

/// One contiguous slice of a collection, tagged with its position.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BigCollectionChunk<I> {
    pub items: Vec<I>,
    pub ordinal: u32,
}

impl<I> BigCollectionChunk<I> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Split `items` into chunks of at most `batch` items, ordinals from 0.
///
/// A `batch` of zero is treated as one.
pub fn chunk_items<I, T>(items: T, batch: usize) -> ChunkItems<T::IntoIter>
where
    T: IntoIterator<Item = I>,
{
    ChunkItems {
        inner: items.into_iter(),
        batch: batch.max(1),
        next_ordinal: 0,
    }
}

pub struct ChunkItems<It> {
    inner: It,
    batch: usize,
    next_ordinal: u32,
}

impl<It: Iterator> Iterator for ChunkItems<It> {
    type Item = BigCollectionChunk<It::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        let items: Vec<_> = self.inner.by_ref().take(self.batch).collect();
        if items.is_empty() {
            return None;
        }
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        Some(BigCollectionChunk { items, ordinal })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SequenceProgress {
    Partial { received: u64 },
    Complete,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SequenceError {
    #[error("expected chunk {expected}, got {got}")]
    OutOfOrder { expected: u32, got: u32 },

    #[error("received {received} items, more than the declared {declared}")]
    Overflow { declared: u64, received: u64 },
}

/// Accumulates chunks strictly in ordinal order.
///
/// With a declared length the sequence completes exactly when that many
/// items have arrived. Without one it only completes via
/// [`ChunkSequence::finish`].
#[derive(Clone, Debug)]
pub struct ChunkSequence<I> {
    declared_len: Option<u64>,
    next_ordinal: u32,
    items: Vec<I>,
}

impl<I> ChunkSequence<I> {
    pub fn new(declared_len: Option<u64>) -> Self {
        Self {
            declared_len,
            next_ordinal: 0,
            items: Vec::new(),
        }
    }

    pub fn declared_len(&self) -> Option<u64> {
        self.declared_len
    }

    pub fn next_ordinal(&self) -> u32 {
        self.next_ordinal
    }

    pub fn received(&self) -> u64 {
        self.items.len() as u64
    }

    pub fn push(
        &mut self,
        chunk: BigCollectionChunk<I>,
    ) -> Result<SequenceProgress, SequenceError> {
        if chunk.ordinal != self.next_ordinal {
            return Err(SequenceError::OutOfOrder {
                expected: self.next_ordinal,
                got: chunk.ordinal,
            });
        }
        let received = self.received() + chunk.items.len() as u64;
        if let Some(declared) = self.declared_len {
            if received > declared {
                return Err(SequenceError::Overflow { declared, received });
            }
        }
        self.items.extend(chunk.items);
        self.next_ordinal += 1;
        match self.declared_len {
            Some(declared) if received == declared => Ok(SequenceProgress::Complete),
            _ => Ok(SequenceProgress::Partial { received }),
        }
    }

    /// True once the declared length has been reached.
    pub fn is_complete(&self) -> bool {
        self.declared_len == Some(self.received())
    }

    pub fn into_items(self) -> Vec<I> {
        self.items
    }
}
