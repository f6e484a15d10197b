//! Inbound side: reassemble ordered chunks into complete objects.
//!
//! Chunks for one object must arrive with ordinals 0, 1, 2, ... Any gap,
//! duplicate, size violation or premature terminal marker aborts the
//! assembly and discards the partial bytes. Completed objects are handed to
//! the [`ObjectStore`]; they are never returned from a partial state.

use std::collections::HashMap;
use std::sync::Arc;

use chainwire_messages::{ObjectChunkMessage, ObjectKind, ObjectMessage};
use chainwire_store::ObjectStore;
use chainwire_types::{ObjectId, PeerAddress};
use tokio::sync::{oneshot, Mutex};
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use super::chunk::{BigCollectionChunk, ChunkSequence, SequenceError, SequenceProgress};
use super::chunker::{BigObjectConfig, SourceChangePolicy};
use crate::bus::EventBus;
use crate::error::AssemblyError;
use crate::event::NetworkEvent;

type Waiter = oneshot::Sender<Result<u64, AssemblyError>>;

struct Assembly {
    kind: ObjectKind,
    source: PeerAddress,
    sequence: ChunkSequence<u8>,
    last_progress: Instant,
}

#[derive(Default)]
struct AssemblerInner {
    assemblies: HashMap<ObjectId, Assembly>,
    waiters: HashMap<ObjectId, Vec<Waiter>>,
}

/// Result of feeding one chunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AcceptOutcome {
    InProgress { received: u64, declared: u64 },
    Completed { size: u64 },
}

/// Snapshot of one in-flight assembly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssemblyProgress {
    pub id: ObjectId,
    pub kind: ObjectKind,
    pub source: PeerAddress,
    pub received: u64,
    pub declared: u64,
}

pub struct BigObjectAssembler {
    config: BigObjectConfig,
    store: Arc<dyn ObjectStore>,
    bus: EventBus,
    inner: Mutex<AssemblerInner>,
}

impl BigObjectAssembler {
    pub fn new(config: BigObjectConfig, store: Arc<dyn ObjectStore>, bus: EventBus) -> Self {
        Self {
            config,
            store,
            bus,
            inner: Mutex::new(AssemblerInner::default()),
        }
    }

    pub fn config(&self) -> &BigObjectConfig {
        &self.config
    }

    /// Feed one chunk received from `source`.
    pub async fn accept(
        &self,
        source: PeerAddress,
        chunk: ObjectChunkMessage,
    ) -> Result<AcceptOutcome, AssemblyError> {
        let mut events = Vec::new();
        let result = {
            let mut inner = self.inner.lock().await;
            self.apply(&mut inner, source, chunk, &mut events)
        };
        for event in events {
            self.bus.publish(event).await;
        }
        result
    }

    fn apply(
        &self,
        inner: &mut AssemblerInner,
        source: PeerAddress,
        chunk: ObjectChunkMessage,
        events: &mut Vec<NetworkEvent>,
    ) -> Result<AcceptOutcome, AssemblyError> {
        let id = chunk.id.clone();

        if chunk.total_len > self.config.max_size() {
            let err = AssemblyError::SizeExceeded {
                id: id.clone(),
                size: chunk.total_len,
                max: self.config.max_size(),
            };
            return Err(abort(inner, &id, &source, err, events));
        }

        let Some(assembly) = inner.assemblies.get_mut(&id) else {
            if chunk.ordinal != 0 {
                let err = AssemblyError::NotStarted {
                    id: id.clone(),
                    ordinal: chunk.ordinal,
                };
                return Err(abort(inner, &id, &source, err, events));
            }
            let limit = self.config.max_assemblies_per_peer();
            let open = inner.assemblies.values().filter(|a| a.source == source).count();
            if open >= limit {
                let err = AssemblyError::TooManyAssemblies {
                    id: id.clone(),
                    peer: source.clone(),
                    limit,
                };
                return Err(abort(inner, &id, &source, err, events));
            }
            debug!(object = %id, peer = %source, total = chunk.total_len, "assembly started");
            inner.assemblies.insert(
                id.clone(),
                Assembly {
                    kind: chunk.kind,
                    source: source.clone(),
                    sequence: ChunkSequence::new(Some(chunk.total_len)),
                    last_progress: Instant::now(),
                },
            );
            return self.push(inner, id, source, chunk, events);
        };

        if assembly.source != source {
            info!(
                object = %id, previous = %assembly.source, peer = %source,
                "assembly source changed"
            );
            events.push(NetworkEvent::BigObjectSourceChanged {
                id: id.clone(),
                previous: assembly.source.clone(),
                source: source.clone(),
            });
            match self.config.source_change() {
                SourceChangePolicy::Accept => assembly.source = source.clone(),
                SourceChangePolicy::Abort => {
                    let err = AssemblyError::SourceChanged {
                        id: id.clone(),
                        previous: assembly.source.clone(),
                        source_peer: source.clone(),
                    };
                    return Err(abort(inner, &id, &source, err, events));
                }
            }
        }

        let declared = assembly.sequence.declared_len().unwrap_or_default();
        if chunk.total_len != declared {
            let err = AssemblyError::LengthMismatch {
                id: id.clone(),
                declared,
                received: chunk.total_len,
            };
            return Err(abort(inner, &id, &source, err, events));
        }

        self.push(inner, id, source, chunk, events)
    }

    fn push(
        &self,
        inner: &mut AssemblerInner,
        id: ObjectId,
        source: PeerAddress,
        chunk: ObjectChunkMessage,
        events: &mut Vec<NetworkEvent>,
    ) -> Result<AcceptOutcome, AssemblyError> {
        let Some(assembly) = inner.assemblies.get_mut(&id) else {
            return Err(AssemblyError::NotStarted {
                id,
                ordinal: chunk.ordinal,
            });
        };
        let declared = assembly.sequence.declared_len().unwrap_or_default();
        let terminal = chunk.last;
        let pushed = assembly.sequence.push(BigCollectionChunk {
            items: chunk.payload,
            ordinal: chunk.ordinal,
        });

        match pushed {
            Err(SequenceError::OutOfOrder { expected, got }) => {
                let err = AssemblyError::OutOfOrder {
                    id: id.clone(),
                    expected,
                    got,
                };
                Err(abort(inner, &id, &source, err, events))
            }
            Err(SequenceError::Overflow { declared, received }) => {
                let err = AssemblyError::LengthMismatch {
                    id: id.clone(),
                    declared,
                    received,
                };
                Err(abort(inner, &id, &source, err, events))
            }
            Ok(SequenceProgress::Partial { received }) if terminal => {
                let err = AssemblyError::Incomplete {
                    id: id.clone(),
                    received,
                    declared,
                };
                Err(abort(inner, &id, &source, err, events))
            }
            Ok(SequenceProgress::Partial { received }) => {
                assembly.last_progress = Instant::now();
                Ok(AcceptOutcome::InProgress { received, declared })
            }
            Ok(SequenceProgress::Complete) => self.complete(inner, id, source, events),
        }
    }

    fn complete(
        &self,
        inner: &mut AssemblerInner,
        id: ObjectId,
        source: PeerAddress,
        events: &mut Vec<NetworkEvent>,
    ) -> Result<AcceptOutcome, AssemblyError> {
        let Some(assembly) = inner.assemblies.remove(&id) else {
            return Err(AssemblyError::NotStarted { id, ordinal: 0 });
        };
        let kind = assembly.kind;
        let bytes = assembly.sequence.into_items();
        let size = bytes.len() as u64;

        if let Err(e) = self.store.save(&id, &bytes) {
            return Err(abort(inner, &id, &source, AssemblyError::Store(e), events));
        }

        info!(object = %id, peer = %source, size, "big object assembled");
        for waiter in inner.waiters.remove(&id).unwrap_or_default() {
            let _ = waiter.send(Ok(size));
        }
        events.push(NetworkEvent::BigObjectReceived {
            id,
            kind,
            source,
            size,
        });
        Ok(AcceptOutcome::Completed { size })
    }

    /// Store an object that arrived as one message. Returns its size.
    ///
    /// Any partial assembly of the same id is superseded.
    pub async fn accept_whole(
        &self,
        source: PeerAddress,
        object: ObjectMessage,
    ) -> Result<u64, AssemblyError> {
        let size = object.payload.len() as u64;
        if size > self.config.max_size() {
            warn!(object = %object.id, peer = %source, size, "whole object over size limit");
            let err = AssemblyError::SizeExceeded {
                id: object.id.clone(),
                size,
                max: self.config.max_size(),
            };
            self.bus
                .publish(NetworkEvent::AssemblyAborted {
                    id: object.id,
                    peer: source,
                    reason: err.to_string(),
                })
                .await;
            return Err(err);
        }

        let mut events = Vec::new();
        let saved = {
            let mut inner = self.inner.lock().await;
            inner.assemblies.remove(&object.id);
            match self.store.save(&object.id, &object.payload) {
                Ok(()) => Ok(inner.waiters.remove(&object.id).unwrap_or_default()),
                Err(e) => Err(abort(
                    &mut inner,
                    &object.id,
                    &source,
                    AssemblyError::Store(e),
                    &mut events,
                )),
            }
        };
        for event in events {
            self.bus.publish(event).await;
        }
        let waiters = saved?;
        for waiter in waiters {
            let _ = waiter.send(Ok(size));
        }
        debug!(object = %object.id, peer = %source, size, "whole object stored");
        self.bus
            .publish(NetworkEvent::BigObjectReceived {
                id: object.id,
                kind: object.kind,
                source,
                size,
            })
            .await;
        Ok(size)
    }

    /// Discard every assembly fed by `peer`. Returns the affected ids.
    pub async fn peer_disconnected(&self, peer: &PeerAddress) -> Vec<ObjectId> {
        let mut events = Vec::new();
        let ids = {
            let mut inner = self.inner.lock().await;
            let ids: Vec<ObjectId> = inner
                .assemblies
                .iter()
                .filter(|(_, a)| &a.source == peer)
                .map(|(id, _)| id.clone())
                .collect();
            for id in &ids {
                discard_incomplete(&mut inner, id, false, &mut events);
            }
            ids
        };
        for event in events {
            self.bus.publish(event).await;
        }
        ids
    }

    /// Discard assemblies idle for longer than the assembly timeout.
    pub async fn expire_stale(&self) -> Vec<ObjectId> {
        let mut events = Vec::new();
        let now = Instant::now();
        let limit = self.config.assembly_timeout();
        let ids = {
            let mut inner = self.inner.lock().await;
            let ids: Vec<ObjectId> = inner
                .assemblies
                .iter()
                .filter(|(_, a)| now.duration_since(a.last_progress) >= limit)
                .map(|(id, _)| id.clone())
                .collect();
            for id in &ids {
                discard_incomplete(&mut inner, id, true, &mut events);
            }
            inner.waiters.retain(|_, w| {
                w.retain(|tx| !tx.is_closed());
                !w.is_empty()
            });
            ids
        };
        for event in events {
            self.bus.publish(event).await;
        }
        ids
    }

    /// Wait until `id` is complete and stored. Returns its size.
    ///
    /// Fails with the abort reason if the assembly is aborted, or with
    /// [`AssemblyError::Timeout`] after the assembly timeout.
    pub async fn wait_for(&self, id: &ObjectId) -> Result<u64, AssemblyError> {
        let rx = {
            let mut inner = self.inner.lock().await;
            if self.store.contains(id)? {
                return Ok(self.store.size(id)?);
            }
            let (tx, rx) = oneshot::channel();
            inner.waiters.entry(id.clone()).or_default().push(tx);
            rx
        };
        match timeout(self.config.assembly_timeout(), rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) | Err(_) => Err(AssemblyError::Timeout { id: id.clone() }),
        }
    }

    pub async fn in_progress(&self) -> Vec<AssemblyProgress> {
        let inner = self.inner.lock().await;
        let mut out: Vec<AssemblyProgress> = inner
            .assemblies
            .iter()
            .map(|(id, a)| AssemblyProgress {
                id: id.clone(),
                kind: a.kind,
                source: a.source.clone(),
                received: a.sequence.received(),
                declared: a.sequence.declared_len().unwrap_or_default(),
            })
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }
}

fn abort(
    inner: &mut AssemblerInner,
    id: &ObjectId,
    peer: &PeerAddress,
    err: AssemblyError,
    events: &mut Vec<NetworkEvent>,
) -> AssemblyError {
    warn!(object = %id, peer = %peer, error = %err, "assembly aborted");
    inner.assemblies.remove(id);
    for waiter in inner.waiters.remove(id).unwrap_or_default() {
        let _ = waiter.send(Err(err.clone()));
    }
    events.push(NetworkEvent::AssemblyAborted {
        id: id.clone(),
        peer: peer.clone(),
        reason: err.to_string(),
    });
    err
}

fn discard_incomplete(
    inner: &mut AssemblerInner,
    id: &ObjectId,
    timed_out: bool,
    events: &mut Vec<NetworkEvent>,
) {
    let Some(assembly) = inner.assemblies.remove(id) else {
        return;
    };
    let received = assembly.sequence.received();
    let declared = assembly.sequence.declared_len().unwrap_or_default();
    let err = if timed_out {
        AssemblyError::Timeout { id: id.clone() }
    } else {
        AssemblyError::Incomplete {
            id: id.clone(),
            received,
            declared,
        }
    };
    warn!(
        object = %id, peer = %assembly.source, received, declared,
        "incomplete assembly discarded"
    );
    for waiter in inner.waiters.remove(id).unwrap_or_default() {
        let _ = waiter.send(Err(err.clone()));
    }
    events.push(NetworkEvent::AssemblyIncomplete {
        id: id.clone(),
        peer: assembly.source,
        received,
        declared,
    });
}
