//! Peer streams: an ordered chain of transform stages bound to one peer.
//!
//! A [`PeerStream`] is assembled synchronously with [`PeerStream::with_stage`]
//! and then [`opened`](PeerStream::open) onto a single worker task. The input
//! and output queues are bounded, so a consumer that stops reading
//! eventually suspends `send` instead of letting data pile up.

use std::fmt;

use chainwire_types::PeerAddress;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn, Instrument};

use crate::error::{StageError, StreamError};
use crate::stage::{StreamDataEvent, TransformStage};
use crate::tracing_spans::stream_span;

pub const DEFAULT_STREAM_BUFFER: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamDirection {
    /// Socket bytes towards handlers.
    Inbound,
    /// Handler messages towards the socket.
    Outbound,
}

impl fmt::Display for StreamDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inbound => f.write_str("inbound"),
            Self::Outbound => f.write_str("outbound"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamConfig {
    /// Capacity of the input and output queues, in events.
    pub buffer_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_STREAM_BUFFER,
        }
    }
}

type Pipeline<IN, OUT> =
    Box<dyn FnMut(StreamDataEvent<IN>) -> Result<Vec<StreamDataEvent<OUT>>, StageError> + Send>;

/// A typed pipeline from `IN` to `OUT`.
pub struct PeerStream<IN, OUT> {
    peer: PeerAddress,
    direction: StreamDirection,
    stages: Vec<&'static str>,
    pipeline: Pipeline<IN, OUT>,
}

impl<T: Send + 'static> PeerStream<T, T> {
    /// An empty stream that passes events through unchanged.
    pub fn new(peer: PeerAddress, direction: StreamDirection) -> Self {
        Self {
            peer,
            direction,
            stages: Vec::new(),
            pipeline: Box::new(|event| Ok(vec![event])),
        }
    }
}

impl<IN: Send + 'static, OUT: Send + 'static> PeerStream<IN, OUT> {
    /// Append a stage. Its input type must match the current output type.
    pub fn with_stage<S>(self, mut stage: S) -> PeerStream<IN, S::Out>
    where
        S: TransformStage<In = OUT>,
    {
        let mut stages = self.stages;
        stages.push(stage.name());
        let mut upstream = self.pipeline;
        PeerStream {
            peer: self.peer,
            direction: self.direction,
            stages,
            pipeline: Box::new(move |event| {
                let mut out = Vec::new();
                for mid in upstream(event)? {
                    out.extend(stage.transform(mid)?);
                }
                Ok(out)
            }),
        }
    }

    pub fn peer(&self) -> &PeerAddress {
        &self.peer
    }

    pub fn direction(&self) -> StreamDirection {
        self.direction
    }

    /// Stage names in registration order.
    pub fn stages(&self) -> &[&'static str] {
        &self.stages
    }

    /// Run one event through every stage inline.
    pub fn process(
        &mut self,
        event: StreamDataEvent<IN>,
    ) -> Result<Vec<StreamDataEvent<OUT>>, StreamError> {
        (self.pipeline)(event).map_err(|source| StreamError::Stage {
            peer: self.peer.clone(),
            source,
        })
    }

    /// Move the stream onto its own worker task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(self, config: &StreamConfig) -> OpenStream<IN, OUT> {
        let capacity = config.buffer_size.max(1);
        let (in_tx, mut in_rx) = mpsc::channel::<StreamDataEvent<IN>>(capacity);
        let (out_tx, out_rx) = mpsc::channel(capacity);
        let peer = self.peer.clone();
        let span = stream_span(&peer, self.direction, self.stages.len());
        let mut stream = self;

        let worker = tokio::spawn(
            async move {
                while let Some(event) = in_rx.recv().await {
                    match stream.process(event) {
                        Ok(outputs) => {
                            for output in outputs {
                                if out_tx.send(Ok(output)).await.is_err() {
                                    debug!("stream consumer gone");
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "stream failed");
                            let _ = out_tx.send(Err(e)).await;
                            return;
                        }
                    }
                }
                debug!("stream input closed");
            }
            .instrument(span),
        );

        OpenStream {
            sender: StreamSender {
                peer: peer.clone(),
                tx: in_tx,
            },
            receiver: StreamReceiver { rx: out_rx },
            worker,
        }
    }
}

/// A running stream: the feed side, the output side and the worker.
pub struct OpenStream<IN, OUT> {
    pub sender: StreamSender<IN>,
    pub receiver: StreamReceiver<OUT>,
    pub worker: JoinHandle<()>,
}

/// Feeds the first stage of an open stream.
pub struct StreamSender<IN> {
    peer: PeerAddress,
    tx: mpsc::Sender<StreamDataEvent<IN>>,
}

impl<IN> Clone for StreamSender<IN> {
    fn clone(&self) -> Self {
        Self {
            peer: self.peer.clone(),
            tx: self.tx.clone(),
        }
    }
}

impl<IN: Send + 'static> StreamSender<IN> {
    /// Enqueue one event, suspending while the stream is full.
    pub async fn send(&self, data: IN) -> Result<(), StreamError> {
        self.tx
            .send(StreamDataEvent::for_peer(data, self.peer.clone()))
            .await
            .map_err(|_| StreamError::Closed {
                peer: self.peer.clone(),
            })
    }

    /// Enqueue one event or report backpressure immediately.
    pub fn try_send(&self, data: IN) -> Result<(), StreamError> {
        self.tx
            .try_send(StreamDataEvent::for_peer(data, self.peer.clone()))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => StreamError::Backpressure {
                    peer: self.peer.clone(),
                },
                mpsc::error::TrySendError::Closed(_) => StreamError::Closed {
                    peer: self.peer.clone(),
                },
            })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Output of the last stage.
pub struct StreamReceiver<OUT> {
    rx: mpsc::Receiver<Result<StreamDataEvent<OUT>, StreamError>>,
}

impl<OUT> StreamReceiver<OUT> {
    /// `None` once the stream has ended. A stage failure is delivered once
    /// as `Some(Err(_))`, after which the stream ends.
    pub async fn recv(&mut self) -> Option<Result<StreamDataEvent<OUT>, StreamError>> {
        self.rx.recv().await
    }
}
