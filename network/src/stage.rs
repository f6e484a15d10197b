//! Transform stages: the unit of composition for peer streams.

use chainwire_types::PeerAddress;

use crate::error::StageError;

/// A datum flowing through a stream, tagged with the peer it belongs to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamDataEvent<T> {
    pub data: T,
    pub peer: Option<PeerAddress>,
}

impl<T> StreamDataEvent<T> {
    pub fn new(data: T) -> Self {
        Self { data, peer: None }
    }

    pub fn for_peer(data: T, peer: PeerAddress) -> Self {
        Self {
            data,
            peer: Some(peer),
        }
    }

    /// Replace the payload, keeping the peer tag.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> StreamDataEvent<U> {
        StreamDataEvent {
            data: f(self.data),
            peer: self.peer,
        }
    }
}

/// One step of a stream pipeline.
///
/// A stage may emit zero, one or many outputs per input. Returning an error
/// fails the whole stream; stages that want to drop bad input silently
/// return an empty vector instead.
pub trait TransformStage: Send + 'static {
    type In: Send + 'static;
    type Out: Send + 'static;

    fn name(&self) -> &'static str;

    fn transform(
        &mut self,
        event: StreamDataEvent<Self::In>,
    ) -> Result<Vec<StreamDataEvent<Self::Out>>, StageError>;
}

/// Stage backed by a closure.
pub struct FnStage<I, O, F> {
    name: &'static str,
    f: F,
    _marker: std::marker::PhantomData<fn(I) -> O>,
}

/// Build a stage from a closure mapping one input to any number of outputs.
pub fn stage_fn<I, O, F>(name: &'static str, f: F) -> FnStage<I, O, F>
where
    F: FnMut(StreamDataEvent<I>) -> Result<Vec<StreamDataEvent<O>>, StageError> + Send + 'static,
{
    FnStage {
        name,
        f,
        _marker: std::marker::PhantomData,
    }
}

impl<I, O, F> TransformStage for FnStage<I, O, F>
where
    I: Send + 'static,
    O: Send + 'static,
    F: FnMut(StreamDataEvent<I>) -> Result<Vec<StreamDataEvent<O>>, StageError> + Send + 'static,
{
    type In = I;
    type Out = O;

    fn name(&self) -> &'static str {
        self.name
    }

    fn transform(
        &mut self,
        event: StreamDataEvent<I>,
    ) -> Result<Vec<StreamDataEvent<O>>, StageError> {
        (self.f)(event)
    }
}
