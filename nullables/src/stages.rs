//! Test-only transform stages.

use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chainwire_network::{StageError, StreamDataEvent, TransformStage};

/// Passes events through unchanged after a deterministic pause.
///
/// The pause for each event comes from `schedule`, cycled in order, so a
/// test can make early events slower than later ones and check that the
/// stream still preserves order. The pause blocks the stream's worker
/// thread; use it on a multi-threaded runtime.
pub struct DelayStage<T> {
    schedule: Vec<Duration>,
    next: usize,
    _marker: PhantomData<fn(T) -> T>,
}

impl<T> DelayStage<T> {
    pub fn new(schedule: Vec<Duration>) -> Self {
        Self {
            schedule,
            next: 0,
            _marker: PhantomData,
        }
    }

    pub fn constant(delay: Duration) -> Self {
        Self::new(vec![delay])
    }
}

impl<T: Send + 'static> TransformStage for DelayStage<T> {
    type In = T;
    type Out = T;

    fn name(&self) -> &'static str {
        "delay"
    }

    fn transform(
        &mut self,
        event: StreamDataEvent<T>,
    ) -> Result<Vec<StreamDataEvent<T>>, StageError> {
        if !self.schedule.is_empty() {
            let delay = self.schedule[self.next % self.schedule.len()];
            self.next += 1;
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
        }
        Ok(vec![event])
    }
}

/// Records every event it sees, then passes it on.
pub struct RecordingStage<T> {
    seen: Arc<Mutex<Vec<T>>>,
}

impl<T> RecordingStage<T> {
    /// The stage plus a handle to read what it recorded.
    pub fn pair() -> (Self, Arc<Mutex<Vec<T>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                seen: Arc::clone(&seen),
            },
            seen,
        )
    }
}

impl<T: Clone + Send + 'static> TransformStage for RecordingStage<T> {
    type In = T;
    type Out = T;

    fn name(&self) -> &'static str {
        "recording"
    }

    fn transform(
        &mut self,
        event: StreamDataEvent<T>,
    ) -> Result<Vec<StreamDataEvent<T>>, StageError> {
        self.seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.data.clone());
        Ok(vec![event])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainwire_network::{PeerStream, StreamDirection};
    use chainwire_types::PeerAddress;
    use std::time::Instant;

    #[test]
    fn delay_follows_the_schedule() {
        let mut stage = DelayStage::new(vec![Duration::from_millis(20), Duration::ZERO]);
        let started = Instant::now();
        stage.transform(StreamDataEvent::new(1u8)).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert_eq!(stage.next, 1);
    }

    #[test]
    fn recording_stage_sees_everything_in_order() {
        let (recorder, seen) = RecordingStage::pair();
        let peer = PeerAddress::new("127.0.0.1", 1);
        let mut stream =
            PeerStream::<u32, u32>::new(peer, StreamDirection::Inbound).with_stage(recorder);
        for n in 0..4 {
            stream.process(StreamDataEvent::new(n)).unwrap();
        }
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3]);
    }
}
