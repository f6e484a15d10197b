//! Handler registry and the task that feeds it from the event bus.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chainwire_types::{Lifecycle, ServiceState};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

use super::{Handler, HandlerAction, HandlerState};
use crate::bus::{EventBus, EventSubscription};
use crate::error::HandlerError;
use crate::event::NetworkEvent;
use crate::tracing_spans::handler_span;

struct HandlerEntry {
    handler: Arc<dyn Handler>,
    lifecycle: Lifecycle,
    state: watch::Sender<Arc<HandlerState>>,
}

/// Outcome of dispatching one event to every running handler.
#[derive(Debug, Default)]
pub struct Dispatch {
    pub actions: Vec<HandlerAction>,
    /// `HandlerStateChanged` and `HandlerFailed` events to publish.
    pub events: Vec<NetworkEvent>,
}

/// Named handlers with their life-cycle and latest snapshot.
///
/// Handlers are dispatched in attach order. A handler that returns an error
/// or panics moves to [`ServiceState::Error`] and receives nothing further
/// until [`HandlerRegistry::restart`].
#[derive(Default)]
pub struct HandlerRegistry {
    entries: Vec<HandlerEntry>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach and start a handler at its initial state.
    pub fn attach(
        &mut self,
        handler: Arc<dyn Handler>,
    ) -> Result<watch::Receiver<Arc<HandlerState>>, HandlerError> {
        let name = handler.name().to_string();
        if self.position(&name).is_some() {
            return Err(HandlerError::Duplicate(name));
        }
        let mut lifecycle = Lifecycle::new();
        lifecycle.begin_start()?;
        let (state, rx) = watch::channel(Arc::new(handler.initial_state()));
        lifecycle.mark_running()?;
        debug!(handler = %name, "handler attached");
        self.entries.push(HandlerEntry {
            handler,
            lifecycle,
            state,
        });
        Ok(rx)
    }

    /// Detach a handler, discarding its state.
    pub fn detach(&mut self, name: &str) -> Result<(), HandlerError> {
        let idx = self
            .position(name)
            .ok_or_else(|| HandlerError::NotFound(name.to_string()))?;
        let mut entry = self.entries.remove(idx);
        entry.lifecycle.destroy();
        debug!(handler = %name, "handler detached");
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.handler.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self, name: &str) -> Option<Arc<HandlerState>> {
        self.entry(name).map(|e| e.state.borrow().clone())
    }

    /// A receiver that always holds the latest snapshot.
    pub fn watch(&self, name: &str) -> Option<watch::Receiver<Arc<HandlerState>>> {
        self.entry(name).map(|e| e.state.subscribe())
    }

    pub fn service_state(&self, name: &str) -> Option<ServiceState> {
        self.entry(name).map(|e| e.lifecycle.state())
    }

    pub fn pause(&mut self, name: &str) -> Result<(), HandlerError> {
        self.entry_mut(name)?.lifecycle.pause()?;
        Ok(())
    }

    pub fn resume(&mut self, name: &str) -> Result<(), HandlerError> {
        self.entry_mut(name)?.lifecycle.resume()?;
        Ok(())
    }

    /// Start a handler again from its initial state. Allowed from ERROR and
    /// STOPPED; a running handler is left untouched.
    ///
    /// Returns the new snapshot when the handler was restarted.
    pub fn restart(&mut self, name: &str) -> Result<Option<Arc<HandlerState>>, HandlerError> {
        let entry = self.entry_mut(name)?;
        if !entry.lifecycle.begin_start()? {
            return Ok(None);
        }
        let fresh = Arc::new(entry.handler.initial_state());
        entry.state.send_replace(Arc::clone(&fresh));
        entry.lifecycle.mark_running()?;
        info!(handler = %name, "handler restarted");
        Ok(Some(fresh))
    }

    /// Stop every handler. Snapshots stay readable.
    pub fn stop_all(&mut self) {
        for entry in &mut self.entries {
            if let Ok(true) = entry.lifecycle.begin_stop() {
                let _ = entry.lifecycle.mark_stopped();
            }
        }
    }

    /// Run `event` through every running handler.
    pub fn dispatch(&mut self, event: &NetworkEvent) -> Dispatch {
        let mut out = Dispatch::default();
        if event.is_handler_output() {
            return out;
        }
        for entry in &mut self.entries {
            if !entry.lifecycle.is_running() {
                continue;
            }
            let name = entry.handler.name().to_string();
            let current = entry.state.borrow().clone();
            let handler = &entry.handler;
            let result = catch_unwind(AssertUnwindSafe(|| handler.on_event(&current, event)));

            let error = match result {
                Ok(Ok(transition)) => {
                    if let Some(next) = transition.state {
                        if next != *current {
                            let next = Arc::new(next);
                            entry.state.send_replace(Arc::clone(&next));
                            out.events.push(NetworkEvent::HandlerStateChanged {
                                handler: name.clone(),
                                state: next,
                            });
                        }
                    }
                    out.actions.extend(transition.actions);
                    continue;
                }
                Ok(Err(e)) => e,
                Err(_) => HandlerError::Panicked(name.clone()),
            };

            warn!(handler = %name, event = event.tag(), error = %error, "handler failed");
            entry.lifecycle.fail();
            out.events.push(NetworkEvent::HandlerFailed {
                handler: name,
                error: error.to_string(),
            });
        }
        out
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.handler.name() == name)
    }

    fn entry(&self, name: &str) -> Option<&HandlerEntry> {
        self.entries.iter().find(|e| e.handler.name() == name)
    }

    fn entry_mut(&mut self, name: &str) -> Result<&mut HandlerEntry, HandlerError> {
        self.entries
            .iter_mut()
            .find(|e| e.handler.name() == name)
            .ok_or_else(|| HandlerError::NotFound(name.to_string()))
    }
}

/// Feed bus events to the registry until the subscription ends.
///
/// State changes are published back on the bus, skipping the runner's own
/// subscription. `Publish` actions are also dispatched locally so handlers
/// see each other's events in order. All other actions go to `actions`.
pub fn spawn_handler_runner(
    registry: Arc<Mutex<HandlerRegistry>>,
    bus: EventBus,
    mut subscription: EventSubscription,
    actions: mpsc::Sender<HandlerAction>,
) -> JoinHandle<()> {
    let me = subscription.id();
    tokio::spawn(
        async move {
            while let Some(event) = subscription.recv().await {
                if event.is_handler_output() {
                    continue;
                }
                let mut queue = VecDeque::from([event]);
                while let Some(event) = queue.pop_front() {
                    let dispatch = registry.lock().await.dispatch(&event);
                    for ev in dispatch.events {
                        bus.publish_except(me, ev).await;
                    }
                    for action in dispatch.actions {
                        match action {
                            HandlerAction::Publish(ev) => {
                                queue.push_back(ev.clone());
                                bus.publish_except(me, ev).await;
                            }
                            other => {
                                if actions.send(other).await.is_err() {
                                    debug!("action executor gone, handler runner stopping");
                                    return;
                                }
                            }
                        }
                    }
                }
            }
            debug!("handler runner stopped");
        }
        .instrument(handler_span("runner")),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{NetworkHandler, Transition};
    use crate::event::{ConnectionDirection, ConnectionState};
    use chainwire_types::PeerAddress;

    struct Exploding;

    impl Handler for Exploding {
        fn name(&self) -> &str {
            "exploding"
        }

        fn initial_state(&self) -> HandlerState {
            HandlerState::Network(Default::default())
        }

        fn on_event(
            &self,
            _: &HandlerState,
            event: &NetworkEvent,
        ) -> Result<Transition, HandlerError> {
            match event {
                NetworkEvent::Tick { .. } => panic!("boom"),
                _ => Err(HandlerError::Failed {
                    handler: "exploding".into(),
                    reason: "bad event".into(),
                }),
            }
        }
    }

    fn connected(port: u16) -> NetworkEvent {
        NetworkEvent::ConnectionStateChanged {
            peer: PeerAddress::new("10.0.0.1", port),
            direction: ConnectionDirection::Outbound,
            state: ConnectionState::Connected,
        }
    }

    fn registry_with_network() -> HandlerRegistry {
        let mut reg = HandlerRegistry::new();
        reg.attach(Arc::new(NetworkHandler::new(Default::default()))).unwrap();
        reg
    }

    #[test]
    fn duplicate_attach_is_rejected() {
        let mut reg = registry_with_network();
        let err = reg.attach(Arc::new(NetworkHandler::new(Default::default()))).unwrap_err();
        assert_eq!(err, HandlerError::Duplicate("network".into()));
    }

    #[test]
    fn failing_handler_does_not_block_others() {
        let mut reg = HandlerRegistry::new();
        reg.attach(Arc::new(Exploding)).unwrap();
        reg.attach(Arc::new(NetworkHandler::new(Default::default()))).unwrap();

        let out = reg.dispatch(&connected(1));

        assert_eq!(reg.service_state("exploding"), Some(ServiceState::Error));
        assert_eq!(reg.service_state("network"), Some(ServiceState::Running));
        assert!(out
            .events
            .iter()
            .any(|e| matches!(
                e,
                NetworkEvent::HandlerFailed { handler, .. } if handler == "exploding"
            )));
        assert!(out
            .events
            .iter()
            .any(|e| matches!(
                e,
                NetworkEvent::HandlerStateChanged { handler, .. } if handler == "network"
            )));
    }

    #[test]
    fn panicking_handler_is_isolated() {
        let mut reg = HandlerRegistry::new();
        reg.attach(Arc::new(Exploding)).unwrap();
        let out = reg.dispatch(&NetworkEvent::Tick { now_secs: 1 });
        assert_eq!(reg.service_state("exploding"), Some(ServiceState::Error));
        assert_eq!(out.events.len(), 1);
    }

    #[test]
    fn errored_handler_is_skipped_until_restart() {
        let mut reg = HandlerRegistry::new();
        reg.attach(Arc::new(Exploding)).unwrap();
        reg.dispatch(&connected(1));
        assert!(reg.dispatch(&connected(2)).events.is_empty());

        assert!(reg.restart("exploding").unwrap().is_some());
        assert_eq!(reg.service_state("exploding"), Some(ServiceState::Running));
        assert_eq!(reg.dispatch(&connected(3)).events.len(), 1);
    }

    #[test]
    fn restart_of_running_handler_is_noop() {
        let mut reg = registry_with_network();
        assert_eq!(reg.restart("network").unwrap(), None);
    }

    #[test]
    fn paused_handler_receives_nothing() {
        let mut reg = registry_with_network();
        reg.pause("network").unwrap();
        assert!(reg.dispatch(&connected(1)).events.is_empty());
        reg.resume("network").unwrap();
        assert_eq!(reg.dispatch(&connected(1)).events.len(), 1);
    }

    #[test]
    fn each_transition_publishes_one_new_snapshot() {
        let mut reg = registry_with_network();
        let rx = reg.watch("network").unwrap();
        let mut seen = vec![rx.borrow().clone()];
        for port in 1..=5 {
            let out = reg.dispatch(&connected(port));
            assert_eq!(out.events.len(), 1);
            let snap = reg.snapshot("network").unwrap();
            assert!(seen.iter().all(|s| !Arc::ptr_eq(s, &snap)));
            seen.push(snap);
        }
        assert_eq!(seen.len(), 6);
        match &**rx.borrow() {
            HandlerState::Network(s) => assert_eq!(s.active_count(), 5),
            other => panic!("unexpected {other:?}"),
        };
    }

    #[test]
    fn detach_removes_handler() {
        let mut reg = registry_with_network();
        reg.detach("network").unwrap();
        assert!(reg.is_empty());
        assert!(matches!(reg.detach("network"), Err(HandlerError::NotFound(_))));
    }

    #[tokio::test]
    async fn runner_publishes_state_changes() {
        let bus = EventBus::default();
        let registry = Arc::new(Mutex::new(registry_with_network()));
        let mut observer = bus.subscribe("observer");
        let (tx, _rx) = mpsc::channel(16);
        let runner = spawn_handler_runner(registry, bus.clone(), bus.subscribe("handlers"), tx);

        bus.publish(connected(9)).await;

        loop {
            match observer.recv().await {
                Some(NetworkEvent::HandlerStateChanged { handler, state }) => {
                    assert_eq!(handler, "network");
                    assert!(matches!(&*state, HandlerState::Network(s) if s.active_count() == 1));
                    break;
                }
                Some(_) => continue,
                None => panic!("bus closed"),
            }
        }
        runner.abort();
    }
}
