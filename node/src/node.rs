//! The chainwire node: wires connections, handlers, the event bus and the
//! big-object assembler together and drives them from a tick timer.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, Instrument};

use chainwire_network::handler::{default_handlers, spawn_handler_runner};
use chainwire_network::{
    EventBus, HandlerAction, HandlerRegistry, HandlerState, InboundEvent, NetworkEvent,
};
use chainwire_store::ObjectStore;
use chainwire_types::{Lifecycle, Service, ServiceState};

use crate::config::NodeConfig;
use crate::connection_manager::{is_backpressure, spawn_dispatcher, ConnectionManager};
use crate::context::NodeContext;
use crate::metrics::NodeMetrics;
use crate::shutdown::{shutdown_signalled, ShutdownController};
use crate::NodeError;

/// Bound on handler actions waiting for execution.
const ACTION_QUEUE: usize = 1024;

/// Actions that may wait (dials, disconnects) the executor runs at once.
const MAX_PENDING_ACTIONS: usize = 16;

pub struct Node {
    ctx: Arc<NodeContext>,
    manager: Arc<ConnectionManager>,
    inbound_rx: Option<mpsc::Receiver<InboundEvent>>,
    registry: Arc<Mutex<HandlerRegistry>>,
    snapshots: HashMap<String, watch::Receiver<Arc<HandlerState>>>,
    lifecycle: Lifecycle,
    shutdown: ShutdownController,
    tasks: Vec<JoinHandle<()>>,
    listen_addr: Option<SocketAddr>,
}

impl Node {
    pub fn new(config: NodeConfig, store: Arc<dyn ObjectStore>) -> Result<Self, NodeError> {
        Self::with_context(NodeContext::new(config, store)?)
    }

    /// Build a node over a prepared context, e.g. one with a test clock.
    pub fn with_context(ctx: NodeContext) -> Result<Self, NodeError> {
        let config = &ctx.config;
        let handlers = default_handlers(
            Arc::new(config.basic_config()?),
            config.blacklist_config(),
            config.discovery_config()?,
            config.keepalive_config(),
        );
        let mut registry = HandlerRegistry::new();
        let mut snapshots = HashMap::new();
        for handler in handlers {
            let name = handler.name().to_string();
            snapshots.insert(name, registry.attach(handler)?);
        }

        let ctx = Arc::new(ctx);
        let (manager, inbound_rx) = ConnectionManager::new(Arc::clone(&ctx));
        Ok(Self {
            ctx,
            manager,
            inbound_rx: Some(inbound_rx),
            registry: Arc::new(Mutex::new(registry)),
            snapshots,
            lifecycle: Lifecycle::new(),
            shutdown: ShutdownController::new(),
            tasks: Vec::new(),
            listen_addr: None,
        })
    }

    /// Start every background task. Idempotent while running.
    pub async fn start(&mut self) -> Result<(), NodeError> {
        if !self.lifecycle.begin_start()? {
            return Ok(());
        }
        let config = &self.ctx.config;
        info!(
            network = config.network.as_str(),
            port = config.port,
            server_mode = config.server_mode,
            "chainwire node starting"
        );

        if let Err(e) = self.spawn_tasks().await {
            self.abort_tasks();
            self.lifecycle.fail();
            return Err(e);
        }
        self.lifecycle.mark_running()?;

        if self.ctx.config.auto_connect {
            self.ctx.bus.publish(NetworkEvent::StartConnecting).await;
        }
        info!("chainwire node running");
        Ok(())
    }

    async fn spawn_tasks(&mut self) -> Result<(), NodeError> {
        self.ctx.store.start()?;
        {
            let mut registry = self.registry.lock().await;
            for name in registry.names() {
                registry.restart(&name)?;
            }
        }

        self.shutdown = ShutdownController::new();
        let inbound_rx = match self.inbound_rx.take() {
            Some(rx) => rx,
            None => {
                let (manager, rx) = ConnectionManager::new(Arc::clone(&self.ctx));
                self.manager = manager;
                rx
            }
        };
        self.tasks
            .push(spawn_dispatcher(Arc::clone(&self.manager), inbound_rx));

        let (action_tx, action_rx) = mpsc::channel(ACTION_QUEUE);
        let subscription = self.ctx.bus.subscribe("handlers");
        self.tasks.push(spawn_handler_runner(
            Arc::clone(&self.registry),
            self.ctx.bus.clone(),
            subscription,
            action_tx,
        ));
        self.tasks
            .push(spawn_action_executor(Arc::clone(&self.manager), action_rx));
        self.tasks.push(spawn_ticker(
            Arc::clone(&self.ctx),
            self.shutdown.subscribe(),
        ));
        if self.ctx.config.enable_metrics {
            self.tasks.push(spawn_metrics_observer(
                &self.ctx.bus,
                Arc::clone(&self.ctx.metrics),
            ));
        }

        if self.ctx.config.server_mode {
            let (addr, task) = self
                .manager
                .listen(self.ctx.config.port, self.shutdown.subscribe())
                .await?;
            self.listen_addr = Some(addr);
            self.tasks.push(task);
        }
        Ok(())
    }

    /// Close every connection and stop background tasks. Configuration,
    /// handler snapshots and stored objects are kept.
    pub async fn stop(&mut self) -> Result<(), NodeError> {
        if !self.lifecycle.begin_stop()? {
            return Ok(());
        }
        info!("chainwire node stopping");
        self.ctx.bus.publish(NetworkEvent::StopConnecting).await;
        self.shutdown.shutdown();
        self.manager.close_all("node stopping").await;
        self.join_tasks().await;
        self.registry.lock().await.stop_all();
        self.listen_addr = None;
        self.ctx.store.stop()?;
        self.lifecycle.mark_stopped()?;
        info!("chainwire node stopped");
        Ok(())
    }

    /// Stop and release everything. The node cannot be started again.
    pub async fn destroy(&mut self) -> Result<(), NodeError> {
        if self.lifecycle.state() == ServiceState::Destroyed {
            return Ok(());
        }
        if self.lifecycle.is_running() || self.lifecycle.state() == ServiceState::Paused {
            self.stop().await?;
        }
        self.abort_tasks();
        self.ctx.store.destroy()?;
        self.lifecycle.destroy();
        Ok(())
    }

    fn abort_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    /// Abort every background task and wait until each has finished.
    async fn join_tasks(&mut self) {
        let tasks: Vec<_> = self.tasks.drain(..).collect();
        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            let _ = task.await;
        }
    }

    pub fn context(&self) -> &Arc<NodeContext> {
        &self.ctx
    }

    pub fn bus(&self) -> &EventBus {
        &self.ctx.bus
    }

    pub fn metrics(&self) -> &Arc<NodeMetrics> {
        &self.ctx.metrics
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Address the listener is bound to while running in server mode.
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        self.listen_addr
    }

    /// Latest snapshot of a handler's state.
    pub fn handler_snapshot(&self, name: &str) -> Option<Arc<HandlerState>> {
        self.snapshots.get(name).map(|rx| rx.borrow().clone())
    }

    /// A receiver that observes every snapshot a handler publishes.
    pub fn watch_handler(&self, name: &str) -> Option<watch::Receiver<Arc<HandlerState>>> {
        self.snapshots.get(name).cloned()
    }

    pub async fn handler_state(&self, name: &str) -> Option<ServiceState> {
        self.registry.lock().await.service_state(name)
    }

    /// Stop delivering events to a handler; its snapshot is kept.
    pub async fn pause_handler(&self, name: &str) -> Result<(), NodeError> {
        Ok(self.registry.lock().await.pause(name)?)
    }

    pub async fn resume_handler(&self, name: &str) -> Result<(), NodeError> {
        Ok(self.registry.lock().await.resume(name)?)
    }

    /// Bring a failed handler back at its initial state.
    pub async fn restart_handler(&self, name: &str) -> Result<bool, NodeError> {
        let fresh = self.registry.lock().await.restart(name)?;
        let Some(state) = fresh else {
            return Ok(false);
        };
        self.ctx
            .bus
            .publish(NetworkEvent::HandlerStateChanged {
                handler: name.to_string(),
                state,
            })
            .await;
        Ok(true)
    }
}

impl Service for Node {
    fn service_name(&self) -> &str {
        "node"
    }

    fn service_state(&self) -> ServiceState {
        self.lifecycle.state()
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

/// Execute handler actions.
///
/// Sends are queued inline with `try_send`, so a peer that stops reading
/// costs one dropped message instead of a parked task. Everything that may
/// wait (dials, disconnects, tearing down a stalled peer) runs on a bounded
/// set of tasks owned by the executor: aborting the executor cancels them.
fn spawn_action_executor(
    manager: Arc<ConnectionManager>,
    mut actions: mpsc::Receiver<HandlerAction>,
) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            let mut pending = JoinSet::new();
            loop {
                let action = tokio::select! {
                    Some(_) = pending.join_next(), if !pending.is_empty() => continue,
                    action = actions.recv() => match action {
                        Some(action) => action,
                        None => break,
                    },
                };
                match action {
                    HandlerAction::Send { peer, message } => {
                        match manager.try_send(&peer, message).await {
                            Ok(()) => {}
                            Err(e) if is_backpressure(&e) => {
                                let manager = Arc::clone(&manager);
                                let error = e.to_string();
                                reserve(&mut pending).await;
                                pending.spawn(async move {
                                    manager.drop_stalled(&peer, error).await
                                });
                            }
                            Err(e) => debug!(%peer, error = %e, "handler send failed"),
                        }
                    }
                    HandlerAction::Connect(addr) if pending.len() >= MAX_PENDING_ACTIONS => {
                        debug!(peer = %addr, "too many actions in flight, connect skipped");
                    }
                    action => {
                        reserve(&mut pending).await;
                        let manager = Arc::clone(&manager);
                        pending.spawn(async move { manager.execute(action).await });
                    }
                }
            }
            pending.shutdown().await;
            debug!("action executor stopped");
        }
        .instrument(tracing::info_span!("actions")),
    )
}

/// Wait until the executor's task set has room for one more.
async fn reserve(pending: &mut JoinSet<()>) {
    while pending.len() >= MAX_PENDING_ACTIONS {
        if pending.join_next().await.is_none() {
            break;
        }
    }
}

/// Publish `Tick` on every interval and expire stale assemblies.
fn spawn_ticker(
    ctx: Arc<NodeContext>,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            let mut interval = tokio::time::interval(ctx.config.tick_interval());
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown_signalled(&mut shutdown) => break,
                    _ = interval.tick() => {
                        let now_secs = ctx.clock.now_secs();
                        ctx.bus.publish(NetworkEvent::Tick { now_secs }).await;
                        let expired = ctx.assembler.expire_stale().await;
                        if !expired.is_empty() {
                            debug!(count = expired.len(), "expired stale assemblies");
                        }
                    }
                }
            }
            debug!("ticker stopped");
        }
        .instrument(tracing::info_span!("ticker")),
    )
}

fn spawn_metrics_observer(bus: &EventBus, metrics: Arc<NodeMetrics>) -> JoinHandle<()> {
    let mut subscription = bus.subscribe("metrics");
    tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            metrics.observe(&event);
        }
    })
}
