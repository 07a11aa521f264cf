//! The live client — transport selection, lifecycle, dispatch, commands.
//!
//! All mutable state sits behind one lock in [`Inner`]. Handlers are never
//! called with a lock held: every dispatch first snapshots the registry, then
//! releases it, then invokes the handlers in registration order. Handlers may
//! therefore call back into the client (send commands, register or remove
//! handlers, close it).
//!
//! Socket tasks, relay callbacks, and timers hold a `Weak` reference to the
//! client, so dropping the last [`LiveClient`] handle lets everything wind
//! down.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use boardsync_protocol::{
    ChangeKind, Command, Entity, InboundMessage, PluginStatuses, ProtocolError, RemoteConfig,
};
use boardsync_transport::{
    EventSink, RelayClient, SocketEvent, SocketHandle, SocketId, TransportError, socket_url,
};
use parking_lot::{Mutex, MutexGuard};
use semver::Version;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::registry::{
    AppVersionHandler, ChangeHandler, ConfigChangeHandler, ErrorHandler, HandlerRegistries,
    ReconnectHandler, StateChangeHandler,
};
use crate::state::{ClientState, EmbeddedRelay, LifecycleState, Transport};
use crate::version::VersionChange;

struct Inner {
    config: ClientConfig,
    runtime: Handle,
    state: Mutex<ClientState>,
    handlers: Mutex<HandlerRegistries>,
    next_socket_id: AtomicU64,
}

/// Handle to a live update client. Clones share the same client.
#[derive(Clone)]
pub struct LiveClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for LiveClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveClient")
            .field("state", &self.state())
            .field("embedded", &self.is_embedded())
            .finish()
    }
}

/// What a command turns into once the transport is known.
enum Outbound {
    Relay(Arc<dyn RelayClient>, String),
    Sent,
    Failed(TransportError),
    NoTransport,
}

fn upgrade(weak: &Weak<Inner>) -> Option<LiveClient> {
    weak.upgrade().map(|inner| LiveClient { inner })
}

impl LiveClient {
    /// Create a client bound to the current tokio runtime.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let runtime = Handle::try_current().map_err(|_| ClientError::NoRuntime)?;
        Ok(Self::with_runtime(config, runtime))
    }

    /// Create a client whose timers and socket tasks run on `runtime`.
    pub fn with_runtime(config: ClientConfig, runtime: Handle) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                runtime,
                state: Mutex::new(ClientState::new()),
                handlers: Mutex::new(HandlerRegistries::default()),
                next_socket_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.lock_state().lifecycle
    }

    pub fn is_embedded(&self) -> bool {
        self.lock_state().embedded().is_some()
    }

    /// Whether commands currently have somewhere to go.
    pub fn has_transport(&self) -> bool {
        self.lock_state().has_transport()
    }

    fn lock_state(&self) -> MutexGuard<'_, ClientState> {
        self.inner.state.lock()
    }

    fn downgrade(&self) -> Weak<Inner> {
        Arc::downgrade(&self.inner)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Transport selection
    // ─────────────────────────────────────────────────────────────────────

    /// Switch this client permanently to embedded mode.
    ///
    /// Must be called before [`open`](Self::open) and at most once. Outbound
    /// actions are prefixed with `custom_<plugin_id>_`; `version` is the
    /// version this client was built as, compared against plugin status
    /// broadcasts.
    pub fn initialize_embedded(
        &self,
        plugin_id: &str,
        version: &str,
        relay: Arc<dyn RelayClient>,
    ) -> Result<(), ClientError> {
        let version = Version::parse(version).map_err(|source| ClientError::InvalidVersion {
            version: version.to_string(),
            source,
        })?;

        let mut state = self.lock_state();
        if state.transport.is_some() {
            return Err(ClientError::AlreadyInitialized);
        }
        info!("Live client embedded as plugin {plugin_id} v{version}");
        state.transport = Some(Transport::Embedded(EmbeddedRelay::new(plugin_id, version, relay)));
        Ok(())
    }

    /// Start the live channel.
    ///
    /// Embedded: registers lifecycle callbacks on the relay. Standalone:
    /// connects a new socket to the configured server. Expected to be called
    /// once; a second standalone call replaces the socket and the old one's
    /// events are ignored.
    pub fn open(&self) -> Result<(), ClientError> {
        let relay = {
            let mut state = self.lock_state();
            state.closed = false;
            state.embedded().map(|e| e.relay.clone())
        };
        match relay {
            Some(relay) => {
                self.attach_relay(relay.as_ref());
                Ok(())
            }
            None => self.open_socket(),
        }
    }

    /// Tear down the live channel.
    ///
    /// Detaches the socket so its close does not trigger a reconnect, cancels
    /// pending timers and buffered updates, and clears state-change,
    /// reconnect, error and change handlers. Config-change handlers are kept.
    /// In embedded mode the relay's connection is left alone.
    pub fn close(&self) {
        let socket = {
            let mut state = self.lock_state();
            let socket = match state.transport.as_mut() {
                None | Some(Transport::Standalone(None)) => return,
                Some(Transport::Standalone(slot)) => slot.take(),
                Some(Transport::Embedded(_)) => None,
            };
            state.cancel_timers();
            state.closed = true;
            state.lifecycle = LifecycleState::Close;
            socket
        };

        self.inner.handlers.lock().clear_connection_handlers();

        if let Some(socket) = socket {
            let id = socket.id();
            if let Err(e) = socket.close() {
                debug!("Unable to close socket {id}: {e}");
            }
        }
        info!("Live client closed");
    }

    // ─────────────────────────────────────────────────────────────────────
    // Standalone mode
    // ─────────────────────────────────────────────────────────────────────

    fn open_socket(&self) -> Result<(), ClientError> {
        let base = self
            .inner
            .config
            .server_url
            .as_deref()
            .ok_or(ClientError::NoServerAddress)?;
        let url = socket_url(base)?;

        let weak = self.downgrade();
        let sink: EventSink = Arc::new(move |id, event| {
            if let Some(client) = upgrade(&weak) {
                client.handle_socket_event(id, event);
            }
        });

        let id = self.inner.next_socket_id.fetch_add(1, Ordering::Relaxed);
        info!("Opening socket {id} to {url}");

        // Install the handle before the task can report anything.
        let mut state = self.lock_state();
        let socket = SocketHandle::connect(id, url, sink, &self.inner.runtime);
        state.transport = Some(Transport::Standalone(Some(socket)));
        Ok(())
    }

    fn handle_socket_event(&self, id: SocketId, event: SocketEvent) {
        if let SocketEvent::Error(e) = &event {
            self.dispatch_error(e);
            return;
        }

        if self.lock_state().active_socket_id() != Some(id) {
            debug!("Ignoring {event:?} from inactive socket {id}");
            return;
        }

        match event {
            SocketEvent::Open => self.set_state(LifecycleState::Open),
            SocketEvent::Message(text) => self.handle_frame(&text),
            SocketEvent::Closed => self.socket_closed(id),
            SocketEvent::Error(_) => {}
        }
    }

    fn socket_closed(&self, id: SocketId) {
        self.set_state(LifecycleState::Close);

        // A state handler may have closed the client or replaced the socket.
        let mut state = self.lock_state();
        if state.closed || state.active_socket_id() != Some(id) {
            debug!("Socket {id} detached, not reconnecting");
            return;
        }

        let delay = self.inner.config.reconnect_delay;
        info!("Reconnecting in {}ms", delay.as_millis());

        let weak = self.downgrade();
        let timer = self.inner.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(client) = upgrade(&weak) {
                client.reopen_socket();
            }
        });
        if let Some(previous) = state.reconnect_timer.replace(timer) {
            previous.abort();
        }
    }

    fn reopen_socket(&self) {
        {
            let mut state = self.lock_state();
            state.reconnect_timer = None;
            if state.closed {
                return;
            }
        }
        if let Err(e) = self.open_socket() {
            error!("Reconnect failed: {e}");
        }
        self.dispatch_reconnect();
    }

    fn handle_frame(&self, text: &str) {
        match InboundMessage::from_frame(text) {
            Ok(message) => self.route_update(message),
            Err(ProtocolError::Remote(e)) => warn!("Server reported error: {e}"),
            Err(e) => warn!("Dropping frame: {e}"),
        }
    }

    /// Only block and category updates are routed here. Config and plugin
    /// status messages reach the client through the host relay entry points.
    fn route_update(&self, message: InboundMessage) {
        let action = message.action.clone();
        match message.into_change() {
            Ok(Some((kind, entity))) => self.enqueue(kind, entity),
            Ok(None) => warn!("Unexpected action: {}", action.as_deref().unwrap_or("<none>")),
            Err(e) => warn!("Dropping update: {e}"),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Embedded mode
    // ─────────────────────────────────────────────────────────────────────

    fn attach_relay(&self, relay: &dyn RelayClient) {
        let weak = self.downgrade();
        relay.set_first_connect_callback(Box::new(move || {
            if let Some(client) = upgrade(&weak) {
                client.set_state(LifecycleState::Open);
            }
        }));

        let weak = self.downgrade();
        relay.set_reconnect_callback(Box::new(move || {
            if let Some(client) = upgrade(&weak) {
                client.reconnect_embedded();
            }
        }));

        let weak = self.downgrade();
        relay.set_error_callback(Box::new(move |e| {
            if let Some(client) = upgrade(&weak) {
                client.dispatch_error(&e);
            }
        }));

        let weak = self.downgrade();
        relay.set_close_callback(Box::new(move |connect_fail_count| {
            if let Some(client) = upgrade(&weak) {
                client.relay_closed(connect_fail_count);
            }
        }));

        debug!("Relay callbacks attached");
    }

    /// Mark the connection open and tell reconnect subscribers to
    /// resubscribe. Also stops the ready-state poll if it is running.
    fn reconnect_embedded(&self) {
        if let Some(poll) = self.lock_state().poll_task.take() {
            poll.abort();
        }
        self.set_state(LifecycleState::Open);
        self.dispatch_reconnect();
    }

    fn relay_closed(&self, connect_fail_count: u32) {
        debug!("Relay closed (connect failures: {connect_fail_count})");
        self.set_state(LifecycleState::Close);
        self.start_ready_poll();
    }

    /// The relay has no reconnect signal of its own after a close, so poll
    /// its ready state until it reads open. At most one poll runs.
    fn start_ready_poll(&self) {
        let mut state = self.lock_state();
        if state.closed || state.poll_task.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let weak = self.downgrade();
        let period = self.inner.config.poll_interval;
        debug!("Polling relay ready state every {}ms", period.as_millis());

        state.poll_task = Some(self.inner.runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(client) = upgrade(&weak) else { return };
                if client.relay_ready() {
                    client.reconnect_embedded();
                    debug!("Relay ready, poll stopped");
                    return;
                }
            }
        }));
    }

    fn relay_ready(&self) -> bool {
        let relay = self.lock_state().embedded().map(|e| e.relay.clone());
        relay.is_some_and(|r| r.ready_state().is_open())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Host relay entry points
    // ─────────────────────────────────────────────────────────────────────

    /// Feed a block or category update forwarded by the host relay.
    pub fn handle_update(&self, message: InboundMessage) {
        if let Some(e) = &message.error {
            warn!("Server reported error: {e}");
            return;
        }
        self.route_update(message);
    }

    /// Deliver a remote configuration change to config-change subscribers.
    pub fn handle_client_config(&self, config: &RemoteConfig) {
        let handlers = self.inner.handlers.lock().config_change.snapshot();
        for handler in handlers {
            handler(self, config);
        }
    }

    /// Inspect a plugin status broadcast for this client's plugin.
    ///
    /// A strictly newer version fires the app-version hook with `true`. A
    /// newer or equal version means the server has (re)registered its
    /// handlers, so a reconnect is scheduled to renew subscriptions. Ignored
    /// in standalone mode.
    pub fn handle_plugin_statuses(&self, statuses: &PluginStatuses) {
        let Some((plugin_id, local)) = self
            .lock_state()
            .embedded()
            .map(|e| (e.plugin_id.clone(), e.version.clone()))
        else {
            return;
        };

        let Some(status) = statuses.find(&plugin_id) else {
            return;
        };

        let change = match VersionChange::from_remote(&status.version, &local) {
            Ok(change) => change,
            Err(e) => {
                warn!("Ignoring status for {plugin_id}: bad version '{}': {e}", status.version);
                return;
            }
        };
        info!("Plugin {plugin_id} reports v{} (local v{local}): {change:?}", status.version);

        if change.signals_update() {
            let hook = self.inner.handlers.lock().app_version.clone();
            if let Some(hook) = hook {
                hook(true);
            }
        }

        if change.requires_resubscribe() {
            self.schedule_version_reconnect();
        }
    }

    fn schedule_version_reconnect(&self) {
        let mut state = self.lock_state();
        if state.closed {
            return;
        }

        let delay = self.inner.config.version_reconnect_delay;
        let weak = self.downgrade();
        let timer = self.inner.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(client) = upgrade(&weak) {
                let closed = {
                    let mut state = client.lock_state();
                    state.reconnect_timer = None;
                    state.closed
                };
                if !closed {
                    client.reconnect_embedded();
                }
            }
        });
        if let Some(previous) = state.reconnect_timer.replace(timer) {
            previous.abort();
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Coalescing
    // ─────────────────────────────────────────────────────────────────────

    fn enqueue(&self, kind: ChangeKind, entity: Entity) {
        let config = &self.inner.config;
        let mut state = self.lock_state();

        // Buffer first, then re-arm, all under the lock.
        let delay = state.coalescer.push(
            kind,
            entity,
            Instant::now(),
            config.notification_delay,
            config.max_notification_deferral,
        );

        let weak = self.downgrade();
        let timer = self.inner.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(client) = upgrade(&weak) {
                client.flush();
            }
        });
        state.coalescer.arm(timer);
    }

    /// Deliver everything buffered, one batch per kind, then start empty.
    fn flush(&self) {
        let batch = self.lock_state().coalescer.take();
        if batch.is_empty() {
            return;
        }

        for kind in ChangeKind::ALL {
            let entities = batch.get(kind);
            if entities.is_empty() {
                continue;
            }
            for entity in entities {
                debug!("Delivering {kind} update: {}", entity.id);
            }
            let handlers = self.inner.handlers.lock().change(kind).snapshot();
            for handler in handlers {
                handler(self, entities);
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Dispatch
    // ─────────────────────────────────────────────────────────────────────

    /// Move to `next` and notify state-change subscribers, unless already there.
    fn set_state(&self, next: LifecycleState) {
        let previous = std::mem::replace(&mut self.lock_state().lifecycle, next);
        if previous == next {
            return;
        }
        info!("Connection state: {previous} -> {next}");

        let handlers = self.inner.handlers.lock().state_change.snapshot();
        for handler in handlers {
            handler(self, next);
        }
    }

    fn dispatch_reconnect(&self) {
        let handlers = self.inner.handlers.lock().reconnect.snapshot();
        for handler in handlers {
            handler(self);
        }
    }

    fn dispatch_error(&self, error: &TransportError) {
        let handlers = self.inner.handlers.lock().error.snapshot();
        for handler in handlers {
            handler(self, error);
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Registration
    // ─────────────────────────────────────────────────────────────────────

    pub fn add_on_change(&self, handler: ChangeHandler, kind: ChangeKind) {
        self.inner.handlers.lock().change_mut(kind).add(handler);
    }

    pub fn remove_on_change(&self, handler: &ChangeHandler, kind: ChangeKind) -> bool {
        self.inner.handlers.lock().change_mut(kind).remove(handler)
    }

    pub fn add_on_reconnect(&self, handler: ReconnectHandler) {
        self.inner.handlers.lock().reconnect.add(handler);
    }

    pub fn remove_on_reconnect(&self, handler: &ReconnectHandler) -> bool {
        self.inner.handlers.lock().reconnect.remove(handler)
    }

    pub fn add_on_state_change(&self, handler: StateChangeHandler) {
        self.inner.handlers.lock().state_change.add(handler);
    }

    pub fn remove_on_state_change(&self, handler: &StateChangeHandler) -> bool {
        self.inner.handlers.lock().state_change.remove(handler)
    }

    pub fn add_on_error(&self, handler: ErrorHandler) {
        self.inner.handlers.lock().error.add(handler);
    }

    pub fn remove_on_error(&self, handler: &ErrorHandler) -> bool {
        self.inner.handlers.lock().error.remove(handler)
    }

    pub fn add_on_config_change(&self, handler: ConfigChangeHandler) {
        self.inner.handlers.lock().config_change.add(handler);
    }

    pub fn remove_on_config_change(&self, handler: &ConfigChangeHandler) -> bool {
        self.inner.handlers.lock().config_change.remove(handler)
    }

    /// Set (or clear) the hook told when a newer plugin build is deployed.
    pub fn set_on_app_version_change_handler(&self, handler: Option<AppVersionHandler>) {
        self.inner.handlers.lock().app_version = handler;
    }

    // ─────────────────────────────────────────────────────────────────────
    // Commands
    // ─────────────────────────────────────────────────────────────────────

    /// Send credentials for a workspace. An empty token is a no-op.
    pub fn authenticate(&self, workspace_id: &str, token: &str) {
        if !self.require_transport("authenticate") || token.is_empty() {
            return;
        }
        self.send_command(Command::Authenticate {
            token: token.to_string(),
            workspace_id: workspace_id.to_string(),
        });
    }

    pub fn subscribe_to_entities<I, S>(&self, workspace_id: &str, block_ids: I, read_token: &str)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if !self.require_transport("subscribe_to_entities") {
            return;
        }
        self.send_command(Command::SubscribeBlocks {
            block_ids: block_ids.into_iter().map(Into::into).collect(),
            workspace_id: workspace_id.to_string(),
            read_token: read_token.to_string(),
        });
    }

    pub fn unsubscribe_from_entities<I, S>(&self, workspace_id: &str, block_ids: I, read_token: &str)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if !self.require_transport("unsubscribe_from_entities") {
            return;
        }
        self.send_command(Command::UnsubscribeBlocks {
            block_ids: block_ids.into_iter().map(Into::into).collect(),
            workspace_id: workspace_id.to_string(),
            read_token: read_token.to_string(),
        });
    }

    pub fn subscribe_to_workspace(&self, workspace_id: &str) {
        if !self.require_transport("subscribe_to_workspace") {
            return;
        }
        self.send_command(Command::SubscribeWorkspace {
            workspace_id: workspace_id.to_string(),
        });
    }

    pub fn unsubscribe_from_workspace(&self, workspace_id: &str) {
        if !self.require_transport("unsubscribe_from_workspace") {
            return;
        }
        self.send_command(Command::UnsubscribeWorkspace {
            workspace_id: workspace_id.to_string(),
        });
    }

    fn require_transport(&self, operation: &str) -> bool {
        let active = self.has_transport();
        if !active {
            error!("{operation}: no active transport, command skipped");
        }
        active
    }

    fn send_command(&self, command: Command) {
        let outbound = {
            let state = self.lock_state();
            match &state.transport {
                Some(Transport::Embedded(embedded)) => {
                    Outbound::Relay(embedded.relay.clone(), embedded.prefixed(command.action()))
                }
                Some(Transport::Standalone(Some(socket))) => match command.to_frame() {
                    Ok(frame) => match socket.send(frame) {
                        Ok(()) => Outbound::Sent,
                        Err(e) => Outbound::Failed(e),
                    },
                    Err(e) => {
                        error!("Failed to serialize {}: {e}", command.action());
                        return;
                    }
                },
                _ => Outbound::NoTransport,
            }
        };

        match outbound {
            Outbound::Relay(relay, action) => {
                debug!("Relaying {action}");
                relay.send_message(&action, command.payload());
            }
            Outbound::Sent => debug!("Sent {}", command.action()),
            Outbound::Failed(e) => warn!("Failed to send {}: {e}", command.action()),
            Outbound::NoTransport => error!("{}: transport went away", command.action()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU16, AtomicUsize};
    use std::time::Duration;

    use boardsync_protocol::PluginStatus;
    use boardsync_transport::{CloseCallback, ConnectCallback, ErrorCallback, ReadyState};
    use serde_json::{Value, json};
    use tokio::time::sleep;

    use super::*;

    /// Scriptable host relay: records sent actions and lets the test fire
    /// the registered lifecycle callbacks.
    #[derive(Default)]
    struct FakeRelay {
        sent: Mutex<Vec<(String, Value)>>,
        first_connect: Mutex<Option<ConnectCallback>>,
        reconnect: Mutex<Option<ConnectCallback>>,
        error: Mutex<Option<ErrorCallback>>,
        close: Mutex<Option<CloseCallback>>,
        ready: AtomicU16,
        ready_reads: AtomicUsize,
    }

    impl FakeRelay {
        fn fire_first_connect(&self) {
            if let Some(cb) = self.first_connect.lock().as_ref() {
                cb();
            }
        }

        fn fire_reconnect(&self) {
            if let Some(cb) = self.reconnect.lock().as_ref() {
                cb();
            }
        }

        fn fire_error(&self, e: TransportError) {
            if let Some(cb) = self.error.lock().as_ref() {
                cb(e);
            }
        }

        fn fire_close(&self, connect_fail_count: u32) {
            if let Some(cb) = self.close.lock().as_ref() {
                cb(connect_fail_count);
            }
        }

        fn set_ready(&self, state: ReadyState) {
            self.ready.store(state.0, Ordering::SeqCst);
        }

        fn ready_reads(&self) -> usize {
            self.ready_reads.load(Ordering::SeqCst)
        }

        fn sent(&self) -> Vec<(String, Value)> {
            self.sent.lock().clone()
        }
    }

    impl RelayClient for FakeRelay {
        fn send_message(&self, action: &str, payload: Value) {
            self.sent.lock().push((action.to_string(), payload));
        }

        fn set_first_connect_callback(&self, callback: ConnectCallback) {
            *self.first_connect.lock() = Some(callback);
        }

        fn set_reconnect_callback(&self, callback: ConnectCallback) {
            *self.reconnect.lock() = Some(callback);
        }

        fn set_error_callback(&self, callback: ErrorCallback) {
            *self.error.lock() = Some(callback);
        }

        fn set_close_callback(&self, callback: CloseCallback) {
            *self.close.lock() = Some(callback);
        }

        fn ready_state(&self) -> ReadyState {
            self.ready_reads.fetch_add(1, Ordering::SeqCst);
            ReadyState(self.ready.load(Ordering::SeqCst))
        }
    }

    fn embedded_with(config: ClientConfig) -> (LiveClient, Arc<FakeRelay>) {
        let relay = Arc::new(FakeRelay::default());
        let client = LiveClient::new(config).unwrap();
        client.initialize_embedded("focalboard", "7.1.0", relay.clone()).unwrap();
        client.open().unwrap();
        (client, relay)
    }

    fn embedded() -> (LiveClient, Arc<FakeRelay>) {
        embedded_with(ClientConfig::default())
    }

    fn block(id: &str, title: &str) -> Entity {
        Entity::new(id).with_field("title", json!(title))
    }

    fn statuses(plugin_id: &str, version: &str) -> PluginStatuses {
        PluginStatuses {
            plugin_statuses: vec![PluginStatus {
                plugin_id: plugin_id.into(),
                version: version.into(),
            }],
        }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    type Batches = Arc<Mutex<Vec<Vec<Entity>>>>;

    fn record_changes(client: &LiveClient, kind: ChangeKind) -> Batches {
        let batches: Batches = Arc::default();
        let sink = batches.clone();
        client.add_on_change(
            Arc::new(move |_: &LiveClient, entities: &[Entity]| sink.lock().push(entities.to_vec())),
            kind,
        );
        batches
    }

    fn record_states(client: &LiveClient) -> Arc<Mutex<Vec<LifecycleState>>> {
        let states: Arc<Mutex<Vec<LifecycleState>>> = Arc::default();
        let sink = states.clone();
        client.add_on_state_change(Arc::new(move |_: &LiveClient, state: LifecycleState| {
            sink.lock().push(state)
        }));
        states
    }

    fn count_reconnects(client: &LiveClient) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        client.add_on_reconnect(Arc::new(move |_: &LiveClient| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        count
    }

    fn ids(batch: &[Entity]) -> Vec<&str> {
        batch.iter().map(|e| e.id.as_str()).collect()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Setup
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn new_outside_runtime_fails() {
        assert!(matches!(
            LiveClient::new(ClientConfig::default()),
            Err(ClientError::NoRuntime)
        ));
    }

    #[tokio::test]
    async fn standalone_open_requires_server_address() {
        let client = LiveClient::new(ClientConfig::default()).unwrap();
        assert!(matches!(client.open(), Err(ClientError::NoServerAddress)));
        assert!(!client.has_transport());
        assert_eq!(client.state(), LifecycleState::Init);
    }

    #[tokio::test]
    async fn standalone_open_rejects_bad_scheme() {
        let client = LiveClient::new(ClientConfig::with_server_url("ftp://boards.example.com")).unwrap();
        assert!(matches!(
            client.open(),
            Err(ClientError::Transport(TransportError::UnsupportedScheme(_)))
        ));
    }

    #[tokio::test]
    async fn embedded_mode_is_chosen_once() {
        let (client, relay) = embedded();
        assert!(client.is_embedded());
        assert!(matches!(
            client.initialize_embedded("focalboard", "7.1.0", relay),
            Err(ClientError::AlreadyInitialized)
        ));
    }

    #[tokio::test]
    async fn invalid_local_version_leaves_client_unconfigured() {
        let client = LiveClient::new(ClientConfig::default()).unwrap();
        let relay = Arc::new(FakeRelay::default());
        let err = client.initialize_embedded("focalboard", "v7", relay).unwrap_err();
        assert!(matches!(err, ClientError::InvalidVersion { .. }));
        assert!(!client.is_embedded());
        assert!(!client.has_transport());
    }

    // ─────────────────────────────────────────────────────────────────────
    // Commands
    // ─────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn embedded_commands_are_prefixed() {
        let (client, relay) = embedded();

        client.authenticate("w1", "secret");
        client.subscribe_to_entities("w1", ["b1", "b2"], "rt");
        client.unsubscribe_from_entities("w1", vec!["b2".to_string()], "");
        client.subscribe_to_workspace("w1");
        client.unsubscribe_from_workspace("w1");

        assert_eq!(
            relay.sent(),
            vec![
                (
                    "custom_focalboard_AUTH".to_string(),
                    json!({"token": "secret", "workspaceId": "w1"})
                ),
                (
                    "custom_focalboard_SUBSCRIBE_BLOCKS".to_string(),
                    json!({"blockIds": ["b1", "b2"], "workspaceId": "w1", "readToken": "rt"})
                ),
                (
                    "custom_focalboard_UNSUBSCRIBE_BLOCKS".to_string(),
                    json!({"blockIds": ["b2"], "workspaceId": "w1", "readToken": ""})
                ),
                (
                    "custom_focalboard_SUBSCRIBE_WORKSPACE".to_string(),
                    json!({"workspaceId": "w1"})
                ),
                (
                    "custom_focalboard_UNSUBSCRIBE_WORKSPACE".to_string(),
                    json!({"workspaceId": "w1"})
                ),
            ]
        );
    }

    #[tokio::test]
    async fn empty_token_is_not_sent() {
        let (client, relay) = embedded();
        client.authenticate("w1", "");
        assert!(relay.sent().is_empty());
    }

    #[tokio::test]
    async fn commands_without_transport_are_skipped() {
        let client = LiveClient::new(ClientConfig::default()).unwrap();
        client.subscribe_to_workspace("w1");

        let relay = Arc::new(FakeRelay::default());
        client.initialize_embedded("focalboard", "7.1.0", relay.clone()).unwrap();
        client.subscribe_to_workspace("w2");

        assert_eq!(relay.sent().len(), 1);
        assert_eq!(relay.sent()[0].1, json!({"workspaceId": "w2"}));
    }

    // ─────────────────────────────────────────────────────────────────────
    // Coalescing
    // ─────────────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn updates_for_same_entity_coalesce_into_last_value() {
        let (client, _relay) = embedded();
        let batches = record_changes(&client, ChangeKind::Block);

        client.handle_update(InboundMessage::update_block(block("b1", "v1")));
        sleep(ms(50)).await;
        client.handle_update(InboundMessage::update_block(block("b1", "v2")));

        // The second update restarted the quiet window.
        sleep(ms(99)).await;
        assert!(batches.lock().is_empty());

        sleep(ms(10)).await;
        let batches = batches.lock();
        assert_eq!(batches.len(), 1);
        assert_eq!(ids(&batches[0]), ["b1"]);
        assert_eq!(batches[0][0].field("title"), Some(&json!("v2")));
    }

    #[tokio::test(start_paused = true)]
    async fn burst_is_delivered_as_one_batch_per_kind() {
        let (client, _relay) = embedded();
        let blocks = record_changes(&client, ChangeKind::Block);
        let categories = record_changes(&client, ChangeKind::Category);

        for (i, id) in ["b1", "b2", "b3", "b1"].iter().enumerate() {
            client.handle_update(InboundMessage::update_block(block(id, &i.to_string())));
            client.handle_update(InboundMessage::update_category(Entity::new(format!("c{i}"))));
            sleep(ms(20)).await;
        }
        sleep(ms(200)).await;

        let blocks = blocks.lock();
        assert_eq!(blocks.len(), 1);
        assert_eq!(ids(&blocks[0]), ["b2", "b3", "b1"]);
        assert_eq!(blocks[0][2].field("title"), Some(&json!("3")));

        let categories = categories.lock();
        assert_eq!(categories.len(), 1);
        assert_eq!(ids(&categories[0]), ["c0", "c1", "c2", "c3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn kind_without_updates_is_not_delivered() {
        let (client, _relay) = embedded();
        let blocks = record_changes(&client, ChangeKind::Block);
        let categories = record_changes(&client, ChangeKind::Category);

        client.handle_update(InboundMessage::update_category(Entity::new("c1")));
        sleep(ms(200)).await;

        assert!(blocks.lock().is_empty());
        assert_eq!(categories.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deferral_ceiling_forces_flush_during_steady_stream() {
        let config = ClientConfig {
            max_notification_deferral: Some(ms(250)),
            ..ClientConfig::default()
        };
        let (client, _relay) = embedded_with(config);
        let batches = record_changes(&client, ChangeKind::Block);

        for i in 0..10 {
            client.handle_update(InboundMessage::update_block(block("b1", &i.to_string())));
            sleep(ms(40)).await;
        }
        sleep(ms(500)).await;

        let batches = batches.lock();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0][0].field("title"), Some(&json!("6")));
        assert_eq!(batches[1][0].field("title"), Some(&json!("9")));
    }

    #[tokio::test(start_paused = true)]
    async fn steady_stream_without_ceiling_defers_flush() {
        let (client, _relay) = embedded();
        let batches = record_changes(&client, ChangeKind::Block);

        for i in 0..10 {
            client.handle_update(InboundMessage::update_block(block("b1", &i.to_string())));
            sleep(ms(40)).await;
        }
        assert!(batches.lock().is_empty());

        sleep(ms(500)).await;
        assert_eq!(batches.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_updates_are_dropped() {
        let (client, _relay) = embedded();
        let blocks = record_changes(&client, ChangeKind::Block);

        client.handle_update(InboundMessage {
            error: Some("denied".into()),
            ..InboundMessage::update_block(Entity::new("b1"))
        });
        client.handle_update(InboundMessage {
            action: Some("UPDATE_BLOCK".into()),
            ..InboundMessage::default()
        });
        client.handle_update(InboundMessage {
            action: Some("SOMETHING_ELSE".into()),
            block: Some(Entity::new("b2")),
            ..InboundMessage::default()
        });
        sleep(ms(200)).await;

        assert!(blocks.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn handler_removed_mid_dispatch_still_gets_current_batch() {
        let (client, _relay) = embedded();

        let second_calls = Arc::new(AtomicUsize::new(0));
        let counter = second_calls.clone();
        let second: ChangeHandler = Arc::new(move |_: &LiveClient, _: &[Entity]| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let target = second.clone();
        client.add_on_change(
            Arc::new(move |client: &LiveClient, _: &[Entity]| {
                client.remove_on_change(&target, ChangeKind::Block);
            }),
            ChangeKind::Block,
        );
        client.add_on_change(second, ChangeKind::Block);

        client.handle_update(InboundMessage::update_block(Entity::new("b1")));
        sleep(ms(200)).await;
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);

        client.handle_update(InboundMessage::update_block(Entity::new("b1")));
        sleep(ms(200)).await;
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn state_handlers_fire_once_per_transition() {
        let (client, relay) = embedded();
        let states = record_states(&client);
        assert_eq!(client.state(), LifecycleState::Init);

        relay.fire_first_connect();
        relay.fire_first_connect();
        relay.fire_close(1);
        relay.fire_close(2);

        assert_eq!(*states.lock(), [LifecycleState::Open, LifecycleState::Close]);
        assert_eq!(client.state(), LifecycleState::Close);
    }

    #[tokio::test(start_paused = true)]
    async fn relay_close_polls_until_ready() {
        let (client, relay) = embedded();
        let states = record_states(&client);
        let reconnects = count_reconnects(&client);

        relay.fire_first_connect();
        relay.fire_close(3);
        assert_eq!(client.state(), LifecycleState::Close);

        // Polls at 500, 1000, 1500 all see a closed relay.
        sleep(ms(1600)).await;
        assert_eq!(relay.ready_reads(), 3);
        assert_eq!(reconnects.load(Ordering::SeqCst), 0);

        relay.set_ready(ReadyState::OPEN);
        sleep(ms(500)).await;
        assert_eq!(client.state(), LifecycleState::Open);
        assert_eq!(reconnects.load(Ordering::SeqCst), 1);

        // Poll stopped.
        let reads = relay.ready_reads();
        sleep(ms(2000)).await;
        assert_eq!(relay.ready_reads(), reads);
        assert_eq!(reconnects.load(Ordering::SeqCst), 1);

        assert_eq!(
            *states.lock(),
            [LifecycleState::Open, LifecycleState::Close, LifecycleState::Open]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_close_runs_a_single_poll() {
        let (_client, relay) = embedded();
        relay.fire_close(1);
        relay.fire_close(2);
        relay.fire_close(3);

        sleep(ms(600)).await;
        assert_eq!(relay.ready_reads(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn relay_reconnect_stops_poll() {
        let (client, relay) = embedded();
        let reconnects = count_reconnects(&client);

        relay.fire_close(1);
        sleep(ms(600)).await;
        relay.fire_reconnect();
        assert_eq!(client.state(), LifecycleState::Open);

        relay.set_ready(ReadyState::OPEN);
        sleep(ms(2000)).await;
        assert_eq!(reconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn relay_errors_reach_error_handlers() {
        let (client, relay) = embedded();
        let errors: Arc<Mutex<Vec<TransportError>>> = Arc::default();
        let sink = errors.clone();
        client.add_on_error(Arc::new(move |_: &LiveClient, e: &TransportError| {
            sink.lock().push(e.clone())
        }));

        relay.fire_error(TransportError::Relay("boom".into()));
        assert_eq!(*errors.lock(), [TransportError::Relay("boom".into())]);
    }

    #[tokio::test(start_paused = true)]
    async fn close_clears_connection_handlers_and_keeps_config_handlers() {
        let (client, relay) = embedded();
        let states = record_states(&client);
        let reconnects = count_reconnects(&client);
        let blocks = record_changes(&client, ChangeKind::Block);

        let configs: Arc<Mutex<Vec<RemoteConfig>>> = Arc::default();
        let sink = configs.clone();
        client.add_on_config_change(Arc::new(move |_: &LiveClient, config: &RemoteConfig| {
            sink.lock().push(config.clone())
        }));

        relay.fire_first_connect();
        client.close();
        assert_eq!(client.state(), LifecycleState::Close);
        // Teardown itself does not notify.
        assert_eq!(*states.lock(), [LifecycleState::Open]);

        relay.fire_reconnect();
        client.handle_update(InboundMessage::update_block(Entity::new("b1")));
        sleep(ms(200)).await;
        assert_eq!(reconnects.load(Ordering::SeqCst), 0);
        assert!(blocks.lock().is_empty());
        assert_eq!(states.lock().len(), 1);

        client.handle_client_config(&json!({"telemetry": false}));
        assert_eq!(*configs.lock(), [json!({"telemetry": false})]);
    }

    #[tokio::test(start_paused = true)]
    async fn close_discards_buffered_updates() {
        let (client, _relay) = embedded();
        client.handle_update(InboundMessage::update_block(Entity::new("b1")));
        client.close();

        let blocks = record_changes(&client, ChangeKind::Block);
        sleep(ms(200)).await;
        assert!(blocks.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn close_cancels_relay_poll() {
        let (client, relay) = embedded();
        relay.fire_close(1);
        client.close();

        sleep(ms(2000)).await;
        assert_eq!(relay.ready_reads(), 0);
    }

    fn close_on(client: &LiveClient, target: LifecycleState) {
        client.add_on_state_change(Arc::new(move |client: &LiveClient, state: LifecycleState| {
            if state == target {
                client.close();
            }
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn close_from_state_handler_prevents_relay_poll() {
        let (client, relay) = embedded();
        close_on(&client, LifecycleState::Close);

        relay.fire_first_connect();
        relay.fire_close(1);
        relay.set_ready(ReadyState::OPEN);
        sleep(ms(2000)).await;

        assert_eq!(relay.ready_reads(), 0);
        assert_eq!(client.state(), LifecycleState::Close);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_client_ignores_plugin_version_reconnect() {
        let (client, _relay) = embedded();
        client.close();
        let reconnects = count_reconnects(&client);

        client.handle_plugin_statuses(&statuses("focalboard", "7.1.0"));
        sleep(ms(2000)).await;

        assert_eq!(reconnects.load(Ordering::SeqCst), 0);
        assert_eq!(client.state(), LifecycleState::Close);
    }

    #[tokio::test(start_paused = true)]
    async fn reopen_after_close_polls_again() {
        let (client, relay) = embedded();
        client.close();
        client.open().unwrap();
        let reconnects = count_reconnects(&client);

        relay.fire_close(1);
        relay.set_ready(ReadyState::OPEN);
        sleep(ms(600)).await;

        assert_eq!(relay.ready_reads(), 1);
        assert_eq!(reconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn close_without_transport_is_a_no_op() {
        let client = LiveClient::new(ClientConfig::default()).unwrap();
        let states = record_states(&client);
        client.close();
        assert_eq!(client.state(), LifecycleState::Init);
        assert!(states.lock().is_empty());
    }

    // ─────────────────────────────────────────────────────────────────────
    // Plugin version
    // ─────────────────────────────────────────────────────────────────────

    fn record_app_version(client: &LiveClient) -> Arc<Mutex<Vec<bool>>> {
        let calls: Arc<Mutex<Vec<bool>>> = Arc::default();
        let sink = calls.clone();
        client.set_on_app_version_change_handler(Some(Arc::new(move |newer: bool| {
            sink.lock().push(newer)
        })));
        calls
    }

    #[tokio::test(start_paused = true)]
    async fn newer_plugin_version_notifies_and_resubscribes() {
        let (client, relay) = embedded();
        let hook = record_app_version(&client);
        let reconnects = count_reconnects(&client);
        relay.fire_close(1);

        client.handle_plugin_statuses(&statuses("focalboard", "7.2.0"));
        assert_eq!(*hook.lock(), [true]);

        sleep(ms(400)).await;
        assert_eq!(reconnects.load(Ordering::SeqCst), 0);

        sleep(ms(700)).await;
        assert_eq!(reconnects.load(Ordering::SeqCst), 1);
        assert_eq!(client.state(), LifecycleState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn same_plugin_version_resubscribes_silently() {
        let (client, _relay) = embedded();
        let hook = record_app_version(&client);
        let reconnects = count_reconnects(&client);

        client.handle_plugin_statuses(&statuses("focalboard", "7.1.0"));
        sleep(ms(1100)).await;

        assert!(hook.lock().is_empty());
        assert_eq!(reconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn older_or_foreign_or_bad_versions_are_ignored() {
        let (client, _relay) = embedded();
        let hook = record_app_version(&client);
        let reconnects = count_reconnects(&client);

        client.handle_plugin_statuses(&statuses("focalboard", "7.0.9"));
        client.handle_plugin_statuses(&statuses("playbooks", "9.0.0"));
        client.handle_plugin_statuses(&statuses("focalboard", "latest"));
        client.handle_plugin_statuses(&PluginStatuses::default());
        sleep(ms(3000)).await;

        assert!(hook.lock().is_empty());
        assert_eq!(reconnects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn plugin_statuses_ignored_in_standalone_mode() {
        let client = LiveClient::new(ClientConfig::with_server_url("http://localhost:1")).unwrap();
        let hook = record_app_version(&client);
        let reconnects = count_reconnects(&client);

        client.handle_plugin_statuses(&statuses("focalboard", "99.0.0"));
        sleep(ms(2000)).await;

        assert!(hook.lock().is_empty());
        assert_eq!(reconnects.load(Ordering::SeqCst), 0);
    }
}
