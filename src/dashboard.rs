//! Dashboard assembly and the public handle.
//!
//! [`DashboardBuilder`] collects the backend, configuration and plugins,
//! then [`open`](DashboardBuilder::open) wires the state channel, the event
//! emitter, the command bus and the query processor together. The resulting
//! [`Dashboard`] is the single entry point for dispatching commands, reading
//! state and subscribing to events.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::watch;
use tokio_stream::wrappers::BroadcastStream;

use crate::backend::Backend;
use crate::bus::{BusCore, CommandTicket, DispatchResult, Dispatcher, spawn_bus};
use crate::command::{Command, CommandContext, RawCommand};
use crate::config::{BusConfig, ConfigOverrides, QueryConfig};
use crate::emitter::{DeliveryFailure, EventEmitter, EventFilter, HandlerResult, Subscription};
use crate::error::{ConfigError, DispatchError, OpenError};
use crate::event::DashboardEvent;
use crate::plugin::{
    CustomCommandHandler, DashboardContext, DashboardCustomizer, DashboardPlugin, EventHandling,
    Extensions, HandlerScope, Matcher, ScopedHandler,
};
use crate::query::{QueryInterest, QueryProcessor, QueryResult, QuerySpec};
use crate::selector::Selector;
use crate::state::{DashboardState, Loadable, ObjRef};

type Fallback = Arc<dyn Fn(&DeliveryFailure) + Send + Sync>;

/// Builder for configuring and opening a [`Dashboard`].
///
/// Created via [`DashboardBuilder::new`]. Plugins register in the order they
/// are added.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use dashboard_model::{DashboardBuilder, InMemoryBackend, LoadedDashboard, ObjRef};
///
/// # async fn example() -> Result<(), dashboard_model::OpenError> {
/// let dashboard_ref = ObjRef::identifier("dashboard.sales");
/// let backend = InMemoryBackend::new()
///     .with_dashboard(dashboard_ref.clone(), LoadedDashboard::default());
/// let dashboard = DashboardBuilder::new(Arc::new(backend), dashboard_ref)
///     .workspace("ws-1")
///     .open()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct DashboardBuilder {
    backend: Arc<dyn Backend>,
    dashboard: ObjRef,
    workspace: Option<String>,
    bus_config: BusConfig,
    query_config: QueryConfig,
    overrides: Option<ConfigOverrides>,
    plugins: Vec<Arc<dyn DashboardPlugin>>,
    command_handlers: Vec<(String, Arc<dyn CustomCommandHandler>)>,
    load_on_open: bool,
    delivery_fallback: Option<Fallback>,
}

impl fmt::Debug for DashboardBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DashboardBuilder")
            .field("dashboard", &self.dashboard)
            .field("workspace", &self.workspace)
            .field("bus_config", &self.bus_config)
            .field("query_config", &self.query_config)
            .field(
                "plugins",
                &self
                    .plugins
                    .iter()
                    .map(|p| p.display_name().to_string())
                    .collect::<Vec<_>>(),
            )
            .field("load_on_open", &self.load_on_open)
            .finish_non_exhaustive()
    }
}

impl DashboardBuilder {
    /// Create a builder for the dashboard identified by `dashboard`.
    ///
    /// # Arguments
    ///
    /// * `backend` - Loads the dashboard and executes data queries.
    /// * `dashboard` - Reference of the dashboard to open.
    pub fn new(backend: Arc<dyn Backend>, dashboard: ObjRef) -> Self {
        Self {
            backend,
            dashboard,
            workspace: None,
            bus_config: BusConfig::default(),
            query_config: QueryConfig::default(),
            overrides: None,
            plugins: Vec::new(),
            command_handlers: Vec::new(),
            load_on_open: true,
            delivery_fallback: None,
        }
    }

    /// Workspace the dashboard lives in. Passed to plugins at registration.
    pub fn workspace(mut self, workspace: impl Into<String>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    /// Set the command bus configuration.
    ///
    /// # Arguments
    ///
    /// * `config` - Queue capacity, event stream buffer and whether
    ///   `commandStarted` events are emitted.
    ///
    /// # Returns
    ///
    /// `self` for method chaining.
    pub fn bus_config(mut self, config: BusConfig) -> Self {
        self.bus_config = config;
        self
    }

    /// Set the query cache configuration.
    ///
    /// # Returns
    ///
    /// `self` for method chaining.
    pub fn query_config(mut self, config: QueryConfig) -> Self {
        self.query_config = config;
        self
    }

    /// Overrides applied to the `config` slice every time the dashboard
    /// loads.
    pub fn config_overrides(mut self, overrides: ConfigOverrides) -> Self {
        self.overrides = Some(overrides);
        self
    }

    /// Add a plugin. Its `register` runs during [`open`](Self::open).
    pub fn plugin(mut self, plugin: impl DashboardPlugin + 'static) -> Self {
        self.plugins.push(Arc::new(plugin));
        self
    }

    /// Register a custom command handler directly, without a plugin.
    ///
    /// Name collisions are reported by [`open`](Self::open).
    pub fn command_handler(
        mut self,
        name: impl Into<String>,
        handler: impl CustomCommandHandler + 'static,
    ) -> Self {
        self.command_handlers.push((name.into(), Arc::new(handler)));
        self
    }

    /// Whether [`open`](Self::open) dispatches `loadDashboard` and waits for
    /// it. Default: `true`.
    pub fn load_on_open(mut self, load: bool) -> Self {
        self.load_on_open = load;
        self
    }

    /// Receive event handler failures instead of the default `tracing`
    /// error log.
    pub fn delivery_fallback(
        mut self,
        fallback: impl Fn(&DeliveryFailure) + Send + Sync + 'static,
    ) -> Self {
        self.delivery_fallback = Some(Arc::new(fallback));
        self
    }

    /// Register plugins, start the command bus and (by default) load the
    /// dashboard.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// A plugin whose `register` returns an error or panics is skipped with
    /// a warning; nothing it registered is kept.
    ///
    /// # Returns
    ///
    /// A running [`Dashboard`].
    ///
    /// # Errors
    ///
    /// * [`OpenError::Config`] -- zero queue capacity, or two registrations
    ///   claiming the same command name or widget type.
    /// * [`OpenError::Load`] -- the initial `loadDashboard` did not commit.
    pub async fn open(self) -> Result<Dashboard, OpenError> {
        if self.bus_config.queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity.into());
        }

        let mut extensions = Extensions::default();
        for (name, handler) in self.command_handlers {
            extensions.add_command_handler(name, handler)?;
        }

        let context = DashboardContext {
            dashboard: self.dashboard.clone(),
            workspace: self.workspace,
        };
        let mut plugin_handlers: Vec<(Matcher, ScopedHandler)> = Vec::new();
        for plugin in &self.plugins {
            if let Some(handling) = register_plugin(plugin.as_ref(), &context, &mut extensions)? {
                plugin_handlers.extend(handling.handlers);
            }
        }

        let buffer = self.bus_config.event_buffer;
        let emitter = match self.delivery_fallback {
            Some(fallback) => EventEmitter::with_fallback(buffer, move |failure| fallback(failure)),
            None => EventEmitter::new(buffer),
        };
        let (state_tx, state_rx) = watch::channel(Arc::new(DashboardState::default()));
        let dispatcher = spawn_bus(BusCore {
            state: state_tx,
            emitter: emitter.clone(),
            backend: Arc::clone(&self.backend),
            extensions: Arc::new(extensions),
            config: self.bus_config,
            dashboard: self.dashboard.clone(),
            overrides: self.overrides,
        });

        for (matcher, handler) in plugin_handlers {
            let scope = HandlerScope::new(dispatcher.downgrade(), state_rx.clone());
            emitter.on(EventFilter::All, move |event| {
                if matcher.matches(event) {
                    handler(event, &scope)
                } else {
                    Ok(())
                }
            });
        }

        let queries = QueryProcessor::new(self.backend, emitter.clone(), self.query_config);
        let dashboard = Dashboard {
            dispatcher,
            state: state_rx,
            emitter,
            queries,
            context: Arc::new(context),
        };

        if self.load_on_open {
            dashboard
                .dispatch(Command::LoadDashboard, CommandContext::default())
                .await
                .map_err(OpenError::Load)?;
        }
        tracing::info!(dashboard = %dashboard.context.dashboard, "dashboard opened");
        Ok(dashboard)
    }
}

/// Run one plugin's `register` against scratch collections and merge the
/// result.
///
/// Returns `Ok(None)` when the plugin was skipped.
fn register_plugin(
    plugin: &dyn DashboardPlugin,
    context: &DashboardContext,
    extensions: &mut Extensions,
) -> Result<Option<EventHandling>, ConfigError> {
    let mut customizer = DashboardCustomizer::default();
    let mut handling = EventHandling::default();
    let registered = panic::catch_unwind(AssertUnwindSafe(|| {
        plugin.register(context, &mut customizer, &mut handling)
    }));
    let name = plugin.display_name();
    match registered {
        Ok(Ok(())) => {
            extensions.merge(customizer)?;
            tracing::info!(
                plugin = name,
                version = plugin.version(),
                author = plugin.author(),
                "plugin registered"
            );
            Ok(Some(handling))
        }
        Ok(Err(error)) => {
            tracing::warn!(plugin = name, %error, "plugin registration failed, skipping");
            Ok(None)
        }
        Err(_) => {
            tracing::warn!(plugin = name, "plugin registration panicked, skipping");
            Ok(None)
        }
    }
}

/// A running dashboard.
///
/// Cheap to clone; all clones share one command bus, state tree, emitter
/// and query cache. The bus stops on [`shutdown`](Self::shutdown) or once
/// every clone is dropped.
#[derive(Clone)]
pub struct Dashboard {
    dispatcher: Dispatcher,
    state: watch::Receiver<Arc<DashboardState>>,
    emitter: EventEmitter,
    queries: QueryProcessor,
    context: Arc<DashboardContext>,
}

impl fmt::Debug for Dashboard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dashboard")
            .field("dashboard", &self.context.dashboard)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Dashboard {
    /// Cloneable dispatcher feeding this dashboard's bus.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Dispatch a command and wait for its outcome.
    ///
    /// # Errors
    ///
    /// See [`CommandTicket::outcome`].
    pub async fn dispatch(&self, command: Command, ctx: CommandContext) -> DispatchResult {
        self.dispatcher.dispatch(command, ctx).await
    }

    /// Queue a command and return its ticket without waiting for the outcome.
    pub async fn dispatch_command(
        &self,
        command: Command,
        ctx: CommandContext,
    ) -> Result<CommandTicket, DispatchError> {
        self.dispatcher.dispatch_command(command, ctx).await
    }

    /// Queue a command without waiting for queue room.
    pub fn try_dispatch(
        &self,
        command: Command,
        ctx: CommandContext,
    ) -> Result<CommandTicket, DispatchError> {
        self.dispatcher.try_dispatch(command, ctx)
    }

    /// Decode and dispatch a wire command.
    pub async fn dispatch_raw(&self, raw: RawCommand) -> DispatchResult {
        self.dispatcher
            .dispatch_raw(raw, CommandContext::default())
            .await
    }

    /// The latest committed state snapshot.
    pub fn state(&self) -> Arc<DashboardState> {
        Arc::clone(&self.state.borrow())
    }

    /// A receiver notified after every commit that changed state.
    pub fn watch_state(&self) -> watch::Receiver<Arc<DashboardState>> {
        self.state.clone()
    }

    /// Evaluate `selector` against the latest snapshot.
    pub fn select<T: Send + Sync + 'static>(&self, selector: &Selector<T>) -> Loadable<Arc<T>> {
        selector.select(&self.state())
    }

    /// Register a synchronous event handler.
    pub fn on<F>(&self, filter: EventFilter, handler: F) -> Subscription
    where
        F: Fn(&DashboardEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.emitter.on(filter, handler)
    }

    /// Stream of every event emitted from now on.
    pub fn events(&self) -> BroadcastStream<DashboardEvent> {
        self.emitter.stream()
    }

    /// Run a data query through the shared cache.
    pub async fn query(&self, spec: QuerySpec) -> QueryResult {
        self.queries.query(spec).await
    }

    /// Register interest in a query; see [`QueryProcessor::subscribe`].
    pub fn subscribe_query(&self, spec: QuerySpec) -> QueryInterest {
        self.queries.subscribe(spec)
    }

    /// The query processor, for cache inspection and invalidation.
    pub fn queries(&self) -> &QueryProcessor {
        &self.queries
    }

    /// Dashboard reference and workspace this handle was opened for.
    pub fn context(&self) -> &DashboardContext {
        &self.context
    }

    /// Stop the command bus once the current command completes.
    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
        tracing::debug!(dashboard = %self.context.dashboard, "dashboard shut down");
    }

    /// Whether the command bus still accepts commands.
    pub fn is_running(&self) -> bool {
        self.dispatcher.is_running()
    }
}

const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Dashboard>();
    assert_send_sync::<DashboardBuilder>();
};
