//! Command bus: a single actor task that owns the state tree.
//!
//! Commands arrive over a bounded `mpsc` channel and are processed strictly
//! one at a time: validate against the current snapshot, run the handler,
//! commit its patch, emit the outcome event, reply. A command that awaits
//! backend work holds the bus; later commands wait in the queue and are
//! never dropped.
//!
//! Public API: [`Dispatcher`] (cloneable sending side) and
//! [`CommandTicket`] (per-command status and outcome).

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::Instrument;

use crate::backend::Backend;
use crate::command::{CancelFlag, Command, CommandContext, CommandPhase, RawCommand};
use crate::config::{BusConfig, ConfigOverrides};
use crate::emitter::EventEmitter;
use crate::error::{DispatchError, HandlerError};
use crate::event::{DashboardEvent, EventBody, RejectionKind};
use crate::handlers::{self, HandlerContext, Outcome};
use crate::plugin::Extensions;
use crate::state::{DashboardState, ObjRef};

/// What a dispatcher eventually receives for one command.
pub type DispatchResult = Result<DashboardEvent, DispatchError>;

/// A wire command that failed to decode. It is still queued so that its
/// rejection is ordered with the caller's other commands.
pub(crate) struct Undecoded {
    command_type: String,
    error: DispatchError,
}

/// A command queued for the bus together with its reply channels.
pub(crate) struct Envelope {
    command: Result<Command, Undecoded>,
    correlation_id: String,
    actor: Option<String>,
    metadata: Option<Value>,
    phase: watch::Sender<CommandPhase>,
    cancel: CancelFlag,
    reply: oneshot::Sender<DispatchResult>,
}

/// Messages consumed by the bus loop.
pub(crate) enum BusMessage {
    Dispatch(Box<Envelope>),
    /// Stop after the command currently being processed. Commands still in
    /// the queue are dropped and their tickets resolve to `BusGone`.
    Shutdown,
}

/// Everything the bus task owns.
/// Correlation data stamped on every event one command produces.
struct Origin {
    correlation_id: Option<String>,
    metadata: Option<Value>,
}

impl Origin {
    fn event(&self, body: EventBody) -> DashboardEvent {
        DashboardEvent::new(body, self.correlation_id.clone()).with_metadata(self.metadata.clone())
    }
}

impl Envelope {
    fn command_type(&self) -> &str {
        match &self.command {
            Ok(command) => command.type_name(),
            Err(undecoded) => &undecoded.command_type,
        }
    }
}

pub(crate) struct BusCore {
    pub(crate) state: watch::Sender<Arc<DashboardState>>,
    pub(crate) emitter: EventEmitter,
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) extensions: Arc<Extensions>,
    pub(crate) config: BusConfig,
    pub(crate) dashboard: ObjRef,
    pub(crate) overrides: Option<ConfigOverrides>,
}

/// Start the bus loop on the current runtime.
///
/// The task runs until [`Dispatcher::shutdown`] or until the last strong
/// dispatcher is dropped.
pub(crate) fn spawn_bus(core: BusCore) -> Dispatcher {
    let (sender, rx) = mpsc::channel(core.config.queue_capacity.max(1));
    let dispatcher = Dispatcher {
        sender,
        extensions: Arc::clone(&core.extensions),
    };
    tokio::spawn(run_bus(core, rx));
    dispatcher
}

/// Processes queued commands until shutdown or until every dispatcher is
/// dropped.
async fn run_bus(core: BusCore, mut rx: mpsc::Receiver<BusMessage>) {
    while let Some(message) = rx.recv().await {
        match message {
            BusMessage::Dispatch(envelope) => {
                let span = tracing::info_span!(
                    "command",
                    command_type = %envelope.command_type(),
                    correlation_id = %envelope.correlation_id,
                    actor = envelope.actor.as_deref().unwrap_or("-"),
                );
                core.process(*envelope).instrument(span).await;
            }
            BusMessage::Shutdown => break,
        }
    }
    tracing::debug!(dashboard = %core.dashboard, "command bus stopped");
}

impl BusCore {
    async fn process(&self, envelope: Envelope) {
        let command_type = envelope.command_type().to_string();
        let Envelope {
            command,
            correlation_id,
            actor: _,
            metadata,
            phase,
            cancel,
            reply,
        } = envelope;
        let origin = Origin {
            correlation_id: Some(correlation_id),
            metadata,
        };

        phase.send_replace(CommandPhase::Validating);
        if self.config.emit_command_started {
            self.emit(
                EventBody::CommandStarted {
                    command_type: command_type.clone(),
                },
                &origin,
            );
        }

        let command = match command {
            Ok(command) => command,
            Err(undecoded) => {
                return self.reject(&command_type, undecoded.error, &origin, &phase, reply);
            }
        };

        if let Command::Custom { name, .. } = &command
            && !self.extensions.has_command(name)
        {
            let err = DispatchError::UnknownCommand(name.clone());
            return self.reject(&command_type, err, &origin, &phase, reply);
        }

        let snapshot = Arc::clone(&self.state.borrow());
        if let Err(precondition) = handlers::validate(&command, &snapshot, &self.extensions) {
            let err = DispatchError::Precondition(precondition);
            return self.reject(&command_type, err, &origin, &phase, reply);
        }

        phase.send_replace(CommandPhase::Handling);
        let ctx = HandlerContext {
            backend: self.backend.as_ref(),
            dashboard: &self.dashboard,
            cancel: &cancel,
            extensions: &self.extensions,
            overrides: self.overrides.as_ref(),
        };
        let handled = match cancel.check() {
            Ok(()) => handlers::handle(&command, &snapshot, &ctx).await,
            Err(e) => Err(e),
        };
        let Outcome { patch, event } = match handled {
            Ok(outcome) => outcome,
            Err(e) => return self.fail(&command_type, e, &origin, &phase, reply),
        };

        phase.send_replace(CommandPhase::Committing);
        let next = match handlers::owned_slices(&command, &self.extensions)
            .and_then(|owned| snapshot.apply_patch(patch, &owned))
        {
            Ok(next) => next,
            Err(e) => return self.fail(&command_type, e, &origin, &phase, reply),
        };
        let changed = !Arc::ptr_eq(&snapshot, &next);
        if changed {
            self.state.send_replace(next);
        }
        phase.send_replace(CommandPhase::Committed);
        tracing::info!(event = event.event_type(), changed, "command committed");

        let event = origin.event(event);
        self.emitter.emit(&event);
        let _ = reply.send(Ok(event));
    }

    fn fail(
        &self,
        command_type: &str,
        error: HandlerError,
        origin: &Origin,
        phase: &watch::Sender<CommandPhase>,
        reply: oneshot::Sender<DispatchResult>,
    ) {
        phase.send_replace(CommandPhase::Failed);
        tracing::error!(error = %error, "command failed");
        self.emit(
            EventBody::CommandFailed {
                command_type: command_type.to_string(),
                reason: error.reason(),
                message: error.to_string(),
            },
            origin,
        );
        let _ = reply.send(Err(DispatchError::HandlerExecution(error)));
    }

    fn reject(
        &self,
        command_type: &str,
        error: DispatchError,
        origin: &Origin,
        phase: &watch::Sender<CommandPhase>,
        reply: oneshot::Sender<DispatchResult>,
    ) {
        phase.send_replace(CommandPhase::Rejected);
        tracing::warn!(error = %error, "command rejected");
        if let Some(body) = rejection(command_type, &error) {
            self.emit(body, origin);
        }
        let _ = reply.send(Err(error));
    }

    fn emit(&self, body: EventBody, origin: &Origin) {
        self.emitter.emit(&origin.event(body));
    }
}

/// The `commandRejected` event describing `error`, for the errors that
/// have one.
fn rejection(command_type: &str, error: &DispatchError) -> Option<EventBody> {
    let (kind, reasons) = match error {
        DispatchError::UnknownCommand(_) => (RejectionKind::UnknownCommand, vec![error.to_string()]),
        DispatchError::Precondition(precondition) => {
            (RejectionKind::Precondition, precondition.reasons())
        }
        _ => return None,
    };
    Some(EventBody::CommandRejected {
        command_type: command_type.to_string(),
        error: kind,
        reasons,
    })
}

/// Status and outcome of one dispatched command.
///
/// Dropping the ticket does not cancel the command; it still runs and its
/// events are still emitted.
pub struct CommandTicket {
    correlation_id: String,
    phase: watch::Receiver<CommandPhase>,
    cancel: CancelFlag,
    reply: oneshot::Receiver<DispatchResult>,
}

impl fmt::Debug for CommandTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandTicket")
            .field("correlation_id", &self.correlation_id)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl CommandTicket {
    /// Correlation id carried by every event this command produces.
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// The processing phase the command has reached.
    pub fn phase(&self) -> CommandPhase {
        *self.phase.borrow()
    }

    /// Request cooperative cancellation.
    ///
    /// Takes effect only if the bus has not yet committed the command: it
    /// is checked before the handler runs and after each suspension point
    /// of long-running handlers. A cancelled command fails with
    /// [`HandlerError::Cancelled`].
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the command's terminal outcome.
    ///
    /// # Returns
    ///
    /// The success event on commit.
    ///
    /// # Errors
    ///
    /// * [`DispatchError::UnknownCommand`] / [`DispatchError::Precondition`]
    ///   -- the command was rejected before its handler ran.
    /// * [`DispatchError::HandlerExecution`] -- the handler failed or was
    ///   cancelled.
    /// * [`DispatchError::BusGone`] -- the bus stopped before answering.
    pub async fn outcome(self) -> DispatchResult {
        self.reply.await.map_err(|_| DispatchError::BusGone)?
    }
}

fn envelope(
    command: Result<Command, Undecoded>,
    mut ctx: CommandContext,
) -> (BusMessage, CommandTicket) {
    let correlation_id = ctx.ensure_correlation_id();
    let (phase_tx, phase_rx) = watch::channel(CommandPhase::Dispatched);
    let (reply_tx, reply_rx) = oneshot::channel();
    let cancel = CancelFlag::default();
    let envelope = Envelope {
        command,
        correlation_id: correlation_id.clone(),
        actor: ctx.actor,
        metadata: ctx.metadata,
        phase: phase_tx,
        cancel: cancel.clone(),
        reply: reply_tx,
    };
    let ticket = CommandTicket {
        correlation_id,
        phase: phase_rx,
        cancel,
        reply: reply_rx,
    };
    (BusMessage::Dispatch(Box::new(envelope)), ticket)
}

fn try_enqueue(
    sender: &mpsc::Sender<BusMessage>,
    command: Command,
    ctx: CommandContext,
) -> Result<CommandTicket, DispatchError> {
    let (message, ticket) = envelope(Ok(command), ctx);
    sender.try_send(message).map_err(|e| match e {
        mpsc::error::TrySendError::Full(_) => DispatchError::QueueFull,
        mpsc::error::TrySendError::Closed(_) => DispatchError::BusGone,
    })?;
    Ok(ticket)
}

/// Sending side of the command bus.
///
/// Cheap to clone; every clone feeds the same queue, so commands sent
/// through one dispatcher are processed in the order they were sent.
#[derive(Clone)]
pub struct Dispatcher {
    sender: mpsc::Sender<BusMessage>,
    extensions: Arc<Extensions>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Queue a command, waiting for room if the queue is full.
    ///
    /// Returns as soon as the command is queued; observe its completion
    /// through the ticket or the event stream.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::BusGone`] if the bus has stopped.
    pub async fn dispatch_command(
        &self,
        command: Command,
        ctx: CommandContext,
    ) -> Result<CommandTicket, DispatchError> {
        self.enqueue(Ok(command), ctx).await
    }

    async fn enqueue(
        &self,
        command: Result<Command, Undecoded>,
        ctx: CommandContext,
    ) -> Result<CommandTicket, DispatchError> {
        let (message, ticket) = envelope(command, ctx);
        self.sender
            .send(message)
            .await
            .map_err(|_| DispatchError::BusGone)?;
        Ok(ticket)
    }

    /// Queue a command without waiting.
    ///
    /// Safe to call from synchronous code, including event handlers running
    /// on the bus itself: the command is processed after the current one.
    ///
    /// # Errors
    ///
    /// * [`DispatchError::QueueFull`] -- the queue is at capacity.
    /// * [`DispatchError::BusGone`] -- the bus has stopped.
    pub fn try_dispatch(
        &self,
        command: Command,
        ctx: CommandContext,
    ) -> Result<CommandTicket, DispatchError> {
        try_enqueue(&self.sender, command, ctx)
    }

    /// Dispatch a command and wait for its outcome.
    pub async fn dispatch(&self, command: Command, ctx: CommandContext) -> DispatchResult {
        self.dispatch_command(command, ctx).await?.outcome().await
    }

    /// Decode and dispatch a wire command.
    ///
    /// A command that does not decode is still queued, and the bus rejects
    /// it in turn with a `commandRejected` event. The raw command's
    /// correlation id, when present, takes precedence over the one in `ctx`.
    pub async fn dispatch_raw(&self, raw: RawCommand, mut ctx: CommandContext) -> DispatchResult {
        if let Some(id) = &raw.correlation_id {
            ctx.correlation_id = Some(id.clone());
        }
        let command = raw
            .decode(|name| self.extensions.has_command(name))
            .map_err(|error| Undecoded {
                command_type: raw.command_type.clone(),
                error,
            });
        self.enqueue(command, ctx).await?.outcome().await
    }

    /// Ask the bus to stop once the current command completes, and wait
    /// until it has.
    pub async fn shutdown(&self) {
        // Already stopped is fine.
        let _ = self.sender.send(BusMessage::Shutdown).await;
        self.sender.closed().await;
    }

    pub(crate) fn downgrade(&self) -> WeakDispatcher {
        WeakDispatcher {
            sender: self.sender.downgrade(),
        }
    }

    /// Whether the bus task is still accepting commands.
    pub fn is_running(&self) -> bool {
        !self.sender.is_closed()
    }
}

/// Dispatcher that does not keep the bus alive.
///
/// Held by plugin event handlers, which live inside the emitter the bus
/// itself owns.
#[derive(Clone)]
pub(crate) struct WeakDispatcher {
    sender: mpsc::WeakSender<BusMessage>,
}

impl WeakDispatcher {
    pub(crate) fn try_dispatch(
        &self,
        command: Command,
        ctx: CommandContext,
    ) -> Result<CommandTicket, DispatchError> {
        let sender = self.sender.upgrade().ok_or(DispatchError::BusGone)?;
        try_enqueue(&sender, command, ctx)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::backend::test_fixtures::{sales_backend, sales_ref};
    use crate::emitter::EventFilter;
    use crate::error::{TransportError, Unmet};
    use crate::state::{AttributeElements, SelectionMode};

    struct Bus {
        dispatcher: Dispatcher,
        state: watch::Receiver<Arc<DashboardState>>,
        events: Arc<Mutex<Vec<DashboardEvent>>>,
    }

    fn start(backend: InMemoryBackend, config: BusConfig) -> Bus {
        let (state_tx, state_rx) = watch::channel(Arc::new(DashboardState::default()));
        let emitter = EventEmitter::new(16);
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        emitter.on(EventFilter::All, move |event| {
            sink.lock().expect("lock").push(event.clone());
            Ok(())
        });
        let dispatcher = spawn_bus(BusCore {
            state: state_tx,
            emitter,
            backend: Arc::new(backend),
            extensions: Arc::new(Extensions::default()),
            config,
            dashboard: sales_ref(),
            overrides: None,
        });
        Bus {
            dispatcher,
            state: state_rx,
            events,
        }
    }

    fn event_types(bus: &Bus) -> Vec<&'static str> {
        bus.events
            .lock()
            .expect("lock")
            .iter()
            .map(DashboardEvent::event_type)
            .collect()
    }

    #[tokio::test]
    async fn load_then_change_selection() {
        let bus = start(sales_backend(), BusConfig::default());
        bus.dispatcher
            .dispatch(Command::LoadDashboard, CommandContext::default())
            .await
            .expect("load should succeed");

        let event = bus
            .dispatcher
            .dispatch(
                Command::change_attribute_filter_selection(
                    "filter1",
                    AttributeElements::uris(["u1"]),
                    SelectionMode::In,
                ),
                CommandContext::default().with_correlation_id("c-1"),
            )
            .await
            .expect("change should succeed");
        assert_eq!(event.event_type(), "filterSelectionChanged");
        assert_eq!(event.correlation_id(), Some("c-1"));

        let state = Arc::clone(&bus.state.borrow());
        let filter = state
            .filter_context()
            .get()
            .and_then(|ctx| ctx.attribute_filter("filter1"))
            .expect("filter1");
        assert_eq!(filter.mode, SelectionMode::In);
        assert_eq!(event_types(&bus), ["dashboardLoaded", "filterSelectionChanged"]);
    }

    #[tokio::test]
    async fn rejected_command_leaves_state_untouched() {
        let bus = start(sales_backend(), BusConfig::default());
        bus.dispatcher
            .dispatch(Command::LoadDashboard, CommandContext::default())
            .await
            .expect("load");
        let before = Arc::clone(&bus.state.borrow());

        let result = bus
            .dispatcher
            .dispatch(
                Command::reset_attribute_filter_selection("nope"),
                CommandContext::default().with_correlation_id("c-2"),
            )
            .await;
        assert!(
            matches!(&result, Err(DispatchError::Precondition(e)) if e.unmet == vec![Unmet::FilterNotFound("nope".into())]),
            "got: {result:?}"
        );
        assert!(Arc::ptr_eq(&before, &bus.state.borrow()));

        let events = bus.events.lock().expect("lock");
        let last = events.last().expect("rejection event");
        assert_eq!(last.correlation_id(), Some("c-2"));
        assert!(matches!(
            last.body,
            EventBody::CommandRejected {
                error: RejectionKind::Precondition,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn transport_failure_emits_command_failed() {
        let backend = sales_backend();
        backend.fail_next_loads(1, TransportError::Unavailable("down".into()));
        let bus = start(backend, BusConfig::default());

        let ticket = bus
            .dispatcher
            .dispatch_command(Command::LoadDashboard, CommandContext::default())
            .await
            .expect("queued");
        let correlation_id = ticket.correlation_id().to_string();
        let result = ticket.outcome().await;
        assert!(
            matches!(
                result,
                Err(DispatchError::HandlerExecution(HandlerError::Transport(_)))
            ),
            "got: {result:?}"
        );
        assert!(!bus.state.borrow().is_loaded(crate::state::SliceKind::Layout));

        let events = bus.events.lock().expect("lock");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].correlation_id(), Some(correlation_id.as_str()));
        assert_eq!(events[0].event_type(), "commandFailed");
    }

    #[tokio::test]
    async fn commands_run_in_submission_order() {
        let backend = sales_backend().with_latency(Duration::from_millis(20));
        let bus = start(backend, BusConfig::default());

        let load = bus
            .dispatcher
            .try_dispatch(Command::LoadDashboard, CommandContext::default())
            .expect("queue load");
        // Queued behind the load, so its precondition sees loaded state.
        let rename = bus
            .dispatcher
            .try_dispatch(Command::rename_dashboard("Renamed"), CommandContext::default())
            .expect("queue rename");
        assert_eq!(rename.phase(), CommandPhase::Dispatched);

        load.outcome().await.expect("load");
        rename.outcome().await.expect("rename");
        assert_eq!(event_types(&bus), ["dashboardLoaded", "dashboardRenamed"]);
    }

    #[tokio::test]
    async fn full_queue_is_reported() {
        let bus = start(
            sales_backend(),
            BusConfig {
                queue_capacity: 1,
                ..BusConfig::default()
            },
        );
        let _first = bus
            .dispatcher
            .try_dispatch(Command::LoadDashboard, CommandContext::default())
            .expect("first fits");
        let second = bus
            .dispatcher
            .try_dispatch(Command::LoadDashboard, CommandContext::default());
        assert!(matches!(second, Err(DispatchError::QueueFull)), "got: {second:?}");
    }

    #[tokio::test]
    async fn cancelled_before_handling() {
        let bus = start(sales_backend(), BusConfig::default());
        let ticket = bus
            .dispatcher
            .try_dispatch(Command::LoadDashboard, CommandContext::default())
            .expect("queued");
        ticket.cancel();
        let result = ticket.outcome().await;
        assert!(
            matches!(result, Err(DispatchError::HandlerExecution(HandlerError::Cancelled))),
            "got: {result:?}"
        );
        assert_eq!(event_types(&bus), ["commandFailed"]);
    }

    #[tokio::test]
    async fn command_started_is_opt_in() {
        let bus = start(
            sales_backend(),
            BusConfig {
                emit_command_started: true,
                ..BusConfig::default()
            },
        );
        bus.dispatcher
            .dispatch(Command::LoadDashboard, CommandContext::default())
            .await
            .expect("load");
        assert_eq!(event_types(&bus), ["commandStarted", "dashboardLoaded"]);
    }

    #[tokio::test]
    async fn malformed_raw_command_is_rejected_in_queue_order() {
        let bus = start(
            sales_backend().with_latency(Duration::from_millis(30)),
            BusConfig::default(),
        );
        let load = bus
            .dispatcher
            .dispatch_command(Command::LoadDashboard, CommandContext::default())
            .await
            .expect("queued");
        let raw = RawCommand::new("renameDashboard", serde_json::json!({"title": 5}))
            .with_correlation_id("raw-1");
        let result = bus.dispatcher.dispatch_raw(raw, CommandContext::default()).await;
        assert!(matches!(result, Err(DispatchError::Precondition(_))), "got: {result:?}");
        load.outcome().await.expect("load");

        assert_eq!(event_types(&bus), ["dashboardLoaded", "commandRejected"]);
        let events = bus.events.lock().expect("lock");
        assert_eq!(events[1].correlation_id(), Some("raw-1"));
    }

    #[tokio::test]
    async fn context_metadata_rides_on_every_outcome_event() {
        let bus = start(sales_backend(), BusConfig::default());
        let meta = serde_json::json!({"source": "toolbar"});
        let ctx = CommandContext::default().with_metadata(meta.clone());

        let loaded = bus
            .dispatcher
            .dispatch(Command::LoadDashboard, ctx.clone())
            .await
            .expect("load");
        assert_eq!(loaded.metadata.as_ref(), Some(&meta));

        let result = bus
            .dispatcher
            .dispatch(Command::reset_attribute_filter_selection("missing"), ctx)
            .await;
        assert!(matches!(result, Err(DispatchError::Precondition(_))), "got: {result:?}");

        let events = bus.events.lock().expect("lock");
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.metadata.as_ref() == Some(&meta)));

        drop(events);
        let renamed = bus
            .dispatcher
            .dispatch(Command::rename_dashboard("Plain"), CommandContext::default())
            .await
            .expect("rename");
        assert!(renamed.metadata.is_none());
    }

    #[tokio::test]
    async fn shutdown_stops_the_bus() {
        let bus = start(sales_backend(), BusConfig::default());
        bus.dispatcher.shutdown().await;
        assert!(!bus.dispatcher.is_running());
        let result = bus
            .dispatcher
            .dispatch(Command::LoadDashboard, CommandContext::default())
            .await;
        assert!(matches!(result, Err(DispatchError::BusGone)), "got: {result:?}");
    }

    #[tokio::test]
    async fn weak_dispatcher_does_not_keep_the_bus_alive() {
        let bus = start(sales_backend(), BusConfig::default());
        let weak = bus.dispatcher.downgrade();
        weak.try_dispatch(Command::LoadDashboard, CommandContext::default())
            .expect("bus is alive")
            .outcome()
            .await
            .expect("load");

        drop(bus.dispatcher);
        tokio::time::sleep(Duration::from_millis(10)).await;
        let result = weak.try_dispatch(Command::LoadDashboard, CommandContext::default());
        assert!(matches!(result, Err(DispatchError::BusGone)), "got: {result:?}");
    }
}
