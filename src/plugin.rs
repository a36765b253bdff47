//! Plugin surface: the registration contract, the fixed customization
//! capabilities a plugin receives, and the registry the bus consults.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;

use crate::bus::{CommandTicket, WeakDispatcher};
use crate::command::{Command, CommandContext, CommandKind};
use crate::emitter::{EventFilter, HandlerResult};
use crate::error::{ConfigError, DispatchError, HandlerError, PluginError, Unmet};
use crate::event::DashboardEvent;
use crate::handlers::Outcome;
use crate::selector::Selector;
use crate::state::{DashboardState, LayoutSection, Loadable, ObjRef, SliceKind};

/// Identity of the dashboard a plugin is registering against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardContext {
    pub dashboard: ObjRef,
    pub workspace: Option<String>,
}

/// A dashboard plugin.
///
/// `register` runs once, while the dashboard is being opened. Everything the
/// plugin contributes goes through `customize` and `handlers`; if `register`
/// fails (or panics) none of it is kept.
pub trait DashboardPlugin: Send + Sync {
    fn display_name(&self) -> &str;

    fn author(&self) -> &str {
        "unknown"
    }

    fn version(&self) -> &str {
        "0.0.0"
    }

    fn register(
        &self,
        ctx: &DashboardContext,
        customize: &mut DashboardCustomizer,
        handlers: &mut EventHandling,
    ) -> Result<(), PluginError>;
}

/// Handler for a plugin-defined command.
///
/// Runs on the bus like a built-in handler: preconditions first, then
/// `handle`, whose patch may only replace the slices listed in
/// `owned_slices`.
pub trait CustomCommandHandler: Send + Sync {
    fn owned_slices(&self) -> &[SliceKind] {
        &[]
    }

    fn validate(&self, _state: &DashboardState, _payload: &Value) -> Result<(), Vec<Unmet>> {
        Ok(())
    }

    fn handle(&self, state: &DashboardState, payload: &Value) -> Result<Outcome, HandlerError>;
}

/// Scratch collection of one plugin's customizations.
#[derive(Default)]
pub struct DashboardCustomizer {
    widget_types: Vec<String>,
    sections: Vec<(usize, LayoutSection)>,
    commands: Vec<(String, Arc<dyn CustomCommandHandler>)>,
}

impl fmt::Debug for DashboardCustomizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DashboardCustomizer")
            .field("widget_types", &self.widget_types)
            .field("sections", &self.sections.len())
            .field(
                "commands",
                &self.commands.iter().map(|(name, _)| name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl DashboardCustomizer {
    /// Register custom widget types.
    pub fn custom_widgets(&mut self) -> CustomWidgetsCustomizer<'_> {
        CustomWidgetsCustomizer { inner: self }
    }

    /// Add sections to the layout produced by `loadDashboard`.
    pub fn layout(&mut self) -> LayoutCustomizer<'_> {
        LayoutCustomizer { inner: self }
    }

    /// Register handlers for plugin-defined commands.
    pub fn commands(&mut self) -> CommandsCustomizer<'_> {
        CommandsCustomizer { inner: self }
    }
}

pub struct CustomWidgetsCustomizer<'a> {
    inner: &'a mut DashboardCustomizer,
}

impl CustomWidgetsCustomizer<'_> {
    /// Allow widgets of `widget_type` in the layout.
    pub fn add_custom_widget(&mut self, widget_type: impl Into<String>) -> &mut Self {
        self.inner.widget_types.push(widget_type.into());
        self
    }
}

pub struct LayoutCustomizer<'a> {
    inner: &'a mut DashboardCustomizer,
}

impl LayoutCustomizer<'_> {
    /// Insert `section` at `index` into every loaded layout. Indices past the
    /// end append.
    pub fn add_section_on_load(&mut self, index: usize, section: LayoutSection) -> &mut Self {
        self.inner.sections.push((index, section));
        self
    }
}

pub struct CommandsCustomizer<'a> {
    inner: &'a mut DashboardCustomizer,
}

impl CommandsCustomizer<'_> {
    /// Handle commands named `name` (dispatched as `Command::Custom` or as a
    /// raw command whose `type` is `name`).
    pub fn add_handler(
        &mut self,
        name: impl Into<String>,
        handler: impl CustomCommandHandler + 'static,
    ) -> &mut Self {
        self.inner.commands.push((name.into(), Arc::new(handler)));
        self
    }
}

/// Event handler registered by a plugin.
pub type ScopedHandler = Arc<dyn Fn(&DashboardEvent, &HandlerScope) -> HandlerResult + Send + Sync>;
type Predicate = Arc<dyn Fn(&DashboardEvent) -> bool + Send + Sync>;

pub(crate) enum Matcher {
    Filter(EventFilter),
    Predicate(Predicate),
}

impl Matcher {
    pub(crate) fn matches(&self, event: &DashboardEvent) -> bool {
        match self {
            Self::Filter(filter) => filter.matches(event),
            Self::Predicate(predicate) => predicate(event),
        }
    }
}

/// Scratch collection of one plugin's event handlers.
#[derive(Default)]
pub struct EventHandling {
    pub(crate) handlers: Vec<(Matcher, ScopedHandler)>,
}

impl fmt::Debug for EventHandling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandling")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl EventHandling {
    /// Call `handler` for every event matching `filter`.
    pub fn add_event_handler<F>(&mut self, filter: EventFilter, handler: F) -> &mut Self
    where
        F: Fn(&DashboardEvent, &HandlerScope) -> HandlerResult + Send + Sync + 'static,
    {
        self.handlers.push((Matcher::Filter(filter), Arc::new(handler)));
        self
    }

    /// Register a handler for every event `predicate` accepts.
    pub fn add_custom_event_handler<P, F>(&mut self, predicate: P, handler: F) -> &mut Self
    where
        P: Fn(&DashboardEvent) -> bool + Send + Sync + 'static,
        F: Fn(&DashboardEvent, &HandlerScope) -> HandlerResult + Send + Sync + 'static,
    {
        self.handlers
            .push((Matcher::Predicate(Arc::new(predicate)), Arc::new(handler)));
        self
    }
}

/// What a plugin event handler can reach: non-blocking dispatch and the
/// current state snapshot.
#[derive(Clone)]
pub struct HandlerScope {
    dispatcher: WeakDispatcher,
    state: watch::Receiver<Arc<DashboardState>>,
}

impl fmt::Debug for HandlerScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerScope").finish_non_exhaustive()
    }
}

impl HandlerScope {
    pub(crate) fn new(dispatcher: WeakDispatcher, state: watch::Receiver<Arc<DashboardState>>) -> Self {
        Self { dispatcher, state }
    }

    /// Queue a command without waiting. The command runs after the one
    /// currently being processed.
    ///
    /// # Errors
    ///
    /// [`DispatchError::QueueFull`] or [`DispatchError::BusGone`].
    pub fn try_dispatch(
        &self,
        command: Command,
        ctx: CommandContext,
    ) -> Result<CommandTicket, DispatchError> {
        self.dispatcher.try_dispatch(command, ctx)
    }

    /// The latest committed snapshot.
    pub fn state(&self) -> Arc<DashboardState> {
        Arc::clone(&self.state.borrow())
    }

    /// Run `selector` against the latest snapshot.
    pub fn select<T: Send + Sync + 'static>(&self, selector: &Selector<T>) -> Loadable<Arc<T>> {
        selector.select(&self.state())
    }
}

/// Everything plugins and the builder contributed, frozen at open time.
#[derive(Default)]
pub(crate) struct Extensions {
    widget_types: BTreeSet<String>,
    sections: Vec<(usize, LayoutSection)>,
    command_handlers: BTreeMap<String, Arc<dyn CustomCommandHandler>>,
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extensions")
            .field("widget_types", &self.widget_types)
            .field("sections", &self.sections.len())
            .field("command_handlers", &self.command_handlers.keys())
            .finish()
    }
}

impl Extensions {
    pub(crate) fn has_widget_type(&self, widget_type: &str) -> bool {
        self.widget_types.contains(widget_type)
    }

    pub(crate) fn layout_sections(&self) -> &[(usize, LayoutSection)] {
        &self.sections
    }

    pub(crate) fn command_handler(&self, name: &str) -> Option<&Arc<dyn CustomCommandHandler>> {
        self.command_handlers.get(name)
    }

    pub(crate) fn has_command(&self, name: &str) -> bool {
        self.command_handlers.contains_key(name)
    }

    pub(crate) fn add_command_handler(
        &mut self,
        name: String,
        handler: Arc<dyn CustomCommandHandler>,
    ) -> Result<(), ConfigError> {
        check_command_name(&name)?;
        if self.command_handlers.contains_key(&name) {
            return Err(ConfigError::DuplicateCommandHandler(name));
        }
        self.command_handlers.insert(name, handler);
        Ok(())
    }

    /// Merge one plugin's scratch customizer, all or nothing.
    pub(crate) fn merge(&mut self, scratch: DashboardCustomizer) -> Result<(), ConfigError> {
        let mut widget_types = BTreeSet::new();
        for widget_type in &scratch.widget_types {
            if self.widget_types.contains(widget_type) || !widget_types.insert(widget_type) {
                return Err(ConfigError::DuplicateWidgetType(widget_type.clone()));
            }
        }
        let mut names = BTreeSet::new();
        for (name, _) in &scratch.commands {
            check_command_name(name)?;
            if self.command_handlers.contains_key(name) || !names.insert(name) {
                return Err(ConfigError::DuplicateCommandHandler(name.clone()));
            }
        }

        self.widget_types.extend(scratch.widget_types);
        self.sections.extend(scratch.sections);
        self.command_handlers.extend(scratch.commands);
        Ok(())
    }
}

fn check_command_name(name: &str) -> Result<(), ConfigError> {
    if CommandKind::parse(name).is_some() {
        return Err(ConfigError::ReservedCommandName(name.to_string()));
    }
    Ok(())
}
