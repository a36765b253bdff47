//! Crate-level error types for command dispatch, query processing and setup.

use std::fmt;

use crate::event::FailureReason;
use crate::state::{ObjRef, SliceKind};

/// Error returned to the dispatcher of a command.
///
/// Every variant except [`DispatchError::QueueFull`] and
/// [`DispatchError::BusGone`] is also surfaced as a `commandRejected` or
/// `commandFailed` event carrying the command's correlation id.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The command type is not registered with the bus.
    ///
    /// Only raw wire commands and custom commands without a registered
    /// handler can produce this; typed built-in commands are always known.
    #[error("unknown command type `{0}`")]
    UnknownCommand(String),

    /// One or more preconditions were not met; no handler ran.
    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    /// The handler ran and failed; no state was committed.
    #[error("command handler failed: {0}")]
    HandlerExecution(#[from] HandlerError),

    /// The command queue is at capacity.
    ///
    /// Only returned by the non-blocking `try_dispatch`.
    #[error("command queue is full")]
    QueueFull,

    /// The bus actor has shut down, so no further commands can be processed.
    #[error("command bus is no longer running")]
    BusGone,
}

/// Every precondition a command failed, collected before the handler runs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub struct PreconditionError {
    /// Wire type of the rejected command.
    pub command_type: String,
    /// The unmet preconditions, in check order. Never empty.
    pub unmet: Vec<Unmet>,
}

impl PreconditionError {
    /// Rejection of `command_type` for every precondition in `unmet`.
    pub fn new(command_type: impl Into<String>, unmet: Vec<Unmet>) -> Self {
        Self {
            command_type: command_type.into(),
            unmet,
        }
    }

    /// Human readable reasons, one per unmet precondition.
    pub fn reasons(&self) -> Vec<String> {
        self.unmet.iter().map(ToString::to_string).collect()
    }
}

impl fmt::Display for PreconditionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "command `{}` rejected: ", self.command_type)?;
        for (i, unmet) in self.unmet.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{unmet}")?;
        }
        Ok(())
    }
}

/// A single unmet precondition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Unmet {
    #[error("{0} slice is not loaded")]
    NotLoaded(SliceKind),

    #[error("attribute filter `{0}` does not exist")]
    FilterNotFound(String),

    #[error("display form {0} is already filtered")]
    AlreadyFiltered(ObjRef),

    #[error("filter context already holds the maximum of {max} attribute filters")]
    TooManyFilters { max: usize },

    #[error("{what} index {index} is out of range (length {len})")]
    IndexOutOfRange {
        what: &'static str,
        index: usize,
        len: usize,
    },

    #[error("relative date range is inverted: from {from} > to {to}")]
    InvertedDateRange { from: i32, to: i32 },

    #[error("{0} must not be blank")]
    Blank(&'static str),

    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("widget `{0}` does not exist")]
    WidgetNotFound(String),

    #[error("widget `{0}` already exists")]
    DuplicateWidget(String),

    #[error("custom widget type `{0}` is not registered")]
    UnregisteredWidgetType(String),

    #[error("widget `{widget}` has invalid width {width}")]
    InvalidItemSize { widget: String, width: u32 },

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// A precondition declared by a plugin command handler.
    #[error("{0}")]
    Custom(String),
}

/// Failure raised while a command handler runs.
///
/// `Clone` so that the same failure can be both returned to the dispatcher
/// and described in the `commandFailed` event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    /// The backend collaborator failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The command was cancelled through its ticket.
    #[error("command was cancelled")]
    Cancelled,

    /// The handler produced a patch touching slices its command does not own.
    ///
    /// This is a programming error in the handler; the patch is discarded.
    #[error("handler patched slices it does not own: {0:?}")]
    UndeclaredSlice(Vec<SliceKind>),

    /// Handler-specific failure, typically from a plugin command handler.
    #[error("{0}")]
    Custom(String),
}

impl HandlerError {
    /// A free-form handler failure.
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom(message.into())
    }

    /// Classification reported in the `commandFailed` event.
    pub fn reason(&self) -> FailureReason {
        match self {
            Self::Transport(_) => FailureReason::Transport,
            Self::Cancelled => FailureReason::Cancelled,
            Self::UndeclaredSlice(_) => FailureReason::UndeclaredSlice,
            Self::Custom(_) => FailureReason::HandlerError,
        }
    }
}

/// Failure reported by a [`Backend`](crate::Backend).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend request failed: {0}")]
    Failed(String),
}

/// Failure of a deduplicated query.
///
/// `Clone` because every subscriber of the same signature receives the same
/// error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The in-flight fetch ended without producing a result.
    #[error("query execution was interrupted")]
    Interrupted,
}

/// Invalid setup detected while opening a dashboard.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("custom command handler `{0}` is registered more than once")]
    DuplicateCommandHandler(String),

    #[error("custom command name `{0}` collides with a built-in command")]
    ReservedCommandName(String),

    #[error("custom widget type `{0}` is registered more than once")]
    DuplicateWidgetType(String),

    #[error("bus queue capacity must be at least 1")]
    ZeroQueueCapacity,
}

/// Failure reported by a plugin's `register`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct PluginError(pub String);

impl PluginError {
    /// Failure with a human-readable `message`.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Error returned by [`DashboardBuilder::open`](crate::DashboardBuilder::open).
#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The initial `loadDashboard` command failed.
    #[error("initial dashboard load failed: {0}")]
    Load(#[source] DispatchError),
}
