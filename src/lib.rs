//! Command and event core of an analytics dashboard.
//!
//! A [`Dashboard`] owns a normalized, slice-partitioned [`DashboardState`]
//! that only its command bus mutates. Callers dispatch typed [`Command`]s (or
//! wire-level [`RawCommand`]s), observe the resulting [`DashboardEvent`]s,
//! derive values from state through memoized [`Selector`]s, and run data
//! queries through a deduplicating [`QueryProcessor`]. [`DashboardPlugin`]s
//! extend the dashboard at open time.

mod backend;
mod bus;
mod command;
mod config;
mod dashboard;
mod emitter;
mod error;
mod event;
mod handlers;
mod plugin;
mod query;
mod selector;
mod state;

pub use backend::{Backend, BackendFuture, InMemoryBackend, LoadedDashboard};
pub use bus::{CommandTicket, DispatchResult, Dispatcher};
pub use command::{CancelFlag, Command, CommandContext, CommandKind, CommandPhase, RawCommand};
pub use config::{BusConfig, ConfigOverrides, QueryConfig};
pub use dashboard::{Dashboard, DashboardBuilder};
pub use emitter::{DeliveryFailure, EventEmitter, EventFilter, HandlerResult, Subscription};
pub use error::{
    ConfigError, DispatchError, HandlerError, OpenError, PluginError, PreconditionError,
    QueryError, TransportError, Unmet,
};
pub use event::{DashboardEvent, EventBody, FailureReason, RejectionKind, WireEvent};
pub use handlers::Outcome;
pub use plugin::{
    CommandsCustomizer, CustomCommandHandler, CustomWidgetsCustomizer, DashboardContext,
    DashboardCustomizer, DashboardPlugin, EventHandling, HandlerScope, LayoutCustomizer,
    ScopedHandler,
};
pub use query::{
    QueryEntryInfo, QueryInterest, QueryProcessor, QueryResult, QuerySignature, QuerySpec,
    QueryStatus,
};
pub use selector::{Selector, selectors};
pub use state::{
    AlertCondition, AlertsState, AttributeElements, AttributeFilter, CatalogAttribute,
    CatalogDateDataset, CatalogFact, CatalogMeasure, CatalogState, ConfigState, DashboardMeta,
    DashboardState, DateFilter, DateFilterSelection, FilterContextItem, FilterContextState,
    Fingerprint, GRID_COLUMNS, InsightSummary, InsightsState, ItemSize, KpiAlert, LayoutItem,
    LayoutSection, LayoutState, Loadable, LoadingState, MAX_ATTRIBUTE_FILTERS, ObjRef,
    PermissionsState, SectionHeader, SelectionMode, Separators, Slice, SliceKind, StatePatch,
    UserState, Widget, WidgetKind,
};
