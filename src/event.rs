//! Dashboard events: typed bodies, the correlated envelope, and the
//! `{ type, correlationId, payload }` wire form.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::state::{
    AttributeFilter, DateFilterSelection, LayoutItem, LayoutSection, ObjRef,
};

/// Why a command was rejected before its handler ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectionKind {
    #[serde(rename = "UnknownCommandError")]
    UnknownCommand,
    #[serde(rename = "CommandPreconditionError")]
    Precondition,
}

/// Why a command failed after its handler started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureReason {
    Transport,
    Cancelled,
    UndeclaredSlice,
    HandlerError,
}

/// Typed event body.
///
/// Adjacently tagged, so serializing a body yields `{"type": ..., "payload":
/// {...}}`; the envelope adds the correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum EventBody {
    CommandStarted {
        command_type: String,
    },
    CommandRejected {
        command_type: String,
        error: RejectionKind,
        reasons: Vec<String>,
    },
    CommandFailed {
        command_type: String,
        reason: FailureReason,
        message: String,
    },
    DashboardLoaded {
        dashboard: ObjRef,
        title: String,
        filter_count: usize,
        section_count: usize,
    },
    FilterSelectionChanged {
        filter: AttributeFilter,
    },
    DateFilterSelectionChanged {
        selection: Option<DateFilterSelection>,
    },
    AttributeFilterAdded {
        filter: AttributeFilter,
        index: usize,
    },
    AttributeFiltersRemoved {
        filters: Vec<AttributeFilter>,
    },
    LayoutSectionAdded {
        index: usize,
        section: LayoutSection,
    },
    LayoutSectionRemoved {
        index: usize,
        section: LayoutSection,
    },
    LayoutSectionItemsAdded {
        section_index: usize,
        item_index: usize,
        items: Vec<LayoutItem>,
    },
    LayoutSectionItemRemoved {
        section_index: usize,
        item_index: usize,
        item: LayoutItem,
    },
    WidgetTitleChanged {
        widget_id: String,
        title: String,
    },
    DashboardRenamed {
        title: String,
    },
    DrillTriggered {
        widget_id: String,
        definition: Value,
    },
    QueryStarted {
        query_type: String,
        signature: String,
    },
    QueryCompleted {
        query_type: String,
        signature: String,
    },
    QueryFailed {
        query_type: String,
        signature: String,
        message: String,
    },
    /// Emitted by plugin command handlers.
    Custom {
        name: String,
        #[serde(default)]
        data: Value,
    },
}

impl EventBody {
    /// The wire `type` of this body.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::CommandStarted { .. } => "commandStarted",
            Self::CommandRejected { .. } => "commandRejected",
            Self::CommandFailed { .. } => "commandFailed",
            Self::DashboardLoaded { .. } => "dashboardLoaded",
            Self::FilterSelectionChanged { .. } => "filterSelectionChanged",
            Self::DateFilterSelectionChanged { .. } => "dateFilterSelectionChanged",
            Self::AttributeFilterAdded { .. } => "attributeFilterAdded",
            Self::AttributeFiltersRemoved { .. } => "attributeFiltersRemoved",
            Self::LayoutSectionAdded { .. } => "layoutSectionAdded",
            Self::LayoutSectionRemoved { .. } => "layoutSectionRemoved",
            Self::LayoutSectionItemsAdded { .. } => "layoutSectionItemsAdded",
            Self::LayoutSectionItemRemoved { .. } => "layoutSectionItemRemoved",
            Self::WidgetTitleChanged { .. } => "widgetTitleChanged",
            Self::DashboardRenamed { .. } => "dashboardRenamed",
            Self::DrillTriggered { .. } => "drillTriggered",
            Self::QueryStarted { .. } => "queryStarted",
            Self::QueryCompleted { .. } => "queryCompleted",
            Self::QueryFailed { .. } => "queryFailed",
            Self::Custom { .. } => "custom",
        }
    }

    /// Returns `true` for `commandRejected` and `commandFailed`.
    pub fn is_command_failure(&self) -> bool {
        matches!(
            self,
            Self::CommandRejected { .. } | Self::CommandFailed { .. }
        )
    }
}

/// An event as delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardEvent {
    /// Correlation id of the command or query that produced the event.
    pub correlation_id: Option<String>,
    /// Metadata from the [`CommandContext`](crate::CommandContext) of the
    /// command that produced the event, passed through untouched.
    pub metadata: Option<Value>,
    pub body: EventBody,
}

impl DashboardEvent {
    /// An event with no metadata attached.
    pub fn new(body: EventBody, correlation_id: Option<String>) -> Self {
        Self {
            correlation_id,
            metadata: None,
            body,
        }
    }

    /// Attach the originating command's metadata.
    pub fn with_metadata(mut self, metadata: Option<Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Wire `type` of the body.
    pub fn event_type(&self) -> &'static str {
        self.body.event_type()
    }

    /// Correlation id as a borrowed string.
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Encode into the `{ type, correlationId, payload }` wire object.
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` if the body cannot be serialized.
    pub fn to_wire(&self) -> serde_json::Result<WireEvent> {
        // Adjacently tagged bodies serialize as {"type": ..., "payload": ...}.
        let value = serde_json::to_value(&self.body)?;
        let Value::Object(mut obj) = value else {
            return Err(serde::ser::Error::custom(
                "event body did not serialize to an object",
            ));
        };
        let payload = obj.remove("payload").unwrap_or(Value::Null);
        Ok(WireEvent {
            event_type: self.event_type().to_string(),
            correlation_id: self.correlation_id.clone(),
            meta: self.metadata.clone(),
            payload,
        })
    }

    /// Decode a wire event.
    ///
    /// Returns `None` if the type is unknown or the payload does not match
    /// it.
    pub fn from_wire(wire: &WireEvent) -> Option<Self> {
        let mut obj = Map::new();
        obj.insert("type".into(), Value::String(wire.event_type.clone()));
        obj.insert("payload".into(), wire.payload.clone());
        let body: EventBody = serde_json::from_value(Value::Object(obj)).ok()?;
        Some(Self {
            correlation_id: wire.correlation_id.clone(),
            metadata: wire.meta.clone(),
            body,
        })
    }
}

/// Serialized form of a [`DashboardEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    #[serde(default)]
    pub payload: Value,
}
