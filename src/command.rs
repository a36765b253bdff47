//! Command types, wire decoding and per-command dispatch plumbing.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{DispatchError, HandlerError, PreconditionError, Unmet};
use crate::state::{
    AttributeElements, DateFilterSelection, LayoutItem, LayoutSection, ObjRef, SelectionMode,
    SliceKind,
};

/// Cross-cutting metadata passed alongside a command.
///
/// Carries audit and correlation information without polluting the
/// [`Command`] type. The correlation id is stamped on every event the
/// command produces; when none is supplied the bus generates one.
///
/// # Examples
///
/// ```
/// use dashboard_model::CommandContext;
/// use serde_json::json;
///
/// let ctx = CommandContext::default()
///     .with_actor("user-42")
///     .with_correlation_id("req-abc-123")
///     .with_metadata(json!({"source": "toolbar"}));
///
/// assert_eq!(ctx.actor.as_deref(), Some("user-42"));
/// assert_eq!(ctx.correlation_id.as_deref(), Some("req-abc-123"));
/// assert!(ctx.metadata.is_some());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandContext {
    /// Identity of the actor issuing the command (e.g. a user login).
    pub actor: Option<String>,
    /// Correlation id linking the command to the events it produces.
    pub correlation_id: Option<String>,
    /// Arbitrary metadata, opaque to the bus. Copied onto every event the
    /// command produces.
    pub metadata: Option<Value>,
}

impl CommandContext {
    /// Set the actor identity.
    ///
    /// # Arguments
    ///
    /// * `actor` - Any value convertible to `String` identifying who issued
    ///   the command.
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Set the correlation id.
    ///
    /// # Arguments
    ///
    /// * `id` - Caller-chosen id; events produced by this command carry it
    ///   verbatim.
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Set arbitrary metadata.
    ///
    /// # Arguments
    ///
    /// * `meta` - JSON passed through untouched to
    ///   [`DashboardEvent::metadata`](crate::DashboardEvent::metadata) on the
    ///   command's outcome events.
    pub fn with_metadata(mut self, meta: Value) -> Self {
        self.metadata = Some(meta);
        self
    }

    /// Returns the correlation id, generating a UUID v4 one if unset.
    pub(crate) fn ensure_correlation_id(&mut self) -> String {
        self.correlation_id
            .get_or_insert_with(|| uuid::Uuid::new_v4().to_string())
            .clone()
    }
}

/// A typed dashboard command.
///
/// Serializes adjacently tagged, so the wire form is
/// `{"type": "<camelCase name>", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum Command {
    /// Fetch the dashboard and every slice from the backend.
    LoadDashboard,
    ChangeAttributeFilterSelection {
        filter_local_id: String,
        elements: AttributeElements,
        selection_type: SelectionMode,
    },
    /// Reset the filter to "all" (empty `NOT_IN` selection).
    ResetAttributeFilterSelection {
        filter_local_id: String,
    },
    ChangeDateFilterSelection {
        selection: DateFilterSelection,
    },
    ClearDateFilterSelection,
    AddAttributeFilter {
        display_form: ObjRef,
        /// Position among attribute filters; appends when absent.
        #[serde(default)]
        index: Option<usize>,
        #[serde(default)]
        title: Option<String>,
    },
    RemoveAttributeFilters {
        filter_local_ids: Vec<String>,
    },
    AddLayoutSection {
        index: usize,
        section: LayoutSection,
    },
    RemoveLayoutSection {
        index: usize,
    },
    AddSectionItems {
        section_index: usize,
        item_index: usize,
        items: Vec<LayoutItem>,
    },
    RemoveSectionItem {
        section_index: usize,
        item_index: usize,
    },
    ChangeWidgetTitle {
        widget_id: String,
        title: String,
    },
    RenameDashboard {
        title: String,
    },
    /// Trigger a drill on a widget. Produces an event only.
    Drill {
        widget_id: String,
        #[serde(default)]
        definition: Value,
    },
    /// A command handled by a plugin-registered handler.
    Custom {
        name: String,
        #[serde(default)]
        payload: Value,
    },
}

impl Command {
    /// Select `elements` in the attribute filter `filter_local_id`.
    ///
    /// # Arguments
    ///
    /// * `filter_local_id` - Local identifier of an existing attribute filter.
    /// * `elements` - Attribute elements, by URI or by value.
    /// * `selection_type` - Whether the elements are included or excluded.
    pub fn change_attribute_filter_selection(
        filter_local_id: impl Into<String>,
        elements: AttributeElements,
        selection_type: SelectionMode,
    ) -> Self {
        Self::ChangeAttributeFilterSelection {
            filter_local_id: filter_local_id.into(),
            elements,
            selection_type,
        }
    }

    /// Reset the attribute filter to "all" (an empty `NOT_IN` selection).
    pub fn reset_attribute_filter_selection(filter_local_id: impl Into<String>) -> Self {
        Self::ResetAttributeFilterSelection {
            filter_local_id: filter_local_id.into(),
        }
    }

    /// Relative date filter, e.g. `("GDC.time.year", -3, 0)` for the last
    /// three years including the current one.
    pub fn change_relative_date_filter(granularity: impl Into<String>, from: i32, to: i32) -> Self {
        Self::ChangeDateFilterSelection {
            selection: DateFilterSelection::Relative {
                granularity: granularity.into(),
                from,
                to,
            },
        }
    }

    /// Select a fixed date range; `from` and `to` are ISO dates.
    pub fn change_absolute_date_filter(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::ChangeDateFilterSelection {
            selection: DateFilterSelection::Absolute {
                from: from.into(),
                to: to.into(),
            },
        }
    }

    /// Add an attribute filter on `display_form`, appended when `index` is `None`.
    pub fn add_attribute_filter(display_form: ObjRef, index: Option<usize>) -> Self {
        Self::AddAttributeFilter {
            display_form,
            index,
            title: None,
        }
    }

    /// Change the dashboard title.
    pub fn rename_dashboard(title: impl Into<String>) -> Self {
        Self::RenameDashboard {
            title: title.into(),
        }
    }

    /// A plugin-defined command, handled by the handler registered as `name`.
    pub fn custom(name: impl Into<String>, payload: Value) -> Self {
        Self::Custom {
            name: name.into(),
            payload,
        }
    }

    /// The wire kind of this command.
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::LoadDashboard => CommandKind::LoadDashboard,
            Self::ChangeAttributeFilterSelection { .. } => CommandKind::ChangeAttributeFilterSelection,
            Self::ResetAttributeFilterSelection { .. } => CommandKind::ResetAttributeFilterSelection,
            Self::ChangeDateFilterSelection { .. } => CommandKind::ChangeDateFilterSelection,
            Self::ClearDateFilterSelection => CommandKind::ClearDateFilterSelection,
            Self::AddAttributeFilter { .. } => CommandKind::AddAttributeFilter,
            Self::RemoveAttributeFilters { .. } => CommandKind::RemoveAttributeFilters,
            Self::AddLayoutSection { .. } => CommandKind::AddLayoutSection,
            Self::RemoveLayoutSection { .. } => CommandKind::RemoveLayoutSection,
            Self::AddSectionItems { .. } => CommandKind::AddSectionItems,
            Self::RemoveSectionItem { .. } => CommandKind::RemoveSectionItem,
            Self::ChangeWidgetTitle { .. } => CommandKind::ChangeWidgetTitle,
            Self::RenameDashboard { .. } => CommandKind::RenameDashboard,
            Self::Drill { .. } => CommandKind::Drill,
            Self::Custom { .. } => CommandKind::Custom,
        }
    }

    /// Type name reported in events and logs: the wire type for built-in
    /// commands, the handler name for custom ones.
    pub fn type_name(&self) -> &str {
        match self {
            Self::Custom { name, .. } => name,
            other => other.kind().as_str(),
        }
    }

    /// Slices the built-in handler for this command may replace.
    ///
    /// Custom commands declare theirs through their handler.
    pub fn owned_slices(&self) -> &'static [SliceKind] {
        match self.kind() {
            CommandKind::LoadDashboard => &SliceKind::ALL,
            CommandKind::ChangeAttributeFilterSelection
            | CommandKind::ResetAttributeFilterSelection
            | CommandKind::ChangeDateFilterSelection
            | CommandKind::ClearDateFilterSelection
            | CommandKind::AddAttributeFilter
            | CommandKind::RemoveAttributeFilters => &[SliceKind::FilterContext],
            CommandKind::AddLayoutSection
            | CommandKind::RemoveLayoutSection
            | CommandKind::AddSectionItems
            | CommandKind::RemoveSectionItem
            | CommandKind::ChangeWidgetTitle => &[SliceKind::Layout],
            CommandKind::RenameDashboard => &[SliceKind::Meta],
            CommandKind::Drill | CommandKind::Custom => &[],
        }
    }
}

/// Discriminant of [`Command`], with its wire name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    LoadDashboard,
    ChangeAttributeFilterSelection,
    ResetAttributeFilterSelection,
    ChangeDateFilterSelection,
    ClearDateFilterSelection,
    AddAttributeFilter,
    RemoveAttributeFilters,
    AddLayoutSection,
    RemoveLayoutSection,
    AddSectionItems,
    RemoveSectionItem,
    ChangeWidgetTitle,
    RenameDashboard,
    Drill,
    Custom,
}

impl CommandKind {
    pub const ALL: [CommandKind; 15] = [
        CommandKind::LoadDashboard,
        CommandKind::ChangeAttributeFilterSelection,
        CommandKind::ResetAttributeFilterSelection,
        CommandKind::ChangeDateFilterSelection,
        CommandKind::ClearDateFilterSelection,
        CommandKind::AddAttributeFilter,
        CommandKind::RemoveAttributeFilters,
        CommandKind::AddLayoutSection,
        CommandKind::RemoveLayoutSection,
        CommandKind::AddSectionItems,
        CommandKind::RemoveSectionItem,
        CommandKind::ChangeWidgetTitle,
        CommandKind::RenameDashboard,
        CommandKind::Drill,
        CommandKind::Custom,
    ];

    /// Parse a wire type name. Matching is exact.
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }

    /// Wire `type` string of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LoadDashboard => "loadDashboard",
            Self::ChangeAttributeFilterSelection => "changeAttributeFilterSelection",
            Self::ResetAttributeFilterSelection => "resetAttributeFilterSelection",
            Self::ChangeDateFilterSelection => "changeDateFilterSelection",
            Self::ClearDateFilterSelection => "clearDateFilterSelection",
            Self::AddAttributeFilter => "addAttributeFilter",
            Self::RemoveAttributeFilters => "removeAttributeFilters",
            Self::AddLayoutSection => "addLayoutSection",
            Self::RemoveLayoutSection => "removeLayoutSection",
            Self::AddSectionItems => "addSectionItems",
            Self::RemoveSectionItem => "removeSectionItem",
            Self::ChangeWidgetTitle => "changeWidgetTitle",
            Self::RenameDashboard => "renameDashboard",
            Self::Drill => "drill",
            Self::Custom => "custom",
        }
    }
}

/// A command as it arrives over the wire: `{ type, correlationId, payload }`.
///
/// Decoded into a typed [`Command`] by the dispatcher; see
/// [`RawCommand::decode`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCommand {
    #[serde(rename = "type")]
    pub command_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

impl RawCommand {
    /// A wire command with no correlation id.
    pub fn new(command_type: impl Into<String>, payload: Value) -> Self {
        Self {
            command_type: command_type.into(),
            correlation_id: None,
            payload,
        }
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Decode into a typed command.
    ///
    /// `is_custom` reports whether a custom handler is registered under a
    /// given name; such names are accepted as the wire type directly, with
    /// the payload handed to the handler untouched.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::UnknownCommand`] when the type is neither built-in
    ///   nor a registered custom name.
    /// - [`DispatchError::Precondition`] with [`Unmet::MalformedPayload`] when
    ///   the type is known but the payload does not decode.
    pub fn decode(&self, is_custom: impl Fn(&str) -> bool) -> Result<Command, DispatchError> {
        match CommandKind::parse(&self.command_type) {
            Some(CommandKind::Custom) => {
                let command: Command = self.decode_typed()?;
                match &command {
                    Command::Custom { name, .. } if is_custom(name) => Ok(command),
                    Command::Custom { name, .. } => Err(DispatchError::UnknownCommand(name.clone())),
                    _ => Err(self.malformed("not a custom command")),
                }
            }
            Some(_) => self.decode_typed(),
            None if is_custom(&self.command_type) => Ok(Command::Custom {
                name: self.command_type.clone(),
                payload: self.payload.clone(),
            }),
            None => Err(DispatchError::UnknownCommand(self.command_type.clone())),
        }
    }

    fn decode_typed(&self) -> Result<Command, DispatchError> {
        let mut envelope = Map::new();
        envelope.insert("type".into(), Value::String(self.command_type.clone()));
        // Unit variants carry no content key at all.
        if !self.payload.is_null() {
            envelope.insert("payload".into(), self.payload.clone());
        }
        serde_json::from_value(Value::Object(envelope)).map_err(|e| self.malformed(e))
    }

    fn malformed(&self, reason: impl ToString) -> DispatchError {
        DispatchError::Precondition(PreconditionError::new(
            self.command_type.clone(),
            vec![Unmet::MalformedPayload(reason.to_string())],
        ))
    }
}

/// Processing phase of a dispatched command.
///
/// `Dispatched -> Validating -> (Rejected | Handling)`,
/// `Handling -> (Failed | Committing)`, `Committing -> (Failed | Committed)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CommandPhase {
    Dispatched,
    Validating,
    Rejected,
    Handling,
    Failed,
    Committing,
    Committed,
}

impl CommandPhase {
    /// `true` for `Rejected`, `Failed` and `Committed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Failed | Self::Committed)
    }
}

/// Cooperative cancellation flag shared between a ticket and the bus.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Raise the flag. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Fails with [`HandlerError::Cancelled`] once cancelled.
    pub fn check(&self) -> Result<(), HandlerError> {
        if self.is_cancelled() {
            Err(HandlerError::Cancelled)
        } else {
            Ok(())
        }
    }
}
