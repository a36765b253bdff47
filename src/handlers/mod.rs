//! Built-in command handlers.
//!
//! Each handler group owns a fixed set of slices. Validation runs against the
//! current snapshot and collects every unmet precondition; handling reads the
//! snapshot and returns an [`Outcome`] whose patch the bus commits.

mod filters;
mod layout;
mod load;
mod meta;

use std::panic::{self, AssertUnwindSafe};

use serde_json::Value;

use crate::backend::Backend;
use crate::command::{CancelFlag, Command};
use crate::config::ConfigOverrides;
use crate::error::{HandlerError, PreconditionError, Unmet};
use crate::event::EventBody;
use crate::plugin::Extensions;
use crate::state::{DashboardState, ObjRef, SliceKind, StatePatch};

/// Result of a successful handler: the state patch to commit and the
/// success event to emit once it is committed.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub patch: StatePatch,
    pub event: EventBody,
}

impl Outcome {
    /// An outcome that changes no state.
    pub fn new(event: EventBody) -> Self {
        Self {
            patch: StatePatch::new(),
            event,
        }
    }

    /// Replace the slices set in `patch` on commit.
    ///
    /// The bus fails the command with [`HandlerError::UndeclaredSlice`] if
    /// the patch touches a slice the command does not own.
    pub fn with_patch(mut self, patch: StatePatch) -> Self {
        self.patch = patch;
        self
    }

    /// Shorthand for a plugin handler emitting a `custom` event.
    pub fn custom(name: impl Into<String>, data: Value) -> Self {
        Self::new(EventBody::Custom {
            name: name.into(),
            data,
        })
    }
}

/// Collaborators a handler may reach while it runs.
pub(crate) struct HandlerContext<'a> {
    pub(crate) backend: &'a dyn Backend,
    pub(crate) dashboard: &'a ObjRef,
    pub(crate) cancel: &'a CancelFlag,
    pub(crate) extensions: &'a Extensions,
    pub(crate) overrides: Option<&'a ConfigOverrides>,
}

/// Slices the handler for `command` may replace.
///
/// # Errors
///
/// Returns [`HandlerError::Custom`] if a plugin handler panics while
/// declaring its slices.
pub(crate) fn owned_slices(
    command: &Command,
    extensions: &Extensions,
) -> Result<Vec<SliceKind>, HandlerError> {
    let Command::Custom { name, .. } = command else {
        return Ok(command.owned_slices().to_vec());
    };
    let Some(handler) = extensions.command_handler(name) else {
        return Ok(Vec::new());
    };
    panic::catch_unwind(AssertUnwindSafe(|| handler.owned_slices().to_vec()))
        .map_err(|_| HandlerError::custom(format!("command handler `{name}` panicked")))
}

/// Check every precondition of `command` against `state`.
pub(crate) fn validate(
    command: &Command,
    state: &DashboardState,
    extensions: &Extensions,
) -> Result<(), PreconditionError> {
    let unmet = match command {
        Command::LoadDashboard => Vec::new(),
        Command::ChangeAttributeFilterSelection {
            filter_local_id, ..
        }
        | Command::ResetAttributeFilterSelection { filter_local_id } => {
            filters::check_filter_exists(state, filter_local_id)
        }
        Command::ChangeDateFilterSelection { selection } => {
            filters::check_date_selection(state, selection)
        }
        Command::ClearDateFilterSelection => filters::check_loaded(state),
        Command::AddAttributeFilter {
            display_form,
            index,
            ..
        } => filters::check_add(state, display_form, *index),
        Command::RemoveAttributeFilters { filter_local_ids } => {
            filters::check_remove(state, filter_local_ids)
        }
        Command::AddLayoutSection { index, section } => {
            layout::check_add_section(state, *index, section, extensions)
        }
        Command::RemoveLayoutSection { index } => layout::check_remove_section(state, *index),
        Command::AddSectionItems {
            section_index,
            item_index,
            items,
        } => layout::check_add_items(state, *section_index, *item_index, items, extensions),
        Command::RemoveSectionItem {
            section_index,
            item_index,
        } => layout::check_remove_item(state, *section_index, *item_index),
        Command::ChangeWidgetTitle { widget_id, .. } | Command::Drill { widget_id, .. } => {
            layout::check_widget_exists(state, widget_id)
        }
        Command::RenameDashboard { title } => meta::check_rename(state, title),
        Command::Custom { name, payload } => match extensions.command_handler(name) {
            Some(handler) => {
                panic::catch_unwind(AssertUnwindSafe(|| handler.validate(state, payload)))
                    .unwrap_or_else(|_| {
                        Err(vec![Unmet::Custom(format!(
                            "precondition check of `{name}` panicked"
                        ))])
                    })
                    .err()
                    .unwrap_or_default()
            }
            None => vec![Unmet::Custom(format!("no handler registered for `{name}`"))],
        },
    };

    if unmet.is_empty() {
        Ok(())
    } else {
        Err(PreconditionError::new(command.type_name(), unmet))
    }
}

/// Run the handler for `command`.
pub(crate) async fn handle(
    command: &Command,
    state: &DashboardState,
    ctx: &HandlerContext<'_>,
) -> Result<Outcome, HandlerError> {
    match command {
        Command::LoadDashboard => load::load_dashboard(ctx).await,
        Command::ChangeAttributeFilterSelection {
            filter_local_id,
            elements,
            selection_type,
        } => filters::change_selection(state, filter_local_id, elements, *selection_type),
        Command::ResetAttributeFilterSelection { filter_local_id } => {
            filters::reset_selection(state, filter_local_id)
        }
        Command::ChangeDateFilterSelection { selection } => {
            filters::change_date_selection(state, Some(selection))
        }
        Command::ClearDateFilterSelection => filters::change_date_selection(state, None),
        Command::AddAttributeFilter {
            display_form,
            index,
            title,
        } => filters::add_filter(state, display_form, *index, title.as_deref()),
        Command::RemoveAttributeFilters { filter_local_ids } => {
            filters::remove_filters(state, filter_local_ids)
        }
        Command::AddLayoutSection { index, section } => {
            layout::add_section(state, *index, section)
        }
        Command::RemoveLayoutSection { index } => layout::remove_section(state, *index),
        Command::AddSectionItems {
            section_index,
            item_index,
            items,
        } => layout::add_items(state, *section_index, *item_index, items),
        Command::RemoveSectionItem {
            section_index,
            item_index,
        } => layout::remove_item(state, *section_index, *item_index),
        Command::ChangeWidgetTitle { widget_id, title } => {
            layout::change_widget_title(state, widget_id, title)
        }
        Command::RenameDashboard { title } => meta::rename(state, title),
        Command::Drill {
            widget_id,
            definition,
        } => Ok(Outcome::new(EventBody::DrillTriggered {
            widget_id: widget_id.clone(),
            definition: definition.clone(),
        })),
        Command::Custom { name, payload } => {
            let handler = ctx
                .extensions
                .command_handler(name)
                .ok_or_else(|| HandlerError::custom(format!("no handler registered for `{name}`")))?;
            // Plugin panics surface as a failed command.
            panic::catch_unwind(AssertUnwindSafe(|| handler.handle(state, payload))).unwrap_or_else(
                |_| Err(HandlerError::custom(format!("command handler `{name}` panicked"))),
            )
        }
    }
}

/// A slice the handler needs was not loaded. Validation normally catches
/// this first.
fn not_loaded(kind: SliceKind) -> HandlerError {
    HandlerError::custom(format!("{kind} slice is not loaded"))
}
