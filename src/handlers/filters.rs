use uuid::Uuid;

use super::{Outcome, not_loaded};
use crate::error::{HandlerError, Unmet};
use crate::event::EventBody;
use crate::state::{
    AttributeElements, AttributeFilter, DashboardState, DateFilter, DateFilterSelection,
    FilterContextItem, FilterContextState, MAX_ATTRIBUTE_FILTERS, ObjRef, SelectionMode,
    SliceKind, StatePatch,
};

pub(super) fn check_loaded(state: &DashboardState) -> Vec<Unmet> {
    if state.filter_context().is_loaded() {
        Vec::new()
    } else {
        vec![Unmet::NotLoaded(SliceKind::FilterContext)]
    }
}

pub(super) fn check_filter_exists(state: &DashboardState, local_id: &str) -> Vec<Unmet> {
    match state.filter_context().get() {
        None => vec![Unmet::NotLoaded(SliceKind::FilterContext)],
        Some(ctx) if ctx.attribute_filter(local_id).is_none() => {
            vec![Unmet::FilterNotFound(local_id.to_string())]
        }
        Some(_) => Vec::new(),
    }
}

pub(super) fn check_date_selection(
    state: &DashboardState,
    selection: &DateFilterSelection,
) -> Vec<Unmet> {
    let mut unmet = check_loaded(state);
    match selection {
        DateFilterSelection::Relative {
            granularity,
            from,
            to,
        } => {
            if granularity.trim().is_empty() {
                unmet.push(Unmet::Blank("granularity"));
            }
            if from > to {
                unmet.push(Unmet::InvertedDateRange {
                    from: *from,
                    to: *to,
                });
            }
        }
        DateFilterSelection::Absolute { from, to } => {
            if from.trim().is_empty() {
                unmet.push(Unmet::Blank("from"));
            }
            if to.trim().is_empty() {
                unmet.push(Unmet::Blank("to"));
            }
        }
    }
    unmet
}

pub(super) fn check_add(
    state: &DashboardState,
    display_form: &ObjRef,
    index: Option<usize>,
) -> Vec<Unmet> {
    let Some(ctx) = state.filter_context().get() else {
        return vec![Unmet::NotLoaded(SliceKind::FilterContext)];
    };
    let mut unmet = Vec::new();
    if ctx.attribute_filter_by_display_form(display_form).is_some() {
        unmet.push(Unmet::AlreadyFiltered(display_form.clone()));
    }
    let count = ctx.attribute_filter_count();
    if count >= MAX_ATTRIBUTE_FILTERS {
        unmet.push(Unmet::TooManyFilters {
            max: MAX_ATTRIBUTE_FILTERS,
        });
    }
    if let Some(index) = index
        && index > count
    {
        unmet.push(Unmet::IndexOutOfRange {
            what: "attribute filter",
            index,
            len: count,
        });
    }
    unmet
}

pub(super) fn check_remove(state: &DashboardState, local_ids: &[String]) -> Vec<Unmet> {
    let Some(ctx) = state.filter_context().get() else {
        return vec![Unmet::NotLoaded(SliceKind::FilterContext)];
    };
    if local_ids.is_empty() {
        return vec![Unmet::Empty("filterLocalIds")];
    }
    local_ids
        .iter()
        .filter(|id| ctx.attribute_filter(id).is_none())
        .map(|id| Unmet::FilterNotFound(id.clone()))
        .collect()
}

fn current(state: &DashboardState) -> Result<FilterContextState, HandlerError> {
    state
        .filter_context()
        .get()
        .cloned()
        .ok_or_else(|| not_loaded(SliceKind::FilterContext))
}

fn missing(local_id: &str) -> HandlerError {
    HandlerError::custom(format!("attribute filter `{local_id}` does not exist"))
}

fn selection_changed(ctx: FilterContextState, filter: AttributeFilter) -> Outcome {
    Outcome::new(EventBody::FilterSelectionChanged { filter })
        .with_patch(StatePatch::new().filter_context(ctx))
}

pub(super) fn change_selection(
    state: &DashboardState,
    local_id: &str,
    elements: &AttributeElements,
    mode: SelectionMode,
) -> Result<Outcome, HandlerError> {
    let mut ctx = current(state)?;
    let filter = ctx.attribute_filter_mut(local_id).ok_or_else(|| missing(local_id))?;
    filter.selection = elements.clone();
    filter.mode = mode;
    let filter = filter.clone();
    Ok(selection_changed(ctx, filter))
}

/// Back to "all": an empty negative selection, keeping the element
/// representation (uris or values) the filter already used.
pub(super) fn reset_selection(
    state: &DashboardState,
    local_id: &str,
) -> Result<Outcome, HandlerError> {
    let mut ctx = current(state)?;
    let filter = ctx.attribute_filter_mut(local_id).ok_or_else(|| missing(local_id))?;
    filter.selection = filter.selection.cleared();
    filter.mode = SelectionMode::NotIn;
    let filter = filter.clone();
    Ok(selection_changed(ctx, filter))
}

/// Set (or clear, with `None`) the date filter, creating it in front of the
/// attribute filters when the context has none.
pub(super) fn change_date_selection(
    state: &DashboardState,
    selection: Option<&DateFilterSelection>,
) -> Result<Outcome, HandlerError> {
    let mut ctx = current(state)?;
    let selection = selection.cloned();
    match ctx.date_filter_mut() {
        Some(filter) => filter.selection = selection.clone(),
        None if selection.is_some() => ctx.filters.insert(
            0,
            FilterContextItem::Date(DateFilter {
                selection: selection.clone(),
            }),
        ),
        None => {}
    }
    Ok(Outcome::new(EventBody::DateFilterSelectionChanged { selection })
        .with_patch(StatePatch::new().filter_context(ctx)))
}

pub(super) fn add_filter(
    state: &DashboardState,
    display_form: &ObjRef,
    index: Option<usize>,
    title: Option<&str>,
) -> Result<Outcome, HandlerError> {
    let mut ctx = current(state)?;
    let count = ctx.attribute_filter_count();
    let index = index.unwrap_or(count).min(count);

    let mut filter = AttributeFilter::new(Uuid::new_v4().simple().to_string(), display_form.clone());
    filter.title = title.map(str::to_string);

    let position = ctx.attribute_insert_position(index);
    ctx.filters
        .insert(position, FilterContextItem::Attribute(filter.clone()));

    Ok(Outcome::new(EventBody::AttributeFilterAdded { filter, index })
        .with_patch(StatePatch::new().filter_context(ctx)))
}

pub(super) fn remove_filters(
    state: &DashboardState,
    local_ids: &[String],
) -> Result<Outcome, HandlerError> {
    let mut ctx = current(state)?;
    let mut removed = Vec::new();
    ctx.filters.retain(|item| match item {
        FilterContextItem::Attribute(filter) if local_ids.contains(&filter.local_identifier) => {
            removed.push(filter.clone());
            false
        }
        _ => true,
    });
    Ok(Outcome::new(EventBody::AttributeFiltersRemoved { filters: removed })
        .with_patch(StatePatch::new().filter_context(ctx)))
}
