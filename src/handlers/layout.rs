use std::collections::HashSet;

use super::{Outcome, not_loaded};
use crate::error::{HandlerError, Unmet};
use crate::event::EventBody;
use crate::plugin::Extensions;
use crate::state::{DashboardState, LayoutItem, LayoutSection, LayoutState, SliceKind, StatePatch};

fn loaded(state: &DashboardState) -> Result<&LayoutState, Vec<Unmet>> {
    state
        .layout()
        .get()
        .ok_or_else(|| vec![Unmet::NotLoaded(SliceKind::Layout)])
}

fn out_of_range(what: &'static str, index: usize, len: usize) -> Unmet {
    Unmet::IndexOutOfRange { what, index, len }
}

/// Size, widget type and identifier uniqueness of items about to be added.
fn check_items(
    layout: &LayoutState,
    items: &[LayoutItem],
    extensions: &Extensions,
    unmet: &mut Vec<Unmet>,
) {
    let mut seen: HashSet<&str> = layout.widgets().map(|w| w.identifier.as_str()).collect();
    for item in items {
        let widget = &item.widget;
        if !item.size.is_valid() {
            unmet.push(Unmet::InvalidItemSize {
                widget: widget.identifier.clone(),
                width: item.size.grid_width,
            });
        }
        if let Some(custom_type) = widget.custom_type()
            && !extensions.has_widget_type(custom_type)
        {
            unmet.push(Unmet::UnregisteredWidgetType(custom_type.to_string()));
        }
        if !seen.insert(widget.identifier.as_str()) {
            unmet.push(Unmet::DuplicateWidget(widget.identifier.clone()));
        }
    }
}

pub(super) fn check_add_section(
    state: &DashboardState,
    index: usize,
    section: &LayoutSection,
    extensions: &Extensions,
) -> Vec<Unmet> {
    let layout = match loaded(state) {
        Ok(layout) => layout,
        Err(unmet) => return unmet,
    };
    let mut unmet = Vec::new();
    if index > layout.sections.len() {
        unmet.push(out_of_range("section", index, layout.sections.len()));
    }
    check_items(layout, &section.items, extensions, &mut unmet);
    unmet
}

pub(super) fn check_remove_section(state: &DashboardState, index: usize) -> Vec<Unmet> {
    match loaded(state) {
        Err(unmet) => unmet,
        Ok(layout) if index >= layout.sections.len() => {
            vec![out_of_range("section", index, layout.sections.len())]
        }
        Ok(_) => Vec::new(),
    }
}

pub(super) fn check_add_items(
    state: &DashboardState,
    section_index: usize,
    item_index: usize,
    items: &[LayoutItem],
    extensions: &Extensions,
) -> Vec<Unmet> {
    let layout = match loaded(state) {
        Ok(layout) => layout,
        Err(unmet) => return unmet,
    };
    let mut unmet = Vec::new();
    match layout.sections.get(section_index) {
        None => unmet.push(out_of_range("section", section_index, layout.sections.len())),
        Some(section) if item_index > section.items.len() => {
            unmet.push(out_of_range("item", item_index, section.items.len()));
        }
        Some(_) => {}
    }
    if items.is_empty() {
        unmet.push(Unmet::Empty("items"));
    }
    check_items(layout, items, extensions, &mut unmet);
    unmet
}

pub(super) fn check_remove_item(
    state: &DashboardState,
    section_index: usize,
    item_index: usize,
) -> Vec<Unmet> {
    let layout = match loaded(state) {
        Ok(layout) => layout,
        Err(unmet) => return unmet,
    };
    match layout.sections.get(section_index) {
        None => vec![out_of_range("section", section_index, layout.sections.len())],
        Some(section) if item_index >= section.items.len() => {
            vec![out_of_range("item", item_index, section.items.len())]
        }
        Some(_) => Vec::new(),
    }
}

pub(super) fn check_widget_exists(state: &DashboardState, widget_id: &str) -> Vec<Unmet> {
    match loaded(state) {
        Err(unmet) => unmet,
        Ok(layout) if layout.widget(widget_id).is_none() => {
            vec![Unmet::WidgetNotFound(widget_id.to_string())]
        }
        Ok(_) => Vec::new(),
    }
}

fn current(state: &DashboardState) -> Result<LayoutState, HandlerError> {
    state
        .layout()
        .get()
        .cloned()
        .ok_or_else(|| not_loaded(SliceKind::Layout))
}

fn index_error(what: &str, index: usize) -> HandlerError {
    HandlerError::custom(format!("{what} index {index} is out of range"))
}

fn committed(layout: LayoutState, event: EventBody) -> Result<Outcome, HandlerError> {
    Ok(Outcome::new(event).with_patch(StatePatch::new().layout(layout)))
}

pub(super) fn add_section(
    state: &DashboardState,
    index: usize,
    section: &LayoutSection,
) -> Result<Outcome, HandlerError> {
    let mut layout = current(state)?;
    if index > layout.sections.len() {
        return Err(index_error("section", index));
    }
    layout.sections.insert(index, section.clone());
    committed(
        layout,
        EventBody::LayoutSectionAdded {
            index,
            section: section.clone(),
        },
    )
}

pub(super) fn remove_section(state: &DashboardState, index: usize) -> Result<Outcome, HandlerError> {
    let mut layout = current(state)?;
    if index >= layout.sections.len() {
        return Err(index_error("section", index));
    }
    let section = layout.sections.remove(index);
    committed(layout, EventBody::LayoutSectionRemoved { index, section })
}

pub(super) fn add_items(
    state: &DashboardState,
    section_index: usize,
    item_index: usize,
    items: &[LayoutItem],
) -> Result<Outcome, HandlerError> {
    let mut layout = current(state)?;
    let section = layout
        .sections
        .get_mut(section_index)
        .ok_or_else(|| index_error("section", section_index))?;
    if item_index > section.items.len() {
        return Err(index_error("item", item_index));
    }
    section
        .items
        .splice(item_index..item_index, items.iter().cloned());
    committed(
        layout,
        EventBody::LayoutSectionItemsAdded {
            section_index,
            item_index,
            items: items.to_vec(),
        },
    )
}

pub(super) fn remove_item(
    state: &DashboardState,
    section_index: usize,
    item_index: usize,
) -> Result<Outcome, HandlerError> {
    let mut layout = current(state)?;
    let section = layout
        .sections
        .get_mut(section_index)
        .ok_or_else(|| index_error("section", section_index))?;
    if item_index >= section.items.len() {
        return Err(index_error("item", item_index));
    }
    let item = section.items.remove(item_index);
    committed(
        layout,
        EventBody::LayoutSectionItemRemoved {
            section_index,
            item_index,
            item,
        },
    )
}

pub(super) fn change_widget_title(
    state: &DashboardState,
    widget_id: &str,
    title: &str,
) -> Result<Outcome, HandlerError> {
    let mut layout = current(state)?;
    let widget = layout
        .widget_mut(widget_id)
        .ok_or_else(|| HandlerError::custom(format!("widget `{widget_id}` does not exist")))?;
    widget.title = title.to_string();
    committed(
        layout,
        EventBody::WidgetTitleChanged {
            widget_id: widget_id.to_string(),
            title: title.to_string(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{apply, loaded_state};
    use super::*;
    use crate::state::Widget;
    use serde_json::json;

    fn kpi(id: &str) -> LayoutItem {
        LayoutItem::new(Widget::kpi(id, id, crate::state::ObjRef::identifier("m")), 4)
    }

    #[test]
    fn add_section_then_remove_it() {
        let state = loaded_state();
        let section = LayoutSection::new().with_title("Details").with_item(kpi("w3"));
        assert!(check_add_section(&state, 1, &section, &Extensions::default()).is_empty());

        let added = add_section(&state, 1, &section).expect("add");
        let state = apply(&state, added.patch);
        let layout = state.layout().get().expect("layout");
        assert_eq!(layout.sections.len(), 2);
        assert!(layout.widget("w3").is_some());

        let removed = remove_section(&state, 1).expect("remove");
        assert!(matches!(
            removed.event,
            EventBody::LayoutSectionRemoved { index: 1, ref section } if section.items.len() == 1
        ));
    }

    #[test]
    fn items_are_spliced_at_index() {
        let state = loaded_state();
        let outcome = add_items(&state, 0, 1, &[kpi("a"), kpi("b")]).expect("add items");
        let state = apply(&state, outcome.patch);
        let ids: Vec<_> = state
            .layout()
            .get()
            .expect("layout")
            .widgets()
            .map(|w| w.identifier.clone())
            .collect();
        assert_eq!(ids, ["w1", "a", "b", "w2"]);
    }

    #[test]
    fn item_checks() {
        let state = loaded_state();
        assert_eq!(
            check_add_items(&state, 3, 0, &[], &Extensions::default()),
            vec![out_of_range("section", 3, 1), Unmet::Empty("items")]
        );
        assert_eq!(
            check_remove_item(&state, 0, 2),
            vec![out_of_range("item", 2, 2)]
        );
        assert!(check_remove_item(&state, 0, 1).is_empty());
    }

    #[test]
    fn custom_widgets_need_a_registered_type() {
        let state = loaded_state();
        let map = LayoutItem::new(Widget::custom("map", "Map", "acme/map", json!({})), 12);
        assert_eq!(
            check_add_items(&state, 0, 0, std::slice::from_ref(&map), &Extensions::default()),
            vec![Unmet::UnregisteredWidgetType("acme/map".into())]
        );
    }

    #[test]
    fn widget_title_changes_in_place() {
        let state = loaded_state();
        assert_eq!(
            check_widget_exists(&state, "w9"),
            vec![Unmet::WidgetNotFound("w9".into())]
        );
        let outcome = change_widget_title(&state, "w2", "Order count").expect("rename widget");
        let state = apply(&state, outcome.patch);
        let widget = state.layout().get().and_then(|l| l.widget("w2")).expect("w2");
        assert_eq!(widget.title, "Order count");
    }
}
