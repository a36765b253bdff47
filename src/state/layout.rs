use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ObjRef;

/// Width of the layout grid in columns.
pub const GRID_COLUMNS: u32 = 12;

/// Fluid layout: ordered sections of ordered items.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutState {
    #[serde(default)]
    pub sections: Vec<LayoutSection>,
}

impl LayoutState {
    /// Every widget, section by section.
    pub fn widgets(&self) -> impl Iterator<Item = &Widget> {
        self.sections
            .iter()
            .flat_map(|section| section.items.iter().map(|item| &item.widget))
    }

    /// The widget with `identifier`, searching every section.
    pub fn widget(&self, identifier: &str) -> Option<&Widget> {
        self.widgets().find(|widget| widget.identifier == identifier)
    }

    pub(crate) fn widget_mut(&mut self, identifier: &str) -> Option<&mut Widget> {
        self.sections
            .iter_mut()
            .flat_map(|section| section.items.iter_mut().map(|item| &mut item.widget))
            .find(|widget| widget.identifier == identifier)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<SectionHeader>,
    #[serde(default)]
    pub items: Vec<LayoutItem>,
}

impl LayoutSection {
    /// An empty section without a header.
    pub fn new() -> Self {
        Self::default()
    }

    /// Give the section a header with `title`.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.header = Some(SectionHeader {
            title: title.into(),
            description: None,
        });
        self
    }

    /// Append `item`.
    pub fn with_item(mut self, item: LayoutItem) -> Self {
        self.items.push(item);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionHeader {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutItem {
    pub size: ItemSize,
    pub widget: Widget,
}

impl LayoutItem {
    /// An item `grid_width` columns wide (1 to [`GRID_COLUMNS`]), with automatic height.
    pub fn new(widget: Widget, grid_width: u32) -> Self {
        Self {
            size: ItemSize {
                grid_width,
                grid_height: None,
            },
            widget,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemSize {
    pub grid_width: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid_height: Option<u32>,
}

impl ItemSize {
    /// Width must fit the grid.
    pub fn is_valid(&self) -> bool {
        (1..=GRID_COLUMNS).contains(&self.grid_width) && self.grid_height != Some(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Widget {
    pub identifier: String,
    pub title: String,
    pub kind: WidgetKind,
    /// Display forms of attribute filters this widget ignores.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignore_dashboard_filters: Vec<ObjRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_data_set: Option<ObjRef>,
}

impl Widget {
    /// A widget rendering `insight`.
    pub fn insight(identifier: impl Into<String>, title: impl Into<String>, insight: ObjRef) -> Self {
        Self::of_kind(identifier, title, WidgetKind::Insight { insight })
    }

    /// A KPI widget showing `measure`.
    pub fn kpi(identifier: impl Into<String>, title: impl Into<String>, measure: ObjRef) -> Self {
        Self::of_kind(identifier, title, WidgetKind::Kpi { measure })
    }

    /// A widget of a plugin-registered custom type.
    pub fn custom(
        identifier: impl Into<String>,
        title: impl Into<String>,
        custom_type: impl Into<String>,
        extras: Value,
    ) -> Self {
        Self::of_kind(
            identifier,
            title,
            WidgetKind::Custom {
                custom_type: custom_type.into(),
                extras,
            },
        )
    }

    fn of_kind(identifier: impl Into<String>, title: impl Into<String>, kind: WidgetKind) -> Self {
        Self {
            identifier: identifier.into(),
            title: title.into(),
            kind,
            ignore_dashboard_filters: Vec::new(),
            date_data_set: None,
        }
    }

    /// The custom widget type, for plugin-provided widgets.
    pub fn custom_type(&self) -> Option<&str> {
        match &self.kind {
            WidgetKind::Custom { custom_type, .. } => Some(custom_type),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WidgetKind {
    Insight {
        insight: ObjRef,
    },
    Kpi {
        measure: ObjRef,
    },
    Custom {
        #[serde(rename = "customType")]
        custom_type: String,
        #[serde(default)]
        extras: Value,
    },
}
