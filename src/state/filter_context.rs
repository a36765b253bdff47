use serde::{Deserialize, Serialize};

use super::ObjRef;

/// Upper bound on attribute filters in one filter context.
pub const MAX_ATTRIBUTE_FILTERS: usize = 30;

/// The dashboard's filter context: at most one date filter plus any number of
/// attribute filters, in display order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterContextState {
    #[serde(default)]
    pub filters: Vec<FilterContextItem>,
}

impl FilterContextState {
    /// Attribute filters in display order.
    pub fn attribute_filters(&self) -> impl Iterator<Item = &AttributeFilter> {
        self.filters.iter().filter_map(|item| match item {
            FilterContextItem::Attribute(filter) => Some(filter),
            FilterContextItem::Date(_) => None,
        })
    }

    /// Number of attribute filters, the date filter excluded.
    pub fn attribute_filter_count(&self) -> usize {
        self.attribute_filters().count()
    }

    /// The attribute filter with local identifier `local_id`.
    pub fn attribute_filter(&self, local_id: &str) -> Option<&AttributeFilter> {
        self.attribute_filters()
            .find(|filter| filter.local_identifier == local_id)
    }

    pub(crate) fn attribute_filter_mut(&mut self, local_id: &str) -> Option<&mut AttributeFilter> {
        self.filters.iter_mut().find_map(|item| match item {
            FilterContextItem::Attribute(filter) if filter.local_identifier == local_id => {
                Some(filter)
            }
            _ => None,
        })
    }

    /// The attribute filter bound to the given display form, if any.
    pub fn attribute_filter_by_display_form(&self, display_form: &ObjRef) -> Option<&AttributeFilter> {
        self.attribute_filters()
            .find(|filter| &filter.display_form == display_form)
    }

    /// The date filter, if the context has one.
    pub fn date_filter(&self) -> Option<&DateFilter> {
        self.filters.iter().find_map(|item| match item {
            FilterContextItem::Date(filter) => Some(filter),
            FilterContextItem::Attribute(_) => None,
        })
    }

    pub(crate) fn date_filter_mut(&mut self) -> Option<&mut DateFilter> {
        self.filters.iter_mut().find_map(|item| match item {
            FilterContextItem::Date(filter) => Some(filter),
            FilterContextItem::Attribute(_) => None,
        })
    }

    /// Position in `filters` at which the `index`-th attribute filter should
    /// be inserted. Indices past the end append.
    pub(crate) fn attribute_insert_position(&self, index: usize) -> usize {
        self.filters
            .iter()
            .enumerate()
            .filter(|(_, item)| matches!(item, FilterContextItem::Attribute(_)))
            .nth(index)
            .map(|(position, _)| position)
            .unwrap_or(self.filters.len())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FilterContextItem {
    Attribute(AttributeFilter),
    Date(DateFilter),
}

/// A filter on the elements of one attribute display form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeFilter {
    pub local_identifier: String,
    pub display_form: ObjRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub selection: AttributeElements,
    pub mode: SelectionMode,
}

impl AttributeFilter {
    /// A filter that selects everything (empty negative selection).
    pub fn new(local_id: impl Into<String>, display_form: ObjRef) -> Self {
        Self {
            local_identifier: local_id.into(),
            display_form,
            title: None,
            selection: AttributeElements::default(),
            mode: SelectionMode::NotIn,
        }
    }

    /// Set the title shown on the filter button.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the selected elements and the selection mode.
    pub fn with_selection(mut self, selection: AttributeElements, mode: SelectionMode) -> Self {
        self.selection = selection;
        self.mode = mode;
        self
    }

    /// Returns `true` when the filter does not restrict anything.
    pub fn is_all(&self) -> bool {
        self.mode == SelectionMode::NotIn && self.selection.is_empty()
    }
}

/// Selected attribute elements, either by URI or by value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeElements {
    Uris { uris: Vec<String> },
    Values { values: Vec<String> },
}

impl Default for AttributeElements {
    fn default() -> Self {
        Self::Uris { uris: Vec::new() }
    }
}

impl AttributeElements {
    /// Elements identified by their URIs.
    pub fn uris<I, S>(uris: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Uris {
            uris: uris.into_iter().map(Into::into).collect(),
        }
    }

    /// Elements identified by their values.
    pub fn values<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Values {
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Number of selected elements.
    pub fn len(&self) -> usize {
        match self {
            Self::Uris { uris } => uris.len(),
            Self::Values { values } => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// An empty selection of the same flavour.
    pub fn cleared(&self) -> Self {
        match self {
            Self::Uris { .. } => Self::Uris { uris: Vec::new() },
            Self::Values { .. } => Self::Values { values: Vec::new() },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SelectionMode {
    In,
    NotIn,
}

/// The dashboard's date filter. `selection: None` means "all time".
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateFilter {
    #[serde(default)]
    pub selection: Option<DateFilterSelection>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DateFilterSelection {
    /// Offsets relative to the current period, e.g. granularity
    /// `GDC.time.year` from -3 to 0.
    Relative {
        granularity: String,
        from: i32,
        to: i32,
    },
    /// ISO dates, inclusive.
    Absolute { from: String, to: String },
}
