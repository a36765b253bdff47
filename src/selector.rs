//! Memoized read-only derivations over the state tree.
//!
//! A [`Selector`] declares the slices it reads. Its memo is keyed on the
//! content fingerprints of exactly those slices, so a snapshot that differs
//! only in unrelated slices (or that was rebuilt with structurally equal
//! content) is served from the memo without recomputing.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::state::{DashboardState, Fingerprint, Loadable, SliceKind};

type Compute<T> = Box<dyn Fn(&DashboardState) -> Option<T> + Send + Sync>;

struct Memo<T> {
    key: Vec<Fingerprint>,
    value: Arc<T>,
}

/// A memoized derivation.
///
/// # Examples
///
/// ```
/// use dashboard_model::{DashboardState, Loadable, Selector, SliceKind};
///
/// let title = Selector::new("title", &[SliceKind::Meta], |state: &DashboardState| {
///     state.meta().get().map(|meta| meta.title.clone())
/// });
/// // Nothing is loaded yet: the sentinel, not an empty string.
/// assert_eq!(title.select(&DashboardState::default()), Loadable::NotLoaded);
/// ```
pub struct Selector<T> {
    name: &'static str,
    dependencies: Vec<SliceKind>,
    compute: Compute<T>,
    memo: Mutex<Option<Memo<T>>>,
    computations: AtomicU64,
}

impl<T> fmt::Debug for Selector<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selector")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("computations", &self.computations())
            .finish_non_exhaustive()
    }
}

impl<T: Send + Sync + 'static> Selector<T> {
    /// Build a selector over `dependencies`.
    ///
    /// `compute` only runs when every dependency is loaded; returning `None`
    /// from it also yields [`Loadable::NotLoaded`].
    pub fn new<F>(name: &'static str, dependencies: &[SliceKind], compute: F) -> Self
    where
        F: Fn(&DashboardState) -> Option<T> + Send + Sync + 'static,
    {
        Self {
            name,
            dependencies: dependencies.to_vec(),
            compute: Box::new(compute),
            memo: Mutex::new(None),
            computations: AtomicU64::new(0),
        }
    }

    /// Derive the value for `state`, reusing the memo when the fingerprints
    /// of every dependency are unchanged.
    pub fn select(&self, state: &DashboardState) -> Loadable<Arc<T>> {
        if self
            .dependencies
            .iter()
            .any(|kind| !state.is_loaded(*kind))
        {
            return Loadable::NotLoaded;
        }

        let key: Vec<Fingerprint> = self
            .dependencies
            .iter()
            .map(|kind| state.fingerprint(*kind))
            .collect();
        if let Some(memo) = self.memo().as_ref()
            && memo.key == key
        {
            return Loadable::Loaded(Arc::clone(&memo.value));
        }

        // Computed outside the lock; a concurrent caller may compute the
        // same value, and the last one stored wins.
        let Some(value) = (self.compute)(state) else {
            return Loadable::NotLoaded;
        };
        self.computations.fetch_add(1, Ordering::Relaxed);
        let value = Arc::new(value);
        *self.memo() = Some(Memo {
            key,
            value: Arc::clone(&value),
        });
        Loadable::Loaded(value)
    }
}

impl<T> Selector<T> {
    /// Name given at construction, used in logs and `Debug` output.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Slices whose fingerprints key the memo.
    pub fn dependencies(&self) -> &[SliceKind] {
        &self.dependencies
    }

    /// How many times the derivation actually ran.
    pub fn computations(&self) -> u64 {
        self.computations.load(Ordering::Relaxed)
    }

    fn memo(&self) -> MutexGuard<'_, Option<Memo<T>>> {
        self.memo.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Built-in selectors.
///
/// Each call returns a fresh selector with its own memo; keep the returned
/// value around to benefit from memoization.
pub mod selectors {
    use std::collections::BTreeMap;

    use serde_json::Value;

    use super::Selector;
    use crate::state::{
        AlertsState, AttributeFilter, CatalogAttribute, CatalogDateDataset, CatalogFact,
        CatalogMeasure, ConfigState, DashboardState, DateFilter, FilterContextItem, InsightSummary,
        KpiAlert, LayoutState, LoadingState, ObjRef, PermissionsState, Separators, SliceKind,
        UserState, Widget,
    };

    fn slice<T, F>(name: &'static str, kind: SliceKind, read: F) -> Selector<T>
    where
        T: Send + Sync + 'static,
        F: Fn(&DashboardState) -> Option<T> + Send + Sync + 'static,
    {
        Selector::new(name, &[kind], read)
    }

    /// The whole config slice.
    pub fn config() -> Selector<ConfigState> {
        slice("config", SliceKind::Config, |s| s.config().get().cloned())
    }

    /// Locale used for formatting, e.g. `en-US`.
    pub fn locale() -> Selector<String> {
        slice("locale", SliceKind::Config, |s| {
            s.config().get().map(|c| c.locale.clone())
        })
    }

    /// Thousand and decimal separators for number formatting.
    pub fn separators() -> Selector<Separators> {
        slice("separators", SliceKind::Config, |s| {
            s.config().get().map(|c| c.separators.clone())
        })
    }

    /// Whether the dashboard was opened read-only.
    pub fn is_read_only() -> Selector<bool> {
        slice("isReadOnly", SliceKind::Config, |s| {
            s.config().get().map(|c| c.is_read_only)
        })
    }

    /// Mapbox access token for geo charts; `Loaded(None)` when unset.
    pub fn mapbox_token() -> Selector<Option<String>> {
        slice("mapboxToken", SliceKind::Config, |s| {
            s.config().get().map(|c| c.mapbox_token.clone())
        })
    }

    /// Date format pattern, e.g. `MM/dd/yyyy`.
    pub fn date_format() -> Selector<String> {
        slice("dateFormat", SliceKind::Config, |s| {
            s.config().get().map(|c| c.date_format.clone())
        })
    }

    /// Every feature setting, keyed by name.
    pub fn settings() -> Selector<BTreeMap<String, Value>> {
        slice("settings", SliceKind::Config, |s| {
            s.config().get().map(|c| c.settings.clone())
        })
    }

    /// One feature setting; `Loaded(None)` when it is not set.
    ///
    /// Free-form settings such as `dateFilterConfig` are read through here.
    pub fn setting(name: impl Into<String>) -> Selector<Option<Value>> {
        let name = name.into();
        slice("setting", SliceKind::Config, move |s| {
            s.config().get().map(|c| c.settings.get(&name).cloned())
        })
    }

    /// Whether scheduled e-mails can be created from KPI dashboards.
    pub fn enable_kpi_dashboard_schedule() -> Selector<bool> {
        flag("enableKPIDashboardSchedule")
    }

    /// Whether scheduled e-mails may have recipients other than the author.
    pub fn enable_kpi_dashboard_schedule_recipients() -> Selector<bool> {
        flag("enableKPIDashboardScheduleRecipients")
    }

    /// A boolean setting; anything other than `true` reads as `false`.
    fn flag(name: &'static str) -> Selector<bool> {
        slice(name, SliceKind::Config, move |s| {
            s.config()
                .get()
                .map(|c| c.settings.get(name).and_then(Value::as_bool).unwrap_or(false))
        })
    }

    /// Every capability flag of the current user.
    pub fn permissions() -> Selector<PermissionsState> {
        slice("permissions", SliceKind::Permissions, |s| {
            s.permissions().get().cloned()
        })
    }

    /// Whether the user may list other users in the workspace.
    pub fn can_list_users() -> Selector<bool> {
        slice("canListUsers", SliceKind::Permissions, |s| {
            s.permissions().get().map(|p| p.can_list_users_in_project)
        })
    }

    /// Every filter in the filter context, date filter included, in order.
    pub fn filters() -> Selector<Vec<FilterContextItem>> {
        slice("filters", SliceKind::FilterContext, |s| {
            s.filter_context().get().map(|ctx| ctx.filters.clone())
        })
    }

    /// Attribute filters only, in filter-context order.
    pub fn attribute_filters() -> Selector<Vec<AttributeFilter>> {
        slice("attributeFilters", SliceKind::FilterContext, |s| {
            s.filter_context()
                .get()
                .map(|ctx| ctx.attribute_filters().cloned().collect())
        })
    }

    /// The date filter; `Loaded(None)` when the context has none.
    pub fn date_filter() -> Selector<Option<DateFilter>> {
        slice("dateFilter", SliceKind::FilterContext, |s| {
            s.filter_context().get().map(|ctx| ctx.date_filter().cloned())
        })
    }

    /// The attribute filter with the given local identifier.
    ///
    /// # Arguments
    ///
    /// * `local_id` - Local identifier of the filter within the context.
    ///
    /// # Returns
    ///
    /// `Loaded(None)` when the context is loaded but holds no such filter.
    pub fn attribute_filter(local_id: impl Into<String>) -> Selector<Option<AttributeFilter>> {
        let local_id = local_id.into();
        slice("attributeFilter", SliceKind::FilterContext, move |s| {
            s.filter_context()
                .get()
                .map(|ctx| ctx.attribute_filter(&local_id).cloned())
        })
    }

    /// The attribute filter on `display_form`, if any.
    pub fn attribute_filter_by_display_form(
        display_form: ObjRef,
    ) -> Selector<Option<AttributeFilter>> {
        slice("attributeFilterByDisplayForm", SliceKind::FilterContext, move |s| {
            s.filter_context()
                .get()
                .map(|ctx| ctx.attribute_filter_by_display_form(&display_form).cloned())
        })
    }

    /// The whole layout slice.
    pub fn layout() -> Selector<LayoutState> {
        slice("layout", SliceKind::Layout, |s| s.layout().get().cloned())
    }

    /// Every widget, section by section, in layout order.
    pub fn widgets() -> Selector<Vec<Widget>> {
        slice("widgets", SliceKind::Layout, |s| {
            s.layout().get().map(|l| l.widgets().cloned().collect())
        })
    }

    /// The widget with `identifier`; `Loaded(None)` when absent.
    pub fn widget(identifier: impl Into<String>) -> Selector<Option<Widget>> {
        let identifier = identifier.into();
        slice("widget", SliceKind::Layout, move |s| {
            s.layout().get().map(|l| l.widget(&identifier).cloned())
        })
    }

    /// Attributes available for filtering and drilling.
    pub fn catalog_attributes() -> Selector<Vec<CatalogAttribute>> {
        slice("catalogAttributes", SliceKind::Catalog, |s| {
            s.catalog().get().map(|c| c.attributes.clone())
        })
    }

    /// Measures available in the workspace catalog.
    pub fn catalog_measures() -> Selector<Vec<CatalogMeasure>> {
        slice("catalogMeasures", SliceKind::Catalog, |s| {
            s.catalog().get().map(|c| c.measures.clone())
        })
    }

    /// Facts available in the workspace catalog.
    pub fn catalog_facts() -> Selector<Vec<CatalogFact>> {
        slice("catalogFacts", SliceKind::Catalog, |s| {
            s.catalog().get().map(|c| c.facts.clone())
        })
    }

    /// Date datasets a date filter can apply to.
    pub fn catalog_date_datasets() -> Selector<Vec<CatalogDateDataset>> {
        slice("catalogDateDatasets", SliceKind::Catalog, |s| {
            s.catalog().get().map(|c| c.date_datasets.clone())
        })
    }

    /// Catalog attributes that declare a drill-down step.
    pub fn attributes_with_drill_down() -> Selector<Vec<CatalogAttribute>> {
        slice("attributesWithDrillDown", SliceKind::Catalog, |s| {
            s.catalog().get().map(|c| {
                c.attributes
                    .iter()
                    .filter(|a| a.drill_down_step.is_some())
                    .cloned()
                    .collect()
            })
        })
    }

    /// KPI alerts of the current user.
    pub fn alerts() -> Selector<AlertsState> {
        slice("alerts", SliceKind::Alerts, |s| s.alerts().get().cloned())
    }

    /// The alert set on the KPI widget `widget`, if any.
    pub fn alert_for_widget(widget: impl Into<String>) -> Selector<Option<KpiAlert>> {
        let widget = widget.into();
        slice("alertForWidget", SliceKind::Alerts, move |s| {
            s.alerts()
                .get()
                .map(|a| a.alerts.iter().find(|alert| alert.widget == widget).cloned())
        })
    }

    /// The signed-in user.
    pub fn user() -> Selector<UserState> {
        slice("user", SliceKind::User, |s| s.user().get().cloned())
    }

    /// Current dashboard title, reflecting renames.
    pub fn dashboard_title() -> Selector<String> {
        slice("dashboardTitle", SliceKind::Meta, |s| {
            s.meta().get().map(|m| m.title.clone())
        })
    }

    /// Reference of the loaded dashboard object.
    pub fn dashboard_ref() -> Selector<ObjRef> {
        slice("dashboardRef", SliceKind::Meta, |s| {
            s.meta().get().map(|m| m.obj_ref.clone())
        })
    }

    /// Insights referenced by the dashboard's widgets.
    pub fn insights() -> Selector<Vec<InsightSummary>> {
        slice("insights", SliceKind::Insights, |s| {
            s.insights().get().map(|i| i.insights.clone())
        })
    }

    /// Progress and outcome of the last dashboard load.
    pub fn loading() -> Selector<LoadingState> {
        slice("loading", SliceKind::Loading, |s| s.loading().get().cloned())
    }
}
