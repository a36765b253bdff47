//! Normalized dashboard state tree.
//!
//! The tree is partitioned into independent slices. Each slice sits behind an
//! `Arc` together with a content [`Fingerprint`] and a revision counter, so a
//! snapshot is cheap to clone and selectors can key their memo on slice
//! content rather than on pointer identity.
//!
//! The tree is only ever replaced wholesale: the command bus applies a
//! [`StatePatch`] to the current snapshot and publishes the result. Slices the
//! patch does not touch (or touches with identical content) keep their `Arc`,
//! fingerprint and revision.

mod filter_context;
mod layout;
mod slices;

pub use filter_context::{
    AttributeElements, AttributeFilter, DateFilter, DateFilterSelection, FilterContextItem,
    FilterContextState, MAX_ATTRIBUTE_FILTERS, SelectionMode,
};
pub use layout::{
    GRID_COLUMNS, ItemSize, LayoutItem, LayoutSection, LayoutState, SectionHeader, Widget,
    WidgetKind,
};
pub use slices::{
    AlertCondition, AlertsState, CatalogAttribute, CatalogDateDataset, CatalogFact,
    CatalogMeasure, CatalogState, ConfigState, DashboardMeta, InsightSummary, InsightsState,
    KpiAlert, LoadingState, PermissionsState, Separators, UserState,
};

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize, Serializer};

use crate::error::HandlerError;

/// Reference to a metadata object on the analytical backend.
///
/// Serializes as either `{"identifier": "..."}` or `{"uri": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ObjRef {
    /// Reference by stable identifier.
    Identifier {
        /// The object identifier.
        identifier: String,
    },
    /// Reference by backend URI.
    Uri {
        /// The object URI.
        uri: String,
    },
}

impl ObjRef {
    /// Reference an object by identifier.
    pub fn identifier(id: impl Into<String>) -> Self {
        Self::Identifier {
            identifier: id.into(),
        }
    }

    /// Reference an object by URI.
    pub fn uri(uri: impl Into<String>) -> Self {
        Self::Uri { uri: uri.into() }
    }
}

impl fmt::Display for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identifier { identifier } => write!(f, "id:{identifier}"),
            Self::Uri { uri } => write!(f, "uri:{uri}"),
        }
    }
}

/// Names of the independent slices of the state tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SliceKind {
    FilterContext,
    Layout,
    Config,
    Catalog,
    Permissions,
    Alerts,
    Meta,
    User,
    Insights,
    Loading,
}

impl SliceKind {
    /// Every slice, in tree order.
    pub const ALL: [SliceKind; 10] = [
        SliceKind::FilterContext,
        SliceKind::Layout,
        SliceKind::Config,
        SliceKind::Catalog,
        SliceKind::Permissions,
        SliceKind::Alerts,
        SliceKind::Meta,
        SliceKind::User,
        SliceKind::Insights,
        SliceKind::Loading,
    ];

    /// Returns the canonical camelCase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FilterContext => "filterContext",
            Self::Layout => "layout",
            Self::Config => "config",
            Self::Catalog => "catalog",
            Self::Permissions => "permissions",
            Self::Alerts => "alerts",
            Self::Meta => "meta",
            Self::User => "user",
            Self::Insights => "insights",
            Self::Loading => "loading",
        }
    }
}

impl fmt::Display for SliceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content hash of a slice.
///
/// Two slices with structurally equal content always share a fingerprint,
/// regardless of how or when they were built. A slice that is not loaded has
/// the all-zero fingerprint.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Fingerprint of a slice that has not been loaded.
    pub const NOT_LOADED: Fingerprint = Fingerprint([0; 32]);

    /// Hash the JSON serialization of `value`.
    pub fn of<T: Serialize + ?Sized>(value: &T) -> Self {
        let mut hasher = blake3::Hasher::new();
        if let Err(e) = serde_json::to_writer(&mut hasher, value) {
            // Content that cannot be serialized must never alias another
            // slice, so salt it with a fresh random value.
            tracing::warn!(error = %e, "slice content is not serializable");
            hasher.update(uuid::Uuid::new_v4().as_bytes());
        }
        Self(*hasher.finalize().as_bytes())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The first eight bytes are plenty to tell fingerprints apart in logs.
        write!(f, "Fingerprint(")?;
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, ")")
    }
}

/// Either a value, or the explicit "not loaded yet" sentinel.
///
/// Distinct from an empty value: `Loaded(vec![])` means "loaded, and there is
/// nothing", `NotLoaded` means "the backing slice has not been populated".
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Loadable<T> {
    #[default]
    NotLoaded,
    Loaded(T),
}

impl<T> Loadable<T> {
    /// Returns `true` when a value is present.
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }

    /// Converts into an `Option`, dropping the sentinel.
    pub fn loaded(self) -> Option<T> {
        match self {
            Self::Loaded(value) => Some(value),
            Self::NotLoaded => None,
        }
    }

    /// Borrow the contained value.
    pub fn as_ref(&self) -> Loadable<&T> {
        match self {
            Self::Loaded(value) => Loadable::Loaded(value),
            Self::NotLoaded => Loadable::NotLoaded,
        }
    }

    /// Map the contained value, keeping the sentinel as is.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Loadable<U> {
        match self {
            Self::Loaded(value) => Loadable::Loaded(f(value)),
            Self::NotLoaded => Loadable::NotLoaded,
        }
    }
}

impl<T> From<Option<T>> for Loadable<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Self::Loaded(value),
            None => Self::NotLoaded,
        }
    }
}

/// One slice of the state tree.
///
/// `Clone` is cheap: the content is shared behind an `Arc`.
#[derive(Debug)]
pub struct Slice<T> {
    value: Option<Arc<T>>,
    fingerprint: Fingerprint,
    revision: u64,
}

// Manual impls so that `T` itself need not be `Clone` / `Default`.
impl<T> Clone for Slice<T> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            fingerprint: self.fingerprint,
            revision: self.revision,
        }
    }
}

impl<T> Default for Slice<T> {
    fn default() -> Self {
        Self {
            value: None,
            fingerprint: Fingerprint::NOT_LOADED,
            revision: 0,
        }
    }
}

impl<T: Serialize> Slice<T> {
    /// A loaded slice at revision 1.
    pub fn loaded(value: T) -> Self {
        Self {
            fingerprint: Fingerprint::of(&value),
            value: Some(Arc::new(value)),
            revision: 1,
        }
    }
}

impl<T: Serialize + PartialEq> Slice<T> {
    /// Build the successor of this slice holding `value`.
    ///
    /// Returns `None` when `value` equals the current content, in which case
    /// the existing slice must be kept as is.
    fn replaced(&self, value: T) -> Option<Self> {
        if self.value.as_deref() == Some(&value) {
            return None;
        }
        Some(Self {
            fingerprint: Fingerprint::of(&value),
            value: Some(Arc::new(value)),
            revision: self.revision + 1,
        })
    }
}

impl<T> Slice<T> {
    /// Borrow the content, if loaded.
    pub fn get(&self) -> Option<&T> {
        self.value.as_deref()
    }

    /// The shared content, if loaded.
    pub fn shared(&self) -> Option<&Arc<T>> {
        self.value.as_ref()
    }

    /// The content as a [`Loadable`].
    pub fn loadable(&self) -> Loadable<&T> {
        self.get().into()
    }

    /// Returns `true` when the slice has been populated.
    pub fn is_loaded(&self) -> bool {
        self.value.is_some()
    }

    /// Content fingerprint.
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Number of committed content changes, starting at 1 when first loaded.
    pub fn revision(&self) -> u64 {
        self.revision
    }
}

impl<T: Serialize> Serialize for Slice<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.get().serialize(serializer)
    }
}

/// The complete dashboard state tree.
///
/// Readers only ever see immutable snapshots (`Arc<DashboardState>`); the
/// command bus is the single writer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardState {
    filter_context: Slice<FilterContextState>,
    layout: Slice<LayoutState>,
    config: Slice<ConfigState>,
    catalog: Slice<CatalogState>,
    permissions: Slice<PermissionsState>,
    alerts: Slice<AlertsState>,
    meta: Slice<DashboardMeta>,
    user: Slice<UserState>,
    insights: Slice<InsightsState>,
    loading: Slice<LoadingState>,
}

impl Default for DashboardState {
    fn default() -> Self {
        Self {
            filter_context: Slice::default(),
            layout: Slice::default(),
            config: Slice::default(),
            catalog: Slice::default(),
            permissions: Slice::default(),
            alerts: Slice::default(),
            meta: Slice::default(),
            user: Slice::default(),
            insights: Slice::default(),
            // Loading status is always known.
            loading: Slice::loaded(LoadingState::default()),
        }
    }
}

macro_rules! patch_slices {
    ($($field:ident: $ty:ty => $kind:ident),* $(,)?) => {
        /// A set of whole-slice replacements produced by a command handler.
        ///
        /// Applied atomically by the command bus: either every replacement is
        /// committed or none is.
        #[derive(Debug, Default, Clone)]
        pub struct StatePatch {
            $($field: Option<$ty>,)*
        }

        impl StatePatch {
            /// An empty patch.
            pub fn new() -> Self {
                Self::default()
            }

            $(
                #[doc = concat!("Replace the `", stringify!($field), "` slice.")]
                pub fn $field(mut self, value: $ty) -> Self {
                    self.$field = Some(value);
                    self
                }
            )*

            /// Slices this patch replaces, in tree order.
            pub fn touched(&self) -> Vec<SliceKind> {
                let mut touched = Vec::new();
                $(
                    if self.$field.is_some() {
                        touched.push(SliceKind::$kind);
                    }
                )*
                touched
            }

            /// Returns `true` when the patch replaces nothing.
            pub fn is_empty(&self) -> bool {
                true $(&& self.$field.is_none())*
            }
        }

        impl DashboardState {
            $(
                #[doc = concat!("The `", stringify!($field), "` slice.")]
                pub fn $field(&self) -> &Slice<$ty> {
                    &self.$field
                }
            )*

            /// Fingerprint of the given slice.
            pub fn fingerprint(&self, kind: SliceKind) -> Fingerprint {
                match kind {
                    $(SliceKind::$kind => self.$field.fingerprint(),)*
                }
            }

            /// Revision of the given slice.
            pub fn revision(&self, kind: SliceKind) -> u64 {
                match kind {
                    $(SliceKind::$kind => self.$field.revision(),)*
                }
            }

            /// Whether the given slice has been loaded.
            pub fn is_loaded(&self, kind: SliceKind) -> bool {
                match kind {
                    $(SliceKind::$kind => self.$field.is_loaded(),)*
                }
            }

            /// Commit `patch` on top of this snapshot.
            ///
            /// `owned` lists the slices the handler that produced the patch is
            /// allowed to replace; touching anything else fails the whole
            /// commit. Returns `self` (the same `Arc`) when no slice content
            /// actually changes.
            pub(crate) fn apply_patch(
                self: &Arc<Self>,
                patch: StatePatch,
                owned: &[SliceKind],
            ) -> Result<Arc<Self>, HandlerError> {
                let undeclared: Vec<SliceKind> = patch
                    .touched()
                    .into_iter()
                    .filter(|kind| !owned.contains(kind))
                    .collect();
                if !undeclared.is_empty() {
                    return Err(HandlerError::UndeclaredSlice(undeclared));
                }

                let mut next = DashboardState::clone(self);
                let mut changed = false;
                $(
                    if let Some(value) = patch.$field
                        && let Some(slice) = self.$field.replaced(value)
                    {
                        next.$field = slice;
                        changed = true;
                    }
                )*

                if changed {
                    Ok(Arc::new(next))
                } else {
                    Ok(Arc::clone(self))
                }
            }
        }
    };
}

patch_slices! {
    filter_context: FilterContextState => FilterContext,
    layout: LayoutState => Layout,
    config: ConfigState => Config,
    catalog: CatalogState => Catalog,
    permissions: PermissionsState => Permissions,
    alerts: AlertsState => Alerts,
    meta: DashboardMeta => Meta,
    user: UserState => User,
    insights: InsightsState => Insights,
    loading: LoadingState => Loading,
}

impl DashboardState {
    /// Serialize the whole tree; unloaded slices appear as `null`.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
