//! The analytical backend collaborator and its in-memory implementation.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TransportError;
use crate::query::QuerySpec;
use crate::state::{
    AlertsState, CatalogState, ConfigState, DashboardMeta, FilterContextState, InsightsState,
    LayoutState, ObjRef, PermissionsState, UserState,
};

/// Boxed future returned by [`Backend`] methods.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// Everything `loadDashboard` needs, fetched in one round.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadedDashboard {
    pub meta: DashboardMeta,
    #[serde(default)]
    pub config: ConfigState,
    #[serde(default)]
    pub permissions: PermissionsState,
    #[serde(default)]
    pub catalog: CatalogState,
    #[serde(default)]
    pub alerts: AlertsState,
    #[serde(default)]
    pub user: UserState,
    #[serde(default)]
    pub insights: InsightsState,
    #[serde(default)]
    pub filter_context: FilterContextState,
    #[serde(default)]
    pub layout: LayoutState,
}

/// Source of dashboard definitions and query results.
///
/// Methods return boxed futures so the trait stays object safe; the
/// dashboard holds its backend as `Arc<dyn Backend>`.
pub trait Backend: Send + Sync + 'static {
    /// Fetch the dashboard identified by `dashboard` with every supporting
    /// slice.
    fn load_dashboard<'a>(&'a self, dashboard: &'a ObjRef) -> BackendFuture<'a, LoadedDashboard>;

    /// Execute a data query.
    fn execute_query<'a>(&'a self, spec: &'a QuerySpec) -> BackendFuture<'a, Value>;
}

type Responder = Arc<dyn Fn(&Value) -> Result<Value, TransportError> + Send + Sync>;

/// Fixture-driven [`Backend`] kept entirely in memory.
///
/// Counts calls, supports a fixed artificial latency, and can be scripted to
/// fail the next N loads or queries.
///
/// # Examples
///
/// ```
/// use dashboard_model::{InMemoryBackend, LoadedDashboard, ObjRef};
/// use serde_json::json;
///
/// let backend = InMemoryBackend::new()
///     .with_dashboard(ObjRef::identifier("sales"), LoadedDashboard::default())
///     .with_query_result("kpiValue", json!({"value": 42}));
/// assert_eq!(backend.load_calls(), 0);
/// ```
pub struct InMemoryBackend {
    dashboards: HashMap<ObjRef, LoadedDashboard>,
    responders: HashMap<String, Responder>,
    latency: Duration,
    load_calls: AtomicUsize,
    query_calls: AtomicUsize,
    failing_loads: Mutex<Option<(usize, TransportError)>>,
    failing_queries: Mutex<HashMap<String, (usize, TransportError)>>,
}

impl std::fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBackend")
            .field("dashboards", &self.dashboards.len())
            .field("query_types", &self.responders.len())
            .field("latency", &self.latency)
            .finish_non_exhaustive()
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    /// An empty backend: no dashboards, no query responders, no latency.
    pub fn new() -> Self {
        Self {
            dashboards: HashMap::new(),
            responders: HashMap::new(),
            latency: Duration::ZERO,
            load_calls: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
            failing_loads: Mutex::new(None),
            failing_queries: Mutex::new(HashMap::new()),
        }
    }

    /// Serve `loaded` for loads of `dashboard`.
    pub fn with_dashboard(mut self, dashboard: ObjRef, loaded: LoadedDashboard) -> Self {
        self.dashboards.insert(dashboard, loaded);
        self
    }

    /// Answer every query of `query_type` with `result`, whatever the params.
    pub fn with_query_result(self, query_type: impl Into<String>, result: Value) -> Self {
        self.with_query_handler(query_type, move |_| Ok(result.clone()))
    }

    /// Answer queries of `query_type` by calling `handler` with their params.
    pub fn with_query_handler<F>(mut self, query_type: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, TransportError> + Send + Sync + 'static,
    {
        self.responders.insert(query_type.into(), Arc::new(handler));
        self
    }

    /// Delay every call by `latency` before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail the next `times` dashboard loads with `error`.
    ///
    /// `times == 0` clears any scripted load failure.
    pub fn fail_next_loads(&self, times: usize, error: TransportError) {
        *lock(&self.failing_loads) = (times > 0).then_some((times, error));
    }

    /// Fail the next `times` queries of `query_type` with `error`.
    ///
    /// `times == 0` clears any scripted failure for `query_type`.
    pub fn fail_next_queries(&self, query_type: impl Into<String>, times: usize, error: TransportError) {
        let query_type: String = query_type.into();
        let mut failing = lock(&self.failing_queries);
        if times == 0 {
            failing.remove(&query_type);
        } else {
            failing.insert(query_type, (times, error));
        }
    }

    /// Number of `load_dashboard` calls so far, failed ones included.
    pub fn load_calls(&self) -> usize {
        self.load_calls.load(Ordering::SeqCst)
    }

    /// Number of `execute_query` calls so far, failed ones included.
    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Consume one scripted failure, if any remain.
fn take_failure(slot: &mut Option<(usize, TransportError)>) -> Option<TransportError> {
    let (remaining, error) = slot.as_mut()?;
    let Some(left) = remaining.checked_sub(1) else {
        *slot = None;
        return None;
    };
    let error = error.clone();
    *remaining = left;
    if left == 0 {
        *slot = None;
    }
    Some(error)
}

impl Backend for InMemoryBackend {
    fn load_dashboard<'a>(&'a self, dashboard: &'a ObjRef) -> BackendFuture<'a, LoadedDashboard> {
        Box::pin(async move {
            self.load_calls.fetch_add(1, Ordering::SeqCst);
            self.simulate_latency().await;
            if let Some(error) = take_failure(&mut lock(&self.failing_loads)) {
                return Err(error);
            }
            self.dashboards
                .get(dashboard)
                .cloned()
                .ok_or_else(|| TransportError::NotFound(format!("dashboard {dashboard}")))
        })
    }

    fn execute_query<'a>(&'a self, spec: &'a QuerySpec) -> BackendFuture<'a, Value> {
        Box::pin(async move {
            self.query_calls.fetch_add(1, Ordering::SeqCst);
            self.simulate_latency().await;
            let scripted = {
                let mut failing = lock(&self.failing_queries);
                let mut slot = failing.remove(&spec.query_type);
                let error = take_failure(&mut slot);
                if let Some(rest) = slot {
                    failing.insert(spec.query_type.clone(), rest);
                }
                error
            };
            if let Some(error) = scripted {
                return Err(error);
            }
            let responder = self
                .responders
                .get(&spec.query_type)
                .ok_or_else(|| TransportError::NotFound(format!("query type {}", spec.query_type)))?;
            responder(&spec.params)
        })
    }
}


#[cfg(test)]
mod tests {
    use super::test_fixtures::*;
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn loads_known_dashboard_and_counts_calls() {
        let backend = sales_backend();
        let loaded = backend
            .load_dashboard(&sales_ref())
            .await
            .expect("load should succeed");
        assert_eq!(loaded.meta.title, "Sales");
        assert_eq!(backend.load_calls(), 1);
    }

    #[tokio::test]
    async fn unknown_dashboard_is_not_found() {
        let backend = sales_backend();
        let result = backend.load_dashboard(&ObjRef::identifier("nope")).await;
        assert!(
            matches!(result, Err(TransportError::NotFound(_))),
            "expected NotFound, got: {result:?}"
        );
    }

    #[tokio::test]
    async fn zero_scripted_failures_clear_the_script() {
        let backend = sales_backend().with_query_result("kpi", json!(3));
        backend.fail_next_loads(2, TransportError::Unavailable("maintenance".into()));
        backend.fail_next_loads(0, TransportError::Unavailable("maintenance".into()));
        backend.fail_next_queries("kpi", 0, TransportError::Failed("boom".into()));

        backend
            .load_dashboard(&sales_ref())
            .await
            .expect("no load failure scripted");
        let spec = QuerySpec::new("kpi", Value::Null);
        let value = backend.execute_query(&spec).await.expect("no query failure scripted");
        assert_eq!(value, json!(3));
    }

    #[tokio::test]
    async fn scripted_load_failures_are_consumed() {
        let backend = sales_backend();
        backend.fail_next_loads(1, TransportError::Unavailable("maintenance".into()));
        assert!(backend.load_dashboard(&sales_ref()).await.is_err());
        assert!(backend.load_dashboard(&sales_ref()).await.is_ok());
        assert_eq!(backend.load_calls(), 2);
    }

    #[tokio::test]
    async fn query_handler_sees_params() {
        let backend = InMemoryBackend::new().with_query_handler("echo", |params| Ok(params.clone()));
        let spec = QuerySpec::new("echo", json!({"a": 1}));
        let result = backend.execute_query(&spec).await.expect("query should succeed");
        assert_eq!(result, json!({"a": 1}));
        assert_eq!(backend.query_calls(), 1);
    }

    #[tokio::test]
    async fn scripted_query_failures_are_per_type() {
        let backend = InMemoryBackend::new()
            .with_query_result("a", json!(1))
            .with_query_result("b", json!(2));
        backend.fail_next_queries("a", 2, TransportError::Failed("bad".into()));

        let a = QuerySpec::new("a", Value::Null);
        let b = QuerySpec::new("b", Value::Null);
        assert!(backend.execute_query(&b).await.is_ok());
        assert!(backend.execute_query(&a).await.is_err());
        assert!(backend.execute_query(&a).await.is_err());
        assert_eq!(backend.execute_query(&a).await, Ok(json!(1)));
    }
}
