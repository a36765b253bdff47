//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use dashboard_model::{
    AttributeFilter, CatalogAttribute, CatalogState, CommandContext, Dashboard, DashboardBuilder,
    DashboardEvent, DashboardMeta, DateFilter, EventFilter, FilterContextItem, FilterContextState,
    InMemoryBackend, LayoutItem, LayoutSection, LayoutState, LoadedDashboard, ObjRef,
    PermissionsState, Widget,
};

pub fn sales_ref() -> ObjRef {
    ObjRef::identifier("dashboard.sales")
}

/// One date filter, two attribute filters and a single section holding an
/// insight and a KPI.
pub fn sales_dashboard() -> LoadedDashboard {
    LoadedDashboard {
        meta: DashboardMeta {
            obj_ref: sales_ref(),
            uri: Some("/gdc/md/ws/obj/1".into()),
            title: "Sales".into(),
            description: "Quarterly sales overview".into(),
        },
        permissions: PermissionsState {
            can_list_users_in_project: true,
            ..PermissionsState::default()
        },
        catalog: CatalogState {
            attributes: vec![CatalogAttribute {
                obj_ref: ObjRef::identifier("attr.region"),
                title: "Region".into(),
                display_forms: vec![ObjRef::identifier("label.region")],
                drill_down_step: None,
            }],
            ..CatalogState::default()
        },
        filter_context: FilterContextState {
            filters: vec![
                FilterContextItem::Date(DateFilter::default()),
                FilterContextItem::Attribute(AttributeFilter::new(
                    "filter1",
                    ObjRef::identifier("label.region"),
                )),
                FilterContextItem::Attribute(AttributeFilter::new(
                    "filter2",
                    ObjRef::identifier("label.product"),
                )),
            ],
        },
        layout: LayoutState {
            sections: vec![
                LayoutSection::new()
                    .with_title("Overview")
                    .with_item(LayoutItem::new(
                        Widget::insight("w1", "Revenue", ObjRef::identifier("insight.revenue")),
                        6,
                    ))
                    .with_item(LayoutItem::new(
                        Widget::kpi("w2", "Orders", ObjRef::identifier("measure.orders")),
                        6,
                    )),
            ],
        },
        ..LoadedDashboard::default()
    }
}

pub fn sales_backend() -> InMemoryBackend {
    InMemoryBackend::new().with_dashboard(sales_ref(), sales_dashboard())
}

/// Open the sales dashboard (loaded) on `backend`.
pub async fn open(backend: Arc<InMemoryBackend>) -> Dashboard {
    DashboardBuilder::new(backend, sales_ref())
        .open()
        .await
        .expect("failed to open dashboard")
}

pub fn ctx() -> CommandContext {
    CommandContext::default().with_actor("test")
}

/// Record every event the dashboard emits from now on.
pub fn record(dashboard: &Dashboard) -> Arc<Mutex<Vec<DashboardEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    dashboard.on(EventFilter::All, move |event| {
        sink.lock().expect("lock").push(event.clone());
        Ok(())
    });
    events
}

pub fn types(events: &Mutex<Vec<DashboardEvent>>) -> Vec<&'static str> {
    events
        .lock()
        .expect("lock")
        .iter()
        .map(DashboardEvent::event_type)
        .collect()
}
