//! Self-contained walkthrough: open a dashboard on the in-memory backend,
//! register a plugin, dispatch commands and run a deduplicated query.
//!
//! Run with: `RUST_LOG=dashboard_model=debug cargo run --example dashboard`

use std::sync::Arc;
use std::time::Duration;

use dashboard_model::{
    AttributeElements, AttributeFilter, Command, CommandContext, DashboardBuilder,
    DashboardContext, DashboardCustomizer, DashboardMeta, DashboardPlugin, DateFilter,
    EventFilter, EventHandling, FilterContextItem, FilterContextState, InMemoryBackend,
    LayoutItem, LayoutSection, LayoutState, LoadedDashboard, ObjRef, PluginError, QuerySpec,
    RawCommand, SelectionMode, Widget, selectors,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Plugin
// ---------------------------------------------------------------------------

/// Adds a banner section and logs every rejected or failed command.
struct Banner;

impl DashboardPlugin for Banner {
    fn display_name(&self) -> &str {
        "banner"
    }

    fn register(
        &self,
        ctx: &DashboardContext,
        customize: &mut DashboardCustomizer,
        handlers: &mut EventHandling,
    ) -> Result<(), PluginError> {
        let title = format!("Welcome to {}", ctx.dashboard);
        customize
            .layout()
            .add_section_on_load(0, LayoutSection::new().with_title(title));
        handlers.add_custom_event_handler(
            |event| event.body.is_command_failure(),
            |event, _scope| {
                println!("  [banner] command problem: {:?}", event.body);
                Ok(())
            },
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

fn sales() -> (ObjRef, InMemoryBackend) {
    let dashboard = ObjRef::identifier("dashboard.sales");
    let loaded = LoadedDashboard {
        meta: DashboardMeta {
            obj_ref: dashboard.clone(),
            uri: None,
            title: "Sales".into(),
            description: String::new(),
        },
        filter_context: FilterContextState {
            filters: vec![
                FilterContextItem::Date(DateFilter::default()),
                FilterContextItem::Attribute(
                    AttributeFilter::new("region", ObjRef::identifier("label.region"))
                        .with_title("Region"),
                ),
            ],
        },
        layout: LayoutState {
            sections: vec![
                LayoutSection::new()
                    .with_title("Overview")
                    .with_item(LayoutItem::new(
                        Widget::kpi("revenue", "Revenue", ObjRef::identifier("measure.revenue")),
                        6,
                    )),
            ],
        },
        ..LoadedDashboard::default()
    };
    let backend = InMemoryBackend::new()
        .with_dashboard(dashboard.clone(), loaded)
        .with_latency(Duration::from_millis(25))
        .with_query_handler("kpiValue", |params| {
            Ok(json!({ "measure": params["measure"].clone(), "value": 1_250_000 }))
        });
    (dashboard, backend)
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let (dashboard_ref, backend) = sales();
    let dashboard = DashboardBuilder::new(Arc::new(backend), dashboard_ref)
        .workspace("demo")
        .plugin(Banner)
        .open()
        .await?;

    let sections = dashboard.select(&selectors::layout()).map(|l| l.sections.len());
    println!("opened: {sections:?} sections");

    dashboard.on(EventFilter::All, |event| {
        println!(
            "  event {} (correlation {})",
            event.event_type(),
            event.correlation_id().unwrap_or("-")
        );
        Ok(())
    });

    // --- Commands ---
    let ctx = CommandContext::default().with_actor("demo");
    dashboard
        .dispatch(
            Command::change_attribute_filter_selection(
                "region",
                AttributeElements::values(["EMEA", "APAC"]),
                SelectionMode::In,
            ),
            ctx.clone().with_correlation_id("select-regions"),
        )
        .await?;
    dashboard
        .dispatch(Command::change_relative_date_filter("GDC.time.quarter", -3, 0), ctx.clone())
        .await?;

    // Rejected: the filter does not exist. Reported as an event and an error.
    let rejected = dashboard
        .dispatch(Command::reset_attribute_filter_selection("product"), ctx.clone())
        .await;
    println!("reset unknown filter: {rejected:?}");

    // Wire-form commands go through the same bus.
    let raw = RawCommand::new("renameDashboard", json!({ "title": "Sales (demo)" }));
    dashboard.dispatch_raw(raw).await?;
    println!("title: {:?}", dashboard.select(&selectors::dashboard_title()));

    // --- Queries ---
    let spec = QuerySpec::new("kpiValue", json!({ "measure": "revenue" }));
    let (a, b) = tokio::join!(dashboard.query(spec.clone()), dashboard.query(spec));
    println!("query results equal: {}", a? == b?);

    dashboard.shutdown().await;
    Ok(())
}
