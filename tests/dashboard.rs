//! End-to-end tests for the command bus, state tree and event delivery of an
//! opened dashboard.

mod common;

use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use dashboard_model::{
    AttributeElements, Command, CommandPhase, DashboardBuilder, DispatchError, EventBody,
    EventFilter, FailureReason, HandlerError, LayoutItem, LayoutSection, Loadable, ObjRef,
    RawCommand, RejectionKind, SelectionMode, SliceKind, TransportError, Unmet, Widget, selectors,
};
use serde_json::json;
use tokio_stream::StreamExt;

use common::{ctx, open, record, sales_backend, sales_ref, types};

/// Selecting `u1` on `filter1` updates the filter and emits one
/// `filterSelectionChanged` carrying the caller's correlation id.
#[tokio::test]
async fn change_selection_updates_filter_and_correlates_event() {
    let dashboard = open(Arc::new(sales_backend())).await;
    let events = record(&dashboard);

    let event = dashboard
        .dispatch(
            Command::change_attribute_filter_selection(
                "filter1",
                AttributeElements::uris(["u1"]),
                SelectionMode::In,
            ),
            ctx().with_correlation_id("corr-1"),
        )
        .await
        .expect("change selection should succeed");
    assert_eq!(event.correlation_id(), Some("corr-1"));

    let state = dashboard.state();
    let filter = state
        .filter_context()
        .get()
        .and_then(|fc| fc.attribute_filter("filter1"))
        .expect("filter1 exists");
    assert_eq!(filter.selection, AttributeElements::uris(["u1"]));
    assert_eq!(filter.mode, SelectionMode::In);

    let events = events.lock().expect("lock");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type(), "filterSelectionChanged");
    assert_eq!(events[0].correlation_id(), Some("corr-1"));
}

#[tokio::test]
async fn unknown_raw_command_leaves_state_untouched() {
    let dashboard = open(Arc::new(sales_backend())).await;
    let events = record(&dashboard);
    let before = dashboard.state();
    let before_json = before.to_json();

    let raw = RawCommand::new("doesNotExist", json!({"anything": true})).with_correlation_id("raw-9");
    let result = dashboard.dispatch_raw(raw).await;
    assert!(
        matches!(result, Err(DispatchError::UnknownCommand(ref t)) if t == "doesNotExist"),
        "got: {result:?}"
    );

    let after = dashboard.state();
    assert!(Arc::ptr_eq(&before, &after));
    assert_eq!(after.to_json(), before_json);

    let events = events.lock().expect("lock");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].correlation_id(), Some("raw-9"));
    assert!(matches!(
        events[0].body,
        EventBody::CommandRejected {
            error: RejectionKind::UnknownCommand,
            ..
        }
    ));
}

#[tokio::test]
async fn raw_commands_decode_to_typed_ones() {
    let dashboard = open(Arc::new(sales_backend())).await;
    let raw = RawCommand::new("renameDashboard", json!({"title": "Sales EMEA"}));
    let event = dashboard.dispatch_raw(raw).await.expect("rename should succeed");
    assert_eq!(
        event.body,
        EventBody::DashboardRenamed {
            title: "Sales EMEA".into()
        }
    );
    assert_eq!(
        dashboard.select(&selectors::dashboard_title()),
        Loadable::Loaded(Arc::new("Sales EMEA".to_string()))
    );
}

/// A second reset of an already reset filter still emits its event but
/// leaves the state tree as it was.
#[tokio::test]
async fn reset_selection_is_idempotent() {
    let dashboard = open(Arc::new(sales_backend())).await;
    let events = record(&dashboard);
    dashboard
        .dispatch(
            Command::change_attribute_filter_selection(
                "filter1",
                AttributeElements::values(["East"]),
                SelectionMode::In,
            ),
            ctx(),
        )
        .await
        .expect("select");

    dashboard
        .dispatch(Command::reset_attribute_filter_selection("filter1"), ctx())
        .await
        .expect("first reset");
    let after_first = dashboard.state();
    let revision = after_first.revision(SliceKind::FilterContext);
    let filter = after_first
        .filter_context()
        .get()
        .and_then(|fc| fc.attribute_filter("filter1"))
        .expect("filter1");
    assert!(filter.is_all());

    dashboard
        .dispatch(Command::reset_attribute_filter_selection("filter1"), ctx())
        .await
        .expect("second reset");
    let after_second = dashboard.state();
    assert!(Arc::ptr_eq(&after_first, &after_second));
    assert_eq!(after_second.revision(SliceKind::FilterContext), revision);

    assert_eq!(
        types(&events),
        [
            "filterSelectionChanged",
            "filterSelectionChanged",
            "filterSelectionChanged"
        ]
    );
}

#[tokio::test]
async fn precondition_violations_reject_without_touching_state() {
    let dashboard = open(Arc::new(sales_backend())).await;
    let events = record(&dashboard);

    let cases: Vec<(Command, Unmet)> = vec![
        (
            Command::reset_attribute_filter_selection("missing"),
            Unmet::FilterNotFound("missing".into()),
        ),
        (
            Command::change_relative_date_filter("GDC.time.year", 0, -3),
            Unmet::InvertedDateRange { from: 0, to: -3 },
        ),
        (
            Command::add_attribute_filter(ObjRef::identifier("label.region"), None),
            Unmet::AlreadyFiltered(ObjRef::identifier("label.region")),
        ),
        (
            Command::RemoveAttributeFilters {
                filter_local_ids: Vec::new(),
            },
            Unmet::Empty("filterLocalIds"),
        ),
        (
            Command::RemoveLayoutSection { index: 4 },
            Unmet::IndexOutOfRange {
                what: "section",
                index: 4,
                len: 1,
            },
        ),
        (
            Command::ChangeWidgetTitle {
                widget_id: "w9".into(),
                title: "Nope".into(),
            },
            Unmet::WidgetNotFound("w9".into()),
        ),
        (Command::rename_dashboard("   "), Unmet::Blank("title")),
    ];

    for (i, (command, expected)) in cases.into_iter().enumerate() {
        let before = dashboard.state();
        let correlation_id = format!("pre-{i}");
        let result = dashboard
            .dispatch(command, ctx().with_correlation_id(correlation_id.clone()))
            .await;
        assert!(
            matches!(&result, Err(DispatchError::Precondition(e)) if e.unmet.contains(&expected)),
            "case {i}: got {result:?}"
        );
        assert!(Arc::ptr_eq(&before, &dashboard.state()), "case {i}");

        let events = events.lock().expect("lock");
        let last = events.last().expect("rejection event");
        assert_eq!(last.correlation_id(), Some(correlation_id.as_str()));
        assert!(
            matches!(
                last.body,
                EventBody::CommandRejected {
                    error: RejectionKind::Precondition,
                    ..
                }
            ),
            "case {i}: got {last:?}"
        );
    }
}

/// Successful commands change only the slices they declare, and emit
/// exactly one success event each.
#[tokio::test]
async fn commits_touch_only_owned_slices() {
    let dashboard = open(Arc::new(sales_backend())).await;
    let events = record(&dashboard);

    let commands = vec![
        Command::change_attribute_filter_selection(
            "filter2",
            AttributeElements::uris(["p1", "p2"]),
            SelectionMode::NotIn,
        ),
        Command::change_absolute_date_filter("2026-01-01", "2026-03-31"),
        Command::add_attribute_filter(ObjRef::identifier("label.city"), Some(0)),
        Command::AddSectionItems {
            section_index: 0,
            item_index: 2,
            items: vec![LayoutItem::new(
                Widget::kpi("w3", "Margin", ObjRef::identifier("measure.margin")),
                4,
            )],
        },
        Command::AddLayoutSection {
            index: 1,
            section: LayoutSection::new().with_title("Details"),
        },
        Command::rename_dashboard("Sales (Q1)"),
    ];

    for (i, command) in commands.into_iter().enumerate() {
        let owned = command.owned_slices();
        let before = dashboard.state();
        let correlation_id = format!("ok-{i}");
        dashboard
            .dispatch(command, ctx().with_correlation_id(correlation_id.clone()))
            .await
            .expect("command should succeed");
        let after = dashboard.state();

        for kind in SliceKind::ALL {
            if !owned.contains(&kind) {
                assert_eq!(
                    before.fingerprint(kind),
                    after.fingerprint(kind),
                    "case {i}: {kind:?} changed"
                );
                assert_eq!(before.revision(kind), after.revision(kind), "case {i}");
            }
        }
        let matching = events
            .lock()
            .expect("lock")
            .iter()
            .filter(|e| e.correlation_id() == Some(correlation_id.as_str()))
            .count();
        assert_eq!(matching, 1, "case {i}");
    }

    let filters = dashboard.select(&selectors::attribute_filters());
    let ids: Vec<String> = filters
        .loaded()
        .expect("filters loaded")
        .iter()
        .map(|f| f.local_identifier.clone())
        .collect();
    assert_eq!(ids.len(), 3);
    assert_eq!(ids[1..], ["filter1", "filter2"]);
}

#[tokio::test]
async fn drill_emits_without_changing_state() {
    let dashboard = open(Arc::new(sales_backend())).await;
    let before = dashboard.state();
    let event = dashboard
        .dispatch(
            Command::Drill {
                widget_id: "w1".into(),
                definition: json!({"target": "attr.city"}),
            },
            ctx(),
        )
        .await
        .expect("drill should succeed");
    assert_eq!(event.event_type(), "drillTriggered");
    assert!(Arc::ptr_eq(&before, &dashboard.state()));
}

#[tokio::test]
async fn queued_commands_run_in_submission_order() {
    let backend = Arc::new(sales_backend().with_latency(Duration::from_millis(20)));
    let dashboard = DashboardBuilder::new(backend, sales_ref())
        .load_on_open(false)
        .open()
        .await
        .expect("open");
    let events = record(&dashboard);

    // The rename's precondition needs the load that is queued ahead of it.
    let load = dashboard
        .try_dispatch(Command::LoadDashboard, ctx())
        .expect("queue load");
    let rename = dashboard
        .try_dispatch(Command::rename_dashboard("Renamed"), ctx())
        .expect("queue rename");
    let reset = dashboard
        .try_dispatch(Command::reset_attribute_filter_selection("filter1"), ctx())
        .expect("queue reset");

    rename.outcome().await.expect("rename");
    reset.outcome().await.expect("reset");
    load.outcome().await.expect("load");
    assert_eq!(
        types(&events),
        ["dashboardLoaded", "dashboardRenamed", "filterSelectionChanged"]
    );
}

#[tokio::test]
async fn cancelling_an_in_flight_load_fails_it() {
    let backend = Arc::new(sales_backend().with_latency(Duration::from_millis(50)));
    let dashboard = DashboardBuilder::new(Arc::clone(&backend) as _, sales_ref())
        .load_on_open(false)
        .open()
        .await
        .expect("open");
    let events = record(&dashboard);

    let ticket = dashboard
        .dispatch_command(Command::LoadDashboard, ctx())
        .await
        .expect("queued");
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(ticket.phase(), CommandPhase::Handling);
    ticket.cancel();

    let result = ticket.outcome().await;
    assert!(
        matches!(result, Err(DispatchError::HandlerExecution(HandlerError::Cancelled))),
        "got: {result:?}"
    );
    assert_eq!(backend.load_calls(), 1);
    assert!(!dashboard.state().is_loaded(SliceKind::Layout));
    let events = events.lock().expect("lock");
    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0].body,
        EventBody::CommandFailed {
            reason: FailureReason::Cancelled,
            ..
        }
    ));
}

#[tokio::test]
async fn transport_failure_on_reload_keeps_previous_state() {
    let backend = Arc::new(sales_backend());
    let dashboard = open(Arc::clone(&backend)).await;
    let events = record(&dashboard);
    let before = dashboard.state();

    backend.fail_next_loads(1, TransportError::Unavailable("maintenance".into()));
    let result = dashboard
        .dispatch(Command::LoadDashboard, ctx().with_correlation_id("reload"))
        .await;
    assert!(
        matches!(
            result,
            Err(DispatchError::HandlerExecution(HandlerError::Transport(
                TransportError::Unavailable(_)
            )))
        ),
        "got: {result:?}"
    );
    assert!(Arc::ptr_eq(&before, &dashboard.state()));

    let events = events.lock().expect("lock");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].correlation_id(), Some("reload"));
    assert!(matches!(
        events[0].body,
        EventBody::CommandFailed {
            reason: FailureReason::Transport,
            ..
        }
    ));
}

/// A handler disposed mid-delivery still sees the current event, but not
/// the next one.
#[tokio::test]
async fn unsubscribe_during_delivery_takes_effect_on_next_emit() {
    let dashboard = open(Arc::new(sales_backend())).await;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let target: Arc<OnceLock<dashboard_model::Subscription>> = Arc::new(OnceLock::new());

    let to_dispose = Arc::clone(&target);
    dashboard.on(EventFilter::of_type("dashboardRenamed"), move |_| {
        if let Some(subscription) = to_dispose.get() {
            subscription.dispose();
        }
        Ok(())
    });
    let sink = Arc::clone(&seen);
    let subscription = dashboard.on(EventFilter::All, move |event| {
        sink.lock().expect("lock").push(event.event_type());
        Ok(())
    });
    target.set(subscription).expect("set once");

    dashboard
        .dispatch(Command::rename_dashboard("One"), ctx())
        .await
        .expect("first rename");
    dashboard
        .dispatch(Command::rename_dashboard("Two"), ctx())
        .await
        .expect("second rename");

    assert_eq!(*seen.lock().expect("lock"), ["dashboardRenamed"]);
    assert!(!target.get().expect("subscription").is_active());
}

#[tokio::test]
async fn event_stream_and_state_watch_follow_commits() {
    let dashboard = open(Arc::new(sales_backend())).await;
    let mut stream = dashboard.events();
    let mut watch = dashboard.watch_state();
    watch.mark_unchanged();

    dashboard
        .dispatch(Command::rename_dashboard("Streamed"), ctx().with_correlation_id("s-1"))
        .await
        .expect("rename");

    let event = stream
        .next()
        .await
        .expect("stream open")
        .expect("no lag");
    assert_eq!(event.correlation_id(), Some("s-1"));
    assert!(watch.has_changed().expect("bus alive"));
    let title = watch
        .borrow_and_update()
        .meta()
        .get()
        .map(|m| m.title.clone());
    assert_eq!(title.as_deref(), Some("Streamed"));
}

#[tokio::test]
async fn selectors_recompute_only_when_their_slices_change() {
    let dashboard = open(Arc::new(sales_backend())).await;
    let filter = selectors::attribute_filter("filter1");

    let first = dashboard.select(&filter);
    assert!(first.is_loaded());
    dashboard
        .dispatch(Command::rename_dashboard("Unrelated"), ctx())
        .await
        .expect("rename");
    let second = dashboard.select(&filter);
    assert_eq!(filter.computations(), 1);
    assert_eq!(first, second);

    dashboard
        .dispatch(
            Command::change_attribute_filter_selection(
                "filter1",
                AttributeElements::uris(["u7"]),
                SelectionMode::In,
            ),
            ctx(),
        )
        .await
        .expect("change");
    let third = dashboard.select(&filter);
    assert_eq!(filter.computations(), 2);
    assert_ne!(second, third);
}

#[tokio::test]
async fn selectors_report_not_loaded_before_the_first_load() {
    let dashboard = DashboardBuilder::new(Arc::new(sales_backend()), sales_ref())
        .load_on_open(false)
        .open()
        .await
        .expect("open");
    assert_eq!(dashboard.select(&selectors::widgets()), Loadable::NotLoaded);
    assert_eq!(dashboard.select(&selectors::can_list_users()), Loadable::NotLoaded);

    dashboard
        .dispatch(Command::LoadDashboard, ctx())
        .await
        .expect("load");
    assert_eq!(
        dashboard.select(&selectors::can_list_users()),
        Loadable::Loaded(Arc::new(true))
    );
    assert_eq!(
        dashboard
            .select(&selectors::widgets())
            .map(|w| w.len())
            .loaded(),
        Some(2)
    );
}

#[tokio::test]
async fn dispatcher_outlives_the_dashboard_handle_until_shutdown() {
    let dashboard = open(Arc::new(sales_backend())).await;
    let dispatcher = dashboard.dispatcher().clone();
    drop(dashboard);
    assert!(dispatcher.is_running());

    dispatcher.shutdown().await;
    assert!(!dispatcher.is_running());
    let result = dispatcher.dispatch(Command::LoadDashboard, ctx()).await;
    assert!(matches!(result, Err(DispatchError::BusGone)), "got: {result:?}");
}
