use super::{HandlerContext, Outcome};
use crate::backend::LoadedDashboard;
use crate::error::HandlerError;
use crate::event::EventBody;
use crate::state::{LoadingState, StatePatch};

/// Fetch the dashboard and replace every slice.
///
/// Plugin sections are inserted in registration order, each at its
/// requested index clamped to the current section count. Config overrides
/// are applied last.
pub(super) async fn load_dashboard(ctx: &HandlerContext<'_>) -> Result<Outcome, HandlerError> {
    ctx.cancel.check()?;
    let loaded = ctx.backend.load_dashboard(ctx.dashboard).await?;
    ctx.cancel.check()?;

    let LoadedDashboard {
        meta,
        mut config,
        permissions,
        catalog,
        alerts,
        user,
        insights,
        filter_context,
        mut layout,
    } = loaded;

    for (index, section) in ctx.extensions.layout_sections() {
        let at = (*index).min(layout.sections.len());
        layout.sections.insert(at, section.clone());
    }
    if let Some(overrides) = ctx.overrides {
        overrides.apply(&mut config);
    }

    tracing::debug!(
        dashboard = %ctx.dashboard,
        filters = filter_context.filters.len(),
        sections = layout.sections.len(),
        "dashboard fetched"
    );

    let event = EventBody::DashboardLoaded {
        dashboard: ctx.dashboard.clone(),
        title: meta.title.clone(),
        filter_count: filter_context.filters.len(),
        section_count: layout.sections.len(),
    };
    let patch = StatePatch::new()
        .filter_context(filter_context)
        .layout(layout)
        .config(config)
        .catalog(catalog)
        .permissions(permissions)
        .alerts(alerts)
        .meta(meta)
        .user(user)
        .insights(insights)
        .loading(LoadingState {
            loading: false,
            result: Some(true),
            error: None,
        });
    Ok(Outcome::new(event).with_patch(patch))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::test_fixtures::{sales_backend, sales_ref};
    use crate::command::CancelFlag;
    use crate::config::ConfigOverrides;
    use crate::error::TransportError;
    use crate::plugin::{DashboardCustomizer, Extensions};
    use crate::state::{LayoutSection, ObjRef, SliceKind};

    fn extensions_with_sections() -> Extensions {
        let mut customizer = DashboardCustomizer::default();
        customizer
            .layout()
            .add_section_on_load(0, LayoutSection::new().with_title("Header"))
            .add_section_on_load(99, LayoutSection::new().with_title("Footer"));
        let mut extensions = Extensions::default();
        extensions.merge(customizer).expect("merge should succeed");
        extensions
    }

    #[tokio::test]
    async fn load_patches_every_slice_and_applies_plugin_sections() {
        let backend = sales_backend();
        let dashboard = sales_ref();
        let cancel = CancelFlag::default();
        let extensions = extensions_with_sections();
        let overrides = ConfigOverrides {
            locale: Some("cs-CZ".into()),
            ..ConfigOverrides::default()
        };
        let ctx = HandlerContext {
            backend: &backend,
            dashboard: &dashboard,
            cancel: &cancel,
            extensions: &extensions,
            overrides: Some(&overrides),
        };

        let outcome = load_dashboard(&ctx).await.expect("load should succeed");
        assert_eq!(outcome.patch.touched(), SliceKind::ALL.to_vec());

        let state = crate::handlers::test_support::apply(
            &std::sync::Arc::new(crate::state::DashboardState::default()),
            outcome.patch,
        );
        let titles: Vec<_> = state
            .layout()
            .get()
            .expect("layout")
            .sections
            .iter()
            .filter_map(|s| s.header.as_ref().map(|h| h.title.clone()))
            .collect();
        assert_eq!(titles, ["Header", "Overview", "Footer"]);
        assert_eq!(state.config().get().map(|c| c.locale.as_str()), Some("cs-CZ"));
        assert!(matches!(
            outcome.event,
            EventBody::DashboardLoaded { section_count: 3, filter_count: 3, .. }
        ));
    }

    #[tokio::test]
    async fn cancelled_load_never_reaches_the_backend() {
        let backend = sales_backend();
        let dashboard = sales_ref();
        let cancel = CancelFlag::default();
        cancel.cancel();
        let extensions = Extensions::default();
        let ctx = HandlerContext {
            backend: &backend,
            dashboard: &dashboard,
            cancel: &cancel,
            extensions: &extensions,
            overrides: None,
        };
        let result = load_dashboard(&ctx).await;
        assert!(matches!(result, Err(HandlerError::Cancelled)), "got: {result:?}");
        assert_eq!(backend.load_calls(), 0);
    }

    #[tokio::test]
    async fn unknown_dashboard_is_a_transport_failure() {
        let backend = sales_backend();
        let dashboard = ObjRef::identifier("dashboard.missing");
        let cancel = CancelFlag::default();
        let extensions = Extensions::default();
        let ctx = HandlerContext {
            backend: &backend,
            dashboard: &dashboard,
            cancel: &cancel,
            extensions: &extensions,
            overrides: None,
        };
        let result = load_dashboard(&ctx).await;
        assert!(
            matches!(result, Err(HandlerError::Transport(TransportError::NotFound(_)))),
            "got: {result:?}"
        );
    }
}
