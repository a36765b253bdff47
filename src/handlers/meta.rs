use super::{Outcome, not_loaded};
use crate::error::{HandlerError, Unmet};
use crate::event::EventBody;
use crate::state::{DashboardState, SliceKind, StatePatch};

pub(super) fn check_rename(state: &DashboardState, title: &str) -> Vec<Unmet> {
    let mut unmet = Vec::new();
    if !state.meta().is_loaded() {
        unmet.push(Unmet::NotLoaded(SliceKind::Meta));
    }
    if title.trim().is_empty() {
        unmet.push(Unmet::Blank("title"));
    }
    unmet
}

pub(super) fn rename(state: &DashboardState, title: &str) -> Result<Outcome, HandlerError> {
    let mut meta = state
        .meta()
        .get()
        .cloned()
        .ok_or_else(|| not_loaded(SliceKind::Meta))?;
    meta.title = title.to_string();
    Ok(Outcome::new(EventBody::DashboardRenamed {
        title: title.to_string(),
    })
    .with_patch(StatePatch::new().meta(meta)))
}
