//! The smaller, load-once slices of the state tree.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ObjRef;

/// Dashboard configuration: backend-provided, optionally overridden by the
/// embedder at open time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigState {
    pub locale: String,
    pub separators: Separators,
    #[serde(default)]
    pub is_read_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapbox_token: Option<String>,
    pub date_format: String,
    /// Feature settings, keyed by setting name.
    #[serde(default)]
    pub settings: BTreeMap<String, Value>,
}

impl Default for ConfigState {
    fn default() -> Self {
        Self {
            locale: "en-US".to_string(),
            separators: Separators::default(),
            is_read_only: false,
            mapbox_token: None,
            date_format: "MM/dd/yyyy".to_string(),
            settings: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Separators {
    pub thousand: String,
    pub decimal: String,
}

impl Default for Separators {
    fn default() -> Self {
        Self {
            thousand: ",".to_string(),
            decimal: ".".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogState {
    #[serde(default)]
    pub attributes: Vec<CatalogAttribute>,
    #[serde(default)]
    pub measures: Vec<CatalogMeasure>,
    #[serde(default)]
    pub facts: Vec<CatalogFact>,
    #[serde(default)]
    pub date_datasets: Vec<CatalogDateDataset>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogAttribute {
    #[serde(rename = "ref")]
    pub obj_ref: ObjRef,
    pub title: String,
    #[serde(default)]
    pub display_forms: Vec<ObjRef>,
    /// Target of the implicit drill-down, if the attribute has a hierarchy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drill_down_step: Option<ObjRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogMeasure {
    #[serde(rename = "ref")]
    pub obj_ref: ObjRef,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogFact {
    #[serde(rename = "ref")]
    pub obj_ref: ObjRef,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogDateDataset {
    #[serde(rename = "ref")]
    pub obj_ref: ObjRef,
    pub title: String,
}

/// Capabilities of the current user in the current workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PermissionsState {
    pub can_list_users_in_project: bool,
    pub can_manage_metric: bool,
    pub can_create_scheduled_mail: bool,
    pub can_export_report: bool,
    pub can_manage_analytical_dashboard: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertsState {
    #[serde(default)]
    pub alerts: Vec<KpiAlert>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiAlert {
    pub identifier: String,
    /// Identifier of the KPI widget the alert watches.
    pub widget: String,
    pub threshold: f64,
    pub when_triggered: AlertCondition,
    #[serde(default)]
    pub is_triggered: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AlertCondition {
    AboveThreshold,
    UnderThreshold,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardMeta {
    #[serde(rename = "ref")]
    pub obj_ref: ObjRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: String,
}

impl Default for DashboardMeta {
    fn default() -> Self {
        Self {
            obj_ref: ObjRef::identifier(""),
            uri: None,
            title: String::new(),
            description: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserState {
    pub login: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightsState {
    #[serde(default)]
    pub insights: Vec<InsightSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightSummary {
    #[serde(rename = "ref")]
    pub obj_ref: ObjRef,
    pub title: String,
    pub visualization_url: String,
}

/// Outcome of the most recent dashboard load.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingState {
    pub loading: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
