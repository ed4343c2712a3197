//! The subset of OpenShift APIs the reporter reads and writes.

use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{
    api::{ApiResource, DynamicObject, GroupVersionKind},
    Api, Client, CustomResource,
};
use serde::{Deserialize, Serialize};

pub const TLS_TERMINATION_REENCRYPT: &str = "reencrypt";
pub const INSECURE_EDGE_TERMINATION_NONE: &str = "None";

/// route.openshift.io/v1 Route
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[kube(
    kind = "Route",
    group = "route.openshift.io",
    version = "v1",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct RouteSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    pub to: RouteTargetReference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<RoutePort>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct RouteTargetReference {
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<i32>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoutePort {
    pub target_port: IntOrString,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    /// edge, passthrough or reencrypt
    #[serde(default)]
    pub termination: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub insecure_edge_termination_policy: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub certificate: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ca_certificate: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub destination_ca_certificate: String,
}

/// Cluster scoped operator.openshift.io/v1 servicecas, only ever listed.
pub fn service_ca_api(client: Client) -> Api<DynamicObject> {
    let gvk = GroupVersionKind::gvk("operator.openshift.io", "v1", "ServiceCA");
    let resource = ApiResource::from_gvk_with_plural(&gvk, "servicecas");
    Api::all_with(client, &resource)
}
