use super::auth::Authentication;
use super::container::OperandContainer;
use crate::api::openshift::TlsConfig;
use k8s_openapi::api::core::v1::PodStatus;
use k8s_openapi::api::networking::v1::IngressTLS;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const LICENSE_NOT_ACCEPTED_MESSAGE: &str = "To finish creation of the IBMLicenseServiceReporter instance, please accept the license terms (ibm.biz/lsvc-lic) by setting the field \"spec.license.accept: true\".";

/// IBM License Service Reporter aggregates license usage pushed from License Services
/// deployed on many clusters and presents it on a single console.
///
/// Generates the Kubernetes wrapper struct `IBMLicenseServiceReporter`; crdgen prints its CRD.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    kind = "IBMLicenseServiceReporter",
    group = "operator.ibm.com",
    version = "v1alpha1",
    namespaced
)]
#[kube(status = "IBMLicenseServiceReporterStatus", shortname = "lsr")]
#[serde(rename_all = "camelCase")]
pub struct IBMLicenseServiceReporterSpec {
    /// Environment variables added to the receiver and UI containers
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env_variable: BTreeMap<String, String>,
    /// Labels to be copied into all relevant resources
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Annotations to be copied into all relevant resources
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub receiver_container: OperandContainer,
    #[serde(default, rename = "reporterUIContainer")]
    pub reporter_ui_container: OperandContainer,
    #[serde(default)]
    pub database_container: OperandContainer,
    #[serde(default)]
    pub auth_container: OperandContainer,
    #[serde(default)]
    pub authentication: Authentication,
    pub license: Option<License>,
    /// DEBUG, INFO or VERBOSE
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub log_level: String,
    /// Secret holding the API token, created when missing
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_secret_token: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<String>,
    /// ocp, self-signed or custom
    #[serde(default, rename = "httpsCertsSource", skip_serializing_if = "String::is_empty")]
    pub https_certs_source: String,
    /// Create Routes for the console and the API (OpenShift only). Defaults to
    /// whether the Route API is served by the cluster.
    pub route_enabled: Option<bool>,
    pub route_options: Option<RouteOptions>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    /// Storage class of the database volume; the cluster default when empty
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub storage_class: String,
    pub capacity: Option<Quantity>,
    #[serde(default)]
    pub enable_workloads_processing: bool,
    /// Days deleted custom column values are kept before removal
    pub workloads_custom_columns_retency_days: Option<i32>,
    #[serde(default)]
    pub enable_instana_metric_collection: bool,
    /// Create Ingresses for the console and the API
    #[serde(default)]
    pub ingress_enabled: bool,
    pub ingress_options: Option<IngressOptions>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct License {
    /// Accept the license terms: ibm.biz/lsvc-lic
    #[serde(default)]
    pub accept: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct RouteOptions {
    pub tls: Option<TlsConfig>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngressOptions {
    pub common_options: Option<IngressCommonOptions>,
    pub api_options: Option<IngressSpecificOptions>,
    pub console_options: Option<IngressSpecificOptions>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngressCommonOptions {
    pub host: Option<String>,
    pub ingress_class_name: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct IngressSpecificOptions {
    /// Path the application is served under
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tls: Vec<IngressTLS>,
}

/// The status object of `IBMLicenseServiceReporter`
#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, JsonSchema)]
pub struct IBMLicenseServiceReporterStatus {
    #[serde(
        default,
        rename = "LicenseServiceReporterPods",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub license_service_reporter_pods: Vec<PodStatus>,
    /// Kept for compatibility with older License Service releases
    #[serde(
        default,
        rename = "LicensingReporterPods",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub licensing_reporter_pods: Vec<PodStatus>,
}

/// Where the operand gets its HTTPS certificates from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CertsSource {
    /// OpenShift service CA (also the default)
    Ocp,
    SelfSigned,
    /// Provided by the user
    Custom,
    External,
    Unknown,
}

impl IBMLicenseServiceReporterSpec {
    pub fn is_debug(&self) -> bool {
        self.log_level == "DEBUG"
    }

    pub fn is_verbose(&self) -> bool {
        self.log_level == "VERBOSE"
    }

    pub fn is_basic_auth_enabled(&self) -> bool {
        self.authentication.useradmin.enabled
    }

    pub fn is_oauth_enabled(&self) -> bool {
        self.authentication.oauth.enabled
    }

    pub fn is_route_enabled(&self) -> bool {
        self.route_enabled.unwrap_or(false)
    }

    pub fn is_license_accepted(&self) -> bool {
        self.license.as_ref().is_some_and(|l| l.accept)
    }

    pub fn certs_source(&self) -> CertsSource {
        match self.https_certs_source.as_str() {
            "" | "ocp" => CertsSource::Ocp,
            "self-signed" => CertsSource::SelfSigned,
            "custom" => CertsSource::Custom,
            "external" => CertsSource::External,
            _ => CertsSource::Unknown,
        }
    }

    pub fn ingress_host(&self) -> Option<&str> {
        self.ingress_options
            .as_ref()?
            .common_options
            .as_ref()?
            .host
            .as_deref()
    }
}
