use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const LICENSE_NOT_ACCEPTED_MESSAGE: &str = "To finish creation of the IBMLicenseServiceScanner instance, please accept the license terms (ibm.biz/lsvc-lic) by setting the field \"spec.license.accept: true\".";

/// Registries authenticated through a Vault login use this method name.
pub const VAULT_AUTH_METHOD: &str = "VAULT";

/// License Service Scanner periodically scans the images running in the selected
/// namespaces and uploads the findings to License Service.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    kind = "IBMLicenseServiceScanner",
    group = "operator.ibm.com",
    version = "v1",
    namespaced
)]
#[kube(status = "IBMLicenseServiceScannerStatus")]
pub struct IBMLicenseServiceScannerSpec {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// DEBUG or INFO
    #[serde(default, rename = "log-level", skip_serializing_if = "String::is_empty")]
    pub log_level: String,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default, rename = "enableInstanaMetricCollection")]
    pub enable_instana_metric_collection: bool,
    /// Secret the operand reads the License Service upload url, token and certificate from
    #[serde(default, rename = "license-service-upload-secret")]
    pub license_service_upload_secret: String,
    /// Docker config secret used to pull the scanned images
    #[serde(default, rename = "registry-pull-secret")]
    pub registry_pull_secret: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub registries: Vec<RegistryDetails>,
    pub license: Option<License>,
    pub container: Option<ScannerContainer>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScanConfig {
    /// Namespaces to scan. A single trailing '*' matches by prefix, a sole '*' matches all.
    #[serde(default)]
    pub namespaces: Vec<String>,
    /// Cron schedule of the scan
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub frequency: String,
    #[serde(default)]
    pub suspend: bool,
    #[serde(default)]
    pub starting_deadline_seconds: i64,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct License {
    #[serde(default)]
    pub accept: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct RegistryDetails {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub username: String,
    #[serde(default, rename = "auth-method")]
    pub auth_method: String,
    #[serde(default)]
    pub vault: VaultDetails,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct VaultDetails {
    #[serde(default, rename = "login-url")]
    pub login_url: String,
    #[serde(default, rename = "secret-url")]
    pub secret_url: String,
    #[serde(default)]
    pub key: String,
    /// Secret holding the CA certificate of the Vault server
    #[serde(default)]
    pub cert: String,
    #[serde(default)]
    pub role: String,
    /// Service account whose token logs in to Vault
    #[serde(default, rename = "service-account")]
    pub service_account: String,
}

/// Resource requirements without claims.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ResourceRequirementsNoClaims {
    pub limits: Option<BTreeMap<String, Quantity>>,
    pub requests: Option<BTreeMap<String, Quantity>>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ScannerContainer {
    #[serde(default)]
    pub resources: ResourceRequirementsNoClaims,
    #[serde(default, rename = "image-pull-policy", skip_serializing_if = "String::is_empty")]
    pub image_pull_policy: String,
    #[serde(default, rename = "image-pull-secrets", skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<String>,
    /// Replaces the registry host of the operand image
    #[serde(default, rename = "image-pull-prefix", skip_serializing_if = "String::is_empty")]
    pub image_pull_prefix: String,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, JsonSchema)]
pub struct IBMLicenseServiceScannerStatus {}

impl RegistryDetails {
    pub fn uses_vault(&self) -> bool {
        self.auth_method == VAULT_AUTH_METHOD
    }
}

impl VaultDetails {
    pub fn is_empty(&self) -> bool {
        *self == VaultDetails::default()
    }
}

impl IBMLicenseServiceScannerSpec {
    pub fn is_license_accepted(&self) -> bool {
        self.license.as_ref().is_some_and(|l| l.accept)
    }

    /// Operand log level; anything but DEBUG runs at INFO.
    pub fn operand_log_level(&self) -> &'static str {
        if self.log_level == "DEBUG" {
            "DEBUG"
        } else {
            "INFO"
        }
    }
}
