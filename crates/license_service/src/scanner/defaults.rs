//! Values the scanner falls back to when the custom resource leaves them out.

use crate::api::v1::{IBMLicenseServiceScannerSpec, ResourceRequirementsNoClaims, ScannerContainer};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;

/// Ten minutes past midnight, every day.
pub const DEFAULT_SCAN_FREQUENCY: &str = "10 0 * * *";
/// Scheduled jobs that did not start within an hour are skipped.
pub const DEFAULT_STARTING_DEADLINE_SECONDS: i64 = 3600;
pub const DEFAULT_IMAGE_PULL_POLICY: &str = "IfNotPresent";

fn resource_list(cpu: &str, memory: &str, ephemeral_storage: &str) -> BTreeMap<String, Quantity> {
    BTreeMap::from([
        ("cpu".to_string(), Quantity(cpu.to_string())),
        ("memory".to_string(), Quantity(memory.to_string())),
        ("ephemeral-storage".to_string(), Quantity(ephemeral_storage.to_string())),
    ])
}

// the operand pulls whole images, hence the storage
pub fn default_requests() -> BTreeMap<String, Quantity> {
    resource_list("200m", "128Mi", "5Gi")
}

pub fn default_limits() -> BTreeMap<String, Quantity> {
    resource_list("500m", "512Mi", "5Gi")
}

pub fn apply_defaults(spec: &mut IBMLicenseServiceScannerSpec) {
    if spec.scan.frequency.is_empty() {
        spec.scan.frequency = DEFAULT_SCAN_FREQUENCY.to_string();
    }
    if spec.scan.starting_deadline_seconds == 0 {
        spec.scan.starting_deadline_seconds = DEFAULT_STARTING_DEADLINE_SECONDS;
    }
    let container = spec.container.get_or_insert_with(|| ScannerContainer {
        resources: ResourceRequirementsNoClaims::default(),
        ..Default::default()
    });
    if container.resources.requests.is_none() {
        container.resources.requests = Some(default_requests());
    }
    if container.resources.limits.is_none() {
        container.resources.limits = Some(default_limits());
    }
    if container.image_pull_policy.is_empty() {
        container.image_pull_policy = DEFAULT_IMAGE_PULL_POLICY.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_spec_gets_every_default() {
        let mut spec = IBMLicenseServiceScannerSpec::default();
        apply_defaults(&mut spec);
        assert_eq!(spec.scan.frequency, "10 0 * * *");
        assert_eq!(spec.scan.starting_deadline_seconds, 3600);
        let container = spec.container.unwrap();
        assert_eq!(container.image_pull_policy, "IfNotPresent");
        assert_eq!(container.resources.requests, Some(default_requests()));
        assert_eq!(container.resources.limits, Some(default_limits()));
    }

    #[test]
    fn user_values_are_kept() {
        let mut spec = IBMLicenseServiceScannerSpec::default();
        spec.scan.frequency = "@hourly".to_string();
        spec.scan.starting_deadline_seconds = 60;
        spec.container = Some(ScannerContainer {
            resources: ResourceRequirementsNoClaims {
                limits: Some(BTreeMap::from([("cpu".to_string(), Quantity("1".to_string()))])),
                requests: None,
            },
            image_pull_policy: "Always".to_string(),
            ..Default::default()
        });
        apply_defaults(&mut spec);
        assert_eq!(spec.scan.frequency, "@hourly");
        assert_eq!(spec.scan.starting_deadline_seconds, 60);
        let container = spec.container.unwrap();
        assert_eq!(container.image_pull_policy, "Always");
        assert_eq!(container.resources.limits.unwrap().len(), 1);
        assert_eq!(container.resources.requests, Some(default_requests()));
    }
}
