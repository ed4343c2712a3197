//! Names, labels and annotations of the scanner operand resources.

use crate::util::collections::merge_maps;
use std::collections::BTreeMap;

pub const APPLICATION_NAME: &str = "ibm-licensing-scanner";
pub const RESOURCE_NAME_PREFIX: &str = "ibm-licensing-scanner-";
pub const OPERATOR_RESOURCE_NAME: &str = "ibm-licensing-scanner-operator";

pub const OPERAND_REQUEST_NAME: &str = "ibm-licensing-scanner-ls-operand-request";
pub const CACHE_CONFIG_MAP_NAME: &str = "ibm-licensing-scanner-cache";
pub const SCRIPT_CONFIG_MAP_NAME: &str = "ibm-licensing-scanner-vault";
pub const CRON_JOB_NAME: &str = "ibm-licensing-scanner-cron-job";
pub const CRON_JOB_SERVICE_ACCOUNT: &str = "ibm-licensing-scanner-operand-service-account";
pub const OPERAND_CONTAINER_NAME: &str = "ibm-licensing-scanner-operand-container";
pub const OPERAND_INIT_CONTAINER_NAME: &str = "ibm-licensing-scanner-operand-container-init-container";

pub const PRODUCT_ID: &str = "105fa377cada4660a213f99e02c53782";
pub const PRODUCT_NAME: &str = "IBM License Service Scanner";
pub const PRODUCT_METRIC: &str = "FREE";

/// Labels of the operand object `component`, spec labels included.
pub fn base_labels(component: &str, spec_labels: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let labels = BTreeMap::from([
        ("app.kubernetes.io/name".to_string(), APPLICATION_NAME.to_string()),
        (
            "app.kubernetes.io/version".to_string(),
            env!("CARGO_PKG_VERSION").to_string(),
        ),
        ("app.kubernetes.io/component".to_string(), component.to_string()),
        (
            "app.kubernetes.io/managed-by".to_string(),
            OPERATOR_RESOURCE_NAME.to_string(),
        ),
    ]);
    merge_maps(&labels, spec_labels)
}

pub fn base_annotations(spec_annotations: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let annotations = BTreeMap::from([
        ("productID".to_string(), PRODUCT_ID.to_string()),
        ("productName".to_string(), PRODUCT_NAME.to_string()),
        ("productMetric".to_string(), PRODUCT_METRIC.to_string()),
    ]);
    merge_maps(&annotations, spec_annotations)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_metadata_overrides_defaults() {
        let spec_labels = BTreeMap::from([
            ("app.kubernetes.io/name".to_string(), "custom".to_string()),
            ("team".to_string(), "finops".to_string()),
        ]);
        let labels = base_labels(CRON_JOB_NAME, &spec_labels);
        assert_eq!(labels["app.kubernetes.io/name"], "custom");
        assert_eq!(labels["app.kubernetes.io/component"], CRON_JOB_NAME);
        assert_eq!(labels["app.kubernetes.io/managed-by"], OPERATOR_RESOURCE_NAME);
        assert_eq!(labels["team"], "finops");

        let annotations = base_annotations(&BTreeMap::from([(
            "productMetric".to_string(),
            "VIRTUAL_PROCESSOR_CORE".to_string(),
        )]));
        assert_eq!(annotations["productID"], PRODUCT_ID);
        assert_eq!(annotations["productMetric"], "VIRTUAL_PROCESSOR_CORE");
    }
}
