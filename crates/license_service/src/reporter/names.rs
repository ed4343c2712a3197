//! Names, labels and annotations shared by every reporter operand resource.

use crate::api::v1alpha1::IBMLicenseServiceReporter;
use crate::engine::{CACHING_LABEL_KEY, CACHING_LABEL_VALUE};
use crate::util::collections::merge_maps;
use kube::ResourceExt;
use std::collections::BTreeMap;

pub const RELEASE_NAME: &str = "ibm-license-service-reporter";
pub const COMPONENT_NAME: &str = "ibm-license-service-reporter-svc";
pub const SERVICE_NAME: &str = "ibm-license-service-reporter";

pub const PRODUCT_NAME: &str = "IBM Cloud Platform Common Services";
pub const PRODUCT_ID: &str = "068a62892a1e4db39641342e592daa25";
pub const PRODUCT_METRIC: &str = "FREE";

/// `ibm-license-service-reporter-<instance>`, used by the deployment and pod selector.
pub fn default_resource_name(instance_name: &str) -> String {
    format!("{RELEASE_NAME}-{instance_name}")
}

pub fn selector_labels(instance_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), default_resource_name(instance_name)),
        ("component".to_string(), COMPONENT_NAME.to_string()),
        ("licensing_cr".to_string(), instance_name.to_string()),
    ])
}

/// Labels of every operand object, spec labels included.
pub fn meta_labels(instance: &IBMLicenseServiceReporter) -> BTreeMap<String, String> {
    let labels = BTreeMap::from([
        (
            "app.kubernetes.io/name".to_string(),
            default_resource_name(&instance.name_any()),
        ),
        ("app.kubernetes.io/component".to_string(), COMPONENT_NAME.to_string()),
        ("app.kubernetes.io/managed-by".to_string(), "operator".to_string()),
        (CACHING_LABEL_KEY.to_string(), CACHING_LABEL_VALUE.to_string()),
        ("release".to_string(), RELEASE_NAME.to_string()),
    ]);
    merge_maps(&labels, &instance.spec.labels)
}

pub fn pod_labels(instance: &IBMLicenseServiceReporter) -> BTreeMap<String, String> {
    merge_maps(&meta_labels(instance), &selector_labels(&instance.name_any()))
}

pub fn pod_annotations(instance: &IBMLicenseServiceReporter) -> BTreeMap<String, String> {
    let annotations = BTreeMap::from([
        ("productName".to_string(), PRODUCT_NAME.to_string()),
        ("productID".to_string(), PRODUCT_ID.to_string()),
        ("productMetric".to_string(), PRODUCT_METRIC.to_string()),
    ]);
    merge_maps(&annotations, &instance.spec.annotations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::v1alpha1::IBMLicenseServiceReporterSpec;

    #[test]
    fn spec_labels_are_merged_but_selector_wins_on_pods() {
        let mut instance = IBMLicenseServiceReporter::new(
            "instance",
            IBMLicenseServiceReporterSpec {
                labels: BTreeMap::from([
                    ("team".to_string(), "finops".to_string()),
                    ("app".to_string(), "custom".to_string()),
                ]),
                ..Default::default()
            },
        );
        instance.metadata.namespace = Some("lsr".to_string());

        let meta = meta_labels(&instance);
        assert_eq!(meta["team"], "finops");
        assert_eq!(meta[CACHING_LABEL_KEY], CACHING_LABEL_VALUE);
        assert_eq!(meta["app.kubernetes.io/name"], "ibm-license-service-reporter-instance");

        let pod = pod_labels(&instance);
        assert_eq!(pod["app"], "ibm-license-service-reporter-instance");
        assert_eq!(pod["licensing_cr"], "instance");
        assert_eq!(pod["team"], "finops");
    }

    #[test]
    fn pod_annotations_carry_product_metadata() {
        let instance = IBMLicenseServiceReporter::new("instance", Default::default());
        let annotations = pod_annotations(&instance);
        assert_eq!(annotations["productID"], PRODUCT_ID);
        assert_eq!(annotations["productMetric"], "FREE");
    }
}
