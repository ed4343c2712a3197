//! Drift detection for the pod template. The API server fills in defaults,
//! so only the fields the operator sets are compared.

use crate::util::collections::unordered_eq;
use crate::util::quantity;
use k8s_openapi::api::core::v1::{Container, EnvVar, PodTemplateSpec, Probe};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;
use tracing::info;

pub fn equal_quantities(a: &Option<BTreeMap<String, Quantity>>, b: &Option<BTreeMap<String, Quantity>>) -> bool {
    let (a, b) = (a.clone().unwrap_or_default(), b.clone().unwrap_or_default());
    a.len() == b.len()
        && a.iter()
            .all(|(name, q)| b.get(name).is_some_and(|other| quantity::equal(q, other)))
}

/// Same names with the same plain values in any order; `valueFrom` is not compared.
pub fn equal_env_vars(found: &[EnvVar], expected: &[EnvVar]) -> bool {
    found.len() == expected.len()
        && found
            .iter()
            .all(|f| expected.iter().any(|e| e.name == f.name && e.value == f.value))
}

fn fill_threshold(a: &mut Option<i32>, b: &mut Option<i32>) {
    let unset = |v: &Option<i32>| v.unwrap_or(0) == 0;
    if unset(a) {
        *a = *b;
    } else if unset(b) {
        *b = *a;
    }
}

/// Thresholds left unset on one side take the value of the other.
pub fn equal_probes(found: Option<&Probe>, expected: Option<&Probe>) -> bool {
    match (found, expected) {
        (None, None) => true,
        (Some(found), Some(expected)) => {
            let (mut found, mut expected) = (found.clone(), expected.clone());
            fill_threshold(&mut found.success_threshold, &mut expected.success_threshold);
            fill_threshold(&mut found.failure_threshold, &mut expected.failure_threshold);
            found == expected
        }
        _ => false,
    }
}

fn container_difference(found: &Container, expected: &Container) -> Option<&'static str> {
    let found_resources = found.resources.clone().unwrap_or_default();
    let expected_resources = expected.resources.clone().unwrap_or_default();
    if found.image != expected.image {
        Some("container image")
    } else if found.image_pull_policy != expected.image_pull_policy {
        Some("image pull policy")
    } else if found.command.as_deref().unwrap_or_default() != expected.command.as_deref().unwrap_or_default() {
        Some("container command")
    } else if found.ports.as_deref().unwrap_or_default() != expected.ports.as_deref().unwrap_or_default() {
        Some("containers ports")
    } else if found.volume_mounts.as_deref().unwrap_or_default() != expected.volume_mounts.as_deref().unwrap_or_default() {
        Some("VolumeMounts in container")
    } else if !equal_env_vars(
        found.env.as_deref().unwrap_or_default(),
        expected.env.as_deref().unwrap_or_default(),
    ) {
        Some("env variables in container")
    } else if !unordered_eq(
        found.args.as_deref().unwrap_or_default(),
        expected.args.as_deref().unwrap_or_default(),
    ) {
        Some("arguments")
    } else if found.security_context != expected.security_context {
        Some("container security context")
    } else if found_resources.limits.is_none() || found_resources.requests.is_none() {
        Some("container Resources")
    } else if !equal_quantities(&expected_resources.limits, &found_resources.limits) {
        Some("container resources limits")
    } else if !equal_quantities(&expected_resources.requests, &found_resources.requests) {
        Some("container resources requests")
    } else if !equal_probes(found.readiness_probe.as_ref(), expected.readiness_probe.as_ref()) {
        Some("container Readiness Probe")
    } else if !equal_probes(found.liveness_probe.as_ref(), expected.liveness_probe.as_ref()) {
        Some("container Liveness Probe")
    } else {
        None
    }
}

/// Containers are paired by name; order does not matter.
pub fn equal_container_lists(found: &[Container], expected: &[Container]) -> bool {
    if found.len() != expected.len() {
        info!("Deployment has wrong amount of containers");
        return false;
    }
    for container in found {
        let Some(counterpart) = expected.iter().find(|e| e.name == container.name) else {
            return false;
        };
        if let Some(difference) = container_difference(container, counterpart) {
            info!(container = %container.name, "Container has wrong {difference}");
            return false;
        }
    }
    true
}

/// True when volumes, affinity, service account or containers drifted.
pub fn pod_template_outdated(found: &PodTemplateSpec, expected: &PodTemplateSpec) -> bool {
    let found = found.spec.clone().unwrap_or_default();
    let expected = expected.spec.clone().unwrap_or_default();
    if found.volumes != expected.volumes {
        info!("Deployment has wrong volumes");
    } else if found.affinity != expected.affinity {
        info!("Deployment has wrong affinity");
    } else if found.service_account_name != expected.service_account_name {
        info!("Deployment wrong service account name");
    } else if !equal_container_lists(&found.containers, &expected.containers) {
        info!("Deployment wrong containers");
    } else if !equal_container_lists(
        found.init_containers.as_deref().unwrap_or_default(),
        expected.init_containers.as_deref().unwrap_or_default(),
    ) {
        info!("Deployment wrong init containers");
    } else {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ExecAction, ResourceRequirements};

    fn env(name: &str, value: &str) -> EnvVar {
        EnvVar {
            name: name.to_string(),
            value: Some(value.to_string()),
            ..Default::default()
        }
    }

    fn probe(success: Option<i32>, failure: Option<i32>) -> Probe {
        Probe {
            exec: Some(ExecAction {
                command: Some(vec!["true".to_string()]),
            }),
            period_seconds: Some(60),
            success_threshold: success,
            failure_threshold: failure,
            ..Default::default()
        }
    }

    fn container(name: &str, cpu: &str) -> Container {
        let list = BTreeMap::from([("cpu".to_string(), Quantity(cpu.to_string()))]);
        Container {
            name: name.to_string(),
            image: Some("registry/image:1".to_string()),
            args: Some(vec!["--a".to_string(), "--b".to_string()]),
            env: Some(vec![env("A", "1"), env("B", "2")]),
            resources: Some(ResourceRequirements {
                limits: Some(list.clone()),
                requests: Some(list),
                ..Default::default()
            }),
            readiness_probe: Some(probe(None, None)),
            ..Default::default()
        }
    }

    #[test]
    fn probes_tolerate_server_defaulted_thresholds() {
        assert!(equal_probes(Some(&probe(Some(1), Some(3))), Some(&probe(None, None))));
        assert!(equal_probes(Some(&probe(Some(0), None)), Some(&probe(Some(1), Some(3)))));
        assert!(!equal_probes(Some(&probe(Some(2), None)), Some(&probe(Some(1), None))));
        assert!(!equal_probes(None, Some(&probe(None, None))));
        assert!(equal_probes(None, None));
    }

    #[test]
    fn env_order_is_ignored_but_values_are_not() {
        assert!(equal_env_vars(&[env("A", "1"), env("B", "2")], &[env("B", "2"), env("A", "1")]));
        assert!(!equal_env_vars(&[env("A", "1")], &[env("A", "2")]));
        assert!(!equal_env_vars(&[env("A", "1")], &[env("A", "1"), env("B", "2")]));
    }

    #[test]
    fn containers_pair_by_name() {
        let expected = vec![container("receiver", "200m"), container("auth", "100m")];
        let mut found = vec![container("auth", "0.1"), container("receiver", "200m")];
        found[1].args = Some(vec!["--b".to_string(), "--a".to_string()]);
        found[1].env = Some(vec![env("B", "2"), env("A", "1")]);
        assert!(equal_container_lists(&found, &expected));

        found[0].resources.as_mut().unwrap().requests = None;
        assert!(!equal_container_lists(&found, &expected));

        let renamed = vec![container("auth", "100m"), container("ui", "200m")];
        assert!(!equal_container_lists(&renamed, &expected));
        assert!(!equal_container_lists(&expected[..1], &expected));
    }

    #[test]
    fn missing_and_empty_lists_are_equal() {
        let expected = vec![container("receiver", "200m")];
        let mut found = expected.clone();
        found[0].command = Some(vec![]);
        found[0].ports = Some(vec![]);
        found[0].volume_mounts = Some(vec![]);
        assert!(equal_container_lists(&found, &expected));

        found[0].command = Some(vec!["sh".to_string()]);
        assert!(!equal_container_lists(&found, &expected));
    }

    #[test]
    fn image_change_is_detected() {
        let expected = vec![container("receiver", "200m")];
        let mut found = expected.clone();
        found[0].image = Some("registry/image:2".to_string());
        assert!(!equal_container_lists(&found, &expected));
    }
}
