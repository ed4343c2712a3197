use crate::engine::{labels_and_annotations_patch, ReconcileRequest, ResourceUpdateStatus};
use crate::reporter::certificates::INTERNAL_CERT_SECRET_NAME;
use crate::reporter::context::ReporterContext;
use crate::reporter::names::{selector_labels, SERVICE_NAME};
use crate::util::collections::{map_has_all_pairs, merge_maps, unordered_contains_by};
use crate::util::errors::Result;
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use std::collections::BTreeMap;

pub const RECEIVER_PORT: i32 = 8080;
pub const RECEIVER_PORT_NAME: &str = "receiver-port";
pub const AUTH_PORT: i32 = 8888;
pub const AUTH_PORT_NAME: &str = "proxy";
pub const REPORTER_UI_PORT: i32 = 3001;
pub const SERVING_CERT_ANNOTATION: &str = "service.beta.openshift.io/serving-cert-secret-name";

fn port(name: &str, number: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port: number,
        target_port: Some(IntOrString::Int(number)),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

pub fn service(ctx: &ReporterContext) -> Service {
    let mut annotations = BTreeMap::new();
    if ctx.is_service_ca_api {
        annotations.insert(
            SERVING_CERT_ANNOTATION.to_string(),
            INTERNAL_CERT_SECRET_NAME.to_string(),
        );
    }
    let mut metadata = ctx.object_meta(SERVICE_NAME);
    metadata.annotations = Some(merge_maps(&annotations, ctx.spec_annotations()));
    Service {
        metadata,
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            ports: Some(vec![
                port(RECEIVER_PORT_NAME, RECEIVER_PORT),
                port(AUTH_PORT_NAME, AUTH_PORT),
            ]),
            selector: Some(selector_labels(&ctx.instance_name())),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn port_key(port: &ServicePort) -> String {
    let target = match &port.target_port {
        Some(IntOrString::Int(i)) => i.to_string(),
        Some(IntOrString::String(s)) => s.clone(),
        None => String::new(),
    };
    format!(
        "{}:{}:{}:{}",
        port.name.as_deref().unwrap_or_default(),
        port.port,
        target,
        port.protocol.as_deref().unwrap_or_default()
    )
}

/// Expected ports must all be present; the cluster may add its own.
pub fn check_service(ctx: &ReporterContext, found: &Service, expected: &Service) -> ResourceUpdateStatus {
    let (Some(found_spec), Some(expected_spec)) = (&found.spec, &expected.spec) else {
        return ResourceUpdateStatus::MERGE;
    };
    if found_spec.type_ != expected_spec.type_ {
        return ResourceUpdateStatus::MERGE;
    }
    if !unordered_contains_by(
        found_spec.ports.as_deref().unwrap_or_default(),
        expected_spec.ports.as_deref().unwrap_or_default(),
        port_key,
    ) {
        return ResourceUpdateStatus::MERGE;
    }
    if found_spec.selector.clone().unwrap_or_default() != expected_spec.selector.clone().unwrap_or_default() {
        return ResourceUpdateStatus::MERGE;
    }
    if !map_has_all_pairs(found.labels(), ctx.spec_labels())
        || !map_has_all_pairs(found.annotations(), expected.annotations())
    {
        return ResourceUpdateStatus::PATCH;
    }
    ResourceUpdateStatus::DESIRED
}

pub async fn reconcile_service(ctx: &ReporterContext) -> Result<()> {
    ctx.reconcile(
        ReconcileRequest::new(service(ctx), |found: &Service, expected: &Service| {
            Ok(check_service(ctx, found, expected))
        })
        // expected annotations include the serving certificate request
        .patch(|_, expected: &Service| {
            Ok(labels_and_annotations_patch(ctx.spec_labels(), expected.annotations()))
        })
        .override_with_expected(),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::v1alpha1::IBMLicenseServiceReporterSpec;
    use crate::engine::{CACHING_LABEL_KEY, CACHING_LABEL_VALUE};
    use crate::tests::{mock_client, openshift_reporter_context, reporter_instance, Exchange};
    use http::Method;
    use serde_json::json;

    const SERVICES: &str = "/api/v1/namespaces/lsr/services";

    fn live_service(annotations: serde_json::Value) -> serde_json::Value {
        json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": {
                "name": SERVICE_NAME,
                "namespace": "lsr",
                "resourceVersion": "3",
                "labels": {CACHING_LABEL_KEY: CACHING_LABEL_VALUE},
                "annotations": annotations
            },
            "spec": {
                "type": "ClusterIP",
                "clusterIP": "10.0.0.12",
                "ports": [
                    {"name": "proxy", "port": 8888, "targetPort": 8888, "protocol": "TCP"},
                    {"name": "receiver-port", "port": 8080, "targetPort": 8080, "protocol": "TCP"}
                ],
                "selector": {
                    "app": "ibm-license-service-reporter-instance",
                    "component": "ibm-license-service-reporter-svc",
                    "licensing_cr": "instance"
                }
            }
        })
    }

    #[tokio::test]
    async fn port_order_and_extra_fields_do_not_matter() {
        let (client, _server) = mock_client();
        let ctx = openshift_reporter_context(client, reporter_instance(Default::default()), false, false);
        let found: Service = serde_json::from_value(live_service(json!({}))).unwrap();
        assert_eq!(check_service(&ctx, &found, &service(&ctx)), ResourceUpdateStatus::DESIRED);

        let mut moved = found.clone();
        moved.spec.as_mut().unwrap().ports.as_mut().unwrap()[0].target_port = Some(IntOrString::Int(9999));
        assert_eq!(check_service(&ctx, &moved, &service(&ctx)), ResourceUpdateStatus::MERGE);
    }

    #[tokio::test]
    async fn missing_serving_cert_annotation_is_patched_in() {
        let (client, server) = mock_client();
        let path = format!("{SERVICES}/{SERVICE_NAME}");
        let server = server.run(vec![
            Exchange::new(Method::GET, &path, 200, live_service(json!({}))),
            Exchange::new(Method::PATCH, &path, 200, live_service(json!({}))),
        ]);
        let spec = IBMLicenseServiceReporterSpec {
            annotations: BTreeMap::from([("owner".to_string(), "finops".to_string())]),
            ..Default::default()
        };
        let ctx = openshift_reporter_context(client, reporter_instance(spec), true, true);
        reconcile_service(&ctx).await.unwrap();
        let bodies = server.await.unwrap();
        assert_eq!(
            bodies[1]["metadata"]["annotations"],
            json!({SERVING_CERT_ANNOTATION: INTERNAL_CERT_SECRET_NAME, "owner": "finops"})
        );
    }
}
