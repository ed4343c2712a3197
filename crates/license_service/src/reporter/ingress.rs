//! Ingresses for clusters without the Route API.

use crate::api::v1alpha1::IngressSpecificOptions;
use crate::engine::{ReconcileRequest, ResourceUpdateStatus};
use crate::reporter::context::ReporterContext;
use crate::reporter::names::SERVICE_NAME;
use crate::reporter::service::{AUTH_PORT, RECEIVER_PORT};
use crate::util::collections::map_has_all_pairs;
use crate::util::errors::{Error, Result, StdError};
use futures::FutureExt;
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule, IngressServiceBackend,
    IngressSpec, ServiceBackendPort,
};
use kube::{Api, ResourceExt};
use tracing::info;

pub const API_INGRESS_NAME: &str = "ibm-license-service-reporter-api-ingress";
pub const CONSOLE_INGRESS_NAME: &str = "ibm-license-service-reporter-console-ingress";
pub const DEFAULT_API_PATH: &str = "/";
pub const DEFAULT_CONSOLE_PATH: &str = "/license-service-reporter";
const PATH_TYPE: &str = "ImplementationSpecific";

fn ingress(
    ctx: &ReporterContext,
    specific: Option<&IngressSpecificOptions>,
    name: &str,
    port: i32,
    default_path: &str,
) -> Ingress {
    let options = ctx.spec().ingress_options.as_ref();
    let common = options.and_then(|o| o.common_options.as_ref());
    let specific = options.and(specific);
    let tls = specific.map(|s| s.tls.clone()).unwrap_or_default();

    let mut metadata = ctx.object_meta(name);
    metadata.annotations = specific.map(|s| s.annotations.clone()).filter(|a| !a.is_empty());
    Ingress {
        metadata,
        spec: Some(IngressSpec {
            tls: (!tls.is_empty()).then_some(tls),
            ingress_class_name: common.and_then(|c| c.ingress_class_name.clone()),
            rules: Some(vec![IngressRule {
                host: common.and_then(|c| c.host.clone()),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some(
                            specific
                                .and_then(|s| s.path.clone())
                                .unwrap_or_else(|| default_path.to_string()),
                        ),
                        path_type: PATH_TYPE.to_string(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: SERVICE_NAME.to_string(),
                                port: Some(ServiceBackendPort {
                                    number: Some(port),
                                    ..Default::default()
                                }),
                            }),
                            ..Default::default()
                        },
                    }],
                }),
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn api_ingress(ctx: &ReporterContext) -> Ingress {
    let specific = ctx.spec().ingress_options.as_ref().and_then(|o| o.api_options.as_ref());
    ingress(ctx, specific, API_INGRESS_NAME, RECEIVER_PORT, DEFAULT_API_PATH)
}

pub fn console_ingress(ctx: &ReporterContext) -> Ingress {
    let specific = ctx.spec().ingress_options.as_ref().and_then(|o| o.console_options.as_ref());
    ingress(ctx, specific, CONSOLE_INGRESS_NAME, AUTH_PORT, DEFAULT_CONSOLE_PATH)
}

fn normalized_spec(ingress: &Ingress) -> IngressSpec {
    let mut spec = ingress.spec.clone().unwrap_or_default();
    if spec.tls.as_ref().is_some_and(Vec::is_empty) {
        spec.tls = None;
    }
    spec
}

/// Annotations and spec must match exactly since they carry controller specific settings.
pub fn check_ingress(found: &Ingress, expected: &Ingress) -> ResourceUpdateStatus {
    let name = found.name_any();
    if name != expected.name_any() {
        info!(found = %name, expected = %expected.name_any(), "Ingress has wrong name");
    } else if !map_has_all_pairs(found.labels(), expected.labels()) {
        info!(ingress = %name, found = ?found.labels(), expected = ?expected.labels(), "Ingress has wrong labels");
    } else if found.annotations() != expected.annotations() {
        info!(ingress = %name, found = ?found.annotations(), expected = ?expected.annotations(), "Ingress has wrong annotations");
    } else if normalized_spec(found) != normalized_spec(expected) {
        info!(ingress = %name, "Ingress has wrong spec");
    } else {
        return ResourceUpdateStatus::DESIRED;
    }
    ResourceUpdateStatus::MERGE
}

pub async fn reconcile_api_ingress(ctx: &ReporterContext) -> Result<()> {
    if !ctx.spec().ingress_enabled {
        return Ok(());
    }
    ctx.reconcile(
        ReconcileRequest::new(api_ingress(ctx), |found: &Ingress, expected: &Ingress| {
            Ok(check_ingress(found, expected))
        })
        .patch(|_, _| Ok(ctx.spec_patch()))
        .override_with_expected(),
    )
    .await
}

/// The auth proxy reads its redirect URL from this ingress, so changes restart the pod.
pub async fn reconcile_console_ingress(ctx: &ReporterContext) -> Result<()> {
    if !ctx.spec().ingress_enabled {
        return Ok(());
    }
    ctx.reconcile(
        ReconcileRequest::new(console_ingress(ctx), |found: &Ingress, expected: &Ingress| {
            Ok(check_ingress(found, expected))
        })
        .patch(|_, _| Ok(ctx.spec_patch()))
        .override_with_expected()
        .post_action(|should_run| ctx.restart_operand_pod(should_run).boxed()),
    )
    .await
}

/// Host of a console ingress the cluster administrator created by hand.
pub async fn customer_console_ingress_host(ctx: &ReporterContext) -> Result<String> {
    let ingresses: Api<Ingress> = ctx.api();
    let ingress = ingresses.get(CONSOLE_INGRESS_NAME).await.map_err(|e| {
        Error::StdError(StdError::kube(
            format!(
                "cannot get the customer created ingress {CONSOLE_INGRESS_NAME} - make sure it's created or enable automatic ingress creation"
            ),
            e,
        ))
    })?;
    ingress
        .spec
        .and_then(|spec| spec.rules)
        .and_then(|rules| rules.into_iter().next())
        .and_then(|rule| rule.host)
        .filter(|host| !host.is_empty())
        .ok_or_else(|| {
            Error::invalid_argument(
                "customer created ingress should specify exactly one rule in the spec and it needs to contain the host value",
            )
        })
}
