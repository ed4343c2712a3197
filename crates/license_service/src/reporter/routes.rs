//! OpenShift routes exposing the receiver API and the console.

use crate::api::openshift::{
    Route, RoutePort, RouteSpec, RouteTargetReference, TlsConfig, INSECURE_EDGE_TERMINATION_NONE,
    TLS_TERMINATION_REENCRYPT,
};
use crate::api::v1alpha1::CertsSource;
use crate::engine::{ReconcileRequest, ResourceUpdateStatus};
use crate::reporter::certificates::{
    route_certificate, CUSTOM_EXTERNAL_CERT_SECRET_NAME, EXTERNAL_CERT_SECRET_NAME, INTERNAL_CERT_SECRET_NAME,
};
use crate::reporter::context::ReporterContext;
use crate::reporter::names::{RELEASE_NAME, SERVICE_NAME};
use crate::reporter::service::{AUTH_PORT_NAME, RECEIVER_PORT};
use crate::util::collections::merge_maps;
use crate::util::errors::{Error, ErrorWithRequeue, Result, StdError};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Api, ResourceExt};
use std::collections::BTreeMap;
use tokio::time::Duration;
use tracing::info;

pub const API_ROUTE_NAME: &str = RELEASE_NAME;
pub const CONSOLE_ROUTE_NAME: &str = "ibm-lsr-console";
pub const CONSOLE_PATH: &str = "/license-service-reporter";

fn default_tls() -> TlsConfig {
    TlsConfig {
        termination: TLS_TERMINATION_REENCRYPT.to_string(),
        insecure_edge_termination_policy: INSECURE_EDGE_TERMINATION_NONE.to_string(),
        ..Default::default()
    }
}

fn route(ctx: &ReporterContext, name: &str, path: &str, target_port: IntOrString, tls: Option<TlsConfig>) -> Route {
    let annotations = BTreeMap::from([(
        "haproxy.router.openshift.io/timeout".to_string(),
        "90s".to_string(),
    )]);
    let mut metadata = ctx.object_meta(name);
    metadata.annotations = Some(merge_maps(&annotations, ctx.spec_annotations()));
    Route {
        metadata,
        spec: RouteSpec {
            path: path.to_string(),
            to: RouteTargetReference {
                kind: "Service".to_string(),
                name: SERVICE_NAME.to_string(),
                weight: None,
            },
            port: Some(RoutePort { target_port }),
            tls,
            ..Default::default()
        },
    }
}

/// Route of the receiver API. TLS from `routeOptions` wins over `tls` when set.
pub fn api_route(ctx: &ReporterContext, tls: TlsConfig) -> Route {
    let tls = match &ctx.spec().route_options {
        Some(options) => options.tls.clone(),
        None => Some(tls),
    };
    route(ctx, API_ROUTE_NAME, "", IntOrString::Int(RECEIVER_PORT), tls)
}

pub fn console_route(ctx: &ReporterContext, tls: TlsConfig) -> Route {
    route(
        ctx,
        CONSOLE_ROUTE_NAME,
        CONSOLE_PATH,
        IntOrString::String(AUTH_PORT_NAME.to_string()),
        Some(tls),
    )
}

fn same_certificates(found: &TlsConfig, expected: &TlsConfig) -> bool {
    found.ca_certificate == expected.ca_certificate
        && found.certificate == expected.certificate
        && found.key == expected.key
        && found.destination_ca_certificate == expected.destination_ca_certificate
}

pub fn compare_routes(ctx: &ReporterContext, found: &Route, expected: &Route) -> ResourceUpdateStatus {
    let name = found.name_any();
    if name != expected.name_any() {
        info!(old = %name, new = %expected.name_any(), "Names not equal");
        return ResourceUpdateStatus::MERGE;
    }
    if found.spec.to.name != expected.spec.to.name {
        info!(route = %name, "Specs To Name not equal");
        return ResourceUpdateStatus::MERGE;
    }
    match (&found.spec.tls, &expected.spec.tls) {
        (None, Some(_)) => {
            info!(route = %name, "Found Route has empty TLS options, but Expected Route has not empty TLS options");
            return ResourceUpdateStatus::MERGE;
        }
        (Some(_), None) => {
            info!(route = %name, "Expected Route has empty TLS options, but Found Route has not empty TLS options");
            return ResourceUpdateStatus::MERGE;
        }
        (Some(found_tls), Some(expected_tls)) => {
            if found_tls.termination != expected_tls.termination {
                info!(route = %name, old = %found_tls.termination, new = %expected_tls.termination, "Route has different TLS termination");
                return ResourceUpdateStatus::MERGE;
            }
            if found_tls.insecure_edge_termination_policy != expected_tls.insecure_edge_termination_policy {
                info!(route = %name, "Route has different TLS insecureEdgeTerminationPolicy");
                return ResourceUpdateStatus::MERGE;
            }
            if !same_certificates(found_tls, expected_tls) {
                info!(route = %name, "Route has different certificate info in the TLS section");
                return ResourceUpdateStatus::MERGE;
            }
        }
        (None, None) => {}
    }
    if ctx.spec_metadata_outdated(found) {
        return ResourceUpdateStatus::PATCH;
    }
    ResourceUpdateStatus::DESIRED
}

async fn reconcile_route_with_tls(ctx: &ReporterContext, expected: Route) -> Result<()> {
    ctx.reconcile(
        ReconcileRequest::new(expected, |found: &Route, expected: &Route| {
            Ok(compare_routes(ctx, found, expected))
        })
        .patch(|_, _| Ok(ctx.spec_patch()))
        .override_with_expected(),
    )
    .await
}

/// Creates a missing route with default TLS; an existing one only gets spec metadata.
async fn reconcile_route_without_certificates(ctx: &ReporterContext, expected: Route) -> Result<()> {
    let routes: Api<Route> = ctx.api();
    if routes.get(&expected.name_any()).await.is_err() {
        info!(route = %expected.name_any(), "Route does not exist, reconciling route without certificates");
        return reconcile_route_with_tls(ctx, expected).await;
    }
    ctx.reconcile(
        ReconcileRequest::new(expected, |found: &Route, _: &Route| {
            Ok(if ctx.spec_metadata_outdated(found) {
                ResourceUpdateStatus::PATCH
            } else {
                ResourceUpdateStatus::DESIRED
            })
        })
        .patch(|_, _| Ok(ctx.spec_patch())),
    )
    .await
}

pub async fn reconcile_routes_without_certificates(ctx: &ReporterContext) -> Result<()> {
    if !ctx.is_route_api {
        return Ok(());
    }
    reconcile_route_without_certificates(ctx, api_route(ctx, default_tls())).await?;
    reconcile_route_without_certificates(ctx, console_route(ctx, default_tls())).await
}

async fn get_secret(api: &Api<Secret>, name: &str, context: &str) -> Result<Secret> {
    api.get(name)
        .await
        .map_err(|e| Error::StdError(StdError::kube(context, e)))
}

/// Re-encrypting API route presenting the external certificate and trusting the internal one.
pub async fn reconcile_route_with_certificates(ctx: &ReporterContext) -> Result<()> {
    if !ctx.is_route_api || !ctx.spec().is_route_enabled() {
        return Ok(());
    }
    info!("Reconciling route with certificate");
    let external_name = match ctx.spec().certs_source() {
        CertsSource::Custom => CUSTOM_EXTERNAL_CERT_SECRET_NAME,
        _ => EXTERNAL_CERT_SECRET_NAME,
    };
    let secrets: Api<Secret> = ctx.api();
    let external = get_secret(&secrets, external_name, "cannot retrieve external certificate from secret").await?;
    let internal = get_secret(
        &secrets,
        INTERNAL_CERT_SECRET_NAME,
        "cannot retrieve internal certificate from secret",
    )
    .await?;
    let external = route_certificate(&external)
        .map_err(|e| Error::invalid_argument(format!("invalid external certificate format in secret: {e}")))?;
    let internal = route_certificate(&internal)
        .map_err(|e| Error::invalid_argument(format!("invalid internal certificate format in secret: {e}")))?;
    let tls = TlsConfig {
        certificate: external.cert,
        ca_certificate: external.ca_cert,
        key: external.key,
        destination_ca_certificate: internal.ca_cert,
        ..default_tls()
    };
    reconcile_route_with_tls(ctx, api_route(ctx, tls)).await
}

/// Host and path of the console route as admitted by the router.
pub async fn console_route_url(ctx: &ReporterContext) -> Result<(String, String)> {
    let routes: Api<Route> = ctx.api();
    let route = routes.get(CONSOLE_ROUTE_NAME).await.map_err(|e| {
        Error::StdError(StdError::kube(format!("could not retrieve route {CONSOLE_ROUTE_NAME}"), e))
    })?;
    if route.spec.host.is_empty() {
        return Err(Error::ErrorWithRequeue(ErrorWithRequeue::new(
            StdError::InvalidArgument(format!("route {CONSOLE_ROUTE_NAME} has no host admitted yet")),
            Duration::from_secs(10),
        )));
    }
    Ok((route.spec.host, route.spec.path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::v1alpha1::{IBMLicenseServiceReporterSpec, RouteOptions};
    use crate::engine::{CACHING_LABEL_KEY, CACHING_LABEL_VALUE};
    use crate::reporter::certificates::generate_self_signed;
    use crate::tests::{mock_client, openshift_reporter_context, reporter_instance, Exchange};
    use http::Method;
    use serde_json::json;

    const ROUTES: &str = "/apis/route.openshift.io/v1/namespaces/lsr/routes";
    const SECRETS: &str = "/api/v1/namespaces/lsr/secrets";

    fn labeled_spec() -> IBMLicenseServiceReporterSpec {
        IBMLicenseServiceReporterSpec {
            labels: BTreeMap::from([("test-label".to_string(), "test-value".to_string())]),
            ..Default::default()
        }
    }

    fn live_route(name: &str, labels: serde_json::Value) -> serde_json::Value {
        json!({
            "apiVersion": "route.openshift.io/v1",
            "kind": "Route",
            "metadata": {"name": name, "namespace": "lsr", "resourceVersion": "5", "labels": labels},
            "spec": {
                "host": "lsr.apps.example.com",
                "to": {"kind": "Service", "name": SERVICE_NAME},
                "tls": {"termination": "edge"}
            }
        })
    }

    fn tls_secret(name: &str, chain: String, key: Vec<u8>) -> serde_json::Value {
        use base64::{engine::general_purpose::STANDARD, Engine as _};
        json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": {"name": name, "namespace": "lsr"},
            "type": "kubernetes.io/tls",
            "data": {"tls.crt": STANDARD.encode(chain), "tls.key": STANDARD.encode(key)}
        })
    }

    #[tokio::test]
    async fn missing_routes_are_created_with_spec_labels() {
        let (client, server) = mock_client();
        let api = format!("{ROUTES}/{API_ROUTE_NAME}");
        let console = format!("{ROUTES}/{CONSOLE_ROUTE_NAME}");
        let server = server.run(vec![
            Exchange::not_found(Method::GET, &api),
            Exchange::not_found(Method::GET, &api),
            Exchange::new(Method::POST, ROUTES, 201, live_route(API_ROUTE_NAME, json!({}))),
            Exchange::not_found(Method::GET, &console),
            Exchange::not_found(Method::GET, &console),
            Exchange::new(Method::POST, ROUTES, 201, live_route(CONSOLE_ROUTE_NAME, json!({}))),
        ]);
        let ctx = openshift_reporter_context(client, reporter_instance(labeled_spec()), true, true);
        reconcile_routes_without_certificates(&ctx).await.unwrap();
        let bodies = server.await.unwrap();
        assert_eq!(bodies[2]["metadata"]["labels"]["test-label"], "test-value");
        assert_eq!(bodies[2]["spec"]["port"]["targetPort"], 8080);
        assert_eq!(bodies[2]["spec"]["tls"], json!({"termination": "reencrypt", "insecureEdgeTerminationPolicy": "None"}));
        assert_eq!(bodies[5]["spec"]["path"], CONSOLE_PATH);
        assert_eq!(bodies[5]["spec"]["port"]["targetPort"], "proxy");
    }

    #[tokio::test]
    async fn existing_routes_only_receive_spec_labels() {
        let (client, server) = mock_client();
        let api = format!("{ROUTES}/{API_ROUTE_NAME}");
        let console = format!("{ROUTES}/{CONSOLE_ROUTE_NAME}");
        let cached = json!({CACHING_LABEL_KEY: CACHING_LABEL_VALUE});
        let server = server.run(vec![
            Exchange::new(Method::GET, &api, 200, live_route(API_ROUTE_NAME, cached.clone())),
            Exchange::new(Method::GET, &api, 200, live_route(API_ROUTE_NAME, cached.clone())),
            Exchange::new(Method::PATCH, &api, 200, live_route(API_ROUTE_NAME, cached.clone())),
            Exchange::new(Method::GET, &console, 200, live_route(CONSOLE_ROUTE_NAME, cached.clone())),
            Exchange::new(Method::GET, &console, 200, live_route(CONSOLE_ROUTE_NAME, cached.clone())),
            Exchange::new(Method::PATCH, &console, 200, live_route(CONSOLE_ROUTE_NAME, cached)),
        ]);
        let ctx = openshift_reporter_context(client, reporter_instance(labeled_spec()), true, true);
        reconcile_routes_without_certificates(&ctx).await.unwrap();
        let bodies = server.await.unwrap();
        assert_eq!(bodies[2]["metadata"]["labels"], json!({"test-label": "test-value"}));
        assert_eq!(bodies[5]["metadata"]["labels"], json!({"test-label": "test-value"}));
    }

    #[tokio::test]
    async fn route_with_certificates_uses_secret_material() {
        let (leaf, key) = generate_self_signed(&["lsr.apps.example.com".to_string()]).unwrap();
        let (internal_leaf, internal_key) = generate_self_signed(&["svc".to_string()]).unwrap();
        let (service_ca, _) = generate_self_signed(&["ca".to_string()]).unwrap();
        let leaf = String::from_utf8(leaf).unwrap();
        let internal_chain = format!(
            "{}{}",
            String::from_utf8(internal_leaf).unwrap(),
            String::from_utf8(service_ca.clone()).unwrap()
        );

        let (client, server) = mock_client();
        let api = format!("{ROUTES}/{API_ROUTE_NAME}");
        let server = server.run(vec![
            Exchange::new(
                Method::GET,
                &format!("{SECRETS}/{EXTERNAL_CERT_SECRET_NAME}"),
                200,
                tls_secret(EXTERNAL_CERT_SECRET_NAME, leaf.clone(), key.clone()),
            ),
            Exchange::new(
                Method::GET,
                &format!("{SECRETS}/{INTERNAL_CERT_SECRET_NAME}"),
                200,
                tls_secret(INTERNAL_CERT_SECRET_NAME, internal_chain, internal_key),
            ),
            Exchange::new(
                Method::GET,
                &api,
                200,
                live_route(API_ROUTE_NAME, json!({CACHING_LABEL_KEY: CACHING_LABEL_VALUE})),
            ),
            Exchange::new(Method::PUT, &api, 200, live_route(API_ROUTE_NAME, json!({}))),
        ]);
        let ctx = openshift_reporter_context(client, reporter_instance(Default::default()), true, true);
        reconcile_route_with_certificates(&ctx).await.unwrap();
        let bodies = server.await.unwrap();
        let tls = &bodies[3]["spec"]["tls"];
        assert_eq!(tls["termination"], "reencrypt");
        assert_eq!(tls["certificate"], leaf.trim_end());
        assert_eq!(tls["key"], String::from_utf8(key).unwrap());
        assert_eq!(
            tls["destinationCACertificate"],
            String::from_utf8(service_ca).unwrap().trim_end()
        );
        assert!(tls.get("caCertificate").is_none());
    }

    #[tokio::test]
    async fn routes_disabled_means_no_calls() {
        let (client, server) = mock_client();
        let server = server.run(vec![]);
        let spec = IBMLicenseServiceReporterSpec {
            route_enabled: Some(false),
            ..Default::default()
        };
        let ctx = openshift_reporter_context(client, reporter_instance(spec), true, true);
        reconcile_route_with_certificates(&ctx).await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn route_options_override_tls() {
        let (client, _server) = mock_client();
        let spec = IBMLicenseServiceReporterSpec {
            route_options: Some(RouteOptions { tls: None }),
            ..Default::default()
        };
        let ctx = openshift_reporter_context(client, reporter_instance(spec), true, false);
        assert_eq!(api_route(&ctx, default_tls()).spec.tls, None);

        let found = api_route(&ctx, default_tls());
        let expected = console_route(&ctx, default_tls());
        assert_eq!(compare_routes(&ctx, &found, &expected), ResourceUpdateStatus::MERGE);
    }
}
