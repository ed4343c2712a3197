//! Self-signed HTTPS certificates of the reporter and their validation.

use crate::api::openshift::Route;
use crate::api::v1alpha1::CertsSource;
use crate::engine::{Merged, ReconcileRequest, ResourceUpdateStatus};
use crate::reporter::context::ReporterContext;
use crate::reporter::names::{RELEASE_NAME, SERVICE_NAME};
use crate::reporter::secrets::SECRET_TYPE_TLS;
use crate::util::errors::{Error, Result, StdError};
use futures::{future, FutureExt};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::{Api, ResourceExt};
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::rsa::Rsa;
use openssl::x509::extension::{BasicConstraints, SubjectAlternativeName};
use openssl::x509::{X509NameBuilder, X509};
use regex::Regex;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use tracing::{error, info};

pub const EXTERNAL_CERT_SECRET_NAME: &str = "ibm-license-service-reporter-cert";
pub const CUSTOM_EXTERNAL_CERT_SECRET_NAME: &str = "ibm-license-service-reporter-certs";
pub const INTERNAL_CERT_SECRET_NAME: &str = "ibm-license-service-reporter-cert-internal";
pub const TLS_CERT_KEY: &str = "tls.crt";
pub const TLS_KEY_KEY: &str = "tls.key";

/// Certificates expiring sooner than this are regenerated.
const RENEW_BEFORE_DAYS: u32 = 90;
const VALIDITY_DAYS: u32 = 365;

static PEM_CERTIFICATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)-----BEGIN CERTIFICATE-----.*?-----END CERTIFICATE-----").expect("valid certificate pattern")
});

fn crypto_error(context: &str) -> impl Fn(ErrorStack) -> Error + '_ {
    move |e| Error::StdError(StdError::CryptoError(format!("{context}: {e}")))
}

/// PEM encoded self-signed certificate for `dns` and its PKCS#1 RSA key.
pub fn generate_self_signed(dns: &[String]) -> Result<(Vec<u8>, Vec<u8>)> {
    let build = || -> std::result::Result<(Vec<u8>, Vec<u8>), ErrorStack> {
        let rsa = Rsa::generate(2048)?;
        let key_pem = rsa.private_key_to_pem()?;
        let key = PKey::from_rsa(rsa)?;

        let mut name = X509NameBuilder::new()?;
        if let Some(common_name) = dns.first().filter(|cn| !cn.is_empty()) {
            name.append_entry_by_text("CN", common_name)?;
        }
        name.append_entry_by_text("O", "IBM")?;
        let name = name.build();

        let serial = {
            let mut serial = BigNum::new()?;
            serial.rand(64, MsbOption::MAYBE_ZERO, false)?;
            serial.to_asn1_integer()?
        };
        let not_before = Asn1Time::days_from_now(0)?;
        let not_after = Asn1Time::days_from_now(VALIDITY_DAYS)?;

        let mut builder = X509::builder()?;
        builder.set_version(2)?;
        builder.set_serial_number(&serial)?;
        builder.set_subject_name(&name)?;
        builder.set_issuer_name(&name)?;
        builder.set_pubkey(&key)?;
        builder.set_not_before(&not_before)?;
        builder.set_not_after(&not_after)?;
        builder.append_extension(BasicConstraints::new().critical().build()?)?;
        if !dns.is_empty() {
            let mut san = SubjectAlternativeName::new();
            for name in dns {
                san.dns(name);
            }
            let san = san.build(&builder.x509v3_context(None, None))?;
            builder.append_extension(san)?;
        }
        builder.sign(&key, MessageDigest::sha256())?;
        Ok((builder.build().to_pem()?, key_pem))
    };
    build().map_err(crypto_error("failed to generate self-signed certificate"))
}

/// TLS secret `name` holding a fresh self-signed certificate for `dns`.
pub fn self_signed_secret(ctx: &ReporterContext, name: &str, dns: &[String]) -> Result<Secret> {
    let (cert, key) = generate_self_signed(dns)?;
    Ok(Secret {
        metadata: ctx.object_meta(name),
        type_: Some(SECRET_TYPE_TLS.to_string()),
        data: Some(BTreeMap::from([
            (TLS_CERT_KEY.to_string(), ByteString(cert)),
            (TLS_KEY_KEY.to_string(), ByteString(key)),
        ])),
        ..Default::default()
    })
}

/// First certificate of a PEM bundle; anything after it is logged and ignored.
pub fn parse_certificate(pem: &[u8]) -> Result<X509> {
    const END: &[u8] = b"-----END CERTIFICATE-----";
    if let Some(end) = pem.windows(END.len()).position(|window| window == END) {
        let rest = &pem[end + END.len()..];
        if !rest.iter().all(u8::is_ascii_whitespace) {
            info!(
                rest_len = rest.len(),
                "Extraneous data read from the TLS certificate - ignoring it and attempting decoding of the valid PEM certificate block."
            );
        }
    }
    X509::from_pem(pem).map_err(crypto_error("unable to decode PEM certificate block"))
}

/// Hostname matching on DNS subject alternative names, with single label wildcards.
pub fn matches_hostname(cert: &X509, host: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let Some(names) = cert.subject_alt_names() else {
        return false;
    };
    names
        .iter()
        .filter_map(|name| name.dnsname())
        .any(|pattern| dns_pattern_matches(&pattern.to_ascii_lowercase(), &host))
}

fn dns_pattern_matches(pattern: &str, host: &str) -> bool {
    match pattern.strip_prefix("*.") {
        Some(suffix) => host
            .split_once('.')
            .is_some_and(|(label, rest)| !label.is_empty() && rest == suffix),
        None => pattern == host,
    }
}

/// A valid certificate for every host that is not about to expire; then spec metadata.
pub fn check_certificate_secret(ctx: &ReporterContext, found: &Secret, hosts: &[String]) -> ResourceUpdateStatus {
    let raw = found
        .data
        .as_ref()
        .and_then(|data| data.get(TLS_CERT_KEY))
        .map(|value| value.0.as_slice())
        .unwrap_or_default();
    let cert = match parse_certificate(raw) {
        Ok(cert) => cert,
        Err(e) => {
            error!(secret = %found.name_any(), error = %e, "improper x509 certificate in secret");
            return ResourceUpdateStatus::MERGE;
        }
    };
    let expires_soon = Asn1Time::days_from_now(RENEW_BEFORE_DAYS)
        .and_then(|limit| cert.not_after().compare(&limit))
        .map_or(true, |ordering| ordering == Ordering::Less);
    if expires_soon {
        error!(secret = %found.name_any(), "self-signed certificate has expired");
        return ResourceUpdateStatus::MERGE;
    }
    if let Some(host) = hosts.iter().find(|host| !matches_hostname(&cert, host)) {
        error!(secret = %found.name_any(), %host, "certificate not issued to the proper hostname");
        return ResourceUpdateStatus::MERGE;
    }
    if ctx.spec_metadata_outdated(found) {
        return ResourceUpdateStatus::PATCH;
    }
    ResourceUpdateStatus::DESIRED
}

fn external_certificate(ctx: &ReporterContext, hosts: &[String]) -> Result<Secret> {
    self_signed_secret(ctx, EXTERNAL_CERT_SECRET_NAME, hosts).map_err(|e| {
        Error::StdError(StdError::CryptoError(format!(
            "error generating external self-signed certificate: {e}"
        )))
    })
}

/// Certificate presented by the API route, issued for the route host.
pub async fn reconcile_external_certificate(ctx: &ReporterContext) -> Result<()> {
    if !ctx.is_route_api || ctx.spec().certs_source() == CertsSource::Custom {
        return Ok(());
    }
    let routes: Api<Route> = ctx.api();
    let route = routes
        .get(RELEASE_NAME)
        .await
        .map_err(|e| Error::StdError(StdError::kube("cannot get route", e)))?;
    let hosts = vec![route.spec.host];
    let expected = Secret {
        metadata: ctx.object_meta(EXTERNAL_CERT_SECRET_NAME),
        ..Default::default()
    };
    ctx.reconcile(
        ReconcileRequest::new(expected, |found: &Secret, _: &Secret| {
            Ok(check_certificate_secret(ctx, found, &hosts))
        })
        .override_on_create(|_| external_certificate(ctx, &hosts))
        .patch(|_, _| Ok(ctx.spec_patch()))
        .merge(|_, _| {
            future::ready(external_certificate(ctx, &hosts).map(|object| Merged {
                object,
                ignore_update_error: false,
            }))
            .boxed()
        }),
    )
    .await
}

/// DNS names the operand service is reachable under inside the cluster.
pub fn service_dns_names(namespace: &str) -> Vec<String> {
    vec![
        SERVICE_NAME.to_string(),
        format!("{SERVICE_NAME}.{namespace}"),
        format!("{SERVICE_NAME}.{namespace}.svc"),
        format!("{SERVICE_NAME}.{namespace}.svc.cluster.local"),
    ]
}

/// The operator issues the internal certificate itself unless the service CA
/// or the user provides it.
pub fn issues_internal_certificate(ctx: &ReporterContext) -> bool {
    match ctx.spec().certs_source() {
        CertsSource::SelfSigned => true,
        CertsSource::Ocp => !ctx.is_service_ca_api,
        _ => false,
    }
}

/// Certificate served by the operand pod behind the service.
pub async fn reconcile_internal_certificate(ctx: &ReporterContext) -> Result<()> {
    if !issues_internal_certificate(ctx) {
        return Ok(());
    }
    let hosts = service_dns_names(&ctx.namespace);
    let generate = || self_signed_secret(ctx, INTERNAL_CERT_SECRET_NAME, &hosts);
    let expected = Secret {
        metadata: ctx.object_meta(INTERNAL_CERT_SECRET_NAME),
        ..Default::default()
    };
    ctx.reconcile(
        ReconcileRequest::new(expected, |found: &Secret, _: &Secret| {
            Ok(check_certificate_secret(ctx, found, &hosts))
        })
        .override_on_create(|_| generate())
        .patch(|_, _| Ok(ctx.spec_patch()))
        .merge(|_, _| {
            future::ready(generate().map(|object| Merged {
                object,
                ignore_update_error: false,
            }))
            .boxed()
        }),
    )
    .await
}

/// Certificate material of a TLS secret as an OpenShift route expects it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouteCertificate {
    pub cert: String,
    /// Second certificate of the chain, only when the chain has exactly two
    pub ca_cert: String,
    pub key: String,
}

/// Splits `tls.crt` into the leaf and CA certificates and reads `tls.key`.
pub fn route_certificate(secret: &Secret) -> Result<RouteCertificate> {
    let value = |key: &str| {
        secret
            .data
            .as_ref()
            .and_then(|data| data.get(key))
            .map(|v| String::from_utf8_lossy(&v.0).into_owned())
            .unwrap_or_default()
    };
    let chain = value(TLS_CERT_KEY);
    let certs: Vec<&str> = PEM_CERTIFICATE.find_iter(&chain).map(|m| m.as_str()).collect();
    let Some(cert) = certs.first() else {
        return Err(Error::invalid_argument("invalid certificate format under tls.crt section"));
    };
    Ok(RouteCertificate {
        cert: cert.to_string(),
        ca_cert: if certs.len() == 2 { certs[1].to_string() } else { String::new() },
        key: value(TLS_KEY_KEY),
    })
}
