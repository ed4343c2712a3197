use crate::reporter::certificates::INTERNAL_CERT_SECRET_NAME;
use crate::reporter::context::ReporterContext;
use crate::reporter::deployment::oauth::{
    CLIENT_SECRET_FILE_PATH, CLIENT_SECRET_NAME_FLAG, COOKIE_SECRET_PATH, HTPASSWD_FILE_PATH,
    PROVIDER_CA_FILE_PATH, PROVIDER_CA_SECRET_NAME_FLAG, TLS_DIR,
};
use crate::reporter::pvc::PVC_NAME;
use crate::reporter::secrets::{api_token_secret_name, COOKIE_SECRET_NAME, DATABASE_SECRET_NAME, HTPASSWD_SECRET_NAME};
use crate::util::errors::{Error, Result};
use k8s_openapi::api::core::v1::{
    EmptyDirVolumeSource, PersistentVolumeClaimVolumeSource, SecretVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

pub const API_TOKEN_VOLUME: &str = "api-token";
pub const AUTH_COOKIE_VOLUME: &str = "ibm-license-reporter-auth-cookie-secret";
pub const AUTH_HTPASSWD_VOLUME: &str = "ibm-license-reporter-auth";
pub const AUTH_CLIENT_SECRET_VOLUME: &str = "ibm-license-reporter-auth-client-secret";
pub const AUTH_PROVIDER_CA_VOLUME: &str = "ibm-license-reporter-auth-provider-ca";
pub const DATA_VOLUME: &str = "data";
pub const DATABASE_CONFIG_VOLUME: &str = "db-config";
pub const RECEIVER_TMP_VOLUME: &str = "receiver-tmp";
pub const DATABASE_TMP_VOLUME: &str = "db-tmp";
pub const DATABASE_SOCKETS_VOLUME: &str = "db-sockets";
pub const HTTPS_CERTS_VOLUME: &str = "license-reporter-https-certs";

pub const DEFAULT_SECRET_MODE: i32 = 420;
const EMPTY_DIR_SIZE_LIMIT: &str = "256Mi";

fn secret_volume(name: &str, secret_name: &str, optional: Option<bool>) -> Volume {
    Volume {
        name: name.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret_name.to_string()),
            default_mode: Some(DEFAULT_SECRET_MODE),
            optional,
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Secret volume that does not block pod start while the secret is missing.
pub fn optional_secret_volume(name: &str, secret_name: &str) -> Volume {
    secret_volume(name, secret_name, Some(true))
}

fn empty_dir(name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        empty_dir: Some(EmptyDirVolumeSource {
            size_limit: Some(Quantity(EMPTY_DIR_SIZE_LIMIT.to_string())),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn volumes(ctx: &ReporterContext) -> Result<Vec<Volume>> {
    let mut volumes = vec![
        secret_volume(API_TOKEN_VOLUME, api_token_secret_name(ctx), None),
        secret_volume(AUTH_COOKIE_VOLUME, COOKIE_SECRET_NAME, None),
        secret_volume(AUTH_HTPASSWD_VOLUME, HTPASSWD_SECRET_NAME, None),
        Volume {
            name: DATA_VOLUME.to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: PVC_NAME.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        },
        secret_volume(DATABASE_CONFIG_VOLUME, DATABASE_SECRET_NAME, None),
        empty_dir(RECEIVER_TMP_VOLUME),
        empty_dir(DATABASE_TMP_VOLUME),
        empty_dir(DATABASE_SOCKETS_VOLUME),
        optional_secret_volume(HTTPS_CERTS_VOLUME, INTERNAL_CERT_SECRET_NAME),
    ];

    let oauth = &ctx.spec().authentication.oauth;
    if oauth.enabled {
        let client_secret = oauth.find_param_value(CLIENT_SECRET_NAME_FLAG).ok_or_else(|| {
            Error::invalid_argument("client-secret-name for oauth authentication must be specified")
        })?;
        volumes.push(optional_secret_volume(AUTH_CLIENT_SECRET_VOLUME, client_secret));
        if let Some(provider_ca) = oauth.find_param_value(PROVIDER_CA_SECRET_NAME_FLAG) {
            volumes.push(optional_secret_volume(AUTH_PROVIDER_CA_VOLUME, provider_ca));
        }
    }
    Ok(volumes)
}

/// `readOnly: false` is omitted, as the API server returns it.
pub fn mount(name: &str, path: &str, read_only: bool) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        read_only: read_only.then_some(true),
        ..Default::default()
    }
}

fn file_mount(name: &str, path: &str, key: &str) -> VolumeMount {
    VolumeMount {
        sub_path: Some(key.to_string()),
        ..mount(name, path, true)
    }
}

/// Mounts shared by the UI and the auth proxy.
pub fn auth_volume_mounts(ctx: &ReporterContext) -> Vec<VolumeMount> {
    let mut mounts = vec![
        file_mount(AUTH_HTPASSWD_VOLUME, HTPASSWD_FILE_PATH, "data"),
        file_mount(AUTH_COOKIE_VOLUME, COOKIE_SECRET_PATH, "data"),
        mount(HTTPS_CERTS_VOLUME, TLS_DIR, true),
    ];
    if ctx.spec().is_oauth_enabled() {
        let oauth = &ctx.spec().authentication.oauth;
        if oauth.find_param_value(CLIENT_SECRET_NAME_FLAG).is_some() {
            mounts.push(file_mount(AUTH_CLIENT_SECRET_VOLUME, CLIENT_SECRET_FILE_PATH, "data"));
        }
        if oauth.find_param_value(PROVIDER_CA_SECRET_NAME_FLAG).is_some() {
            mounts.push(file_mount(AUTH_PROVIDER_CA_VOLUME, PROVIDER_CA_FILE_PATH, "ca.crt"));
        }
    }
    mounts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::v1alpha1::IBMLicenseServiceReporterSpec;
    use crate::tests::{mock_client, reporter_context, reporter_instance};

    fn oauth_spec(parameters: &[&str]) -> IBMLicenseServiceReporterSpec {
        let mut spec = IBMLicenseServiceReporterSpec::default();
        spec.authentication.oauth.enabled = true;
        spec.authentication.oauth.parameters = parameters.iter().map(|p| p.to_string()).collect();
        spec
    }

    #[tokio::test]
    async fn base_volumes_cover_all_operand_secrets() {
        let (client, _server) = mock_client();
        let ctx = reporter_context(client, reporter_instance(Default::default()));
        let volumes = volumes(&ctx).unwrap();
        let names: Vec<&str> = volumes.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(
            names,
            [
                API_TOKEN_VOLUME,
                AUTH_COOKIE_VOLUME,
                AUTH_HTPASSWD_VOLUME,
                DATA_VOLUME,
                DATABASE_CONFIG_VOLUME,
                RECEIVER_TMP_VOLUME,
                DATABASE_TMP_VOLUME,
                DATABASE_SOCKETS_VOLUME,
                HTTPS_CERTS_VOLUME,
            ]
        );
        let certs = volumes[8].secret.as_ref().unwrap();
        assert_eq!(certs.secret_name.as_deref(), Some(INTERNAL_CERT_SECRET_NAME));
        assert_eq!(certs.optional, Some(true));
        assert_eq!(certs.default_mode, Some(420));
        assert_eq!(auth_volume_mounts(&ctx).len(), 3);
    }

    #[tokio::test]
    async fn oauth_requires_client_secret_name() {
        let (client, _server) = mock_client();
        let ctx = reporter_context(client, reporter_instance(oauth_spec(&["--provider=oidc"])));
        let err = volumes(&ctx).unwrap_err();
        assert!(err.to_string().contains("client-secret-name for oauth authentication must be specified"));
    }

    #[tokio::test]
    async fn oauth_secrets_are_mounted_as_files() {
        let (client, _server) = mock_client();
        let spec = oauth_spec(&["--client-secret-name=idp-client", "--provider-ca-secret-name=idp-ca"]);
        let ctx = reporter_context(client, reporter_instance(spec));
        let volumes = volumes(&ctx).unwrap();
        assert_eq!(volumes.len(), 11);
        assert_eq!(
            volumes[9].secret.as_ref().unwrap().secret_name.as_deref(),
            Some("idp-client")
        );
        let mounts = auth_volume_mounts(&ctx);
        assert_eq!(mounts[3].mount_path, CLIENT_SECRET_FILE_PATH);
        assert_eq!(mounts[4].sub_path.as_deref(), Some("ca.crt"));
    }
}
