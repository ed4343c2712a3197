//! Generated credentials of the reporter operand.
//!
//! Secret material is random and only written on create, or when the found
//! secret lost the keys the operand reads. User edits of the values are kept.

use crate::engine::{ReconcileRequest, ResourceUpdateStatus};
use crate::reporter::context::ReporterContext;
use crate::util::collections::{map_has_all_keys, map_has_all_pairs, merge_maps};
use crate::util::errors::{is_not_found, Error, Result, StdError};
use crate::util::random::{rand_bytes, rand_string};
use base64::{engine::general_purpose, Engine as _};
use futures::FutureExt;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::{Api, ResourceExt};
use std::collections::BTreeMap;
use tokio::time::Duration;
use tracing::info;

pub const SECRET_TYPE_OPAQUE: &str = "Opaque";
pub const SECRET_TYPE_BASIC_AUTH: &str = "kubernetes.io/basic-auth";
pub const SECRET_TYPE_TLS: &str = "kubernetes.io/tls";

pub const API_TOKEN_KEY: &str = "token";
/// Secret License Services use to push data to the reporter.
pub const DEFAULT_API_TOKEN_SECRET_NAME: &str = "ibm-license-service-reporter-token";

pub const DATABASE_SECRET_NAME: &str = "license-service-reporter-hub-db-config";
pub const POSTGRES_PASSWORD_KEY: &str = "POSTGRES_PASSWORD";
pub const POSTGRES_USER_KEY: &str = "POSTGRES_USER";
pub const POSTGRES_DB_KEY: &str = "POSTGRES_DB";
pub const POSTGRES_PGDATA_KEY: &str = "POSTGRES_PGDATA";
pub const DATABASE_NAME: &str = "postgres";
pub const DATABASE_MOUNT_PATH: &str = "/var/lib/postgresql";

pub const CREDENTIALS_SECRET_NAME: &str = "ibm-license-service-reporter-credentials";
pub const HTPASSWD_SECRET_NAME: &str = "ibm-license-service-reporter-credentials-htpasswd";
pub const COOKIE_SECRET_NAME: &str = "ibm-license-service-reporter-auth-cookie";

const CREDENTIALS_READ_ATTEMPTS: u32 = 3;
const CREDENTIALS_READ_DELAY: Duration = Duration::from_secs(5);
const BCRYPT_COST: u32 = 10;

pub fn api_token_secret_name(ctx: &ReporterContext) -> &str {
    match ctx.spec().api_secret_token.as_str() {
        "" => DEFAULT_API_TOKEN_SECRET_NAME,
        name => name,
    }
}

fn data<'s>(secret: &'s Secret, key: &str) -> Option<&'s [u8]> {
    secret.data.as_ref()?.get(key).map(|value| value.0.as_slice())
}

fn opaque_secret(ctx: &ReporterContext, name: &str, type_: &str) -> Secret {
    Secret {
        metadata: ctx.object_meta(name),
        type_: Some(type_.to_string()),
        ..Default::default()
    }
}

/// PATCH when spec labels or annotations are missing on `found`, DESIRED otherwise.
fn spec_metadata_status(ctx: &ReporterContext, found: &Secret) -> ResourceUpdateStatus {
    if ctx.spec_metadata_outdated(found) {
        ResourceUpdateStatus::PATCH
    } else {
        ResourceUpdateStatus::DESIRED
    }
}

pub fn api_token_secret(ctx: &ReporterContext) -> Secret {
    Secret {
        string_data: Some(BTreeMap::from([(API_TOKEN_KEY.to_string(), rand_string(24))])),
        ..opaque_secret(ctx, api_token_secret_name(ctx), SECRET_TYPE_OPAQUE)
    }
}

pub async fn reconcile_api_token(ctx: &ReporterContext) -> Result<()> {
    let expected = api_token_secret(ctx);
    ctx.reconcile(
        ReconcileRequest::new(expected, |found: &Secret, _: &Secret| {
            if data(found, API_TOKEN_KEY).is_none() {
                info!(secret = %found.name_any(), "Updating secret due to not having {API_TOKEN_KEY} in Data");
                return Ok(ResourceUpdateStatus::MERGE);
            }
            Ok(spec_metadata_status(ctx, found))
        })
        .patch(|_, _| Ok(ctx.spec_patch()))
        .override_with_expected(),
    )
    .await
}

pub fn database_secret(ctx: &ReporterContext, database_user: &str) -> Secret {
    Secret {
        string_data: Some(BTreeMap::from([
            (POSTGRES_PASSWORD_KEY.to_string(), rand_string(8)),
            (POSTGRES_USER_KEY.to_string(), database_user.to_string()),
            (POSTGRES_DB_KEY.to_string(), DATABASE_NAME.to_string()),
            (POSTGRES_PGDATA_KEY.to_string(), format!("{DATABASE_MOUNT_PATH}/pgdata")),
        ])),
        ..opaque_secret(ctx, DATABASE_SECRET_NAME, SECRET_TYPE_OPAQUE)
    }
}

/// Keys must exist; values are never compared so a changed password survives.
pub fn check_database_secret(ctx: &ReporterContext, found: &Secret, expected: &Secret) -> ResourceUpdateStatus {
    let name = found.name_any();
    if found.type_ != expected.type_ {
        info!(secret = %name, "Updating secret due to type mismatch");
        return ResourceUpdateStatus::MERGE;
    }
    let empty = BTreeMap::new();
    if !map_has_all_keys(
        found.data.as_ref().unwrap_or(&empty),
        expected.string_data.as_ref().unwrap_or(&BTreeMap::new()),
    ) {
        info!(secret = %name, "Updating secret due to data mismatch");
        return ResourceUpdateStatus::MERGE;
    }

    // a label difference coming only from spec labels is patched, after the annotations verdict
    let mut patch_after_annotations = false;
    if !map_has_all_pairs(found.labels(), expected.labels()) {
        if !map_has_all_pairs(&merge_maps(found.labels(), ctx.spec_labels()), expected.labels()) {
            info!(secret = %name, "Updating secret due to having outdated labels");
            return ResourceUpdateStatus::MERGE;
        }
        patch_after_annotations = true;
    }
    if !map_has_all_pairs(found.annotations(), expected.annotations()) {
        if map_has_all_pairs(
            &merge_maps(found.annotations(), ctx.spec_annotations()),
            expected.annotations(),
        ) {
            return ResourceUpdateStatus::PATCH;
        }
        info!(secret = %name, "Updating secret due to having outdated annotations");
        return ResourceUpdateStatus::MERGE;
    }
    if patch_after_annotations {
        return ResourceUpdateStatus::PATCH;
    }
    ResourceUpdateStatus::DESIRED
}

pub async fn reconcile_database_secret(ctx: &ReporterContext) -> Result<()> {
    let database_user = ctx.config.postgres_user().await?;
    let expected = database_secret(ctx, &database_user);
    ctx.reconcile(
        ReconcileRequest::new(expected, |found: &Secret, expected: &Secret| {
            Ok(check_database_secret(ctx, found, expected))
        })
        .patch(|_, _| Ok(ctx.spec_patch()))
        .override_with_expected(),
    )
    .await
}

/// Basic-auth credentials of the console user; the password is 16 random bytes, URL safe base64.
pub fn credentials_secret(ctx: &ReporterContext, username: &str) -> Secret {
    let password = general_purpose::URL_SAFE.encode(rand_bytes(16));
    Secret {
        data: Some(BTreeMap::from([
            ("username".to_string(), ByteString(username.as_bytes().to_vec())),
            ("password".to_string(), ByteString(password.into_bytes())),
        ])),
        ..opaque_secret(ctx, CREDENTIALS_SECRET_NAME, SECRET_TYPE_BASIC_AUTH)
    }
}

/// `user:bcrypt(password)\n`, the htpasswd file read by oauth2-proxy.
pub fn htpasswd_line(username: &str, password: &str) -> Result<String> {
    let hash = bcrypt::hash_with_result(password, BCRYPT_COST)
        .map_err(|e| Error::StdError(StdError::CryptoError(format!("failed to hash password: {e}"))))?;
    Ok(format!("{username}:{}\n", hash.format_for_version(bcrypt::Version::TwoA)))
}

pub fn htpasswd_secret(ctx: &ReporterContext, username: &str, password: &str) -> Result<Secret> {
    Ok(Secret {
        data: Some(BTreeMap::from([(
            "data".to_string(),
            ByteString(htpasswd_line(username, password)?.into_bytes()),
        )])),
        ..opaque_secret(ctx, HTPASSWD_SECRET_NAME, SECRET_TYPE_OPAQUE)
    })
}

fn check_credentials(ctx: &ReporterContext, found: &Secret) -> ResourceUpdateStatus {
    for key in ["username", "password"] {
        if data(found, key).map_or(true, <[u8]>::is_empty) {
            info!(secret = CREDENTIALS_SECRET_NAME, "Updating secret due to missing {key}");
            return ResourceUpdateStatus::MERGE;
        }
    }
    spec_metadata_status(ctx, found)
}

/// The found htpasswd entry must belong to `username` and match `password`.
pub fn check_htpasswd(
    ctx: &ReporterContext,
    found: &Secret,
    expected: &Secret,
    username: &str,
    password: &str,
) -> ResourceUpdateStatus {
    if found.type_ != expected.type_ {
        return ResourceUpdateStatus::MERGE;
    }
    let empty = BTreeMap::new();
    if !map_has_all_keys(
        found.data.as_ref().unwrap_or(&empty),
        expected.data.as_ref().unwrap_or(&empty),
    ) {
        return ResourceUpdateStatus::MERGE;
    }
    let entry = String::from_utf8_lossy(data(found, "data").unwrap_or_default()).into_owned();
    let parts: Vec<&str> = entry.split(':').collect();
    let [found_user, hash] = parts.as_slice() else {
        return ResourceUpdateStatus::MERGE;
    };
    if *found_user != username {
        return ResourceUpdateStatus::MERGE;
    }
    if !bcrypt::verify(password, hash.trim_end_matches('\n')).unwrap_or(false) {
        return ResourceUpdateStatus::MERGE;
    }
    spec_metadata_status(ctx, found)
}

/// Reads the credentials secret, retrying while the API still reports it missing.
pub async fn wait_for_credentials(api: &Api<Secret>) -> Result<Secret> {
    let mut last_error = None;
    for _ in 0..CREDENTIALS_READ_ATTEMPTS {
        match api.get(CREDENTIALS_SECRET_NAME).await {
            Ok(secret) => return Ok(secret),
            Err(e) if is_not_found(&e) => {
                last_error = Some(e);
                tokio::time::sleep(CREDENTIALS_READ_DELAY).await;
            }
            Err(e) => {
                return Err(Error::StdError(StdError::kube(
                    format!("could not get {CREDENTIALS_SECRET_NAME} secret"),
                    e,
                )))
            }
        }
    }
    let message = format!("could not create {CREDENTIALS_SECRET_NAME} secret after 3 retires");
    Err(match last_error {
        Some(e) => Error::StdError(StdError::kube(message, e)),
        None => Error::StdError(StdError::MetadataMissing(message)),
    })
}

/// Credentials first, then the htpasswd secret derived from whatever credentials are stored.
pub async fn reconcile_credentials_secrets(ctx: &ReporterContext) -> Result<()> {
    let username = ctx.config.reporter_user().await?;
    ctx.reconcile(
        ReconcileRequest::new(credentials_secret(ctx, &username), |found: &Secret, _: &Secret| {
            Ok(check_credentials(ctx, found))
        })
        .patch(|_, _| Ok(ctx.spec_patch()))
        .override_with_expected(),
    )
    .await?;

    let stored = wait_for_credentials(&ctx.api()).await?;
    let username = String::from_utf8_lossy(data(&stored, "username").unwrap_or_default()).into_owned();
    let password = String::from_utf8_lossy(data(&stored, "password").unwrap_or_default()).into_owned();
    let expected = htpasswd_secret(ctx, &username, &password)?;
    ctx.reconcile(
        ReconcileRequest::new(expected, |found: &Secret, expected: &Secret| {
            Ok(check_htpasswd(ctx, found, expected, &username, &password))
        })
        .patch(|_, _| Ok(ctx.spec_patch()))
        .override_with_expected()
        .post_action(|should_run| ctx.restart_operand_pod(should_run).boxed()),
    )
    .await
}

/// oauth2-proxy cookie secret: 32 random bytes, URL safe base64 without padding.
pub fn cookie_secret(ctx: &ReporterContext) -> Secret {
    Secret {
        data: Some(BTreeMap::from([(
            "data".to_string(),
            ByteString(general_purpose::URL_SAFE_NO_PAD.encode(rand_bytes(32)).into_bytes()),
        )])),
        ..opaque_secret(ctx, COOKIE_SECRET_NAME, SECRET_TYPE_OPAQUE)
    }
}

fn check_cookie(ctx: &ReporterContext, found: &Secret, expected: &Secret) -> ResourceUpdateStatus {
    if found.type_ != expected.type_ {
        return ResourceUpdateStatus::MERGE;
    }
    if data(found, "data").map_or(true, <[u8]>::is_empty) {
        return ResourceUpdateStatus::MERGE;
    }
    spec_metadata_status(ctx, found)
}

pub async fn reconcile_cookie_secret(ctx: &ReporterContext) -> Result<()> {
    ctx.reconcile(
        ReconcileRequest::new(cookie_secret(ctx), |found: &Secret, expected: &Secret| {
            Ok(check_cookie(ctx, found, expected))
        })
        .patch(|_, _| Ok(ctx.spec_patch()))
        .override_with_expected(),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::v1alpha1::IBMLicenseServiceReporterSpec;
    use crate::engine::{CACHING_LABEL_KEY, CACHING_LABEL_VALUE};
    use crate::tests::{mock_client, reporter_context, reporter_instance, Exchange};
    use http::Method;
    use serde_json::json;

    const SECRETS: &str = "/api/v1/namespaces/lsr/secrets";

    fn spec_with_label() -> IBMLicenseServiceReporterSpec {
        IBMLicenseServiceReporterSpec {
            labels: BTreeMap::from([("team".to_string(), "finops".to_string())]),
            ..Default::default()
        }
    }

    fn bytes(pairs: &[(&str, &str)]) -> BTreeMap<String, ByteString> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
            .collect()
    }

    #[tokio::test]
    async fn api_token_is_created_under_default_name() {
        let (client, server) = mock_client();
        let server = server.run(vec![
            Exchange::not_found(Method::GET, &format!("{SECRETS}/{DEFAULT_API_TOKEN_SECRET_NAME}")),
            Exchange::new(Method::POST, SECRETS, 201, json!({"metadata": {"name": DEFAULT_API_TOKEN_SECRET_NAME}})),
        ]);
        let ctx = reporter_context(client, reporter_instance(Default::default()));
        reconcile_api_token(&ctx).await.unwrap();
        let bodies = server.await.unwrap();
        let token = bodies[1]["stringData"][API_TOKEN_KEY].as_str().unwrap();
        assert_eq!(token.len(), 24);
        assert_eq!(bodies[1]["type"], "Opaque");
        assert_eq!(bodies[1]["metadata"]["labels"][CACHING_LABEL_KEY], CACHING_LABEL_VALUE);
    }

    #[tokio::test]
    async fn existing_token_only_gets_spec_labels_patched() {
        let (client, server) = mock_client();
        let found = json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": {
                "name": "custom-token",
                "namespace": "lsr",
                "resourceVersion": "12",
                "labels": {CACHING_LABEL_KEY: CACHING_LABEL_VALUE}
            },
            "type": "Opaque",
            "data": {"token": "dXNlci1jaG9zZW4="}
        });
        let server = server.run(vec![
            Exchange::new(Method::GET, &format!("{SECRETS}/custom-token"), 200, found.clone()),
            Exchange::new(Method::PATCH, &format!("{SECRETS}/custom-token"), 200, found),
        ]);
        let spec = IBMLicenseServiceReporterSpec {
            api_secret_token: "custom-token".to_string(),
            ..spec_with_label()
        };
        let ctx = reporter_context(client, reporter_instance(spec));
        reconcile_api_token(&ctx).await.unwrap();
        let bodies = server.await.unwrap();
        assert_eq!(
            bodies[1],
            json!({"metadata": {"labels": {"team": "finops"}, "annotations": {}, "resourceVersion": "12"}})
        );
    }

    #[tokio::test]
    async fn database_secret_keeps_changed_values() {
        let (client, _server) = mock_client();
        let ctx = reporter_context(client, reporter_instance(Default::default()));
        let expected = database_secret(&ctx, "postgres");
        let mut found = expected.clone();
        found.string_data = None;
        found.data = Some(bytes(&[
            (POSTGRES_PASSWORD_KEY, "changed-by-admin"),
            (POSTGRES_USER_KEY, "postgres"),
            (POSTGRES_DB_KEY, "postgres"),
            (POSTGRES_PGDATA_KEY, "/var/lib/postgresql/pgdata"),
        ]));
        assert_eq!(check_database_secret(&ctx, &found, &expected), ResourceUpdateStatus::DESIRED);

        found.data.as_mut().unwrap().remove(POSTGRES_PGDATA_KEY);
        assert_eq!(check_database_secret(&ctx, &found, &expected), ResourceUpdateStatus::MERGE);
    }

    #[tokio::test]
    async fn database_secret_label_drift() {
        let (client, _server) = mock_client();
        let ctx = reporter_context(client, reporter_instance(spec_with_label()));
        let expected = database_secret(&ctx, "postgres");
        let mut found = expected.clone();
        found.string_data = None;
        found.data = Some(bytes(&[
            (POSTGRES_PASSWORD_KEY, "a"),
            (POSTGRES_USER_KEY, "b"),
            (POSTGRES_DB_KEY, "c"),
            (POSTGRES_PGDATA_KEY, "d"),
        ]));

        // only the spec label is missing
        found.metadata.labels.as_mut().unwrap().remove("team");
        assert_eq!(check_database_secret(&ctx, &found, &expected), ResourceUpdateStatus::PATCH);

        // an operator label is missing
        found.metadata.labels.as_mut().unwrap().remove("release");
        assert_eq!(check_database_secret(&ctx, &found, &expected), ResourceUpdateStatus::MERGE);
    }

    #[tokio::test]
    async fn htpasswd_matches_stored_credentials() {
        let (client, _server) = mock_client();
        let ctx = reporter_context(client, reporter_instance(Default::default()));
        let expected = htpasswd_secret(&ctx, "admin", "s3cret").unwrap();
        let line = String::from_utf8(expected.data.as_ref().unwrap()["data"].0.clone()).unwrap();
        assert!(line.starts_with("admin:$2a$10$"));
        assert!(line.ends_with('\n'));

        let found = expected.clone();
        assert_eq!(
            check_htpasswd(&ctx, &found, &expected, "admin", "s3cret"),
            ResourceUpdateStatus::DESIRED
        );
        assert_eq!(
            check_htpasswd(&ctx, &found, &expected, "admin", "rotated"),
            ResourceUpdateStatus::MERGE
        );
        assert_eq!(
            check_htpasswd(&ctx, &found, &expected, "other", "s3cret"),
            ResourceUpdateStatus::MERGE
        );

        let mut broken = expected.clone();
        broken.data = Some(bytes(&[("data", "no-separator")]));
        assert_eq!(
            check_htpasswd(&ctx, &broken, &expected, "admin", "s3cret"),
            ResourceUpdateStatus::MERGE
        );
    }

    #[tokio::test]
    async fn credentials_password_is_padded_url_safe_base64() {
        let (client, _server) = mock_client();
        let ctx = reporter_context(client, reporter_instance(Default::default()));
        let secret = credentials_secret(&ctx, "admin");
        let password = String::from_utf8(secret.data.as_ref().unwrap()["password"].0.clone()).unwrap();
        assert_eq!(password.len(), 24);
        assert!(password.ends_with("=="));
        assert!(!password.contains('+') && !password.contains('/'));
        assert_eq!(secret.type_.as_deref(), Some(SECRET_TYPE_BASIC_AUTH));
        assert_eq!(check_credentials(&ctx, &secret), ResourceUpdateStatus::DESIRED);

        let mut emptied = secret.clone();
        emptied.data = Some(bytes(&[("username", "admin"), ("password", "")]));
        assert_eq!(check_credentials(&ctx, &emptied), ResourceUpdateStatus::MERGE);
    }

    #[tokio::test]
    async fn cookie_is_unpadded() {
        let (client, _server) = mock_client();
        let ctx = reporter_context(client, reporter_instance(Default::default()));
        let secret = cookie_secret(&ctx);
        let cookie = String::from_utf8(secret.data.as_ref().unwrap()["data"].0.clone()).unwrap();
        assert_eq!(cookie.len(), 43);
        assert!(!cookie.contains('='));
        assert_eq!(check_cookie(&ctx, &secret, &secret), ResourceUpdateStatus::DESIRED);

        let mut empty = secret.clone();
        empty.data = Some(BTreeMap::new());
        assert_eq!(check_cookie(&ctx, &empty, &secret), ResourceUpdateStatus::MERGE);
    }

    #[tokio::test(start_paused = true)]
    async fn credentials_wait_gives_up_after_three_reads() {
        let (client, server) = mock_client();
        let path = format!("{SECRETS}/{CREDENTIALS_SECRET_NAME}");
        let server = server.run(vec![
            Exchange::not_found(Method::GET, &path),
            Exchange::not_found(Method::GET, &path),
            Exchange::not_found(Method::GET, &path),
        ]);
        let api: Api<Secret> = Api::namespaced(client, "lsr");
        let err = wait_for_credentials(&api).await.unwrap_err();
        assert!(err
            .to_string()
            .contains("could not create ibm-license-service-reporter-credentials secret after 3 retires"));
        server.await.unwrap();
    }
}
