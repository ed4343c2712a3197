//! Secrets the scanner operand mounts.

use crate::api::odlm::OPERAND_PHASE_RUNNING;
use crate::scanner::context::ScannerContext;
use crate::scanner::core::{Action, Reconcilable, ScannerResource};
use crate::scanner::operand_request::{UPLOAD_CONFIG_MAP_NAME, UPLOAD_TOKEN_SECRET_NAME};
use crate::util::errors::{Error, Result, StdError};
use futures::future::BoxFuture;
use futures::FutureExt;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::ByteString;
use kube::api::Api;
use std::collections::BTreeMap;
use tracing::info;

pub const DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";
pub const DOCKER_CONFIG_JSON_TYPE: &str = "kubernetes.io/dockerconfigjson";
pub const SERVICE_ACCOUNT_TOKEN_TYPE: &str = "kubernetes.io/service-account-token";
pub const SERVICE_ACCOUNT_NAME_KEY: &str = "kubernetes.io/service-account.name";

const URL_KEY: &str = "url";
const TOKEN_KEY: &str = "token";
const CERT_KEY: &str = "crt.pem";
const UPLOAD_TOKEN_KEY: &str = "token-upload";

fn string_data(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

/// Copies the live secret data into the expected string data so an update
/// never resets values the user or the operator already configured.
fn persist_data(resource: &mut Reconcilable<Secret>) {
    let Some(data) = resource.actual.as_ref().and_then(|s| s.data.clone()) else {
        return;
    };
    if let Some(expected) = resource.expected.as_mut() {
        let string_data = expected.string_data.get_or_insert_with(BTreeMap::new);
        for (key, ByteString(value)) in data {
            string_data.insert(key, String::from_utf8_lossy(&value).into_owned());
        }
    }
}

fn data_value(data: Option<&BTreeMap<String, ByteString>>, key: &str) -> String {
    data.and_then(|d| d.get(key))
        .map(|ByteString(v)| String::from_utf8_lossy(v).into_owned())
        .unwrap_or_default()
}

/// URL, token and certificate the operand uploads its findings with.
pub struct LicenseServiceUploadSecret {
    pub resource: Reconcilable<Secret>,
    /// Operand phase of the License Service operand request, when one is managed
    pub operand_phase: Option<String>,
}

impl LicenseServiceUploadSecret {
    pub fn new(name: &str, operand_phase: Option<String>) -> Self {
        LicenseServiceUploadSecret {
            resource: Reconcilable::new(name),
            operand_phase,
        }
    }
}

async fn upload_token(ctx: &ScannerContext) -> Result<String> {
    let secrets: Api<Secret> = ctx.api();
    let secret = secrets.get(UPLOAD_TOKEN_SECRET_NAME).await.map_err(|e| {
        Error::StdError(StdError::kube(format!("failed reading {UPLOAD_TOKEN_SECRET_NAME}"), e))
    })?;
    match secret.data.as_ref().and_then(|d| d.get(UPLOAD_TOKEN_KEY)) {
        Some(ByteString(token)) => Ok(String::from_utf8_lossy(token).into_owned()),
        None => Err(Error::StdError(StdError::MetadataMissing(format!(
            "token data missing from {UPLOAD_TOKEN_SECRET_NAME}"
        )))),
    }
}

async fn upload_url_and_cert(ctx: &ScannerContext) -> Result<(String, String)> {
    let config_maps: Api<ConfigMap> = ctx.api();
    let config = config_maps.get(UPLOAD_CONFIG_MAP_NAME).await.map_err(|e| {
        Error::StdError(StdError::kube(format!("failed reading {UPLOAD_CONFIG_MAP_NAME}"), e))
    })?;
    let data = config.data.unwrap_or_default();
    match (data.get(URL_KEY), data.get(CERT_KEY)) {
        (Some(url), Some(cert)) => Ok((url.clone(), cert.clone())),
        _ => Err(Error::StdError(StdError::MetadataMissing(format!(
            "url and/or certificate data missing from {UPLOAD_CONFIG_MAP_NAME}"
        )))),
    }
}

impl ScannerResource for LicenseServiceUploadSecret {
    fn describe(&self) -> String {
        format!("Secret/{}", self.resource.name)
    }

    fn init<'a>(&'a mut self, ctx: &'a ScannerContext) -> BoxFuture<'a, Result<()>> {
        async move {
            self.resource.expected = Some(Secret {
                metadata: ctx.object_meta(&self.resource.name),
                string_data: Some(string_data(&[(URL_KEY, ""), (TOKEN_KEY, ""), (CERT_KEY, "")])),
                ..Default::default()
            });
            Ok(())
        }
        .boxed()
    }

    fn check_init(&self) -> Result<()> {
        self.resource.check_init()
    }

    /// Once the operand request runs, the connection data is kept in sync
    /// with what License Service publishes.
    fn reconcile<'a>(&'a mut self, ctx: &'a ScannerContext) -> BoxFuture<'a, Result<()>> {
        async move {
            info!(name = %self.resource.name, "Reconciling secret");
            let api: Api<Secret> = ctx.api();
            let mut action = self.resource.plan(&api).await?;
            persist_data(&mut self.resource);

            if action == Action::Keep && self.operand_phase.as_deref() == Some(OPERAND_PHASE_RUNNING) {
                let token = upload_token(ctx).await?;
                let (url, cert) = upload_url_and_cert(ctx).await?;
                let current = self.resource.actual.as_ref().and_then(|s| s.data.as_ref());
                let outdated = data_value(current, TOKEN_KEY) != token
                    || data_value(current, URL_KEY) != url
                    || data_value(current, CERT_KEY) != cert;
                if outdated {
                    info!(name = %self.resource.name, "License Service connection data changed");
                    self.resource.expected_mut()?.string_data =
                        Some(string_data(&[(URL_KEY, &url), (TOKEN_KEY, &token), (CERT_KEY, &cert)]));
                    action = Action::Update;
                }
            }
            let patch = self.resource.merge_patch()?;
            self.resource.apply(&api, action, patch).await
        }
        .boxed()
    }
}

/// Docker config the operand pulls the scanned images with; filled in by the user.
pub struct RegistryPullSecret {
    pub resource: Reconcilable<Secret>,
}

impl RegistryPullSecret {
    pub fn new(name: &str) -> Self {
        RegistryPullSecret {
            resource: Reconcilable::new(name),
        }
    }
}

impl ScannerResource for RegistryPullSecret {
    fn describe(&self) -> String {
        format!("Secret/{}", self.resource.name)
    }

    fn init<'a>(&'a mut self, ctx: &'a ScannerContext) -> BoxFuture<'a, Result<()>> {
        async move {
            self.resource.expected = Some(Secret {
                metadata: ctx.object_meta(&self.resource.name),
                string_data: Some(string_data(&[(DOCKER_CONFIG_JSON_KEY, "{}")])),
                type_: Some(DOCKER_CONFIG_JSON_TYPE.to_string()),
                ..Default::default()
            });
            Ok(())
        }
        .boxed()
    }

    fn check_init(&self) -> Result<()> {
        self.resource.check_init()
    }

    fn reconcile<'a>(&'a mut self, ctx: &'a ScannerContext) -> BoxFuture<'a, Result<()>> {
        async move {
            info!(name = %self.resource.name, "Reconciling secret");
            let api: Api<Secret> = ctx.api();
            let action = self.resource.plan(&api).await?;
            persist_data(&mut self.resource);
            let patch = self.resource.merge_patch()?;
            self.resource.apply(&api, action, patch).await
        }
        .boxed()
    }
}

/// Token of a service account allowed to log in to Vault; the token controller fills it in.
pub struct VaultServiceAccountTokenSecret {
    pub resource: Reconcilable<Secret>,
}

impl VaultServiceAccountTokenSecret {
    /// The secret is named after its service account.
    pub fn new(service_account: &str) -> Self {
        VaultServiceAccountTokenSecret {
            resource: Reconcilable::new(service_account),
        }
    }
}

impl ScannerResource for VaultServiceAccountTokenSecret {
    fn describe(&self) -> String {
        format!("Secret/{}", self.resource.name)
    }

    fn init<'a>(&'a mut self, ctx: &'a ScannerContext) -> BoxFuture<'a, Result<()>> {
        async move {
            let mut metadata = ctx.object_meta(&self.resource.name);
            metadata
                .annotations
                .get_or_insert_with(BTreeMap::new)
                .insert(SERVICE_ACCOUNT_NAME_KEY.to_string(), self.resource.name.clone());
            self.resource.expected = Some(Secret {
                metadata,
                type_: Some(SERVICE_ACCOUNT_TOKEN_TYPE.to_string()),
                ..Default::default()
            });
            Ok(())
        }
        .boxed()
    }

    fn check_init(&self) -> Result<()> {
        self.resource.check_init()
    }

    fn reconcile<'a>(&'a mut self, ctx: &'a ScannerContext) -> BoxFuture<'a, Result<()>> {
        async move {
            info!(name = %self.resource.name, "Reconciling secret");
            self.resource.reconcile(&ctx.api()).await
        }
        .boxed()
    }
}
