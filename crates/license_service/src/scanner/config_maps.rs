use crate::scanner::context::ScannerContext;
use crate::scanner::core::{Reconcilable, ScannerResource};
use crate::scanner::names::{CACHE_CONFIG_MAP_NAME, SCRIPT_CONFIG_MAP_NAME};
use crate::util::errors::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::Api;
use std::collections::BTreeMap;
use tracing::info;

pub const SCRIPT_KEY: &str = "script.sh";

/// Existing data wins so the operand's cache and edited scripts survive updates.
fn persist_data(resource: &mut Reconcilable<ConfigMap>) {
    let Some(data) = resource.actual.as_ref().and_then(|cm| cm.data.clone()) else {
        return;
    };
    if let Some(expected) = resource.expected.as_mut() {
        expected.data = Some(data);
    }
}

async fn reconcile_persisting_data(resource: &mut Reconcilable<ConfigMap>, ctx: &ScannerContext) -> Result<()> {
    info!(name = %resource.name, "Reconciling config map");
    let api: Api<ConfigMap> = ctx.api();
    let action = resource.plan(&api).await?;
    persist_data(resource);
    let patch = resource.merge_patch()?;
    resource.apply(&api, action, patch).await
}

/// Results of previously scanned images, written by the operand.
pub struct CacheConfigMap {
    pub resource: Reconcilable<ConfigMap>,
}

impl Default for CacheConfigMap {
    fn default() -> Self {
        CacheConfigMap {
            resource: Reconcilable::new(CACHE_CONFIG_MAP_NAME),
        }
    }
}

impl ScannerResource for CacheConfigMap {
    fn describe(&self) -> String {
        format!("ConfigMap/{}", self.resource.name)
    }

    fn init<'a>(&'a mut self, ctx: &'a ScannerContext) -> BoxFuture<'a, Result<()>> {
        async move {
            self.resource.expected = Some(ConfigMap {
                metadata: ctx.object_meta(&self.resource.name),
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
        reconcile_persisting_data(&mut self.resource, ctx).boxed()
    }
}

/// The Vault connector script run by the operand init container.
pub struct VaultScriptConfigMap {
    pub resource: Reconcilable<ConfigMap>,
}

impl Default for VaultScriptConfigMap {
    fn default() -> Self {
        VaultScriptConfigMap {
            resource: Reconcilable::new(SCRIPT_CONFIG_MAP_NAME),
        }
    }
}

impl ScannerResource for VaultScriptConfigMap {
    fn describe(&self) -> String {
        format!("ConfigMap/{}", self.resource.name)
    }

    fn init<'a>(&'a mut self, ctx: &'a ScannerContext) -> BoxFuture<'a, Result<()>> {
        async move {
            let script = ctx.config.vault_script().await?;
            self.resource.expected = Some(ConfigMap {
                metadata: ctx.object_meta(&self.resource.name),
                data: Some(BTreeMap::from([(SCRIPT_KEY.to_string(), script)])),
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
        reconcile_persisting_data(&mut self.resource, ctx).boxed()
    }
}
