//! Operand resources of an `IBMLicenseServiceScanner`.

pub mod config_maps;
pub mod context;
pub mod core;
pub mod cron_job;
pub mod defaults;
pub mod names;
pub mod operand_request;
pub mod secrets;

use crate::scanner::config_maps::{CacheConfigMap, VaultScriptConfigMap};
use crate::scanner::context::ScannerContext;
use crate::scanner::core::ScannerResource;
use crate::scanner::cron_job::ScannerCronJob;
use crate::scanner::operand_request::LicenseServiceOperandRequest;
use crate::scanner::secrets::{LicenseServiceUploadSecret, RegistryPullSecret, VaultServiceAccountTokenSecret};
use crate::util::errors::Result;
use std::collections::BTreeSet;
use tracing::{error, info};

/// Initializes, checks and reconciles one resource.
async fn converge(resource: &mut dyn ScannerResource, ctx: &ScannerContext) -> Result<()> {
    let described = resource.describe();
    if let Err(e) = resource.init(ctx).await {
        error!(resource = %described, error = %e, "failed to initialize resource");
        return Err(e);
    }
    if let Err(e) = resource.check_init() {
        error!(resource = %described, error = %e, "resource initialized incorrectly");
        return Err(e);
    }
    if let Err(e) = resource.reconcile(ctx).await {
        error!(resource = %described, error = %e, "failed to reconcile resource");
        return Err(e);
    }
    Ok(())
}

/// Service accounts used by Vault authenticated registries, one token secret each.
fn vault_service_accounts(ctx: &ScannerContext) -> BTreeSet<String> {
    ctx.spec()
        .registries
        .iter()
        .filter(|r| r.uses_vault() && !r.vault.is_empty())
        .map(|r| r.vault.service_account.clone())
        .collect()
}

/// Converges every operand resource. With `auto_connect` the License Service
/// operand request comes first and feeds the upload secret.
pub async fn reconcile_resources(ctx: &ScannerContext, auto_connect: bool) -> Result<()> {
    let mut operand_phase = None;
    if auto_connect {
        info!("Auto-connection with License Service enabled, the operand request will be reconciled");
        let mut request = LicenseServiceOperandRequest::default();
        converge(&mut request, ctx).await?;
        operand_phase = request.phase();
    } else {
        info!("Auto-connection with License Service disabled - to enable it, please install ODLM and restart the operator");
    }

    let spec = ctx.spec();
    let mut resources: Vec<Box<dyn ScannerResource>> = vec![
        Box::new(LicenseServiceUploadSecret::new(
            &spec.license_service_upload_secret,
            operand_phase,
        )),
        Box::new(RegistryPullSecret::new(&spec.registry_pull_secret)),
        Box::new(CacheConfigMap::default()),
        Box::new(VaultScriptConfigMap::default()),
        Box::new(ScannerCronJob::default()),
    ];
    resources.extend(
        vault_service_accounts(ctx)
            .iter()
            .map(|sa| Box::new(VaultServiceAccountTokenSecret::new(sa)) as Box<dyn ScannerResource>),
    );

    for resource in resources.iter_mut() {
        converge(resource.as_mut(), ctx).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::v1::{IBMLicenseServiceScannerSpec, RegistryDetails, VaultDetails};
    use crate::tests::{mock_client, scanner_context, scanner_instance};

    #[tokio::test]
    async fn token_secrets_are_deduplicated_per_service_account() {
        let registry = |name: &str, sa: &str| RegistryDetails {
            name: name.to_string(),
            auth_method: "VAULT".to_string(),
            vault: VaultDetails {
                service_account: sa.to_string(),
                cert: "ca".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        let spec = IBMLicenseServiceScannerSpec {
            registries: vec![registry("a", "sa-1"), registry("b", "sa-1"), registry("c", "sa-2")],
            ..Default::default()
        };
        let (client, _server) = mock_client();
        let ctx = scanner_context(client, scanner_instance(spec));
        let accounts: Vec<String> = vault_service_accounts(&ctx).into_iter().collect();
        assert_eq!(accounts, ["sa-1", "sa-2"]);
    }
}
