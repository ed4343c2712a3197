//! Mirrors the operand pod statuses into the custom resource.

use crate::api::v1alpha1::IBMLicenseServiceReporter;
use crate::reporter::context::ReporterContext;
use crate::reporter::names::pod_labels;
use crate::util::errors::{Error, Result, StdError};
use k8s_openapi::api::core::v1::{Pod, PodStatus};
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::{Resource, ResourceExt};
use serde_json::json;
use tracing::{info, warn};

pub const STATUS_FIELD_MANAGER: &str = "ibm-license-service-reporter-operator";

pub async fn operand_pod_statuses(ctx: &ReporterContext) -> Result<Vec<PodStatus>> {
    let selector = pod_labels(&ctx.instance)
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",");
    let pods: Api<Pod> = ctx.api();
    let pods = pods
        .list(&ListParams::default().labels(&selector))
        .await
        .map_err(|e| Error::StdError(StdError::kube("failed to list pods", e)))?;
    Ok(pods.items.into_iter().map(|pod| pod.status.unwrap_or_default()).collect())
}

/// A failed status write is logged, the next reconcile retries it.
pub async fn update_status(ctx: &ReporterContext) -> Result<()> {
    let statuses = operand_pod_statuses(ctx).await?;
    let current = ctx
        .instance
        .status
        .as_ref()
        .map(|s| s.license_service_reporter_pods.clone())
        .unwrap_or_default();
    if statuses == current {
        return Ok(());
    }
    info!(instance = %ctx.instance_name(), "Updating IBMLicenseServiceReporter status");
    let patch = Patch::Apply(json!({
        "apiVersion": IBMLicenseServiceReporter::api_version(&()),
        "kind": IBMLicenseServiceReporter::kind(&()),
        "status": {"LicenseServiceReporterPods": statuses}
    }));
    let reporters: Api<IBMLicenseServiceReporter> = ctx.api();
    if let Err(e) = reporters
        .patch_status(
            &ctx.instance.name_any(),
            &PatchParams::apply(STATUS_FIELD_MANAGER).force(),
            &patch,
        )
        .await
    {
        warn!(error = %e, "Failed to update pod status");
    }
    Ok(())
}
