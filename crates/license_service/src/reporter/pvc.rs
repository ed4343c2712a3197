//! Persistent volume of the reporter database.

use crate::engine::{delete_if_exists, Merged, ReconcileRequest, ResourceUpdateStatus};
use crate::reporter::context::ReporterContext;
use crate::reporter::names::default_resource_name;
use crate::util::collections::unordered_eq;
use crate::util::errors::{Error, Result, StdError};
use crate::util::quantity;
use futures::FutureExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, PersistentVolumeClaimSpec, VolumeResourceRequirements};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::{api::ListParams, Api, ResourceExt};
use std::collections::BTreeMap;
use tracing::{error, info};

pub const PVC_NAME: &str = "license-service-reporter-pvc";
pub const DEFAULT_CAPACITY: &str = "1Gi";
const DEFAULT_CLASS_ANNOTATION: &str = "storageclass.kubernetes.io/is-default-class";
const NO_PROVISIONER: &str = "kubernetes.io/no-provisioner";

/// Name of the default storage class backed by a dynamic provisioner.
pub async fn default_storage_class(api: &Api<StorageClass>) -> Result<String> {
    let classes = api
        .list(&ListParams::default())
        .await
        .map_err(|e| Error::StdError(StdError::kube("could not list storage classes", e)))?;
    if classes.items.is_empty() {
        return Err(Error::StdError(StdError::ConfigError(
            "could not find storage class in the cluster".to_string(),
        )));
    }
    let name = classes
        .items
        .iter()
        .filter(|sc| sc.provisioner != NO_PROVISIONER)
        .find(|sc| sc.annotations().get(DEFAULT_CLASS_ANNOTATION).map(String::as_str) == Some("true"))
        .map(|sc| sc.name_any())
        .ok_or_else(|| {
            Error::StdError(StdError::ConfigError(
                "could not find dynamic provisioner default storage class in the cluster".to_string(),
            ))
        })?;
    info!(storage_class = %name, "StorageClass configuration");
    Ok(name)
}

pub async fn persistent_volume_claim(ctx: &ReporterContext) -> Result<PersistentVolumeClaim> {
    let capacity = match &ctx.spec().capacity {
        Some(capacity) if !quantity::is_zero(Some(capacity)) => capacity.clone(),
        _ => Quantity(DEFAULT_CAPACITY.to_string()),
    };
    let storage_class = if ctx.spec().storage_class.is_empty() {
        default_storage_class(&Api::all(ctx.client()))
            .await
            .inspect_err(|e| error!(error = %e, "Failed to get StorageClass for IBM License Service Reporter"))?
    } else {
        ctx.spec().storage_class.clone()
    };
    Ok(PersistentVolumeClaim {
        metadata: ctx.object_meta(PVC_NAME),
        spec: Some(PersistentVolumeClaimSpec {
            storage_class_name: Some(storage_class),
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([("storage".to_string(), capacity)])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn requests(pvc: &PersistentVolumeClaim) -> BTreeMap<String, Quantity> {
    pvc.spec
        .as_ref()
        .and_then(|s| s.resources.as_ref())
        .and_then(|r| r.requests.clone())
        .unwrap_or_default()
}

/// Difference between a found claim and the expected one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimDrift {
    None,
    /// Only the requested storage differs, the rest of the spec can stay
    Requests,
    Spec,
}

pub fn claim_drift(found: &PersistentVolumeClaim, expected: &PersistentVolumeClaim) -> ClaimDrift {
    let found_spec = found.spec.clone().unwrap_or_default();
    let expected_spec = expected.spec.clone().unwrap_or_default();
    if found_spec.storage_class_name.is_none() || found_spec.storage_class_name != expected_spec.storage_class_name {
        return ClaimDrift::Spec;
    }
    if !unordered_eq(
        &expected_spec.access_modes.unwrap_or_default(),
        &found_spec.access_modes.unwrap_or_default(),
    ) {
        return ClaimDrift::Spec;
    }
    let found_requests = requests(found);
    let requests_match = requests(expected)
        .iter()
        .all(|(name, q)| found_requests.get(name).is_some_and(|f| quantity::equal(q, f)));
    if requests_match {
        ClaimDrift::None
    } else {
        ClaimDrift::Requests
    }
}

/// Changing the claim deletes the deployment first so the volume is released.
pub async fn reconcile_persistent_volume_claim(ctx: &ReporterContext) -> Result<()> {
    let expected = persistent_volume_claim(ctx).await?;
    ctx.reconcile(
        ReconcileRequest::new(expected, |found: &PersistentVolumeClaim, expected| {
            Ok(if claim_drift(found, expected) != ClaimDrift::None {
                ResourceUpdateStatus::MERGE
            } else if ctx.spec_metadata_outdated(found) {
                ResourceUpdateStatus::PATCH
            } else {
                ResourceUpdateStatus::DESIRED
            })
        })
        .patch(|_, _| Ok(ctx.spec_patch()))
        .merge(|mut found, expected| {
            async move {
                let drift = claim_drift(&found, &expected);
                let found_spec = found.spec.get_or_insert_with(Default::default);
                // a bound claim only accepts request changes, keep server owned fields
                if drift != ClaimDrift::Spec {
                    found_spec
                        .resources
                        .get_or_insert_with(Default::default)
                        .requests = Some(requests(&expected));
                } else {
                    *found_spec = expected.spec.clone().unwrap_or_default();
                }
                found.metadata.labels = expected.metadata.labels.clone();
                found.metadata.annotations = expected.metadata.annotations.clone();

                let deployment = default_resource_name(&ctx.instance_name());
                delete_if_exists(&ctx.api::<Deployment>(), &deployment).await?;
                Ok(Merged {
                    object: found,
                    ignore_update_error: false,
                })
            }
            .boxed()
        }),
    )
    .await
}
