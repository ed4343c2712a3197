//! Convergence of one managed object towards its desired state.
//!
//! Every pass fetches the live object, classifies it with a kind specific
//! predicate and then either creates it, leaves it alone, merge-patches its
//! metadata or replaces it entirely (deleting and recreating it when the
//! replace is refused).

use crate::util::errors::{is_already_exists, is_not_found, Error, Result, StdError};
use futures::future::BoxFuture;
use futures::FutureExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::{Api, DeleteParams, Patch, PatchParams, PostParams},
    client::Client,
    Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt::Debug;
use tracing::{debug, error, info};

pub const CACHING_LABEL_KEY: &str = "app.kubernetes.io/instance";
pub const CACHING_LABEL_VALUE: &str = "ibm-license-service-reporter";

/// Objects the engine can reconcile.
pub trait Managed:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> Managed for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Outcome of comparing a found object with the expected one.
///
/// `is_patch_sufficient` only matters when `is_in_desired_state` is false.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResourceUpdateStatus {
    pub is_in_desired_state: bool,
    pub is_patch_sufficient: bool,
}

impl ResourceUpdateStatus {
    pub const DESIRED: ResourceUpdateStatus = ResourceUpdateStatus {
        is_in_desired_state: true,
        is_patch_sufficient: false,
    };
    pub const PATCH: ResourceUpdateStatus = ResourceUpdateStatus {
        is_in_desired_state: false,
        is_patch_sufficient: true,
    };
    pub const MERGE: ResourceUpdateStatus = ResourceUpdateStatus {
        is_in_desired_state: false,
        is_patch_sufficient: false,
    };
}

/// Result of a merge function.
pub struct Merged<K> {
    pub object: K,
    /// A failing update is expected; it is logged at debug before falling back to recreate.
    pub ignore_update_error: bool,
}

pub type OverrideFn<'a, K> = Box<dyn FnOnce(K) -> Result<K> + Send + 'a>;
pub type CheckFn<'a, K> = Box<dyn FnOnce(&K, &K) -> Result<ResourceUpdateStatus> + Send + 'a>;
pub type PatchFn<'a, K> = Box<dyn FnOnce(&K, &K) -> Result<Value> + Send + 'a>;
pub type MergeFn<'a, K> = Box<dyn FnOnce(K, K) -> BoxFuture<'a, Result<Merged<K>>> + Send + 'a>;
pub type PostActionFn<'a> = Box<dyn FnOnce(bool) -> BoxFuture<'a, Result<()>> + Send + 'a>;

/// Everything the engine needs to converge one object.
pub struct ReconcileRequest<'a, K> {
    pub expected: K,
    pub should_create: bool,
    pub override_on_create: Option<OverrideFn<'a, K>>,
    pub check: CheckFn<'a, K>,
    pub patch: Option<PatchFn<'a, K>>,
    pub merge: Option<MergeFn<'a, K>>,
    pub post_action: Option<PostActionFn<'a>>,
}

impl<'a, K: Managed> ReconcileRequest<'a, K> {
    /// A request that creates the object when missing and otherwise only runs `check`.
    pub fn new(
        expected: K,
        check: impl FnOnce(&K, &K) -> Result<ResourceUpdateStatus> + Send + 'a,
    ) -> Self {
        ReconcileRequest {
            expected,
            should_create: true,
            override_on_create: None,
            check: Box::new(check),
            patch: None,
            merge: None,
            post_action: None,
        }
    }

    pub fn should_create(mut self, should_create: bool) -> Self {
        self.should_create = should_create;
        self
    }

    pub fn override_on_create(mut self, f: impl FnOnce(K) -> Result<K> + Send + 'a) -> Self {
        self.override_on_create = Some(Box::new(f));
        self
    }

    pub fn patch(mut self, f: impl FnOnce(&K, &K) -> Result<Value> + Send + 'a) -> Self {
        self.patch = Some(Box::new(f));
        self
    }

    pub fn merge(
        mut self,
        f: impl FnOnce(K, K) -> BoxFuture<'a, Result<Merged<K>>> + Send + 'a,
    ) -> Self {
        self.merge = Some(Box::new(f));
        self
    }

    /// Merge by replacing the found object with the expected one.
    pub fn override_with_expected(self) -> Self {
        self.merge(|_found, expected| async move { Ok(override_with_expected(expected)) }.boxed())
    }

    pub fn post_action(mut self, f: impl FnOnce(bool) -> BoxFuture<'a, Result<()>> + Send + 'a) -> Self {
        self.post_action = Some(Box::new(f));
        self
    }
}

/// Found objects are always considered up to date.
pub fn found_is_always_desired<K>(_found: &K, _expected: &K) -> Result<ResourceUpdateStatus> {
    Ok(ResourceUpdateStatus::DESIRED)
}

pub fn override_with_expected<K>(expected: K) -> Merged<K> {
    Merged {
        object: expected,
        ignore_update_error: true,
    }
}

/// Merge patch replacing metadata labels and annotations.
pub fn labels_and_annotations_patch(
    labels: &BTreeMap<String, String>,
    annotations: &BTreeMap<String, String>,
) -> Value {
    json!({
        "metadata": {
            "labels": labels,
            "annotations": annotations,
        }
    })
}

/// Adds `metadata.resourceVersion` to a merge patch so it fails on a concurrent change.
pub fn with_resource_version(mut patch: Value, resource_version: Option<String>) -> Value {
    let version = resource_version.map(Value::String).unwrap_or(Value::Null);
    match patch.as_object_mut() {
        Some(object) => match object.get_mut("metadata").and_then(Value::as_object_mut) {
            Some(metadata) => {
                metadata.insert("resourceVersion".to_string(), version);
            }
            None => {
                object.insert("metadata".to_string(), json!({ "resourceVersion": version }));
            }
        },
        None => patch = json!({ "metadata": { "resourceVersion": version } }),
    }
    patch
}

pub fn ensure_caching_label<K: Resource>(object: &mut K) {
    object
        .meta_mut()
        .labels
        .get_or_insert_with(BTreeMap::new)
        .insert(CACHING_LABEL_KEY.to_string(), CACHING_LABEL_VALUE.to_string());
}

pub fn has_caching_label<K: Resource>(object: &K) -> bool {
    object
        .meta()
        .labels
        .as_ref()
        .and_then(|labels| labels.get(CACHING_LABEL_KEY))
        .is_some_and(|value| value == CACHING_LABEL_VALUE)
}

/// Makes `owner` the controller of `object`. Fails when another controller already owns it.
pub fn set_controller_reference<K: Resource>(object: &mut K, owner: &OwnerReference) -> Result<()> {
    let refs = object.meta_mut().owner_references.get_or_insert_with(Vec::new);
    if let Some(other) = refs
        .iter()
        .find(|r| r.controller == Some(true) && r.uid != owner.uid)
    {
        return Err(Error::StdError(StdError::InvalidArgument(format!(
            "object is already owned by another {} controller {}",
            other.kind, other.name
        ))));
    }
    refs.retain(|r| r.uid != owner.uid);
    refs.push(owner.clone());
    Ok(())
}

/// Deletes `name`; a missing object counts as deleted.
pub async fn delete_if_exists<K: Managed>(api: &Api<K>, name: &str) -> Result<()> {
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => {
            info!(kind = %K::kind(&()), name, "Deleted resource successfully");
            Ok(())
        }
        Err(e) if is_not_found(&e) => Ok(()),
        Err(e) => Err(Error::StdError(StdError::kube("failed to delete resource", e))),
    }
}

/// Converges managed objects owned by one custom resource instance.
#[derive(Clone)]
pub struct ResourceReconciler {
    client: Client,
    owner: OwnerReference,
}

impl ResourceReconciler {
    pub fn new(client: Client, owner: OwnerReference) -> Self {
        ResourceReconciler { client, owner }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub async fn reconcile<K: Managed>(&self, request: ReconcileRequest<'_, K>) -> Result<()> {
        let ReconcileRequest {
            mut expected,
            should_create,
            override_on_create,
            check,
            patch,
            merge,
            post_action,
        } = request;

        ensure_caching_label(&mut expected);
        let name = expected.name_any();
        let namespace = expected.namespace().ok_or_else(|| {
            Error::StdError(StdError::MetadataMissing(format!(
                "{} {name} has no namespace",
                K::kind(&())
            )))
        })?;
        let kind = K::kind(&()).to_string();
        let api: Api<K> = Api::namespaced(self.client.clone(), &namespace);
        info!(%kind, %name, %namespace, "Reconciling resource");

        let found = match api.get(&name).await {
            Ok(found) => found,
            Err(e) if is_not_found(&e) => {
                if !should_create {
                    info!(%kind, %name, "Resource does not exist, creation not managed by the operator");
                    return Ok(());
                }
                info!(%kind, %name, "Resource does not exist, trying creating new one");
                if let Some(override_fn) = override_on_create {
                    expected = override_fn(expected)?;
                    if expected.name_any() != name || expected.namespace().as_deref() != Some(namespace.as_str()) {
                        error!(%kind, %name, "Override should only provide inner content changes");
                        return Err(Error::invalid_argument(
                            "overrideExpected cannot change the name or namespace of expected",
                        ));
                    }
                }
                return self.create(&api, expected).await.map_err(|e| match e {
                    Error::StdError(StdError::KubeContext { source, .. }) if is_already_exists(&source) => {
                        Error::StdError(StdError::StaleCache(source))
                    }
                    e => e,
                });
            }
            Err(e) => return Err(Error::StdError(StdError::kube("failed to get resource", e))),
        };

        let mut status = check(&found, &expected)?;
        let should_run_post_action = !status.is_in_desired_state;
        if status.is_in_desired_state && !has_caching_label(&found) {
            status = ResourceUpdateStatus::MERGE;
        }
        if status.is_in_desired_state {
            debug!(%kind, %name, "Resource is in desired state");
            return Ok(());
        }

        if status.is_patch_sufficient {
            if let Some(patch_fn) = patch {
                let patch = with_resource_version(patch_fn(&found, &expected)?, found.resource_version());
                info!(%kind, %name, "Patching resource");
                api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
                    .await
                    .map_err(|e| Error::StdError(StdError::kube("failed to patch resource", e)))?;
                return Ok(());
            }
        }

        if let Some(merge_fn) = merge {
            let Merged {
                mut object,
                ignore_update_error,
            } = merge_fn(found, expected).await?;
            ensure_caching_label(&mut object);
            self.update_or_recreate(&api, object, ignore_update_error).await?;
            if let Some(post_action) = post_action {
                post_action(should_run_post_action).await?;
            }
        }
        Ok(())
    }

    async fn create<K: Managed>(&self, api: &Api<K>, mut object: K) -> Result<()> {
        set_controller_reference(&mut object, &self.owner)?;
        api.create(&PostParams::default(), &object)
            .await
            .map_err(|e| Error::StdError(StdError::kube("failed to create new resource", e)))?;
        info!(kind = %K::kind(&()), name = %object.name_any(), "Created resource successfully");
        Ok(())
    }

    async fn update_or_recreate<K: Managed>(&self, api: &Api<K>, mut object: K, ignore_update_error: bool) -> Result<()> {
        // the htpasswd secret used to lose its owner reference on replace
        if object.owner_references().is_empty() {
            set_controller_reference(&mut object, &self.owner)?;
        }
        let name = object.name_any();
        if let Err(e) = api.replace(&name, &PostParams::default(), &object).await {
            if ignore_update_error {
                debug!(kind = %K::kind(&()), %name, error = %e, "Update refused, recreating resource");
            } else {
                error!(kind = %K::kind(&()), %name, error = %e, "Error while performing client update");
            }
            delete_if_exists(api, &name).await?;
            object.meta_mut().resource_version = None;
            object.meta_mut().uid = None;
            self.create(api, object).await?;
        }
        info!(kind = %K::kind(&()), %name, "Updated resource");
        Ok(())
    }
}
