//! What one reconcile pass of a scanner instance works with.

use crate::api::v1::{IBMLicenseServiceScanner, IBMLicenseServiceScannerSpec, ScannerContainer};
use crate::engine::Managed;
use crate::scanner::{defaults::apply_defaults, names};
use crate::util::config::OperatorConfig;
use crate::util::errors::{Error, Result, StdError};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{api::Api, client::Client, Resource, ResourceExt};
use std::sync::Arc;

pub struct ScannerContext {
    /// The custom resource with defaults applied
    pub instance: IBMLicenseServiceScanner,
    pub namespace: String,
    pub config: Arc<OperatorConfig>,
    client: Client,
    owner: OwnerReference,
}

impl ScannerContext {
    pub fn new(mut instance: IBMLicenseServiceScanner, client: Client, config: Arc<OperatorConfig>) -> Result<Self> {
        let namespace = instance.namespace().ok_or_else(|| {
            Error::StdError(StdError::MetadataMissing(format!(
                "IBMLicenseServiceScanner {} has no namespace",
                instance.name_any()
            )))
        })?;
        let owner = instance.controller_owner_ref(&()).ok_or_else(|| {
            Error::StdError(StdError::MetadataMissing(format!(
                "IBMLicenseServiceScanner {} has no uid",
                instance.name_any()
            )))
        })?;
        apply_defaults(&mut instance.spec);
        Ok(ScannerContext {
            instance,
            namespace,
            config,
            client,
            owner,
        })
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    pub fn spec(&self) -> &IBMLicenseServiceScannerSpec {
        &self.instance.spec
    }

    /// Container settings; always present once defaults are applied.
    pub fn container(&self) -> ScannerContainer {
        self.instance.spec.container.clone().unwrap_or_default()
    }

    pub fn api<K: Managed>(&self) -> Api<K> {
        Api::namespaced(self.client(), &self.namespace)
    }

    /// Metadata of the operand object `name`, owned by the scanner instance.
    pub fn object_meta(&self, name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(self.namespace.clone()),
            labels: Some(names::base_labels(name, &self.spec().labels)),
            annotations: Some(names::base_annotations(&self.spec().annotations)),
            owner_references: Some(vec![self.owner.clone()]),
            ..Default::default()
        }
    }
}
