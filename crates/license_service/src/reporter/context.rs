//! Everything one reconcile pass of a reporter instance works with.

use crate::api::v1alpha1::{IBMLicenseServiceReporter, IBMLicenseServiceReporterSpec};
use crate::engine::{labels_and_annotations_patch, Managed, ReconcileRequest, ResourceReconciler};
use crate::reporter::deployment::oauth::OAuthArgTables;
use crate::reporter::names;
use crate::util::collections::map_has_all_pairs;
use crate::util::config::OperatorConfig;
use crate::util::errors::{is_not_found, Error, Result, StdError};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{
    api::{Api, DeleteParams, ListParams},
    client::Client,
    Resource, ResourceExt,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

pub struct ReporterContext {
    /// The custom resource with cluster derived defaults applied
    pub instance: IBMLicenseServiceReporter,
    pub namespace: String,
    pub is_route_api: bool,
    pub is_service_ca_api: bool,
    pub config: Arc<OperatorConfig>,
    pub oauth_tables: Arc<OAuthArgTables>,
    reconciler: ResourceReconciler,
}

impl ReporterContext {
    pub fn new(
        mut instance: IBMLicenseServiceReporter,
        client: Client,
        config: Arc<OperatorConfig>,
        oauth_tables: Arc<OAuthArgTables>,
        is_route_api: bool,
        is_service_ca_api: bool,
    ) -> Result<Self> {
        let namespace = instance.namespace().ok_or_else(|| {
            Error::StdError(StdError::MetadataMissing(format!(
                "IBMLicenseServiceReporter {} has no namespace",
                instance.name_any()
            )))
        })?;
        let owner = instance.controller_owner_ref(&()).ok_or_else(|| {
            Error::StdError(StdError::MetadataMissing(format!(
                "IBMLicenseServiceReporter {} has no uid",
                instance.name_any()
            )))
        })?;
        if instance.spec.route_enabled.is_none() {
            instance.spec.route_enabled = Some(is_route_api);
        }
        Ok(ReporterContext {
            instance,
            namespace,
            is_route_api,
            is_service_ca_api,
            config,
            oauth_tables,
            reconciler: ResourceReconciler::new(client, owner),
        })
    }

    pub fn client(&self) -> Client {
        self.reconciler.client().clone()
    }

    pub fn spec(&self) -> &IBMLicenseServiceReporterSpec {
        &self.instance.spec
    }

    pub fn instance_name(&self) -> String {
        self.instance.name_any()
    }

    pub fn api<K: Managed>(&self) -> Api<K> {
        Api::namespaced(self.client(), &self.namespace)
    }

    pub fn meta_labels(&self) -> BTreeMap<String, String> {
        names::meta_labels(&self.instance)
    }

    pub fn spec_labels(&self) -> &BTreeMap<String, String> {
        &self.instance.spec.labels
    }

    pub fn spec_annotations(&self) -> &BTreeMap<String, String> {
        &self.instance.spec.annotations
    }

    /// Metadata with meta labels and spec annotations, the usual shape of an operand object.
    pub fn object_meta(&self, name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(self.namespace.clone()),
            labels: Some(self.meta_labels()),
            annotations: Some(self.spec_annotations().clone()),
            ..Default::default()
        }
    }

    /// True when `found` lacks any spec label or annotation.
    pub fn spec_metadata_outdated<K: Resource>(&self, found: &K) -> bool {
        !map_has_all_pairs(found.labels(), self.spec_labels())
            || !map_has_all_pairs(found.annotations(), self.spec_annotations())
    }

    /// Merge patch writing the spec labels and annotations into metadata.
    pub fn spec_patch(&self) -> Value {
        labels_and_annotations_patch(self.spec_labels(), self.spec_annotations())
    }

    pub async fn reconcile<K: Managed>(&self, request: ReconcileRequest<'_, K>) -> Result<()> {
        self.reconciler.reconcile(request).await
    }

    /// Deletes one operand pod so the deployment starts a fresh one.
    pub async fn restart_operand_pod(&self, should_run: bool) -> Result<()> {
        if !should_run {
            return Ok(());
        }
        let pods: Api<Pod> = self.api();
        let selector = names::selector_labels(&self.instance_name())
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        let list = match pods.list(&ListParams::default().labels(&selector)).await {
            Ok(list) => list,
            Err(e) if is_not_found(&e) => {
                info!("no Reporter pods found for restart");
                return Ok(());
            }
            Err(e) => {
                return Err(Error::StdError(StdError::kube(
                    "could not list License Service Reporter pods for restart",
                    e,
                )))
            }
        };
        let Some(pod) = list.items.first() else {
            return Ok(());
        };
        let pod_name = pod.name_any();
        info!(pod = %pod_name, "restarting Reporter pod");
        match pods.delete(&pod_name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(Error::StdError(StdError::kube(
                format!("could not delete {pod_name} pod"),
                e,
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::tests::{mock_client, reporter_context, reporter_instance, Exchange};
    use http::Method;
    use serde_json::json;

    const PODS: &str = "/api/v1/namespaces/lsr/pods";

    #[tokio::test]
    async fn restart_deletes_first_operand_pod() {
        let (client, server) = mock_client();
        let server = server.run(vec![
            Exchange::new(
                Method::GET,
                PODS,
                200,
                json!({
                    "apiVersion": "v1",
                    "kind": "PodList",
                    "metadata": {},
                    "items": [
                        {"metadata": {"name": "reporter-a", "namespace": "lsr"}},
                        {"metadata": {"name": "reporter-b", "namespace": "lsr"}}
                    ]
                }),
            ),
            Exchange::new(
                Method::DELETE,
                &format!("{PODS}/reporter-a"),
                200,
                json!({"apiVersion": "v1", "kind": "Pod", "metadata": {"name": "reporter-a"}}),
            ),
        ]);
        let ctx = reporter_context(client, reporter_instance(Default::default()));
        ctx.restart_operand_pod(true).await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn restart_is_skipped_when_not_needed() {
        let (client, server) = mock_client();
        let server = server.run(vec![]);
        let ctx = reporter_context(client, reporter_instance(Default::default()));
        ctx.restart_operand_pod(false).await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn vanished_pod_is_not_an_error() {
        let (client, server) = mock_client();
        let server = server.run(vec![
            Exchange::new(
                Method::GET,
                PODS,
                200,
                json!({"apiVersion": "v1", "kind": "PodList", "metadata": {}, "items": [
                    {"metadata": {"name": "reporter-a", "namespace": "lsr"}}
                ]}),
            ),
            Exchange::not_found(Method::DELETE, &format!("{PODS}/reporter-a")),
        ]);
        let ctx = reporter_context(client, reporter_instance(Default::default()));
        ctx.restart_operand_pod(true).await.unwrap();
        server.await.unwrap();
    }
}
