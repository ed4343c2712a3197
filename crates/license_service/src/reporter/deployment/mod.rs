//! The single operand deployment running database, receiver, UI and auth proxy.

pub mod compare;
pub mod containers;
pub mod oauth;
pub mod volumes;

use crate::engine::{Merged, ReconcileRequest, ResourceUpdateStatus};
use crate::reporter::context::ReporterContext;
use crate::reporter::names::{default_resource_name, pod_annotations, pod_labels, selector_labels};
use crate::util::collections::{map_has_all_pairs, merge_maps};
use crate::util::errors::Result;
use futures::FutureExt;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy};
use k8s_openapi::api::core::v1::{
    Affinity, LocalObjectReference, NodeAffinity, NodeSelector, NodeSelectorRequirement, NodeSelectorTerm,
    PodSpec, PodTemplateSpec, Toleration,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::ResourceExt;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::info;

pub const SERVICE_ACCOUNT_NAME: &str = "ibm-license-service-reporter";
const TERMINATION_GRACE_PERIOD_SECONDS: i64 = 60;

/// Values the deployment depends on that live outside the custom resource.
#[derive(Clone, Debug, Default)]
pub struct OperandInputs {
    pub database_user: String,
    pub auth_args: Vec<String>,
}

impl OperandInputs {
    pub async fn resolve(ctx: &ReporterContext) -> Result<Self> {
        let database_user = ctx.config.postgres_user().await?;
        let redirect_url = oauth::redirect_url(ctx).await?;
        Ok(OperandInputs {
            database_user,
            auth_args: oauth::oauth2_proxy_args(ctx, &redirect_url)?,
        })
    }
}

fn affinity() -> Affinity {
    Affinity {
        node_affinity: Some(NodeAffinity {
            required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                node_selector_terms: vec![NodeSelectorTerm {
                    match_expressions: Some(vec![NodeSelectorRequirement {
                        key: "kubernetes.io/arch".to_string(),
                        operator: "In".to_string(),
                        values: Some(vec!["amd64".to_string()]),
                    }]),
                    ..Default::default()
                }],
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn tolerations() -> Vec<Toleration> {
    vec![
        Toleration {
            key: Some("dedicated".to_string()),
            operator: Some("Exists".to_string()),
            effect: Some("NoSchedule".to_string()),
            ..Default::default()
        },
        Toleration {
            key: Some("CriticalAddonsOnly".to_string()),
            operator: Some("Exists".to_string()),
            ..Default::default()
        },
    ]
}

pub fn deployment(ctx: &ReporterContext, inputs: &OperandInputs) -> Result<Deployment> {
    let instance_name = ctx.instance_name();
    let containers = vec![
        containers::database_container(ctx, &inputs.database_user)?,
        containers::receiver_container(ctx)?,
        containers::reporter_ui_container(ctx)?,
        containers::auth_container(ctx, inputs.auth_args.clone())?,
    ];
    let image_pull_secrets: Vec<LocalObjectReference> = ctx
        .spec()
        .image_pull_secrets
        .iter()
        .map(|name| LocalObjectReference { name: name.clone() })
        .collect();

    Ok(Deployment {
        metadata: ctx.object_meta(&default_resource_name(&instance_name)),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(selector_labels(&instance_name)),
                ..Default::default()
            },
            strategy: Some(DeploymentStrategy {
                type_: Some("Recreate".to_string()),
                ..Default::default()
            }),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(pod_labels(&ctx.instance)),
                    annotations: Some(pod_annotations(&ctx.instance)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    volumes: Some(volumes::volumes(ctx)?),
                    init_containers: Some(containers::init_containers(ctx)?),
                    containers,
                    termination_grace_period_seconds: Some(TERMINATION_GRACE_PERIOD_SECONDS),
                    service_account_name: Some(SERVICE_ACCOUNT_NAME.to_string()),
                    image_pull_secrets: (!image_pull_secrets.is_empty()).then_some(image_pull_secrets),
                    affinity: Some(affinity()),
                    tolerations: Some(tolerations()),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn template_metadata(deployment: &Deployment) -> ObjectMeta {
    deployment
        .spec
        .as_ref()
        .and_then(|s| s.template.metadata.clone())
        .unwrap_or_default()
}

/// Pod metadata that only misses spec labels or annotations is patched in place;
/// anything else about the pod template needs a full update.
pub fn check_deployment(ctx: &ReporterContext, found: &Deployment, expected: &Deployment) -> ResourceUpdateStatus {
    let found_template = found.spec.as_ref().map(|s| s.template.clone()).unwrap_or_default();
    let expected_template = expected.spec.as_ref().map(|s| s.template.clone()).unwrap_or_default();
    if compare::pod_template_outdated(&found_template, &expected_template) {
        return ResourceUpdateStatus::MERGE;
    }

    let found_pod = template_metadata(found);
    let expected_pod = template_metadata(expected);
    let found_labels = found_pod.labels.unwrap_or_default();
    let found_annotations = found_pod.annotations.unwrap_or_default();
    let expected_labels = expected_pod.labels.unwrap_or_default();
    let expected_annotations = expected_pod.annotations.unwrap_or_default();
    let mut pod_metadata_patchable = false;

    if !map_has_all_pairs(&found_labels, &expected_labels) {
        if !map_has_all_pairs(&merge_maps(&found_labels, ctx.spec_labels()), &expected_labels) {
            info!(deployment = %found.name_any(), "Updating due to having outdated pod labels");
            return ResourceUpdateStatus::MERGE;
        }
        pod_metadata_patchable = true;
    }
    if !map_has_all_pairs(&found_annotations, &expected_annotations) {
        if !map_has_all_pairs(&merge_maps(&found_annotations, ctx.spec_annotations()), &expected_annotations) {
            info!(deployment = %found.name_any(), "Updating due to having outdated pod annotations");
            return ResourceUpdateStatus::MERGE;
        }
        pod_metadata_patchable = true;
    }
    if pod_metadata_patchable || ctx.spec_metadata_outdated(found) {
        return ResourceUpdateStatus::PATCH;
    }
    ResourceUpdateStatus::DESIRED
}

/// Spec labels and annotations for both the deployment and its pods.
pub fn deployment_patch(labels: &BTreeMap<String, String>, annotations: &BTreeMap<String, String>) -> Value {
    json!({
        "metadata": {"labels": labels, "annotations": annotations},
        "spec": {"template": {"metadata": {"labels": labels, "annotations": annotations}}}
    })
}

pub async fn reconcile_deployment(ctx: &ReporterContext) -> Result<()> {
    let inputs = OperandInputs::resolve(ctx).await?;
    let expected = deployment(ctx, &inputs)?;
    ctx.reconcile(
        ReconcileRequest::new(expected, |found: &Deployment, expected: &Deployment| {
            Ok(check_deployment(ctx, found, expected))
        })
        .patch(|found: &Deployment, _| {
            info!(deployment = %found.name_any(), "Patching due to having outdated spec.labels and/or spec.annotations");
            Ok(deployment_patch(ctx.spec_labels(), ctx.spec_annotations()))
        })
        .merge(|mut found, expected| {
            async move {
                found.spec = expected.spec;
                found.metadata.labels = expected.metadata.labels;
                found.metadata.annotations = expected.metadata.annotations;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::v1alpha1::IBMLicenseServiceReporterSpec;
    use crate::engine::{CACHING_LABEL_KEY, CACHING_LABEL_VALUE};
    use crate::tests::{mock_client, reporter_context, reporter_instance, Exchange};
    use http::Method;

    const DEPLOYMENTS: &str = "/apis/apps/v1/namespaces/lsr/deployments";

    fn inputs() -> OperandInputs {
        OperandInputs {
            database_user: "postgres".to_string(),
            auth_args: vec!["--https-address=:8888".to_string()],
        }
    }

    fn labeled_spec() -> IBMLicenseServiceReporterSpec {
        IBMLicenseServiceReporterSpec {
            labels: BTreeMap::from([("team".to_string(), "finops".to_string())]),
            annotations: BTreeMap::from([("owner".to_string(), "finops".to_string())]),
            image_pull_secrets: vec!["pull-secret".to_string()],
            ..Default::default()
        }
    }

    /// What the cluster holds after the operator created the deployment.
    fn live(ctx: &ReporterContext) -> Deployment {
        let mut live = deployment(ctx, &inputs()).unwrap();
        live.labels_mut().insert(CACHING_LABEL_KEY.to_string(), CACHING_LABEL_VALUE.to_string());
        live.metadata.resource_version = Some("12".to_string());
        live
    }

    fn pod_meta(deployment: &mut Deployment) -> &mut ObjectMeta {
        deployment
            .spec
            .as_mut()
            .unwrap()
            .template
            .metadata
            .get_or_insert_with(Default::default)
    }

    #[tokio::test]
    async fn deployment_shape() {
        let (client, _server) = mock_client();
        let ctx = reporter_context(client, reporter_instance(labeled_spec()));
        let deployment = deployment(&ctx, &inputs()).unwrap();
        assert_eq!(deployment.name_any(), "ibm-license-service-reporter-instance");
        let spec = deployment.spec.unwrap();
        assert_eq!(spec.replicas, Some(1));
        assert_eq!(spec.strategy.unwrap().type_.as_deref(), Some("Recreate"));
        assert_eq!(spec.selector.match_labels, Some(selector_labels("instance")));
        let pod = spec.template.spec.unwrap();
        let names: Vec<&str> = pod.containers.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["database", "receiver", "reporter-ui", "auth"]);
        assert_eq!(pod.image_pull_secrets.unwrap()[0].name, "pull-secret");
        assert_eq!(pod.tolerations.unwrap().len(), 2);
        assert_eq!(pod.termination_grace_period_seconds, Some(60));
        let pod_meta = spec.template.metadata.unwrap();
        assert_eq!(pod_meta.labels.unwrap()["team"], "finops");
        assert_eq!(pod_meta.annotations.unwrap()["productMetric"], "FREE");
    }

    #[tokio::test]
    async fn check_prefers_patch_for_spec_metadata() {
        let (client, _server) = mock_client();
        let ctx = reporter_context(client, reporter_instance(labeled_spec()));
        let expected = deployment(&ctx, &inputs()).unwrap();

        assert_eq!(check_deployment(&ctx, &live(&ctx), &expected), ResourceUpdateStatus::DESIRED);

        let mut found = live(&ctx);
        pod_meta(&mut found).labels.as_mut().unwrap().remove("team");
        assert_eq!(check_deployment(&ctx, &found, &expected), ResourceUpdateStatus::PATCH);

        let mut found = live(&ctx);
        pod_meta(&mut found).labels.as_mut().unwrap().remove("component");
        assert_eq!(check_deployment(&ctx, &found, &expected), ResourceUpdateStatus::MERGE);

        let mut found = live(&ctx);
        pod_meta(&mut found).labels.as_mut().unwrap().remove("team");
        pod_meta(&mut found).annotations.as_mut().unwrap().remove("productID");
        assert_eq!(check_deployment(&ctx, &found, &expected), ResourceUpdateStatus::MERGE);

        let mut found = live(&ctx);
        found.annotations_mut().remove("owner");
        assert_eq!(check_deployment(&ctx, &found, &expected), ResourceUpdateStatus::PATCH);
    }

    #[tokio::test]
    async fn check_merges_container_drift() {
        let (client, _server) = mock_client();
        let ctx = reporter_context(client, reporter_instance(labeled_spec()));
        let expected = deployment(&ctx, &inputs()).unwrap();
        let mut found = live(&ctx);
        found.spec.as_mut().unwrap().template.spec.as_mut().unwrap().containers[3].args = Some(vec![]);
        assert_eq!(check_deployment(&ctx, &found, &expected), ResourceUpdateStatus::MERGE);
    }

    #[tokio::test]
    async fn label_drift_is_patched_into_pod_template() {
        let (client, server) = mock_client();
        let ctx = reporter_context(client, reporter_instance(labeled_spec()));
        let expected = deployment(&ctx, &inputs()).unwrap();
        let mut found = live(&ctx);
        found.labels_mut().remove("team");
        let path = format!("{DEPLOYMENTS}/ibm-license-service-reporter-instance");
        let found = serde_json::to_value(&found).unwrap();
        let server = server.run(vec![
            Exchange::new(Method::GET, &path, 200, found.clone()),
            Exchange::new(Method::PATCH, &path, 200, found),
        ]);
        ctx.reconcile(
            ReconcileRequest::new(expected, |found: &Deployment, expected: &Deployment| {
                Ok(check_deployment(&ctx, found, expected))
            })
            .patch(|_, _| Ok(deployment_patch(ctx.spec_labels(), ctx.spec_annotations()))),
        )
        .await
        .unwrap();
        let bodies = server.await.unwrap();
        assert_eq!(bodies[1]["metadata"]["labels"], json!({"team": "finops"}));
        assert_eq!(bodies[1]["spec"]["template"]["metadata"]["annotations"], json!({"owner": "finops"}));
        assert_eq!(bodies[1]["metadata"]["resourceVersion"], "12");
    }
}
