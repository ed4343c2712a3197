use crate::api::odlm::OperandRequest;
use crate::api::v1::{IBMLicenseServiceScanner, LICENSE_NOT_ACCEPTED_MESSAGE};
use crate::controllers::{publish_warning, Diagnostics, State};
use crate::scanner::{self, context::ScannerContext};
use crate::util::config::OperatorConfig;
use crate::util::errors::{Error, Result};
use crate::util::metrics::Metrics;
use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::api::{
    batch::v1::CronJob,
    core::v1::{ConfigMap, Secret},
};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{
    api::{Api, ListParams, ResourceExt},
    client::Client,
    runtime::{
        controller::{Action, Controller},
        watcher::Config,
    },
    Resource,
};
use std::sync::Arc;
use tokio::{sync::RwLock, time::Duration};
use tracing::*;

pub const CONTROLLER: &str = "scanner";
pub const OPERAND_REQUEST_CRD_NAME: &str = "operandrequests.operator.ibm.com";

// Context for our reconciler
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    pub config: Arc<OperatorConfig>,
    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Prometheus metrics
    pub metrics: Metrics,
    /// Request the License Service operand through ODLM
    pub auto_connect: bool,
}

impl Context {
    pub fn new(state: &State, client: Client, config: Arc<OperatorConfig>, auto_connect: bool) -> Arc<Context> {
        Arc::new(Context {
            client,
            config,
            diagnostics: state.diagnostics.clone(),
            metrics: state.metrics.clone(),
            auto_connect,
        })
    }
}

/// Auto-connection with License Service needs the ODLM OperandRequest API.
pub async fn operand_request_crd_exists(client: &Client) -> bool {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    match crds.get_opt(OPERAND_REQUEST_CRD_NAME).await {
        Ok(Some(_)) => true,
        Ok(None) => {
            info!("Operand request CRD not found");
            false
        }
        Err(e) => {
            error!(error = %e, "Failed to check if the operand request CRD exists");
            false
        }
    }
}

#[instrument(skip(instance, ctx), fields(name = %instance.name_any()))]
pub async fn reconcile(instance: Arc<IBMLicenseServiceScanner>, ctx: Arc<Context>) -> Result<Action> {
    let _timer = ctx.metrics.count_and_measure(CONTROLLER);
    ctx.diagnostics.write().await.last_event = Utc::now();
    info!("Reconciling IBMLicenseServiceScanner \"{}\"", instance.name_any());

    if !instance.spec.is_license_accepted() {
        error!("{LICENSE_NOT_ACCEPTED_MESSAGE}");
        let recorder = ctx.diagnostics.read().await.recorder(ctx.client.clone());
        publish_warning(
            &recorder,
            &instance.object_ref(&()),
            "LicenseNotAccepted",
            LICENSE_NOT_ACCEPTED_MESSAGE.to_string(),
            "Reconciling",
        )
        .await;
        return Err(Error::invalid_argument("license not accepted"));
    }

    let resources = ScannerContext::new(instance.as_ref().clone(), ctx.client.clone(), ctx.config.clone())?;
    match scanner::reconcile_resources(&resources, ctx.auto_connect).await {
        Ok(()) => {
            info!("Reconcile loop finished");
            Ok(Action::requeue(Duration::from_secs(60 * 60)))
        }
        Err(Error::ErrorWithRequeue(e)) => {
            info!(error = %e, "Reconcile requeue requested");
            Ok(Action::requeue(e.duration))
        }
        Err(e) => {
            let recorder = ctx.diagnostics.read().await.recorder(ctx.client.clone());
            publish_warning(
                &recorder,
                &instance.object_ref(&()),
                "ReconcileFailed",
                e.to_string(),
                "Reconciling",
            )
            .await;
            Err(e)
        }
    }
}

fn error_policy(instance: Arc<IBMLicenseServiceScanner>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!("reconcile failed: {:?}", error);
    ctx.metrics.reconcile_failure(CONTROLLER, instance.as_ref(), error);
    Action::requeue(Duration::from_secs(60))
}

/// Initialize the controller, scoped to the operator namespace (given the crd is installed)
pub async fn run(state: State, client: Client, config: Arc<OperatorConfig>) {
    let namespace = match config.operator_namespace() {
        Ok(ns) => ns.to_string(),
        Err(e) => {
            error!(error = %e, "Couldn't retrieve operator namespace");
            std::process::exit(1);
        }
    };

    let scanners = Api::<IBMLicenseServiceScanner>::namespaced(client.clone(), &namespace);
    if let Err(e) = scanners.list(&ListParams::default().limit(1)).await {
        error!("CRD is not queryable; {e:?}. Is the CRD installed?");
        info!("Installation: cargo run --bin crdgen | kubectl apply -f -");
        std::process::exit(1);
    }

    let auto_connect = operand_request_crd_exists(&client).await;
    let mut controller = Controller::new(scanners, Config::default().any_semantic())
        .owns(Api::<Secret>::namespaced(client.clone(), &namespace), Config::default())
        .owns(Api::<ConfigMap>::namespaced(client.clone(), &namespace), Config::default())
        .owns(Api::<CronJob>::namespaced(client.clone(), &namespace), Config::default());
    if auto_connect {
        controller = controller.owns(
            Api::<OperandRequest>::namespaced(client.clone(), &namespace),
            Config::default(),
        );
    }

    controller
        .shutdown_on_signal()
        .run(reconcile, error_policy, Context::new(&state, client, config, auto_connect))
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
}
