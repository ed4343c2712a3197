use crate::api::openshift::{service_ca_api, Route};
use crate::api::v1alpha1::{IBMLicenseServiceReporter, IBMLicenseServiceReporterSpec, LICENSE_NOT_ACCEPTED_MESSAGE};
use crate::controllers::{publish_warning, Diagnostics, State};
use crate::engine::{CACHING_LABEL_KEY, CACHING_LABEL_VALUE};
use crate::reporter::{self, context::ReporterContext, deployment::oauth::OAuthArgTables, ingress::CONSOLE_INGRESS_NAME};
use crate::util::config::OperatorConfig;
use crate::util::errors::{Error, Result, StdError};
use crate::util::metrics::Metrics;
use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{PersistentVolumeClaim, Secret, Service},
    networking::v1::Ingress,
};
use kube::{
    api::{Api, ListParams, ResourceExt},
    client::Client,
    runtime::{
        controller::{Action, Controller},
        reflector::ObjectRef,
        watcher::{self, Config},
    },
    Resource,
};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::{sync::RwLock, time::Duration};
use tracing::*;

pub const CONTROLLER: &str = "reporter";

// Context for our reconciler
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    pub config: Arc<OperatorConfig>,
    pub oauth_tables: Arc<OAuthArgTables>,
    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Prometheus metrics
    pub metrics: Metrics,
    /// Route API availability as seen by the latest reconcile
    pub route_api: Arc<AtomicBool>,
}

impl Context {
    pub fn new(state: &State, client: Client, config: Arc<OperatorConfig>) -> Arc<Context> {
        Arc::new(Context {
            client,
            config,
            oauth_tables: Arc::new(OAuthArgTables::default()),
            diagnostics: state.diagnostics.clone(),
            metrics: state.metrics.clone(),
            route_api: Arc::default(),
        })
    }

    fn watches(&self, namespace: &str) -> bool {
        let namespaces = self.config.watch_namespaces();
        namespaces.is_empty() || namespaces.iter().any(|ns| ns == namespace)
    }
}

/// Whether the Route API and the service CA operator are available, probed from `namespace`.
pub async fn cluster_facts(client: &Client, namespace: &str) -> (bool, bool) {
    let routes: Api<Route> = Api::namespaced(client.clone(), namespace);
    let is_route_api = match routes.list(&ListParams::default().limit(1)).await {
        Ok(_) => {
            info!("Route feature is enabled");
            true
        }
        Err(e) => {
            info!(error = %e, "Route feature is disabled");
            false
        }
    };
    if !is_route_api {
        return (false, false);
    }
    let is_service_ca_api = match service_ca_api(client.clone()).list(&ListParams::default().limit(1)).await {
        Ok(_) => {
            info!("ServiceCA feature is enabled");
            true
        }
        Err(e) => {
            info!(error = %e, "ServiceCA feature is disabled");
            false
        }
    };
    (is_route_api, is_service_ca_api)
}

/// The console OAuth redirect follows a customer managed ingress.
fn uses_customer_console_ingress(spec: &IBMLicenseServiceReporterSpec, is_route_api: bool) -> bool {
    let route_enabled = spec.route_enabled.unwrap_or(is_route_api);
    !(is_route_api && route_enabled) && !spec.ingress_enabled
}

fn console_ingress_dependents(
    ingress: &Ingress,
    reporters: &[Arc<IBMLicenseServiceReporter>],
    is_route_api: bool,
) -> Vec<ObjectRef<IBMLicenseServiceReporter>> {
    if ingress.metadata.name.as_deref() != Some(CONSOLE_INGRESS_NAME) {
        return Vec::new();
    }
    reporters
        .iter()
        .filter(|reporter| reporter.namespace() == ingress.namespace())
        .filter(|reporter| uses_customer_console_ingress(&reporter.spec, is_route_api))
        .map(|reporter| ObjectRef::from_obj(reporter.as_ref()))
        .collect()
}

#[instrument(skip(instance, ctx), fields(name = %instance.name_any()))]
pub async fn reconcile(instance: Arc<IBMLicenseServiceReporter>, ctx: Arc<Context>) -> Result<Action> {
    let _timer = ctx.metrics.count_and_measure(CONTROLLER);
    ctx.diagnostics.write().await.last_event = Utc::now();

    let ns = instance.namespace().ok_or_else(|| {
        Error::StdError(StdError::MetadataMissing(format!(
            "IBMLicenseServiceReporter {} has no namespace",
            instance.name_any()
        )))
    })?;
    if !ctx.watches(&ns) {
        debug!(namespace = ns, "Skipping IBMLicenseServiceReporter outside of watched namespaces");
        return Ok(Action::await_change());
    }
    info!("Reconciling IBMLicenseServiceReporter \"{}\" in {}", instance.name_any(), ns);

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
        return Ok(Action::await_change());
    }

    let (is_route_api, is_service_ca_api) = cluster_facts(&ctx.client, &ns).await;
    ctx.route_api.store(is_route_api, Ordering::Relaxed);
    let operands = ReporterContext::new(
        instance.as_ref().clone(),
        ctx.client.clone(),
        ctx.config.clone(),
        ctx.oauth_tables.clone(),
        is_route_api,
        is_service_ca_api,
    )?;

    match reporter::reconcile_operands(&operands).await {
        Ok(()) => {
            info!("Reconcile loop finished");
            // If no events were received, check back every 5 minutes
            Ok(Action::requeue(Duration::from_secs(5 * 60)))
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

fn error_policy(instance: Arc<IBMLicenseServiceReporter>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!("reconcile failed: {:?}", error);
    ctx.metrics.reconcile_failure(CONTROLLER, instance.as_ref(), error);
    Action::requeue(Duration::from_secs(60))
}

/// One namespace is watched directly, anything else cluster wide.
fn scoped<K>(client: &Client, namespaces: &[String]) -> Api<K>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()> + Clone + DeserializeOwned + Debug,
{
    match namespaces {
        [ns] => Api::namespaced(client.clone(), ns),
        _ => Api::all(client.clone()),
    }
}

/// Initialize the controller and shared state (given the crd is installed)
pub async fn run(state: State, client: Client, config: Arc<OperatorConfig>) {
    let namespaces = config.watch_namespaces();
    if namespaces.is_empty() {
        info!("WATCH_NAMESPACE env not set, will run in cluster scope");
    }

    let reporters: Api<IBMLicenseServiceReporter> = scoped(&client, &namespaces);
    if let Err(e) = reporters.list(&ListParams::default().limit(1)).await {
        error!("CRD is not queryable; {e:?}. Is the CRD installed?");
        info!("Installation: cargo run --bin crdgen | kubectl apply -f -");
        std::process::exit(1);
    }

    let ctx = Context::new(&state, client.clone(), config);
    let operands = Config::default().labels(&format!("{CACHING_LABEL_KEY}={CACHING_LABEL_VALUE}"));
    let controller = Controller::new(reporters, Config::default().any_semantic());
    let store = controller.store();
    let route_api = ctx.route_api.clone();

    controller
        .owns(scoped::<Deployment>(&client, &namespaces), operands.clone())
        .owns(scoped::<Service>(&client, &namespaces), operands.clone())
        .owns(scoped::<Secret>(&client, &namespaces), operands.clone())
        .owns(scoped::<PersistentVolumeClaim>(&client, &namespaces), operands)
        .watches(
            scoped::<Ingress>(&client, &namespaces),
            watcher::Config::default().fields(&format!("metadata.name={CONSOLE_INGRESS_NAME}")),
            move |ingress| console_ingress_dependents(&ingress, &store.state(), route_api.load(Ordering::Relaxed)),
        )
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
}
