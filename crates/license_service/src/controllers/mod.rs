pub mod reporter_controller;
pub mod scanner_controller;

use crate::util::metrics::Metrics;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::ObjectReference;
use kube::{
    client::Client,
    runtime::events::{Event, EventType, Recorder, Reporter},
};
use prometheus::Registry;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

pub const OPERATOR_NAME: &str = "ibm-licensing-operator";

/// State shared between the controllers and the web server
#[derive(Clone)]
pub struct State {
    /// Diagnostics populated by the reconcilers
    diagnostics: Arc<RwLock<Diagnostics>>,
    /// Metrics registry
    registry: Registry,
    metrics: Metrics,
}

impl State {
    pub fn new() -> Result<State, prometheus::Error> {
        let registry = Registry::new();
        let metrics = Metrics::new()?.register(&registry)?;
        Ok(State {
            diagnostics: Arc::default(),
            registry,
            metrics,
        })
    }

    /// Metrics getter
    pub fn metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }
}

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    #[serde(skip)]
    pub reporter: Reporter,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            reporter: OPERATOR_NAME.into(),
        }
    }
}

impl Diagnostics {
    pub fn recorder(&self, client: Client) -> Recorder {
        Recorder::new(client, self.reporter.clone())
    }
}

/// Publishes a Warning event on the custom resource. A failed publish is only logged.
pub async fn publish_warning(recorder: &Recorder, reference: &ObjectReference, reason: &str, note: String, action: &str) {
    let event = Event {
        type_: EventType::Warning,
        reason: reason.into(),
        note: Some(note),
        action: action.into(),
        secondary: None,
    };
    if let Err(e) = recorder.publish(&event, reference).await {
        warn!(reason, error = %e, "failed to publish event");
    }
}
