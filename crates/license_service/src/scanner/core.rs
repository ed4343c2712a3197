//! Reconcile flow shared by the scanner operand resources.
//!
//! Each resource kind implements [`ScannerResource`] and keeps a
//! [`Reconcilable`] holding its expected and live object. The helper
//! provides the default steps; a resource overrides one by doing its own
//! work between [`Reconcilable::plan`] and [`Reconcilable::apply`].

use crate::engine::{delete_if_exists, Managed};
use crate::scanner::context::ScannerContext;
use crate::util::collections::map_has_all_pairs;
use crate::util::errors::{is_not_found, Error, Result, StdError};
use futures::future::BoxFuture;
use kube::{
    api::{Api, Patch, PatchParams, PostParams},
    Resource, ResourceExt,
};
use serde_json::Value;
use tracing::{debug, info};

/// One operand resource of a scanner instance.
pub trait ScannerResource: Send {
    /// `Kind/name`, for logs.
    fn describe(&self) -> String;

    /// Builds the expected object.
    fn init<'a>(&'a mut self, ctx: &'a ScannerContext) -> BoxFuture<'a, Result<()>>;

    /// Verifies `init` produced something reconcilable.
    fn check_init(&self) -> Result<()>;

    fn reconcile<'a>(&'a mut self, ctx: &'a ScannerContext) -> BoxFuture<'a, Result<()>>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Create,
    Update,
    Keep,
}

pub struct Reconcilable<K> {
    pub name: String,
    pub expected: Option<K>,
    pub actual: Option<K>,
}

impl<K: Managed> Reconcilable<K> {
    pub fn new(name: impl Into<String>) -> Self {
        Reconcilable {
            name: name.into(),
            expected: None,
            actual: None,
        }
    }

    pub fn check_init(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::invalid_argument("resource name is empty"));
        }
        let expected = self.expected()?;
        if expected.meta().name.as_deref().unwrap_or_default().is_empty() {
            return Err(Error::invalid_argument("expected resource's name is empty"));
        }
        if expected.meta().namespace.as_deref().unwrap_or_default().is_empty() {
            return Err(Error::invalid_argument("expected resource's namespace is empty"));
        }
        Ok(())
    }

    pub fn expected(&self) -> Result<&K> {
        self.expected
            .as_ref()
            .ok_or_else(|| Error::invalid_argument(format!("expected {} {} is not initialized", K::kind(&()), self.name)))
    }

    pub fn expected_mut(&mut self) -> Result<&mut K> {
        let name = self.name.clone();
        self.expected
            .as_mut()
            .ok_or_else(|| Error::invalid_argument(format!("expected {} {name} is not initialized", K::kind(&()))))
    }

    /// Reads the live object into `actual`; false when it does not exist.
    pub async fn fetch(&mut self, api: &Api<K>) -> Result<bool> {
        debug!(kind = %K::kind(&()), name = %self.name, "Getting resource from cluster");
        match api.get(&self.name).await {
            Ok(found) => {
                self.actual = Some(found);
                Ok(true)
            }
            Err(e) if is_not_found(&e) => {
                self.actual = None;
                Ok(false)
            }
            Err(e) => Err(Error::StdError(StdError::kube("failed getting the resource", e))),
        }
    }

    /// True when the live object lacks an expected label or annotation.
    pub fn metadata_outdated(&self) -> bool {
        match (&self.actual, &self.expected) {
            (Some(actual), Some(expected)) => {
                !map_has_all_pairs(actual.labels(), expected.labels())
                    || !map_has_all_pairs(actual.annotations(), expected.annotations())
            }
            _ => false,
        }
    }

    /// Keeps labels and annotations other parties added to the live object.
    pub fn populate_expected_from_actual(&mut self) {
        let (Some(actual), Some(expected)) = (&self.actual, &mut self.expected) else {
            return;
        };
        for (key, value) in actual.labels() {
            expected.labels_mut().entry(key.clone()).or_insert_with(|| value.clone());
        }
        for (key, value) in actual.annotations() {
            expected
                .annotations_mut()
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }

    /// Default decision: create when missing, update when metadata drifted.
    pub async fn plan(&mut self, api: &Api<K>) -> Result<Action> {
        if !self.fetch(api).await? {
            return Ok(Action::Create);
        }
        self.populate_expected_from_actual();
        Ok(if self.metadata_outdated() {
            Action::Update
        } else {
            Action::Keep
        })
    }

    pub async fn apply(&self, api: &Api<K>, action: Action, patch: Value) -> Result<()> {
        match action {
            Action::Create => self.create(api).await,
            Action::Update => self.update(api, patch).await,
            Action::Keep => Ok(()),
        }
    }

    /// The default flow with the expected object as merge patch.
    pub async fn reconcile(&mut self, api: &Api<K>) -> Result<()> {
        let action = self.plan(api).await?;
        let patch = self.merge_patch()?;
        self.apply(api, action, patch).await
    }

    pub fn merge_patch(&self) -> Result<Value> {
        serde_json::to_value(self.expected()?).map_err(|e| Error::StdError(StdError::JsonSerializationError(e)))
    }

    pub async fn create(&self, api: &Api<K>) -> Result<()> {
        info!(kind = %K::kind(&()), name = %self.name, "Creating resource");
        api.create(&PostParams::default(), self.expected()?)
            .await
            .map_err(|e| Error::StdError(StdError::kube("failed creating the resource", e)))?;
        Ok(())
    }

    /// Patch, falling back to a full update and finally to delete and create.
    pub async fn update(&self, api: &Api<K>, patch: Value) -> Result<()> {
        let kind = K::kind(&()).to_string();
        info!(%kind, name = %self.name, "Patching resource");
        let Err(e) = api
            .patch(&self.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        else {
            return Ok(());
        };
        info!(%kind, name = %self.name, error = %e, "Couldn't use PATCH, trying UPDATE");

        let mut replacement = self.expected()?.clone();
        replacement.meta_mut().resource_version = self.actual.as_ref().and_then(|a| a.resource_version());
        let Err(e) = api.replace(&self.name, &PostParams::default(), &replacement).await else {
            return Ok(());
        };
        info!(%kind, name = %self.name, error = %e, "Couldn't use UPDATE, trying DELETE & CREATE");

        delete_if_exists(api, &self.name).await.map_err(|e| match e {
            Error::StdError(StdError::KubeContext { source, .. }) => Error::StdError(StdError::kube(
                "all available resource update flows failed",
                source,
            )),
            e => e,
        })?;
        self.create(api).await
    }
}
