//! The CronJob running the scanner operand on the configured schedule.
//!
//! The operand does the scanning itself; the operator only wires the
//! namespaces to scan, the upload and pull secrets and, for registries
//! authenticated through Vault, an init container producing the pull
//! credentials.

use crate::api::v1::{IBMLicenseServiceScannerSpec, RegistryDetails, ScannerContainer};
use crate::reporter::deployment::compare::equal_quantities;
use crate::scanner::context::ScannerContext;
use crate::scanner::core::{Action, Reconcilable, ScannerResource};
use crate::scanner::names::{
    CRON_JOB_NAME, CRON_JOB_SERVICE_ACCOUNT, OPERAND_CONTAINER_NAME, OPERAND_INIT_CONTAINER_NAME,
    SCRIPT_CONFIG_MAP_NAME,
};
use crate::scanner::secrets::DOCKER_CONFIG_JSON_KEY;
use crate::util::config::OperatorConfig;
use crate::util::errors::{Error, Result, StdError};
use futures::future::BoxFuture;
use futures::FutureExt;
use k8s_openapi::api::batch::v1::{CronJob, CronJobSpec, JobSpec, JobTemplateSpec};
use k8s_openapi::api::core::v1::{
    Capabilities, ConfigMapVolumeSource, Container, EmptyDirVolumeSource, EnvVar, EnvVarSource, KeyToPath,
    LocalObjectReference, Namespace, ObjectFieldSelector, PodSpec, PodTemplateSpec, ResourceRequirements,
    SeccompProfile, SecretVolumeSource, SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, ListParams};
use kube::client::Client;
use kube::ResourceExt;
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;
use tracing::info;

const SCAN_NAMESPACES_ENV: &str = "SCAN_NAMESPACES";
const LOG_LEVEL_ENV: &str = "LOG_LEVEL";
const DOCKER_CONFIG_ENV: &str = "DOCKER_CONFIG";
const INSTANA_AGENT_HOST_ENV: &str = "INSTANA_AGENT_HOST";

const PULL_SECRET_VOLUME: &str = "auth";
const PULL_SECRET_MOUNT_PATH: &str = "/opt/scanner/auth";
const PULL_SECRET_CONFIG_PATH: &str = "config.json";
const UPLOAD_SECRET_VOLUME: &str = "sender";
const UPLOAD_SECRET_MOUNT_PATH: &str = "/opt/scanner/sender";
const TEMP_VOLUME: &str = "temp";
const TEMP_MOUNT_PATH: &str = "/tmp";

const VAULT_MOUNT_PATH_PREFIX: &str = "/opt/scanner/vault/";
const VAULT_AUTH_VOLUME: &str = "vault-auth";
const VAULT_SCRIPT_VOLUME: &str = "vault-script";
const VAULT_AUTH_MOUNT_PATH: &str = "/opt/scanner/vault/auth";
const VAULT_SCRIPT_MOUNT_PATH: &str = "/opt/scanner/vault/script";
const VAULT_SCRIPT_EXEC_PATH: &str = "/opt/scanner/vault/script/script.sh";

const DEFAULT_SECRET_MODE: i32 = 420;
// 0555
const DEFAULT_SCRIPT_MODE: i32 = 365;

/// Secrets referenced by the Vault authenticated registries, without duplicates.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VaultReferences {
    pub certificates: BTreeSet<String>,
    pub service_accounts: BTreeSet<String>,
}

impl VaultReferences {
    pub fn from_registries(registries: &[RegistryDetails]) -> Result<Self> {
        let mut references = VaultReferences::default();
        for registry in registries.iter().filter(|r| r.uses_vault()) {
            if registry.vault.is_empty() {
                return Err(Error::invalid_argument(format!(
                    "missing property spec.registries.vault in registry: {}. Please add missing data in Custom Resource YAML",
                    registry.name
                )));
            }
            references.certificates.insert(registry.vault.cert.clone());
            references.service_accounts.insert(registry.vault.service_account.clone());
        }
        Ok(references)
    }

    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty() && self.service_accounts.is_empty()
    }
}

/// Operand image from the environment; a pull prefix replaces its registry host.
pub fn operand_image(config: &OperatorConfig, container: &ScannerContainer) -> Result<String> {
    let image = config.scanner_image.require()?;
    if container.image_pull_prefix.is_empty() {
        return Ok(image.to_string());
    }
    let mut parts: Vec<&str> = image.split('/').collect();
    parts[0] = &container.image_pull_prefix;
    Ok(parts.join("/"))
}

static NAMESPACE_WILDCARD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9.-]*\*$").expect("valid namespace wildcard pattern"));

#[derive(Clone, Debug, PartialEq, Eq)]
enum NamespacePattern {
    Exact(String),
    Prefix(String),
}

/// Accepts plain names, a sole `*` and names with one trailing `*`. Wildcard
/// prefixes may only use characters valid in a namespace name.
fn parse_namespace_patterns(requested: &[String]) -> Result<Vec<NamespacePattern>> {
    requested
        .iter()
        .map(|ns| {
            if !ns.contains('*') {
                Ok(NamespacePattern::Exact(ns.clone()))
            } else if NAMESPACE_WILDCARD.is_match(ns) {
                Ok(NamespacePattern::Prefix(ns.trim_end_matches('*').to_string()))
            } else {
                Err(Error::invalid_argument(format!("unsupported wildcard detected: {ns}")))
            }
        })
        .collect()
}

/// Sorted, duplicate free namespaces to scan. The cluster is only listed when a wildcard is used.
pub async fn resolve_scan_namespaces(client: Client, requested: &[String]) -> Result<Vec<String>> {
    let patterns = parse_namespace_patterns(requested)?;
    let mut resolved = BTreeSet::new();
    let mut prefixes = Vec::new();
    for pattern in patterns {
        match pattern {
            NamespacePattern::Exact(name) => {
                resolved.insert(name);
            }
            NamespacePattern::Prefix(prefix) => prefixes.push(prefix),
        }
    }
    if !prefixes.is_empty() {
        let namespaces: Api<Namespace> = Api::all(client);
        let list = namespaces
            .list(&ListParams::default())
            .await
            .map_err(|e| Error::StdError(StdError::kube("could not list namespaces from the cluster", e)))?;
        resolved.extend(
            list.items
                .iter()
                .map(ResourceExt::name_any)
                .filter(|name| prefixes.iter().any(|prefix| name.starts_with(prefix.as_str()))),
        );
    }
    Ok(resolved.into_iter().collect())
}

fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

fn mount(name: &str, path: &str, read_only: bool) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        read_only: read_only.then_some(true),
        ..Default::default()
    }
}

fn secret_volume(name: &str, secret_name: &str, mode: i32) -> Volume {
    Volume {
        name: name.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret_name.to_string()),
            default_mode: Some(mode),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn empty_dir(name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }
}

fn resource_list(cpu: &str, memory: &str, ephemeral_storage: &str) -> BTreeMap<String, Quantity> {
    BTreeMap::from([
        ("cpu".to_string(), Quantity(cpu.to_string())),
        ("memory".to_string(), Quantity(memory.to_string())),
        ("ephemeral-storage".to_string(), Quantity(ephemeral_storage.to_string())),
    ])
}

fn security_context() -> SecurityContext {
    SecurityContext {
        allow_privilege_escalation: Some(false),
        privileged: Some(false),
        read_only_root_filesystem: Some(true),
        run_as_non_root: Some(true),
        capabilities: Some(Capabilities {
            drop: Some(vec!["ALL".to_string()]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn volumes(spec: &IBMLicenseServiceScannerSpec, vault: &VaultReferences) -> Vec<Volume> {
    let mut pull_secret = secret_volume(PULL_SECRET_VOLUME, &spec.registry_pull_secret, DEFAULT_SECRET_MODE);
    if let Some(source) = pull_secret.secret.as_mut() {
        source.items = Some(vec![KeyToPath {
            key: DOCKER_CONFIG_JSON_KEY.to_string(),
            path: PULL_SECRET_CONFIG_PATH.to_string(),
            mode: None,
        }]);
    }
    let mut volumes = vec![
        secret_volume(UPLOAD_SECRET_VOLUME, &spec.license_service_upload_secret, DEFAULT_SECRET_MODE),
        pull_secret,
        empty_dir(TEMP_VOLUME),
    ];
    if vault.is_empty() {
        return volumes;
    }
    volumes.push(empty_dir(VAULT_AUTH_VOLUME));
    volumes.push(Volume {
        name: VAULT_SCRIPT_VOLUME.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: SCRIPT_CONFIG_MAP_NAME.to_string(),
            default_mode: Some(DEFAULT_SCRIPT_MODE),
            ..Default::default()
        }),
        ..Default::default()
    });
    volumes.extend(
        vault
            .certificates
            .iter()
            .map(|cert| secret_volume(cert, cert, DEFAULT_SECRET_MODE)),
    );
    volumes.extend(
        vault
            .service_accounts
            .iter()
            .map(|sa| secret_volume(sa, sa, DEFAULT_SCRIPT_MODE)),
    );
    volumes
}

pub fn operand_container(ctx: &ScannerContext, scan_namespaces: &[String]) -> Result<Container> {
    if scan_namespaces.is_empty() {
        return Err(Error::invalid_argument("no valid namespaces to scan found"));
    }
    let spec = ctx.spec();
    let container = ctx.container();
    let uses_registries = !spec.registries.is_empty();
    let docker_config_path = if uses_registries {
        VAULT_AUTH_MOUNT_PATH
    } else {
        PULL_SECRET_MOUNT_PATH
    };

    let mut env_vars = vec![
        env(LOG_LEVEL_ENV, spec.operand_log_level()),
        env(SCAN_NAMESPACES_ENV, scan_namespaces.join(",")),
        env(DOCKER_CONFIG_ENV, docker_config_path),
    ];
    if spec.enable_instana_metric_collection {
        env_vars.push(EnvVar {
            name: INSTANA_AGENT_HOST_ENV.to_string(),
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    api_version: Some("v1".to_string()),
                    field_path: "status.hostIP".to_string(),
                }),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    let mut volume_mounts = vec![
        mount(PULL_SECRET_VOLUME, PULL_SECRET_MOUNT_PATH, true),
        mount(UPLOAD_SECRET_VOLUME, UPLOAD_SECRET_MOUNT_PATH, true),
        mount(TEMP_VOLUME, TEMP_MOUNT_PATH, false),
    ];
    // the init container writes the registry credentials there
    if uses_registries {
        volume_mounts.push(mount(VAULT_AUTH_VOLUME, VAULT_AUTH_MOUNT_PATH, true));
    }

    Ok(Container {
        name: OPERAND_CONTAINER_NAME.to_string(),
        image: Some(operand_image(&ctx.config, &container)?),
        env: Some(env_vars),
        security_context: Some(SecurityContext {
            seccomp_profile: Some(SeccompProfile {
                type_: "RuntimeDefault".to_string(),
                ..Default::default()
            }),
            proc_mount: Some("Default".to_string()),
            ..security_context()
        }),
        resources: Some(ResourceRequirements {
            requests: container.resources.requests.clone(),
            limits: container.resources.limits.clone(),
            ..Default::default()
        }),
        volume_mounts: Some(volume_mounts),
        image_pull_policy: Some(container.image_pull_policy.clone()),
        ..Default::default()
    })
}

/// Numbered variables describing every registry to the Vault connector script.
fn init_container_env(registries: &[RegistryDetails]) -> Vec<EnvVar> {
    registries
        .iter()
        .enumerate()
        .flat_map(|(i, registry)| {
            let vault = &registry.vault;
            [
                env(&format!("REGISTRY_NAME_{i}"), registry.host.clone()),
                env(&format!("REGISTRY_USER_{i}"), registry.username.clone()),
                env(&format!("VAULT_LOGIN_ADDR_{i}"), vault.login_url.clone()),
                env(&format!("VAULT_SECRET_ADDR_{i}"), vault.secret_url.clone()),
                env(
                    &format!("SA_TOKEN_{i}"),
                    format!("{VAULT_MOUNT_PATH_PREFIX}{}", vault.service_account),
                ),
                env(&format!("VAULT_ROLE_{i}"), vault.role.clone()),
                env(&format!("CERT_PATH_{i}"), format!("{VAULT_MOUNT_PATH_PREFIX}{}", vault.cert)),
                env(&format!("SECRET_KEY_{i}"), vault.key.clone()),
            ]
        })
        .collect()
}

pub fn init_containers(ctx: &ScannerContext, vault: &VaultReferences) -> Result<Vec<Container>> {
    if vault.is_empty() {
        return Ok(Vec::new());
    }
    let container = ctx.container();
    let mut volume_mounts = vec![
        mount(VAULT_AUTH_VOLUME, VAULT_AUTH_MOUNT_PATH, false),
        mount(VAULT_SCRIPT_VOLUME, VAULT_SCRIPT_MOUNT_PATH, true),
        mount(PULL_SECRET_VOLUME, PULL_SECRET_MOUNT_PATH, true),
    ];
    volume_mounts.extend(
        vault
            .certificates
            .iter()
            .chain(vault.service_accounts.iter())
            .map(|name| mount(name, &format!("{VAULT_MOUNT_PATH_PREFIX}{name}"), true)),
    );
    Ok(vec![Container {
        name: OPERAND_INIT_CONTAINER_NAME.to_string(),
        image: Some(operand_image(&ctx.config, &container)?),
        security_context: Some(security_context()),
        resources: Some(ResourceRequirements {
            requests: Some(resource_list("50m", "32Mi", "10Mi")),
            limits: Some(resource_list("100m", "128Mi", "10Mi")),
            ..Default::default()
        }),
        command: Some(vec![VAULT_SCRIPT_EXEC_PATH.to_string()]),
        volume_mounts: Some(volume_mounts),
        image_pull_policy: Some(container.image_pull_policy.clone()),
        env: Some(init_container_env(&ctx.spec().registries)),
        ..Default::default()
    }])
}

pub fn cron_job(ctx: &ScannerContext, name: &str, scan_namespaces: &[String]) -> Result<CronJob> {
    let spec = ctx.spec();
    let vault = VaultReferences::from_registries(&spec.registries)?;
    let metadata = ctx.object_meta(name);
    let template_metadata = ObjectMeta {
        labels: metadata.labels.clone(),
        annotations: metadata.annotations.clone(),
        ..Default::default()
    };
    let init_containers = init_containers(ctx, &vault)?;
    let pull_secrets: Vec<LocalObjectReference> = ctx
        .container()
        .image_pull_secrets
        .iter()
        .map(|secret| LocalObjectReference { name: secret.clone() })
        .collect();

    Ok(CronJob {
        metadata,
        spec: Some(CronJobSpec {
            schedule: spec.scan.frequency.clone(),
            suspend: Some(spec.scan.suspend),
            starting_deadline_seconds: Some(spec.scan.starting_deadline_seconds),
            concurrency_policy: Some("Forbid".to_string()),
            job_template: JobTemplateSpec {
                metadata: Some(template_metadata.clone()),
                spec: Some(JobSpec {
                    template: PodTemplateSpec {
                        metadata: Some(template_metadata),
                        spec: Some(PodSpec {
                            volumes: Some(volumes(spec, &vault)),
                            containers: vec![operand_container(ctx, scan_namespaces)?],
                            init_containers: (!init_containers.is_empty()).then_some(init_containers),
                            restart_policy: Some("OnFailure".to_string()),
                            service_account_name: Some(CRON_JOB_SERVICE_ACCOUNT.to_string()),
                            image_pull_secrets: (!pull_secrets.is_empty()).then_some(pull_secrets),
                            ..Default::default()
                        }),
                    },
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    })
}

fn pod_spec(job: &CronJob) -> Option<&PodSpec> {
    job.spec
        .as_ref()?
        .job_template
        .spec
        .as_ref()?
        .template
        .spec
        .as_ref()
}

fn containers_equal(found: &Container, expected: &Container) -> bool {
    let found_resources = found.resources.clone().unwrap_or_default();
    let expected_resources = expected.resources.clone().unwrap_or_default();
    found.env.as_deref().unwrap_or_default() == expected.env.as_deref().unwrap_or_default()
        && found.volume_mounts.as_deref().unwrap_or_default()
            == expected.volume_mounts.as_deref().unwrap_or_default()
        && equal_quantities(&found_resources.limits, &expected_resources.limits)
        && equal_quantities(&found_resources.requests, &expected_resources.requests)
        && found.image_pull_policy == expected.image_pull_policy
}

/// Containers matched by name, each expected one present and equal.
fn container_lists_equal(found: &[Container], expected: &[Container]) -> bool {
    found.len() == expected.len()
        && expected.iter().all(|e| {
            found
                .iter()
                .find(|f| f.name == e.name)
                .is_some_and(|f| containers_equal(f, e))
        })
}

fn volume_lists_equal(found: &[Volume], expected: &[Volume]) -> bool {
    found.len() == expected.len()
        && expected
            .iter()
            .all(|e| found.iter().find(|f| f.name == e.name).is_some_and(|f| f == e))
}

/// Schedule, suspension, deadline, volumes and containers drive an update.
pub fn cron_job_outdated(found: &CronJob, expected: &CronJob) -> bool {
    let (Some(found_spec), Some(expected_spec)) = (found.spec.as_ref(), expected.spec.as_ref()) else {
        return true;
    };
    let (Some(found_pod), Some(expected_pod)) = (pod_spec(found), pod_spec(expected)) else {
        return true;
    };
    let reason = if found_spec.schedule != expected_spec.schedule {
        Some("schedule")
    } else if found_spec.suspend.unwrap_or(false) != expected_spec.suspend.unwrap_or(false) {
        Some("suspend")
    } else if found_spec.starting_deadline_seconds != expected_spec.starting_deadline_seconds {
        Some("starting deadline")
    } else if !volume_lists_equal(
        found_pod.volumes.as_deref().unwrap_or_default(),
        expected_pod.volumes.as_deref().unwrap_or_default(),
    ) {
        Some("volumes")
    } else if !container_lists_equal(&found_pod.containers, &expected_pod.containers) {
        Some("containers")
    } else if !container_lists_equal(
        found_pod.init_containers.as_deref().unwrap_or_default(),
        expected_pod.init_containers.as_deref().unwrap_or_default(),
    ) {
        Some("init containers")
    } else {
        None
    };
    if let Some(reason) = reason {
        info!(name = %expected.name_any(), reason, "Scanner cron job is outdated");
    }
    reason.is_some()
}

pub struct ScannerCronJob {
    pub resource: Reconcilable<CronJob>,
}

impl Default for ScannerCronJob {
    fn default() -> Self {
        ScannerCronJob {
            resource: Reconcilable::new(CRON_JOB_NAME),
        }
    }
}

impl ScannerCronJob {
    /// Merge patch of the expected job; absent init containers are removed explicitly.
    fn patch(&self) -> Result<Value> {
        let mut patch = self.resource.merge_patch()?;
        let has_init_containers = self
            .resource
            .expected
            .as_ref()
            .and_then(pod_spec)
            .is_some_and(|pod| pod.init_containers.is_some());
        if !has_init_containers {
            if let Some(pod) = patch.pointer_mut("/spec/jobTemplate/spec/template/spec").and_then(Value::as_object_mut) {
                pod.insert("initContainers".to_string(), Value::Null);
            }
        }
        Ok(patch)
    }
}

impl ScannerResource for ScannerCronJob {
    fn describe(&self) -> String {
        format!("CronJob/{}", self.resource.name)
    }

    fn init<'a>(&'a mut self, ctx: &'a ScannerContext) -> BoxFuture<'a, Result<()>> {
        async move {
            let scan_namespaces = resolve_scan_namespaces(ctx.client(), &ctx.spec().scan.namespaces).await?;
            self.resource.expected = Some(cron_job(ctx, &self.resource.name, &scan_namespaces)?);
            Ok(())
        }
        .boxed()
    }

    fn check_init(&self) -> Result<()> {
        self.resource.check_init()
    }

    fn reconcile<'a>(&'a mut self, ctx: &'a ScannerContext) -> BoxFuture<'a, Result<()>> {
        async move {
            info!(name = %self.resource.name, "Reconciling cron job");
            let api: Api<CronJob> = ctx.api();
            let mut action = self.resource.plan(&api).await?;
            if action == Action::Keep {
                if let (Some(found), Some(expected)) = (&self.resource.actual, &self.resource.expected) {
                    if cron_job_outdated(found, expected) {
                        action = Action::Update;
                    }
                }
            }
            let patch = self.patch()?;
            self.resource.apply(&api, action, patch).await
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::v1::{IBMLicenseServiceScannerSpec, ScanConfig, VaultDetails};
    use crate::tests::{mock_client, scanner_context, scanner_instance, Exchange};
    use http::Method;
    use serde_json::json;

    const NAMESPACES: &str = "/api/v1/namespaces";
    const CRON_JOBS: &str = "/apis/batch/v1/namespaces/scanner/cronjobs";

    fn namespace_list() -> Value {
        let items: Vec<Value> = ["default", "kube-system", "my-ns", "ns-1", "ns-2", "ns-3"]
            .iter()
            .map(|name| json!({"metadata": {"name": name}}))
            .collect();
        json!({"apiVersion": "v1", "kind": "NamespaceList", "metadata": {}, "items": items})
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn vault_registry(name: &str, service_account: &str, cert: &str) -> RegistryDetails {
        RegistryDetails {
            name: name.to_string(),
            host: format!("{name}.io"),
            username: "iamapikey".to_string(),
            auth_method: "VAULT".to_string(),
            vault: VaultDetails {
                login_url: "https://vault.com/v1/auth/kubernetes/login".to_string(),
                secret_url: "https://vault.com/v1/kv/data/secret".to_string(),
                key: "api_key".to_string(),
                cert: cert.to_string(),
                role: "scanner".to_string(),
                service_account: service_account.to_string(),
            },
        }
    }

    fn scanner_spec(namespaces: &[&str]) -> IBMLicenseServiceScannerSpec {
        IBMLicenseServiceScannerSpec {
            license_service_upload_secret: "upload".to_string(),
            registry_pull_secret: "pull".to_string(),
            scan: ScanConfig {
                namespaces: strings(namespaces),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn wildcards_are_resolved_sorted_and_deduplicated() {
        let (client, server) = mock_client();
        let server = server.run(vec![Exchange::new(Method::GET, NAMESPACES, 200, namespace_list())]);
        let resolved = resolve_scan_namespaces(client, &strings(&["ns-*", "default", "ns-1"]))
            .await
            .unwrap();
        assert_eq!(resolved, strings(&["default", "ns-1", "ns-2", "ns-3"]));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn sole_asterisk_selects_every_namespace() {
        let (client, server) = mock_client();
        let server = server.run(vec![Exchange::new(Method::GET, NAMESPACES, 200, namespace_list())]);
        let resolved = resolve_scan_namespaces(client, &strings(&["*"])).await.unwrap();
        assert_eq!(resolved.len(), 6);
        assert_eq!(resolved[0], "default");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn plain_namespaces_do_not_list_the_cluster() {
        let (client, server) = mock_client();
        let server = server.run(vec![]);
        let resolved = resolve_scan_namespaces(client, &strings(&["my-ns", "default", "kube-system"]))
            .await
            .unwrap();
        assert_eq!(resolved, strings(&["default", "kube-system", "my-ns"]));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn unsupported_wildcards_are_rejected() {
        for requested in [&["*-2"][..], &["n*s*"], &["ns-[a-z]+*"], &["default", "*ns"]] {
            let (client, server) = mock_client();
            let server = server.run(vec![]);
            let err = resolve_scan_namespaces(client, &strings(requested)).await.unwrap_err();
            assert!(err.to_string().contains("unsupported wildcard detected"), "{requested:?}");
            server.await.unwrap();
        }
    }

    #[test]
    fn pull_prefix_replaces_registry_host() {
        let config = crate::tests::operator_config();
        let mut container = ScannerContainer::default();
        assert_eq!(operand_image(&config, &container).unwrap(), "icr.io/cpopen/scanner:4.2.0");
        container.image_pull_prefix = "mirror.example.com".to_string();
        assert_eq!(
            operand_image(&config, &container).unwrap(),
            "mirror.example.com/cpopen/scanner:4.2.0"
        );
    }

    #[test]
    fn vault_registry_without_details_is_rejected() {
        let mut registry = vault_registry("icr", "sa", "ca");
        registry.vault = VaultDetails::default();
        let err = VaultReferences::from_registries(&[registry]).unwrap_err();
        assert!(err.to_string().contains("missing property spec.registries.vault in registry: icr"));
    }

    #[tokio::test]
    async fn plain_job_has_no_vault_wiring() {
        let (client, _server) = mock_client();
        let ctx = scanner_context(client, scanner_instance(scanner_spec(&["default"])));
        let job = cron_job(&ctx, CRON_JOB_NAME, &strings(&["default", "ns-1"])).unwrap();
        let spec = job.spec.as_ref().unwrap();
        assert_eq!(spec.schedule, "10 0 * * *");
        assert_eq!(spec.starting_deadline_seconds, Some(3600));
        assert_eq!(spec.concurrency_policy.as_deref(), Some("Forbid"));
        let pod = pod_spec(&job).unwrap();
        assert!(pod.init_containers.is_none());
        assert_eq!(pod.volumes.as_ref().unwrap().len(), 3);
        let env = pod.containers[0].env.as_ref().unwrap();
        assert_eq!(env[0], super::env(LOG_LEVEL_ENV, "INFO"));
        assert_eq!(env[1], super::env(SCAN_NAMESPACES_ENV, "default,ns-1"));
        assert_eq!(env[2], super::env(DOCKER_CONFIG_ENV, PULL_SECRET_MOUNT_PATH));
        assert_eq!(pod.containers[0].image_pull_policy.as_deref(), Some("IfNotPresent"));
    }

    #[tokio::test]
    async fn vault_registries_add_init_container_and_deduplicated_volumes() {
        let (client, _server) = mock_client();
        let mut spec = scanner_spec(&["default"]);
        spec.registries = vec![
            vault_registry("icr", "vault-sa", "vault-ca"),
            vault_registry("quay", "vault-sa", "vault-ca"),
        ];
        let ctx = scanner_context(client, scanner_instance(spec));
        let job = cron_job(&ctx, CRON_JOB_NAME, &strings(&["default"])).unwrap();
        let pod = pod_spec(&job).unwrap();

        let volume_names: Vec<&str> = pod.volumes.as_ref().unwrap().iter().map(|v| v.name.as_str()).collect();
        assert_eq!(
            volume_names,
            ["sender", "auth", "temp", "vault-auth", "vault-script", "vault-ca", "vault-sa"]
        );
        let init = &pod.init_containers.as_ref().unwrap()[0];
        assert_eq!(init.command, Some(vec![VAULT_SCRIPT_EXEC_PATH.to_string()]));
        let init_env = init.env.as_ref().unwrap();
        assert_eq!(init_env.len(), 16);
        assert!(init_env.contains(&super::env("REGISTRY_NAME_1", "quay.io")));
        assert!(init_env.contains(&super::env("SA_TOKEN_0", "/opt/scanner/vault/vault-sa")));
        let operand_env = pod.containers[0].env.as_ref().unwrap();
        assert!(operand_env.contains(&super::env(DOCKER_CONFIG_ENV, VAULT_AUTH_MOUNT_PATH)));
    }

    #[tokio::test]
    async fn no_namespaces_fail_the_build() {
        let (client, _server) = mock_client();
        let ctx = scanner_context(client, scanner_instance(scanner_spec(&[])));
        let err = cron_job(&ctx, CRON_JOB_NAME, &[]).unwrap_err();
        assert!(err.to_string().contains("no valid namespaces to scan found"));
    }

    #[tokio::test]
    async fn drift_detection_ignores_server_defaults() {
        let (client, _server) = mock_client();
        let ctx = scanner_context(client, scanner_instance(scanner_spec(&["default"])));
        let expected = cron_job(&ctx, CRON_JOB_NAME, &strings(&["default"])).unwrap();

        let mut found = expected.clone();
        let found_spec = found.spec.as_mut().unwrap();
        found_spec.successful_jobs_history_limit = Some(3);
        let pod = found_spec.job_template.spec.as_mut().unwrap().template.spec.as_mut().unwrap();
        pod.dns_policy = Some("ClusterFirst".to_string());
        pod.containers[0].termination_message_path = Some("/dev/termination-log".to_string());
        pod.containers[0].resources.as_mut().unwrap().requests = Some(resource_list("0.2", "128Mi", "5Gi"));
        assert!(!cron_job_outdated(&found, &expected));

        found.spec.as_mut().unwrap().suspend = Some(true);
        assert!(cron_job_outdated(&found, &expected));
    }

    #[tokio::test]
    async fn schedule_change_patches_job_and_drops_init_containers() {
        let (client, server) = mock_client();
        let ctx = scanner_context(client, scanner_instance(scanner_spec(&["default"])));
        let mut live = serde_json::to_value(cron_job(&ctx, CRON_JOB_NAME, &strings(&["default"])).unwrap()).unwrap();
        live["spec"]["schedule"] = json!("@hourly");
        let server = server.run(vec![
            Exchange::new(Method::GET, &format!("{CRON_JOBS}/{CRON_JOB_NAME}"), 200, live.clone()),
            Exchange::new(Method::PATCH, &format!("{CRON_JOBS}/{CRON_JOB_NAME}"), 200, live),
        ]);
        let mut job = ScannerCronJob::default();
        job.resource.expected = Some(cron_job(&ctx, CRON_JOB_NAME, &strings(&["default"])).unwrap());
        job.check_init().unwrap();
        job.reconcile(&ctx).await.unwrap();
        let bodies = server.await.unwrap();
        assert_eq!(bodies[1]["spec"]["schedule"], "10 0 * * *");
        assert_eq!(
            bodies[1]["spec"]["jobTemplate"]["spec"]["template"]["spec"]["initContainers"],
            Value::Null
        );
        assert!(bodies[1]["spec"]["jobTemplate"]["spec"]["template"]["spec"]
            .as_object()
            .unwrap()
            .contains_key("initContainers"));
    }
}
