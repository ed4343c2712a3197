//! The four operand containers and the OpenShift certificate wait.

use crate::api::v1alpha1::container::{OperandContainer, ResourceDefaults};
use crate::api::v1alpha1::CertsSource;
use crate::reporter::context::ReporterContext;
use crate::reporter::deployment::volumes::{
    auth_volume_mounts, mount, API_TOKEN_VOLUME, DATABASE_CONFIG_VOLUME, DATABASE_SOCKETS_VOLUME,
    DATABASE_TMP_VOLUME, DATA_VOLUME, HTTPS_CERTS_VOLUME, RECEIVER_TMP_VOLUME,
};
use crate::reporter::secrets::{api_token_secret_name, API_TOKEN_KEY, DATABASE_MOUNT_PATH, DATABASE_NAME, DATABASE_SECRET_NAME};
use crate::reporter::service::{AUTH_PORT, AUTH_PORT_NAME, RECEIVER_PORT, REPORTER_UI_PORT};
use crate::util::config::ImageVar;
use crate::util::errors::Result;
use k8s_openapi::api::core::v1::{
    Capabilities, Container, ContainerPort, EnvVar, EnvVarSource, ExecAction, HTTPGetAction,
    ObjectFieldSelector, Probe, SeccompProfile, SecretKeySelector, SecurityContext,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

pub const DATABASE_CONTAINER: &str = "database";
pub const RECEIVER_CONTAINER: &str = "receiver";
pub const REPORTER_UI_CONTAINER: &str = "reporter-ui";
pub const AUTH_CONTAINER: &str = "auth";
pub const OCP_CHECK_CONTAINER: &str = "ocp-check-secret";

/// The receiver always serves the certificate mounted by the operator.
const EXTERNAL_CERTS_SOURCE: &str = "external";

const RECEIVER_DEFAULTS: ResourceDefaults = ResourceDefaults {
    limit_cpu: "300m",
    request_cpu: "200m",
    limit_memory: "384Mi",
    request_memory: "256Mi",
    request_ephemeral_storage: "256Mi",
};

const REPORTER_UI_DEFAULTS: ResourceDefaults = ResourceDefaults {
    limit_cpu: "300m",
    request_cpu: "200m",
    limit_memory: "300Mi",
    request_memory: "256Mi",
    request_ephemeral_storage: "256Mi",
};

const DATABASE_DEFAULTS: ResourceDefaults = ResourceDefaults {
    limit_cpu: "300m",
    request_cpu: "200m",
    limit_memory: "300Mi",
    request_memory: "256Mi",
    request_ephemeral_storage: "256Mi",
};

const AUTH_DEFAULTS: ResourceDefaults = ResourceDefaults {
    limit_cpu: "100m",
    request_cpu: "100m",
    limit_memory: "50Mi",
    request_memory: "50Mi",
    request_ephemeral_storage: "256Mi",
};

const OCP_SECRET_CHECK_SCRIPT: &str = r#"while true; do
  echo "$(date): Checking for ocp secret"
  ls /opt/licensing/certs/* && break
  echo "$(date): Required ocp secret not found ... try again in 30s"
  sleep 30
done
echo "$(date): All required secrets exist"
"#;

pub fn security_context() -> SecurityContext {
    SecurityContext {
        allow_privilege_escalation: Some(false),
        privileged: Some(false),
        read_only_root_filesystem: Some(true),
        run_as_non_root: Some(true),
        capabilities: Some(Capabilities {
            drop: Some(vec!["ALL".to_string()]),
            ..Default::default()
        }),
        seccomp_profile: Some(SeccompProfile {
            type_: "RuntimeDefault".to_string(),
            ..Default::default()
        }),
        proc_mount: Some("Default".to_string()),
        ..Default::default()
    }
}

pub fn readiness_probe(handler: Probe) -> Probe {
    Probe {
        initial_delay_seconds: Some(60),
        timeout_seconds: Some(10),
        period_seconds: Some(60),
        ..handler
    }
}

pub fn liveness_probe(handler: Probe) -> Probe {
    Probe {
        initial_delay_seconds: Some(120),
        timeout_seconds: Some(10),
        period_seconds: Some(300),
        ..handler
    }
}

fn http_get(path: &str, port: i32, scheme: &str) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.to_string()),
            port: IntOrString::Int(port),
            scheme: Some(scheme.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

fn env_from(name: &str, source: EnvVarSource) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(source),
        ..Default::default()
    }
}

fn instana_agent_host() -> EnvVar {
    env_from(
        "INSTANA_AGENT_HOST",
        EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                api_version: Some("v1".to_string()),
                field_path: "status.hostIP".to_string(),
            }),
            ..Default::default()
        },
    )
}

fn spec_env(ctx: &ReporterContext) -> impl Iterator<Item = EnvVar> + '_ {
    ctx.spec().env_variable.iter().map(|(name, value)| env(name, value.clone()))
}

fn tcp_port(name: Option<&str>, port: i32) -> ContainerPort {
    ContainerPort {
        name: name.map(str::to_string),
        container_port: port,
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

/// Image, pull policy, resources and hardening shared by every container.
fn base_container(
    name: &str,
    configured: &OperandContainer,
    image: &ImageVar,
    defaults: &ResourceDefaults,
) -> Result<Container> {
    let mut operand = configured.clone();
    operand.set_image_from_env(image.var, image.value.as_deref())?;
    operand.apply_resource_defaults(defaults);
    Ok(Container {
        name: name.to_string(),
        image: Some(operand.full_image()),
        image_pull_policy: Some(operand.image_pull_policy),
        resources: Some(operand.resources),
        security_context: Some(security_context()),
        ..Default::default()
    })
}

pub fn receiver_container(ctx: &ReporterContext) -> Result<Container> {
    let spec = ctx.spec();
    let mut container = base_container(
        RECEIVER_CONTAINER,
        &spec.receiver_container,
        &ctx.config.receiver_image,
        &RECEIVER_DEFAULTS,
    )?;

    let mut env_vars = vec![
        env("HTTPS_CERTS_SOURCE", EXTERNAL_CERTS_SOURCE),
        env(
            "ENABLE_INSTANA_METRIC_COLLECTION",
            spec.enable_instana_metric_collection.to_string(),
        ),
    ];
    if spec.is_debug() {
        env_vars.push(env("logging.level.com.ibm", "DEBUG"));
    }
    if spec.is_debug() || spec.is_verbose() {
        env_vars.push(env("SPRING_PROFILES_ACTIVE", "verbose"));
    }
    if spec.enable_workloads_processing {
        env_vars.push(env("ENABLE_WORKLOADS_PROCESSING", "true"));
    }
    if let Some(days) = spec.workloads_custom_columns_retency_days {
        env_vars.push(env("WORKLOADS_CC_RETENTION_PERIOD_DAYS", days.to_string()));
    }
    env_vars.extend(spec_env(ctx));

    let probe = http_get("/", RECEIVER_PORT, "HTTPS");
    container.env = Some(env_vars);
    container.volume_mounts = Some(vec![
        mount(API_TOKEN_VOLUME, "/opt/ibm/licensing", true),
        mount(
            DATABASE_CONFIG_VOLUME,
            &format!("/opt/ibm/licensing/{DATABASE_SECRET_NAME}"),
            true,
        ),
        mount(RECEIVER_TMP_VOLUME, "/tmp", false),
        mount(HTTPS_CERTS_VOLUME, "/opt/licensing/certs/", true),
    ]);
    container.ports = Some(vec![tcp_port(None, RECEIVER_PORT)]);
    container.liveness_probe = Some(liveness_probe(probe.clone()));
    container.readiness_probe = Some(readiness_probe(probe));
    Ok(container)
}

pub fn reporter_ui_container(ctx: &ReporterContext) -> Result<Container> {
    let spec = ctx.spec();
    let mut container = base_container(
        REPORTER_UI_CONTAINER,
        &spec.reporter_ui_container,
        &ctx.config.reporter_ui_image,
        &REPORTER_UI_DEFAULTS,
    )?;

    let mut env_vars = vec![
        env("NODE_TLS_REJECT_UNAUTHORIZED", "0"),
        env("HTTP_PORT", REPORTER_UI_PORT.to_string()),
        env("baseUrl", format!("https://localhost:{RECEIVER_PORT}")),
        env_from(
            "apiToken",
            EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: api_token_secret_name(ctx).to_string(),
                    key: API_TOKEN_KEY.to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            },
        ),
    ];
    if spec.enable_workloads_processing {
        env_vars.push(env("ENABLE_WORKLOADS_PROCESSING", "true"));
    }
    if spec.enable_instana_metric_collection {
        env_vars.push(instana_agent_host());
        env_vars.push(env("INSTANA_DISABLE_USE_OPENTELEMETRY", "true"));
    }
    env_vars.extend(spec_env(ctx));

    let probe = http_get("/license-service-reporter/version.txt", REPORTER_UI_PORT, "HTTP");
    container.env = Some(env_vars);
    container.volume_mounts = Some(auth_volume_mounts(ctx));
    container.liveness_probe = Some(liveness_probe(probe.clone()));
    container.readiness_probe = Some(readiness_probe(probe));
    Ok(container)
}

pub fn database_container(ctx: &ReporterContext, database_user: &str) -> Result<Container> {
    let spec = ctx.spec();
    let mut container = base_container(
        DATABASE_CONTAINER,
        &spec.database_container,
        &ctx.config.database_image,
        &DATABASE_DEFAULTS,
    )?;

    let mut env_vars: Vec<EnvVar> = spec_env(ctx).collect();
    env_vars.push(env(
        "ENABLE_INSTANA_METRIC_COLLECTION",
        spec.enable_instana_metric_collection.to_string(),
    ));

    let probe = Probe {
        exec: Some(ExecAction {
            command: Some(
                ["psql", "-w", "-U", database_user, "-d", DATABASE_NAME, "-c", "SELECT 1"]
                    .map(str::to_string)
                    .to_vec(),
            ),
        }),
        ..Default::default()
    };
    container.env = Some(env_vars);
    container.volume_mounts = Some(vec![
        mount(DATA_VOLUME, DATABASE_MOUNT_PATH, false),
        mount(
            DATABASE_CONFIG_VOLUME,
            &format!("/opt/ibm/licensing/{DATABASE_SECRET_NAME}"),
            true,
        ),
        mount(DATABASE_SOCKETS_VOLUME, "/var/run/", false),
        mount(DATABASE_TMP_VOLUME, "/tmp/", false),
    ]);
    container.liveness_probe = Some(liveness_probe(probe.clone()));
    container.readiness_probe = Some(readiness_probe(probe));
    Ok(container)
}

pub fn auth_container(ctx: &ReporterContext, args: Vec<String>) -> Result<Container> {
    let spec = ctx.spec();
    let mut container = base_container(
        AUTH_CONTAINER,
        &spec.auth_container,
        &ctx.config.auth_image,
        &AUTH_DEFAULTS,
    )?;
    if spec.enable_instana_metric_collection {
        container.env = Some(vec![instana_agent_host()]);
    }
    container.args = Some(args);
    container.volume_mounts = Some(auth_volume_mounts(ctx));
    container.ports = Some(vec![tcp_port(Some(AUTH_PORT_NAME), AUTH_PORT)]);
    container.liveness_probe = Some(liveness_probe(http_get("/ping", AUTH_PORT, "HTTPS")));
    container.readiness_probe = Some(readiness_probe(http_get("/ready", AUTH_PORT, "HTTPS")));
    Ok(container)
}

/// On OpenShift the service CA writes the internal certificate asynchronously;
/// the pod waits for it before the receiver starts.
pub fn init_containers(ctx: &ReporterContext) -> Result<Vec<Container>> {
    if !(ctx.is_service_ca_api && ctx.spec().certs_source() == CertsSource::Ocp) {
        return Ok(Vec::new());
    }
    let mut check = receiver_container(ctx)?;
    check.name = OCP_CHECK_CONTAINER.to_string();
    check.liveness_probe = None;
    check.readiness_probe = None;
    check.command = Some(vec![
        "sh".to_string(),
        "-c".to_string(),
        OCP_SECRET_CHECK_SCRIPT.to_string(),
    ]);
    Ok(vec![check])
}
