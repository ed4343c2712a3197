//! Command line of the oauth2-proxy auth container.

use crate::reporter::context::ReporterContext;
use crate::reporter::ingress::{customer_console_ingress_host, DEFAULT_CONSOLE_PATH};
use crate::reporter::routes::console_route_url;
use crate::reporter::service::{AUTH_PORT, REPORTER_UI_PORT};
use crate::util::errors::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};

pub const HTPASSWD_FILE_PATH: &str = "/opt/oauth2-proxy/htpasswd";
pub const BASIC_TEMPLATES_PATH: &str = "/opt/oauth2-proxy/templates/useradmin";
pub const OAUTH_BASIC_TEMPLATES_PATH: &str = "/opt/oauth2-proxy/templates/oauth_useradmin";
pub const COOKIE_SECRET_PATH: &str = "/opt/oauth2-proxy/config/cookie-secret";
pub const CLIENT_SECRET_FILE_PATH: &str = "/opt/oauth2-proxy/config/client-secret";
pub const PROVIDER_CA_FILE_PATH: &str = "/opt/oauth2-proxy/config/provider-ca";
pub const TLS_DIR: &str = "/etc/tls/private/";

/// Names a secret holding the OAuth client secret, mounted into the auth container.
pub const CLIENT_SECRET_NAME_FLAG: &str = "--client-secret-name";
/// Names a secret holding the identity provider CA, mounted into the auth container.
pub const PROVIDER_CA_SECRET_NAME_FLAG: &str = "--provider-ca-secret-name";

/// How user supplied oauth2-proxy parameters are filtered and completed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OAuthArgTables {
    /// Flags the operator owns; user values are dropped
    pub core: BTreeSet<String>,
    /// Secret name flags and the file flag replacing each of them
    pub external_secrets: BTreeMap<String, String>,
    /// Flags passed with these values unless the user sets them
    pub true_defaults: BTreeMap<String, String>,
}

impl Default for OAuthArgTables {
    fn default() -> Self {
        let core = [
            "--https-address",
            "--proxy-prefix",
            "--upstream",
            "--tls-cert-file",
            "--tls-key-file",
            "--htpasswd-file",
            "--display-htpasswd-form",
            "--custom-templates-dir",
            "--redirect-url",
            "--client-secret-file",
            "--provider-ca-file",
        ];
        OAuthArgTables {
            core: core.iter().map(|flag| flag.to_string()).collect(),
            external_secrets: BTreeMap::from([
                (
                    CLIENT_SECRET_NAME_FLAG.to_string(),
                    format!("--client-secret-file={CLIENT_SECRET_FILE_PATH}"),
                ),
                (
                    PROVIDER_CA_SECRET_NAME_FLAG.to_string(),
                    format!("--provider-ca-file={PROVIDER_CA_FILE_PATH}"),
                ),
            ]),
            true_defaults: BTreeMap::from([("--email-domain".to_string(), "*".to_string())]),
        }
    }
}

/// Arguments of the proxy for the enabled login methods.
pub fn oauth2_proxy_args(ctx: &ReporterContext, redirect_url: &str) -> Result<Vec<String>> {
    let spec = ctx.spec();
    let mut args = vec![
        format!("--https-address=:{AUTH_PORT}"),
        format!("--proxy-prefix={DEFAULT_CONSOLE_PATH}/oauth2"),
        format!("--upstream=http://localhost:{REPORTER_UI_PORT}/"),
        format!("--tls-cert-file={TLS_DIR}tls.crt"),
        format!("--tls-key-file={TLS_DIR}tls.key"),
        format!("--htpasswd-file={HTPASSWD_FILE_PATH}"),
        format!("--redirect-url={redirect_url}"),
    ];

    match (spec.is_basic_auth_enabled(), spec.is_oauth_enabled()) {
        (true, false) => args.extend([
            "--display-htpasswd-form=true".to_string(),
            format!("--custom-templates-dir={BASIC_TEMPLATES_PATH}"),
            "--provider-display-name=lsr-useradmin".to_string(),
            "--oidc-issuer-url=https://www.lsr-useradmin.com".to_string(),
            "--oidc-jwks-url=https://www.lsr-useradmin.com".to_string(),
            "--client-id=lsr-useradmin".to_string(),
            "--client-secret=lsr-useradmin".to_string(),
            "--skip-oidc-discovery=true".to_string(),
        ]),
        (true, true) => args.extend([
            "--display-htpasswd-form=true".to_string(),
            format!("--custom-templates-dir={OAUTH_BASIC_TEMPLATES_PATH}"),
        ]),
        (false, true) => args.extend([
            "--display-htpasswd-form=false".to_string(),
            format!("--custom-templates-dir={OAUTH_BASIC_TEMPLATES_PATH}"),
        ]),
        (false, false) => {}
    }

    let oauth = &spec.authentication.oauth;
    if oauth.enabled && !oauth.parameters.is_empty() {
        let tables = &ctx.oauth_tables;
        let mut defaults = tables.true_defaults.clone();
        for param in &oauth.parameters {
            let parts: Vec<&str> = param.split('=').collect();
            let [name, _] = parts.as_slice() else {
                return Err(Error::invalid_argument(format!(
                    "parameter {param} has wrong format. It should be --param=value"
                )));
            };
            if tables.core.contains(*name) {
                continue;
            }
            if let Some(file_flag) = tables.external_secrets.get(*name) {
                args.push(file_flag.clone());
                continue;
            }
            defaults.remove(*name);
            args.push(param.clone());
        }
        args.extend(defaults.iter().map(|(flag, value)| format!("{flag}={value}")));
    }
    Ok(args)
}

/// Where the identity provider sends the browser back after login.
pub async fn redirect_url(ctx: &ReporterContext) -> Result<String> {
    let spec = ctx.spec();
    if ctx.is_route_api && spec.is_route_enabled() {
        let (host, path) = console_route_url(ctx).await.map_err(|e| match e {
            Error::ErrorWithRequeue(_) => e,
            e => Error::invalid_argument(format!(
                "cannot parse oauth2-proxy parameters due to missing ibm-lsr-console route: {e}"
            )),
        })?;
        return Ok(format!("https://{host}{path}/oauth2/callback"));
    }
    let host = if spec.ingress_enabled {
        spec.ingress_host().map(str::to_string).ok_or_else(|| {
            Error::invalid_argument(
                "ingress is enabled but it does not have host configured. Configure ingress host in IBMLicenseServiceReporter",
            )
        })?
    } else {
        customer_console_ingress_host(ctx).await?
    };
    Ok(format!("https://{host}{DEFAULT_CONSOLE_PATH}/oauth2/callback"))
}
