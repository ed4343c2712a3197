//! Operand resources of an `IBMLicenseServiceReporter`.

pub mod certificates;
pub mod context;
pub mod deployment;
pub mod ingress;
pub mod names;
pub mod pvc;
pub mod routes;
pub mod secrets;
pub mod service;
pub mod status;

use crate::reporter::context::ReporterContext;
use crate::util::errors::Result;

/// Converges every operand resource. Later steps depend on earlier ones:
/// certificates need the service and routes, the deployment mounts the
/// certificates and the claim.
pub async fn reconcile_operands(ctx: &ReporterContext) -> Result<()> {
    secrets::reconcile_api_token(ctx).await?;
    secrets::reconcile_database_secret(ctx).await?;
    secrets::reconcile_credentials_secrets(ctx).await?;
    secrets::reconcile_cookie_secret(ctx).await?;
    service::reconcile_service(ctx).await?;
    routes::reconcile_routes_without_certificates(ctx).await?;
    certificates::reconcile_external_certificate(ctx).await?;
    certificates::reconcile_internal_certificate(ctx).await?;
    routes::reconcile_route_with_certificates(ctx).await?;
    pvc::reconcile_persistent_volume_claim(ctx).await?;
    deployment::reconcile_deployment(ctx).await?;
    ingress::reconcile_api_ingress(ctx).await?;
    ingress::reconcile_console_ingress(ctx).await?;
    status::update_status(ctx).await
}
