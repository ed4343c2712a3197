//! OperandRequest asking the License Service operator for the upload token and configuration.

use crate::api::odlm::{Operand, OperandRequest, OperandRequestSpec, Request, SecretConfigmap};
use crate::scanner::context::ScannerContext;
use crate::scanner::core::{Reconcilable, ScannerResource};
use crate::scanner::names::OPERAND_REQUEST_NAME;
use crate::util::errors::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::BTreeMap;
use tracing::info;

pub const LICENSING_OPERAND_NAME: &str = "ibm-licensing-operator";
pub const UPLOAD_BINDING_NAME: &str = "public-api-upload";
pub const UPLOAD_TOKEN_SECRET_NAME: &str = "ibm-licensing-upload-token";
pub const UPLOAD_CONFIG_MAP_NAME: &str = "ibm-licensing-upload-config";

pub struct LicenseServiceOperandRequest {
    pub resource: Reconcilable<OperandRequest>,
}

impl Default for LicenseServiceOperandRequest {
    fn default() -> Self {
        LicenseServiceOperandRequest {
            resource: Reconcilable::new(OPERAND_REQUEST_NAME),
        }
    }
}

impl LicenseServiceOperandRequest {
    /// Operand phase of the License Service member as last read from the cluster.
    pub fn phase(&self) -> Option<String> {
        self.resource
            .actual
            .as_ref()
            .and_then(|request| request.member_phase(LICENSING_OPERAND_NAME))
            .map(str::to_string)
    }
}

pub fn operand_request(ctx: &ScannerContext, name: &str) -> OperandRequest {
    OperandRequest {
        metadata: ctx.object_meta(name),
        spec: OperandRequestSpec {
            requests: vec![Request {
                operands: vec![Operand {
                    name: LICENSING_OPERAND_NAME.to_string(),
                    bindings: BTreeMap::from([(
                        UPLOAD_BINDING_NAME.to_string(),
                        SecretConfigmap {
                            secret: UPLOAD_TOKEN_SECRET_NAME.to_string(),
                            configmap: UPLOAD_CONFIG_MAP_NAME.to_string(),
                        },
                    )]),
                }],
                // required by the CRD, unused by License Service
                registry: name.to_string(),
                registry_namespace: None,
            }],
        },
        status: None,
    }
}

impl ScannerResource for LicenseServiceOperandRequest {
    fn describe(&self) -> String {
        format!("OperandRequest/{}", self.resource.name)
    }

    fn init<'a>(&'a mut self, ctx: &'a ScannerContext) -> BoxFuture<'a, Result<()>> {
        async move {
            self.resource.expected = Some(operand_request(ctx, &self.resource.name));
            Ok(())
        }
        .boxed()
    }

    fn check_init(&self) -> Result<()> {
        self.resource.check_init()
    }

    fn reconcile<'a>(&'a mut self, ctx: &'a ScannerContext) -> BoxFuture<'a, Result<()>> {
        async move {
            info!(name = %self.resource.name, "Reconciling License Service operand request");
            self.resource.reconcile(&ctx.api()).await
        }
        .boxed()
    }
}
