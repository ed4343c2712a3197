//! operator.ibm.com/v1alpha1 OperandRequest, used by the scanner to obtain
//! the License Service upload token and configuration.

use kube::CustomResource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const OPERAND_PHASE_RUNNING: &str = "Running";

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[kube(
    kind = "OperandRequest",
    group = "operator.ibm.com",
    version = "v1alpha1",
    namespaced,
    status = "OperandRequestStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct OperandRequestSpec {
    #[serde(default)]
    pub requests: Vec<Request>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub operands: Vec<Operand>,
    pub registry: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_namespace: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct Operand {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub bindings: BTreeMap<String, SecretConfigmap>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct SecretConfigmap {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub secret: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub configmap: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OperandRequestStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<MemberStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct MemberStatus {
    pub name: String,
    #[serde(default)]
    pub phase: MemberPhase,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemberPhase {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator_phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operand_phase: Option<String>,
}

impl OperandRequest {
    /// Operand phase reported for the member `name`, if any.
    pub fn member_phase(&self, name: &str) -> Option<&str> {
        self.status
            .as_ref()?
            .members
            .iter()
            .rfind(|member| member.name == name)
            .and_then(|member| member.phase.operand_phase.as_deref())
    }
}
