use crate::util::errors::{Error, Result};
use crate::util::quantity;
use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const PULL_IF_NOT_PRESENT: &str = "IfNotPresent";

/// Image and resource settings of one operand container.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OperandContainer {
    /// Image registry; when set it takes precedence over the image from the operator environment
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image_registry: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image_name: String,
    /// Image tag, or digest when it contains ':'
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image_tag_postfix: String,
    #[serde(default)]
    pub resources: ResourceRequirements,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image_pull_policy: String,
}

/// Resource values applied to fields the user left at zero.
#[derive(Clone, Copy, Debug)]
pub struct ResourceDefaults {
    pub limit_cpu: &'static str,
    pub request_cpu: &'static str,
    pub limit_memory: &'static str,
    pub request_memory: &'static str,
    pub request_ephemeral_storage: &'static str,
}

impl OperandContainer {
    /// `registry/name:tag`, or `registry/name@digest` when the postfix is a digest.
    pub fn full_image(&self) -> String {
        let separator = if self.image_tag_postfix.contains(':') { "@" } else { ":" };
        format!(
            "{}/{}{}{}",
            self.image_registry, self.image_name, separator, self.image_tag_postfix
        )
    }

    /// Fills every empty image field from the reference held by `var`.
    ///
    /// The reference is validated even when all fields are already set.
    pub fn set_image_from_env(&mut self, var: &str, reference: Option<&str>) -> Result<()> {
        let parsed = parse_image_reference(var, reference.unwrap_or_default())?;
        if self.image_registry.is_empty() {
            self.image_registry = parsed.image_registry;
        }
        if self.image_name.is_empty() {
            self.image_name = parsed.image_name;
        }
        if self.image_tag_postfix.is_empty() {
            self.image_tag_postfix = parsed.image_tag_postfix;
        }
        Ok(())
    }

    pub fn apply_resource_defaults(&mut self, defaults: &ResourceDefaults) {
        let limits = self.resources.limits.get_or_insert_with(BTreeMap::new);
        set_if_zero(limits, "cpu", defaults.limit_cpu);
        set_if_zero(limits, "memory", defaults.limit_memory);
        let requests = self.resources.requests.get_or_insert_with(BTreeMap::new);
        set_if_zero(requests, "cpu", defaults.request_cpu);
        set_if_zero(requests, "memory", defaults.request_memory);
        set_if_zero(requests, "ephemeral-storage", defaults.request_ephemeral_storage);
        if self.image_pull_policy.is_empty() {
            self.image_pull_policy = PULL_IF_NOT_PRESENT.to_string();
        }
    }
}

fn set_if_zero(list: &mut BTreeMap<String, Quantity>, name: &str, value: &str) {
    if quantity::is_zero(list.get(name)) {
        list.insert(name.to_string(), Quantity(value.to_string()));
    }
}

/// Splits a full image reference into registry, name and tag or digest.
pub fn parse_image_reference(var: &str, reference: &str) -> Result<OperandContainer> {
    let segments: Vec<&str> = reference.split('/').collect();
    if segments.len() < 2 {
        return Err(Error::invalid_argument(format!(
            "ENV variable: {var} should have registry and image separated with \"/\" symbol"
        )));
    }
    let (registry, image_with_tag) = segments.split_at(segments.len() - 1);
    let image_with_tag = image_with_tag[0];

    let parts: Vec<&str> = if image_with_tag.contains('@') {
        let parts: Vec<&str> = image_with_tag.split('@').collect();
        if parts.len() != 2 {
            return Err(Error::invalid_argument(format!(
                "ENV variable: {var} in operator deployment should have digest and image name separated by only one \"@\" symbol"
            )));
        }
        parts
    } else {
        let parts: Vec<&str> = image_with_tag.split(':').collect();
        if parts.len() != 2 {
            return Err(Error::invalid_argument(format!(
                "ENV variable: {var} in operator deployment should have image tag and image name separated by only one \":\" symbol"
            )));
        }
        parts
    };

    Ok(OperandContainer {
        image_registry: registry.join("/"),
        image_name: parts[0].to_string(),
        image_tag_postfix: parts[1].to_string(),
        ..Default::default()
    })
}
