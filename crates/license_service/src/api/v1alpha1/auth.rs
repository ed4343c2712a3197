use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// oauth2-proxy configuration of the console
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Authentication {
    #[serde(default)]
    pub useradmin: Useradmin,
    #[serde(default)]
    pub oauth: OAuth,
}

/// Login with the generated basic-auth credentials
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct Useradmin {
    #[serde(default)]
    pub enabled: bool,
}

/// Login through an external identity provider
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct OAuth {
    #[serde(default)]
    pub enabled: bool,
    /// oauth2-proxy flags in the `--param=value` form
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<String>,
}

impl OAuth {
    /// Value of `--name=value` among the parameters. A matching parameter
    /// without exactly one '=' yields nothing.
    pub fn find_param_value(&self, name: &str) -> Option<&str> {
        let param = self
            .parameters
            .iter()
            .find(|param| param.split('=').next() == Some(name))?;
        let parts: Vec<&str> = param.split('=').collect();
        match parts.as_slice() {
            [_, value] => Some(*value),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oauth(params: &[&str]) -> OAuth {
        OAuth {
            enabled: true,
            parameters: params.iter().map(|p| p.to_string()).collect(),
        }
    }

    #[test]
    fn finds_parameter_value() {
        let o = oauth(&["--param2=jjjjj", "--param1=ppppp", "--param3=22222"]);
        assert_eq!(o.find_param_value("--param3"), Some("22222"));
    }

    #[test]
    fn missing_parameter() {
        assert_eq!(oauth(&[]).find_param_value("--param3"), None);
        assert_eq!(oauth(&["--param1=a"]).find_param_value("--param4"), None);
        assert_eq!(oauth(&["param3=22222"]).find_param_value("--param3"), None);
    }

    #[test]
    fn malformed_parameter_has_no_value() {
        assert_eq!(oauth(&["--param3=a=b"]).find_param_value("--param3"), None);
        assert_eq!(oauth(&["--param3"]).find_param_value("--param3"), None);
    }
}
