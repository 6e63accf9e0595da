//! Response shaping helpers.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::catalog::entity::{Deployment, StatefulResource};
use crate::catalog::settings::is_secret_setting;

/// Secret-class settings are never echoed back: a configured value renders
/// as `"configured"`, an absent one as `""`.
pub fn mask_settings(settings: BTreeMap<String, String>) -> BTreeMap<String, String> {
    settings
        .into_iter()
        .map(|(key, value)| {
            if is_secret_setting(&key) {
                let masked = if value.is_empty() { "" } else { "configured" };
                (key, masked.to_string())
            } else {
                (key, value)
            }
        })
        .collect()
}

/// Body of the 200-with-error response for container-runtime failures.
#[derive(Serialize)]
pub struct DeployFailureBody {
    pub deployment: Deployment,
    pub error: String,
    pub output: String,
}

#[derive(Serialize)]
pub struct ResourceFailureBody {
    pub resource: StatefulResource,
    pub error: String,
    pub output: String,
}

#[derive(Serialize)]
pub struct RedeployedBody {
    pub redeployed: usize,
    pub repo: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::settings::{REGISTRY_TOKEN_KEY, WEBHOOK_SECRET_KEY, WEBHOOK_TOKEN_KEY};

    #[test]
    fn test_secret_values_are_masked() {
        let settings = BTreeMap::from([
            (WEBHOOK_SECRET_KEY.to_string(), "hunter2".to_string()),
            (REGISTRY_TOKEN_KEY.to_string(), String::new()),
            (WEBHOOK_TOKEN_KEY.to_string(), "tok123".to_string()),
            ("region".to_string(), "fsn1".to_string()),
        ]);

        let masked = mask_settings(settings);
        assert_eq!("configured", masked[WEBHOOK_SECRET_KEY]);
        assert_eq!("", masked[REGISTRY_TOKEN_KEY]);
        // The webhook token is an identifier, not a secret.
        assert_eq!("tok123", masked[WEBHOOK_TOKEN_KEY]);
        assert_eq!("fsn1", masked["region"]);
    }
}
