//! Resolves a node's provider tag and its owner's stored API token into a
//! usable provider client.
//!
//! Provider SDKs are plugged in at startup through [`ProviderRegistry::register`];
//! the core never calls a provider API directly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::entity::Node;
use crate::catalog::settings::provider_token_key;
use crate::catalog::Catalog;

use super::provider::Provider;
use super::CloudError;

#[derive(Clone)]
pub struct ProviderCredentials {
    pub api_token: String,
    /// Budget for a single provider action (provision, attach, …).
    pub deadline: Duration,
}

pub trait ProviderBuilder: Send + Sync {
    fn build(&self, credentials: ProviderCredentials) -> Arc<dyn Provider>;
}

impl<F> ProviderBuilder for F
where
    F: Fn(ProviderCredentials) -> Arc<dyn Provider> + Send + Sync,
{
    fn build(&self, credentials: ProviderCredentials) -> Arc<dyn Provider> {
        self(credentials)
    }
}

pub struct ProviderRegistry {
    catalog: Arc<Catalog>,
    deadline: Duration,
    builders: HashMap<String, Arc<dyn ProviderBuilder>>,
}

impl ProviderRegistry {
    pub fn new(catalog: Arc<Catalog>, deadline: Duration) -> Self {
        Self {
            catalog,
            deadline,
            builders: HashMap::new(),
        }
    }

    pub fn register(&mut self, tag: &str, builder: Arc<dyn ProviderBuilder>) {
        self.builders.insert(tag.to_string(), builder);
    }

    /// Provider client for the node's tag, authenticated with the owning
    /// user's stored token.
    pub fn provider_for_node(&self, node: &Node) -> Result<Arc<dyn Provider>, CloudError> {
        let tag = node
            .provider
            .as_deref()
            .ok_or_else(|| CloudError::UnknownProvider("node has no provider tag".to_string()))?;
        let owner = node.user_id.as_deref().ok_or_else(|| {
            CloudError::MissingCredentials("management node has no provider owner".to_string())
        })?;
        self.provider_for_user(owner, tag)
    }

    pub fn provider_for_user(
        &self,
        user_id: &str,
        tag: &str,
    ) -> Result<Arc<dyn Provider>, CloudError> {
        let builder = self
            .builders
            .get(tag)
            .ok_or_else(|| CloudError::UnknownProvider(tag.to_string()))?;
        let api_token = self
            .catalog
            .get_setting(user_id, &provider_token_key(tag))?
            .ok_or_else(|| {
                CloudError::MissingCredentials(format!("no `{}` configured", provider_token_key(tag)))
            })?;
        Ok(builder.build(ProviderCredentials {
            api_token,
            deadline: self.deadline,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_support::{empty_catalog, some_node, some_user};
    use crate::cloud::provider::MockProvider;
    use assert_matches::assert_matches;

    fn mock_builder() -> Arc<dyn ProviderBuilder> {
        Arc::new(|_credentials: ProviderCredentials| {
            Arc::new(MockProvider::new()) as Arc<dyn Provider>
        })
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        let catalog = Arc::new(empty_catalog());
        let user = some_user(&catalog, "u1");
        let mut node = some_node(&catalog, &user, "web-1");
        node.provider = Some("hetzner".to_string());

        let registry = ProviderRegistry::new(catalog, Duration::from_secs(300));
        assert_matches!(
            registry.provider_for_node(&node),
            Err(CloudError::UnknownProvider(tag)) if tag == "hetzner"
        );
    }

    #[test]
    fn test_token_is_required() {
        let catalog = Arc::new(empty_catalog());
        let user = some_user(&catalog, "u1");
        let mut node = some_node(&catalog, &user, "web-1");
        node.provider = Some("hetzner".to_string());

        let mut registry = ProviderRegistry::new(catalog.clone(), Duration::from_secs(300));
        registry.register("hetzner", mock_builder());

        assert_matches!(
            registry.provider_for_node(&node),
            Err(CloudError::MissingCredentials(_))
        );

        catalog
            .set_setting(&user.id, &provider_token_key("hetzner"), "token")
            .unwrap();
        registry.provider_for_node(&node).unwrap();
    }

    #[test]
    fn test_untagged_node_is_rejected() {
        let catalog = Arc::new(empty_catalog());
        let user = some_user(&catalog, "u1");
        let node = some_node(&catalog, &user, "web-1");

        let registry = ProviderRegistry::new(catalog, Duration::from_secs(300));
        assert_matches!(
            registry.provider_for_node(&node),
            Err(CloudError::UnknownProvider(_))
        );
    }
}
