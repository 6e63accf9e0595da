//! HTTP JSON boundary: thin dispatch over the core.
//!
//! Handlers decode requests, extract the authenticated principal, call
//! into the engines and shape responses; they hold no business logic of
//! their own. Blocking core calls run on the actix blocking pool.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod responses;
pub mod server;

use std::sync::Arc;

use url::Url;

use crate::catalog::Catalog;
use crate::cloud::registry::ProviderRegistry;
use crate::deployment::DeploymentEngine;
use crate::migration::VolumeMigrator;
use crate::resources::ResourceProvisioner;
use crate::runner::factory::RunnerSource;
use crate::webhook::WebhookRedeployer;

/// Boundary-relevant slice of the configuration.
#[derive(Clone)]
pub struct BoundaryConfig {
    pub jwt_secret: String,
    pub root_email: Option<String>,
    pub app_url: Option<Url>,
}

/// Shared state handed to every handler.
pub struct AppState {
    pub catalog: Arc<Catalog>,
    pub engine: Arc<DeploymentEngine>,
    pub provisioner: Arc<ResourceProvisioner>,
    pub migrator: Arc<VolumeMigrator>,
    pub redeployer: Arc<WebhookRedeployer>,
    pub providers: Arc<ProviderRegistry>,
    pub runners: Arc<dyn RunnerSource>,
    pub config: BoundaryConfig,
}
