//! Redeploys every running deployment tied to the repository a registry
//! event came from.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, info_span, warn};

use crate::catalog::entity::{Deployment, RunState, Service, User};
use crate::catalog::settings::WEBHOOK_SECRET_KEY;
use crate::catalog::Catalog;
use crate::deployment::{DeploymentEngine, EngineError};
use crate::docker::commands;
use crate::runner::factory::RunnerSource;

use super::signature::verify_signature;
use super::WebhookError;

/// Event type acted upon; everything else acknowledges as ignored.
const REGISTRY_PACKAGE_EVENT: &str = "registry_package";

#[derive(Debug, Deserialize)]
struct RegistryPackageEvent {
    action: Option<String>,
    repository: Option<Repository>,
}

#[derive(Debug, Deserialize)]
struct Repository {
    full_name: String,
}

#[derive(Debug, PartialEq)]
pub enum WebhookOutcome {
    Ignored,
    Redeployed { redeployed: usize, repo: String },
}

pub struct WebhookRedeployer {
    catalog: Arc<Catalog>,
    engine: Arc<DeploymentEngine>,
    runners: Arc<dyn RunnerSource>,
    root_email: Option<String>,
}

impl WebhookRedeployer {
    pub fn new(
        catalog: Arc<Catalog>,
        engine: Arc<DeploymentEngine>,
        runners: Arc<dyn RunnerSource>,
        root_email: Option<String>,
    ) -> Self {
        Self {
            catalog,
            engine,
            runners,
            root_email,
        }
    }

    pub fn handle(
        &self,
        token: &str,
        event: &str,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<WebhookOutcome, WebhookError> {
        let user = self
            .catalog
            .find_user_by_webhook_token(token)?
            .ok_or(WebhookError::UnknownToken)?;

        let secret = self
            .catalog
            .get_setting(&user.id, WEBHOOK_SECRET_KEY)?
            .ok_or_else(|| WebhookError::Unauthorized("webhook secret not configured".into()))?;
        let signature = signature
            .ok_or_else(|| WebhookError::Unauthorized("missing signature header".into()))?;
        verify_signature(&secret, body, signature)
            .map_err(|err| WebhookError::Unauthorized(err.to_string()))?;

        if event != REGISTRY_PACKAGE_EVENT {
            return Ok(WebhookOutcome::Ignored);
        }
        let payload: RegistryPackageEvent =
            serde_json::from_slice(body).map_err(|err| WebhookError::Payload(err.to_string()))?;
        if payload.action.as_deref() != Some("published") {
            return Ok(WebhookOutcome::Ignored);
        }
        let Some(repo) = payload.repository.map(|r| r.full_name) else {
            return Ok(WebhookOutcome::Ignored);
        };

        let span = info_span!("webhook_redeploy", user = %user.email, repo = %repo);
        let _guard = span.enter();

        let mut redeployed = 0;
        for service in self
            .catalog
            .list_services_by_user_and_repo(&user.id, &repo)?
        {
            for deployment in self
                .catalog
                .list_running_deployments_for_service(&service.id)?
            {
                match self.redeploy_one(&user, &service, &deployment) {
                    Ok(()) => redeployed += 1,
                    Err(err) => {
                        warn!(
                            error = %err,
                            deployment = %deployment.id,
                            "webhook redeploy failed"
                        );
                        let _ = self
                            .catalog
                            .update_deployment_status(&deployment.id, RunState::Failed);
                    }
                }
            }
        }
        info!(redeployed, "webhook handled");
        Ok(WebhookOutcome::Redeployed { redeployed, repo })
    }

    fn redeploy_one(
        &self,
        user: &User,
        service: &Service,
        deployment: &Deployment,
    ) -> Result<(), EngineError> {
        let is_root = self.root_email.as_deref() == Some(user.email.as_str());
        let node = self
            .catalog
            .get_node_for_user(&deployment.node_id, &user.id, is_root)?
            .ok_or(EngineError::NotFound)?;

        let runner = self.runners.runner_for(&node);
        self.engine
            .registry_login(runner.as_ref(), &user.id, &service.image)?;
        runner.run(&commands::pull(&service.image))?;
        self.engine.redeploy(service, &node, deployment)
    }
}
