//! Wires the catalog, cipher, runners, engines and background loops
//! together and runs the HTTP server until the process is told to stop.

use std::sync::Arc;

use actix_web::web;
use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::cipher::SecretCipher;
use crate::cloud::registry::ProviderRegistry;
use crate::deployment::DeploymentEngine;
use crate::http::{server, AppState, BoundaryConfig};
use crate::migration::VolumeMigrator;
use crate::reconciler::{Reconciler, ReconcilerConfig};
use crate::resources::ResourceProvisioner;
use crate::runner::factory::{RunnerFactory, RunnerSource};
use crate::runner::SshOptions;
use crate::utils::shutdown::ShutdownBroadcaster;
use crate::webhook::WebhookRedeployer;

use super::config::OrchestratorConfig;
use super::error::OrchestratorError;

pub fn run(config: OrchestratorConfig) -> Result<(), OrchestratorError> {
    let cipher = match &config.cipher_key {
        Some(key) => SecretCipher::new(key.as_bytes())?,
        None => {
            warn!("no cipher_key configured; catalog secrets will be stored unsealed");
            SecretCipher::passthrough()
        }
    };
    let catalog = Arc::new(Catalog::open(&config.database_path, Arc::new(cipher))?);
    info!(path = %config.database_path.display(), "catalog opened");

    let mut ssh_options = SshOptions {
        connect_timeout: config.ssh.connect_timeout,
        strict_host_key_checking: config.ssh.strict_host_key_checking,
        ..SshOptions::default()
    };
    if let Some(known_hosts) = &config.ssh.known_hosts_path {
        ssh_options.known_hosts_path = known_hosts.clone();
    }
    if !ssh_options.strict_host_key_checking {
        warn!("SSH host-key verification is disabled by configuration");
    }

    let runners: Arc<dyn RunnerSource> = Arc::new(RunnerFactory::new(ssh_options));
    let providers = Arc::new(ProviderRegistry::new(
        catalog.clone(),
        config.provider_deadline,
    ));
    let engine = Arc::new(DeploymentEngine::new(catalog.clone(), runners.clone()));
    let provisioner = Arc::new(ResourceProvisioner::new(catalog.clone(), runners.clone()));

    let shutdown = ShutdownBroadcaster::new();
    let migrator = Arc::new(VolumeMigrator::new(
        catalog.clone(),
        runners.clone(),
        providers.clone(),
        shutdown.clone(),
    ));
    let redeployer = Arc::new(WebhookRedeployer::new(
        catalog.clone(),
        engine.clone(),
        runners.clone(),
        config.root_email.clone(),
    ));

    let reconciler = Arc::new(Reconciler::new(
        catalog.clone(),
        engine.clone(),
        runners.clone(),
        ReconcilerConfig {
            image_check_interval: config.reconciler.image_check_interval,
            health_check_interval: config.reconciler.health_check_interval,
        },
    ));
    let background_tasks = reconciler.start(&shutdown);

    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            info!("stop requested");
            shutdown.broadcast();
        })
        .map_err(|err| OrchestratorError::Signal(err.to_string()))?;
    }

    let state = web::Data::new(AppState {
        catalog,
        engine,
        provisioner,
        migrator,
        redeployer,
        providers,
        runners,
        config: BoundaryConfig {
            jwt_secret: config.jwt_secret.clone(),
            root_email: config.root_email.clone(),
            app_url: config.app_url.clone(),
        },
    });

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let served = runtime.block_on(server::serve(
        state,
        &config.server.host,
        config.server.port,
        config.server.workers,
        &shutdown,
    ));

    // Reached on graceful stop or on a server error; either way the
    // background loops must not outlive the process.
    shutdown.broadcast();
    for task in background_tasks {
        task.join();
    }
    info!("orchestrator stopped");
    served.map_err(OrchestratorError::from)
}
