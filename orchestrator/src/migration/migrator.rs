//! The migration state machine.
//!
//! Every step persists its status before running the side effect, so a
//! crashed process leaves an honest record of how far the migration got.
//! Compensation is local and explicit per step; the full rollback path is
//! idempotent and shared with the user-triggered rollback endpoint.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, info_span, warn};

use crate::catalog::entity::{MigrationStatus, Node, NodeVolumeMigration};
use crate::catalog::Catalog;
use crate::cloud::provider::{Provider, VolumeSpec};
use crate::cloud::registry::ProviderRegistry;
use crate::docker::commands as docker;
use crate::runner::factory::RunnerSource;
use crate::runner::Runner;
use crate::utils::naming::sanitize;
use crate::utils::retry::retry;
use crate::utils::shutdown::{ShutdownBroadcaster, ShutdownSignal};
use crate::utils::threads::spawn_named_thread;

use super::commands;
use super::MigrationError;

const DEFAULT_VOLUME_SIZE_GB: u32 = 50;
const VERIFY_ATTEMPTS: usize = 5;
const VERIFY_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct VolumeMigrator {
    catalog: Arc<Catalog>,
    runners: Arc<dyn RunnerSource>,
    providers: Arc<ProviderRegistry>,
    shutdown: ShutdownBroadcaster,
    verify_attempts: usize,
    verify_interval: Duration,
}

impl VolumeMigrator {
    pub fn new(
        catalog: Arc<Catalog>,
        runners: Arc<dyn RunnerSource>,
        providers: Arc<ProviderRegistry>,
        shutdown: ShutdownBroadcaster,
    ) -> Self {
        Self {
            catalog,
            runners,
            providers,
            shutdown,
            verify_attempts: VERIFY_ATTEMPTS,
            verify_interval: VERIFY_INTERVAL,
        }
    }

    #[cfg(test)]
    fn with_fast_verification(mut self) -> Self {
        self.verify_attempts = 2;
        self.verify_interval = Duration::from_millis(1);
        self
    }

    /// Accepts a migration request, records it in `pending` and runs the
    /// state machine on a detached thread. Exactly one non-terminal
    /// migration is allowed per node.
    pub fn request(
        &self,
        user_id: &str,
        is_root: bool,
        node_id: &str,
        size_gb: Option<u32>,
    ) -> Result<NodeVolumeMigration, MigrationError> {
        let node = self
            .catalog
            .get_node_for_user(node_id, user_id, is_root)?
            .ok_or(MigrationError::NotFound)?;
        if node.provider.is_none() || node.provider_instance_id.is_none() {
            return Err(MigrationError::NodeNotProvisioned);
        }

        let migration = self.catalog.insert_migration(NodeVolumeMigration {
            id: String::new(),
            user_id: user_id.to_string(),
            node_id: node.id.clone(),
            mount_path: commands::DEFAULT_MOUNT_PATH.to_string(),
            size_gb: size_gb.unwrap_or(DEFAULT_VOLUME_SIZE_GB),
            provider_volume_id: None,
            device_path: None,
            status: MigrationStatus::Pending,
            error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })?;

        let migrator = self.clone();
        let signal = self.shutdown.subscribe();
        let thread_migration = migration.clone();
        spawn_named_thread(format!("volume-migration-{}", migration.id), move || {
            migrator.run_migration(thread_migration, node, signal);
        });

        Ok(migration)
    }

    /// Drives one migration to a terminal state. Public to the crate so
    /// tests can run the machine synchronously.
    pub(crate) fn run_migration(
        &self,
        migration: NodeVolumeMigration,
        node: Node,
        signal: ShutdownSignal,
    ) {
        let span = info_span!("volume_migration", migration = %migration.id, node = %node.name);
        let _guard = span.enter();

        match self.execute(&migration, &node, &signal) {
            Ok(final_status) => {
                info!(status = final_status.as_str(), "migration finished");
            }
            Err(err) => {
                error!(error = %err, "migration failed");
                let _ = self.catalog.set_migration_error(&migration.id, &err.to_string());
                let _ = self
                    .catalog
                    .update_migration_status(&migration.id, MigrationStatus::Failed);
            }
        }
    }

    fn execute(
        &self,
        migration: &NodeVolumeMigration,
        node: &Node,
        signal: &ShutdownSignal,
    ) -> Result<MigrationStatus, MigrationError> {
        let runner = self.runners.runner_for(node);
        let provider = self.providers.provider_for_node(node)?;
        let instance_id = node
            .provider_instance_id
            .clone()
            .ok_or(MigrationError::NodeNotProvisioned)?;

        // 1. provisioning: create the block volume in the instance's zone.
        self.advance(migration, MigrationStatus::Provisioning, signal)?;
        let volume = provider.create_volume(&VolumeSpec {
            name: format!("localisprod-data-{}", sanitize(&node.name)),
            size_gb: migration.size_gb,
            region: node.provider_region.clone().unwrap_or_default(),
        })?;
        self.catalog.update_migration_provider_refs(
            &migration.id,
            Some(&volume.id),
            volume.device_path.as_deref(),
        )?;

        // 2. provisioned: attach. On failure, delete the volume.
        self.advance(migration, MigrationStatus::Provisioned, signal)?;
        let device = match provider.attach_volume(&volume.id, &instance_id) {
            Ok(attached) => attached.device_path.or(volume.device_path.clone()),
            Err(err) => {
                self.delete_volume(provider.as_ref(), &volume.id);
                return Err(err.into());
            }
        };
        let Some(device) = device else {
            self.detach_and_delete(provider.as_ref(), &volume.id, &instance_id);
            return Err(MigrationError::NoDevicePath);
        };
        self.catalog
            .update_migration_provider_refs(&migration.id, Some(&volume.id), Some(&device))?;

        // 3. mounted: format and mount. On failure, detach+delete.
        self.advance(migration, MigrationStatus::Mounted, signal)?;
        let mount_result = runner
            .run(&commands::format_device(&device))
            .and_then(|_| runner.run(&commands::mount_device(&device, &migration.mount_path)));
        if let Err(err) = mount_result {
            self.detach_and_delete(provider.as_ref(), &volume.id, &instance_id);
            return Err(err.into());
        }

        // 4. synced: copy the runtime's volume directory.
        self.advance(migration, MigrationStatus::Synced, signal)?;
        runner.run(&commands::sync_volumes(&migration.mount_path))?;

        // 5. stopping: stop every catalog-known container on the node.
        self.advance(migration, MigrationStatus::Stopping, signal)?;
        let containers = self.catalog.list_container_names_on_node(&node.id)?;
        self.stop_containers(runner.as_ref(), &containers);

        // 6. renamed: move the canonical directory aside. On failure,
        //    restart containers and detach+delete.
        self.advance(migration, MigrationStatus::Renamed, signal)?;
        if let Err(err) = runner.run(&commands::rename_volumes_dir()) {
            self.start_containers(runner.as_ref(), &containers);
            self.detach_and_delete(provider.as_ref(), &volume.id, &instance_id);
            return Err(err.into());
        }

        // 7. symlinked: point the canonical path at the new disk. On
        //    failure, undo the rename, restart, detach+delete.
        self.advance(migration, MigrationStatus::Symlinked, signal)?;
        if let Err(err) = runner.run(&commands::symlink_volumes(&migration.mount_path)) {
            let _ = runner.run(&commands::undo_rename());
            self.start_containers(runner.as_ref(), &containers);
            self.detach_and_delete(provider.as_ref(), &volume.id, &instance_id);
            return Err(err.into());
        }

        // 8. restarting.
        self.advance(migration, MigrationStatus::Restarting, signal)?;
        self.start_containers(runner.as_ref(), &containers);

        // 9. verified: every container must come back up, with a grace
        //    period for slow starters.
        self.advance(migration, MigrationStatus::Verified, signal)?;
        let healthy = retry(self.verify_attempts, self.verify_interval, || {
            self.all_running(runner.as_ref(), &containers)
        })
        .is_ok();
        if !healthy {
            warn!("post-migration health check failed, rolling back");
            self.catalog
                .update_migration_status(&migration.id, MigrationStatus::RollingBack)?;
            self.rollback_node(
                runner.as_ref(),
                Some((provider.as_ref(), volume.id.as_str(), instance_id.as_str())),
                &containers,
                &migration.mount_path,
            );
            self.catalog
                .set_migration_error(&migration.id, "post-migration health check failed")?;
            self.catalog
                .update_migration_status(&migration.id, MigrationStatus::RolledBack)?;
            return Ok(MigrationStatus::RolledBack);
        }

        // 10. completed.
        self.advance(migration, MigrationStatus::Completed, signal)?;
        Ok(MigrationStatus::Completed)
    }

    /// User-triggered rollback of the latest migration, allowed once it is
    /// terminal (`completed` or `failed`).
    pub fn rollback_request(
        &self,
        user_id: &str,
        is_root: bool,
        node_id: &str,
    ) -> Result<NodeVolumeMigration, MigrationError> {
        let node = self
            .catalog
            .get_node_for_user(node_id, user_id, is_root)?
            .ok_or(MigrationError::NotFound)?;
        let migration = self
            .catalog
            .get_latest_migration(&node.id)?
            .ok_or(MigrationError::NotFound)?;
        if !matches!(
            migration.status,
            MigrationStatus::Completed | MigrationStatus::Failed
        ) {
            return Err(MigrationError::InvalidState(migration.status));
        }

        self.catalog
            .update_migration_status(&migration.id, MigrationStatus::RollingBack)?;
        let accepted = self
            .catalog
            .get_migration(&migration.id)?
            .ok_or(MigrationError::NotFound)?;

        let migrator = self.clone();
        spawn_named_thread(format!("volume-rollback-{}", migration.id), move || {
            let runner = migrator.runners.runner_for(&node);
            let containers = match migrator.catalog.list_container_names_on_node(&node.id) {
                Ok(containers) => containers,
                Err(err) => {
                    warn!(error = %err, "rollback could not enumerate containers");
                    Vec::new()
                }
            };
            let provider = migrator.providers.provider_for_node(&node).ok();
            let volume_ref = match (
                &provider,
                &migration.provider_volume_id,
                &node.provider_instance_id,
            ) {
                (Some(provider), Some(volume_id), Some(instance_id)) => {
                    Some((provider.as_ref(), volume_id.as_str(), instance_id.as_str()))
                }
                _ => None,
            };
            migrator.rollback_node(
                runner.as_ref(),
                volume_ref,
                &containers,
                &migration.mount_path,
            );
            let _ = migrator
                .catalog
                .update_migration_status(&migration.id, MigrationStatus::RolledBack);
        });

        Ok(accepted)
    }

    /// Deletes `/var/lib/docker/volumes.bak`, only once the latest
    /// migration reached `completed`.
    pub fn delete_backup(
        &self,
        user_id: &str,
        is_root: bool,
        node_id: &str,
    ) -> Result<(), MigrationError> {
        let node = self
            .catalog
            .get_node_for_user(node_id, user_id, is_root)?
            .ok_or(MigrationError::NotFound)?;
        let migration = self
            .catalog
            .get_latest_migration(&node.id)?
            .ok_or(MigrationError::NotFound)?;
        if migration.status != MigrationStatus::Completed {
            return Err(MigrationError::InvalidState(migration.status));
        }
        let runner = self.runners.runner_for(&node);
        runner.run(&commands::delete_backup_dir())?;
        Ok(())
    }

    pub fn status(
        &self,
        user_id: &str,
        is_root: bool,
        node_id: &str,
    ) -> Result<Option<NodeVolumeMigration>, MigrationError> {
        let node = self
            .catalog
            .get_node_for_user(node_id, user_id, is_root)?
            .ok_or(MigrationError::NotFound)?;
        Ok(self.catalog.get_latest_migration(&node.id)?)
    }

    /// Writes the status first, so the persisted sequence is always a
    /// prefix of the machine's grammar, then checks for shutdown.
    fn advance(
        &self,
        migration: &NodeVolumeMigration,
        status: MigrationStatus,
        signal: &ShutdownSignal,
    ) -> Result<(), MigrationError> {
        if signal.now() {
            return Err(MigrationError::Interrupted);
        }
        self.catalog.update_migration_status(&migration.id, status)?;
        Ok(())
    }

    /// Stop containers → remove symlink → restore the backup directory →
    /// restart containers → unmount → detach+delete the provider volume.
    /// Every operation guards on existence, so repeating the rollback is
    /// harmless.
    fn rollback_node(
        &self,
        runner: &dyn Runner,
        volume: Option<(&dyn Provider, &str, &str)>,
        containers: &[String],
        mount_path: &str,
    ) {
        self.stop_containers(runner, containers);
        for command in [
            commands::remove_symlink(),
            commands::undo_rename(),
        ] {
            if let Err(err) = runner.run(&command) {
                warn!(error = %err, command = %command, "rollback command failed");
            }
        }
        self.start_containers(runner, containers);
        if let Err(err) = runner.run(&commands::unmount(mount_path)) {
            warn!(error = %err, "rollback unmount failed");
        }
        if let Some((provider, volume_id, instance_id)) = volume {
            self.detach_and_delete(provider, volume_id, instance_id);
        }
    }

    fn stop_containers(&self, runner: &dyn Runner, containers: &[String]) {
        for container in containers {
            // Already-stopped containers are fine.
            if let Err(err) = runner.run(&format!("{} || true", docker::stop(container))) {
                warn!(error = %err, container = %container, "could not stop container");
            }
        }
    }

    fn start_containers(&self, runner: &dyn Runner, containers: &[String]) {
        for container in containers {
            if let Err(err) = runner.run(&format!("{} || true", docker::start(container))) {
                warn!(error = %err, container = %container, "could not start container");
            }
        }
    }

    fn all_running(&self, runner: &dyn Runner, containers: &[String]) -> Result<(), String> {
        for container in containers {
            let status = runner
                .run(&docker::inspect_status(container))
                .map_err(|err| err.to_string())?;
            if status.trim() != "running" {
                return Err(format!("container `{container}` is {status}"));
            }
        }
        Ok(())
    }

    fn detach_and_delete(&self, provider: &dyn Provider, volume_id: &str, instance_id: &str) {
        if let Err(err) = provider.detach_volume(volume_id, instance_id) {
            warn!(error = %err, volume = %volume_id, "could not detach volume");
        }
        self.delete_volume(provider, volume_id);
    }

    fn delete_volume(&self, provider: &dyn Provider, volume_id: &str) {
        if let Err(err) = provider.delete_volume(volume_id) {
            warn!(error = %err, volume = %volume_id, "could not delete volume");
        }
    }
}
