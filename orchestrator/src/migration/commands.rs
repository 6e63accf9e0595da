//! Target-side shell for the migration steps.
//!
//! Rollback commands guard on existence (`test -e … &&`, `|| true`) so the
//! whole rollback can be invoked repeatedly; forward steps stay strict so
//! a failure surfaces instead of silently skipping.

use crate::docker::shell::quote;

/// Canonical docker volume directory being migrated.
pub const DOCKER_VOLUMES_DIR: &str = "/var/lib/docker/volumes";
const BACKUP_DIR: &str = "/var/lib/docker/volumes.bak";

/// Default mount point for the attached block volume.
pub const DEFAULT_MOUNT_PATH: &str = "/mnt/localisprod-data";

pub fn format_device(device: &str) -> String {
    format!("mkfs.ext4 -F {}", quote(device))
}

pub fn mount_device(device: &str, mount_path: &str) -> String {
    let mount = quote(mount_path);
    format!("mkdir -p {mount} && mount {} {mount}", quote(device))
}

/// Copies the volume directory onto the new disk, preserving attributes.
pub fn sync_volumes(mount_path: &str) -> String {
    let destination = quote(&format!("{mount_path}/volumes/"));
    format!("mkdir -p {destination} && rsync -a {DOCKER_VOLUMES_DIR}/ {destination}")
}

pub fn rename_volumes_dir() -> String {
    format!("test -d {DOCKER_VOLUMES_DIR} && mv {DOCKER_VOLUMES_DIR} {BACKUP_DIR}")
}

pub fn symlink_volumes(mount_path: &str) -> String {
    format!(
        "ln -sfn {} {DOCKER_VOLUMES_DIR}",
        quote(&format!("{mount_path}/volumes"))
    )
}

pub fn undo_rename() -> String {
    format!("test -d {BACKUP_DIR} && mv {BACKUP_DIR} {DOCKER_VOLUMES_DIR} || true")
}

pub fn remove_symlink() -> String {
    format!("test -L {DOCKER_VOLUMES_DIR} && rm {DOCKER_VOLUMES_DIR} || true")
}

pub fn unmount(mount_path: &str) -> String {
    let mount = quote(mount_path);
    format!("mountpoint -q {mount} && umount {mount} || true")
}

pub fn delete_backup_dir() -> String {
    format!("test -d {BACKUP_DIR} && rm -rf {BACKUP_DIR} || true")
}
