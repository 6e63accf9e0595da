//! The provider capability surface.

use super::CloudError;

#[derive(Debug, Clone, PartialEq)]
pub struct VolumeSpec {
    pub name: String,
    pub size_gb: u32,
    /// Region or availability zone of the instance the volume will attach
    /// to; providers reject cross-zone attachments.
    pub region: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderVolume {
    pub id: String,
    /// Device path on the instance, when the provider reports one at
    /// create or attach time (e.g. `/dev/disk/by-id/scsi-0Volume_…`).
    pub device_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstanceSpec {
    pub name: String,
    pub region: String,
    pub server_type: String,
    pub image: String,
    pub ssh_public_key: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionedInstance {
    pub instance_id: String,
    pub host: String,
}

/// Opaque provider operations. Implementations carry their own HTTP client
/// and credentials and enforce the configured per-call deadline.
#[cfg_attr(test, mockall::automock)]
pub trait Provider: Send + Sync + std::fmt::Debug {
    fn create_volume(&self, spec: &VolumeSpec) -> Result<ProviderVolume, CloudError>;

    /// Attaches the volume and returns it with the device path populated.
    fn attach_volume(&self, volume_id: &str, instance_id: &str)
        -> Result<ProviderVolume, CloudError>;

    fn detach_volume(&self, volume_id: &str, instance_id: &str) -> Result<(), CloudError>;

    fn delete_volume(&self, volume_id: &str) -> Result<(), CloudError>;

    fn provision_instance(&self, spec: &InstanceSpec)
        -> Result<ProvisionedInstance, CloudError>;
}
