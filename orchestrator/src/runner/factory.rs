//! Per-call runner selection: local shell for `is_local` nodes, SSH for
//! everything else. Behind a trait so engines and background loops can be
//! exercised against mock runners.

use std::sync::Arc;

use crate::catalog::entity::Node;

use super::local::LocalRunner;
use super::ssh::SshRunner;
use super::{Runner, SshOptions};

#[cfg_attr(test, mockall::automock)]
pub trait RunnerSource: Send + Sync {
    fn runner_for(&self, node: &Node) -> Arc<dyn Runner>;
}

pub struct RunnerFactory {
    ssh_options: SshOptions,
}

impl RunnerFactory {
    pub fn new(ssh_options: SshOptions) -> Self {
        Self { ssh_options }
    }
}

impl RunnerSource for RunnerFactory {
    fn runner_for(&self, node: &Node) -> Arc<dyn Runner> {
        if node.is_local {
            Arc::new(LocalRunner::default())
        } else {
            Arc::new(SshRunner::new(node, self.ssh_options.clone()))
        }
    }
}
