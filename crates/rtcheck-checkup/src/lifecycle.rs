//! Remote target lifecycle interface.

use futures_util::future::BoxFuture;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use rtcheck_core::error::CheckupResult;
use rtcheck_core::transport::TargetId;

pub const TARGET_NAME_PREFIX: &str = "realtime-vmi-under-test";

const RANDOM_SUFFIX_LEN: usize = 5;

/// Declarative description of the target to create.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpec {
    /// Node the target must be scheduled on. Empty means any node.
    pub target_node: String,
    pub image: String,
}

/// Observed state of an existing target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetStatus {
    pub ready: bool,
    pub node_name: String,
}

/// Creates, inspects, and deletes remote targets.
pub trait TargetLifecycle: Send + Sync {
    fn create<'a>(&'a self, target: &'a TargetId, spec: &'a TargetSpec) -> BoxFuture<'a, CheckupResult<()>>;

    /// Current status, or `None` when the target does not exist.
    fn status<'a>(&'a self, target: &'a TargetId) -> BoxFuture<'a, CheckupResult<Option<TargetStatus>>>;

    fn delete<'a>(&'a self, target: &'a TargetId) -> BoxFuture<'a, CheckupResult<()>>;
}

/// A fresh target name: the fixed prefix plus a random lowercase suffix.
pub fn random_target_name() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RANDOM_SUFFIX_LEN)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("{TARGET_NAME_PREFIX}-{suffix}")
}
