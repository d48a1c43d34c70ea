//! Target lifecycle driven by user-supplied shell commands.

use std::process::Stdio;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::process::Command;
use tracing::{debug, info, warn};

use rtcheck_checkup::lifecycle::{TargetLifecycle, TargetSpec, TargetStatus};
use rtcheck_core::error::{CheckupError, CheckupResult};
use rtcheck_core::transport::TargetId;

use crate::config::LifecycleConfig;

/// Upper bound for a single lifecycle command.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

pub struct CommandLifecycle {
    config: LifecycleConfig,
    spec: TargetSpec,
}

impl CommandLifecycle {
    pub fn new(config: LifecycleConfig) -> Self {
        Self {
            config,
            spec: TargetSpec::default(),
        }
    }

    /// Spec exported to the status and delete commands.
    pub fn with_spec(mut self, spec: TargetSpec) -> Self {
        self.spec = spec;
        self
    }

    /// Run `script` for `target` and return its trimmed stdout.
    async fn run(&self, action: &str, script: &str, target: &TargetId, spec: &TargetSpec) -> CheckupResult<String> {
        if script.is_empty() {
            return Err(CheckupError::Lifecycle(format!("no {action} command configured")));
        }
        debug!(action, target = %target, script, "running lifecycle command");

        let child = Command::new(&self.config.shell)
            .arg("-c")
            .arg(script)
            .env("RTCHECK_NAMESPACE", &target.namespace)
            .env("RTCHECK_NAME", &target.name)
            .env("RTCHECK_IMAGE", &spec.image)
            .env("RTCHECK_NODE", &spec.target_node)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CheckupError::Lifecycle(format!("failed to spawn {action} command: {e}")))?;

        let output = match tokio::time::timeout(COMMAND_TIMEOUT, child.wait_with_output()).await {
            Ok(res) => res?,
            Err(_) => {
                warn!(action, target = %target, "lifecycle command timed out");
                return Err(CheckupError::Lifecycle(format!(
                    "{action} command timed out after {}",
                    humantime::format_duration(COMMAND_TIMEOUT)
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CheckupError::Lifecycle(format!(
                "{action} command failed ({}): {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Interpret the output of the status command.
pub fn parse_status(stdout: &str) -> Option<TargetStatus> {
    let mut words = stdout.split_whitespace();
    match words.next() {
        Some("absent") => None,
        Some("ready") => Some(TargetStatus {
            ready: true,
            node_name: words.next().unwrap_or_default().to_string(),
        }),
        _ => Some(TargetStatus::default()),
    }
}

impl TargetLifecycle for CommandLifecycle {
    fn create<'a>(&'a self, target: &'a TargetId, spec: &'a TargetSpec) -> BoxFuture<'a, CheckupResult<()>> {
        Box::pin(async move {
            self.run("create", &self.config.create, target, spec).await?;
            info!(target = %target, "target created");
            Ok(())
        })
    }

    fn status<'a>(&'a self, target: &'a TargetId) -> BoxFuture<'a, CheckupResult<Option<TargetStatus>>> {
        Box::pin(async move {
            let stdout = self.run("status", &self.config.status, target, &self.spec).await?;
            Ok(parse_status(&stdout))
        })
    }

    fn delete<'a>(&'a self, target: &'a TargetId) -> BoxFuture<'a, CheckupResult<()>> {
        Box::pin(async move {
            self.run("delete", &self.config.delete, target, &self.spec).await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_output() {
        assert_eq!(parse_status("absent"), None);
        assert_eq!(
            parse_status("ready worker-2\n"),
            Some(TargetStatus {
                ready: true,
                node_name: "worker-2".into(),
            })
        );
        assert_eq!(
            parse_status("ready"),
            Some(TargetStatus {
                ready: true,
                node_name: String::new(),
            })
        );
        assert_eq!(parse_status("Scheduling"), Some(TargetStatus::default()));
        assert_eq!(parse_status(""), Some(TargetStatus::default()));
    }

    fn lifecycle(create: &str, status: &str, delete: &str) -> CommandLifecycle {
        CommandLifecycle::new(LifecycleConfig {
            create: create.into(),
            status: status.into(),
            delete: delete.into(),
            shell: "sh".into(),
        })
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn commands_see_target_environment() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("target");
        let lc = lifecycle(
            &format!(
                "echo \"$RTCHECK_NAMESPACE/$RTCHECK_NAME $RTCHECK_IMAGE $RTCHECK_NODE\" > {}",
                marker.display()
            ),
            &format!("test -f {} && echo ready worker-1 || echo absent", marker.display()),
            &format!("rm {}", marker.display()),
        );
        let target = TargetId::new("ns", "vm");
        let spec = TargetSpec {
            target_node: "worker-1".into(),
            image: "img:1".into(),
        };

        lc.create(&target, &spec).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(&marker).unwrap().trim(),
            "ns/vm img:1 worker-1"
        );
        assert_eq!(
            lc.status(&target).await.unwrap(),
            Some(TargetStatus {
                ready: true,
                node_name: "worker-1".into(),
            })
        );

        lc.delete(&target).await.unwrap();
        assert_eq!(lc.status(&target).await.unwrap(), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_command_is_lifecycle_error() {
        let lc = lifecycle("echo quota exceeded >&2; exit 3", "", "");
        let err = lc
            .create(&TargetId::new("ns", "vm"), &TargetSpec::default())
            .await
            .unwrap_err();
        assert!(matches!(&err, CheckupError::Lifecycle(msg) if msg.contains("quota exceeded")));

        let err = lc.status(&TargetId::new("ns", "vm")).await.unwrap_err();
        assert_eq!(err.to_string(), "lifecycle error: no status command configured");
    }
}
