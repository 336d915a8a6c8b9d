//! Container-runtime transport: wraps [`super::StdioTransport`]'s framing
//! around a `podman run` / `docker run` invocation instead of the bare
//! command, applying a mount deny-list and default isolation policy.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use super::{NotificationHandler, StdioTransport, Transport};
use crate::config::{ContainerResources, NetworkMode};
use crate::protocol::JsonRpcResponse;
use crate::{Error, Result};

/// Host paths that may never be bind-mounted into a container provider.
const MOUNT_DENY_LIST: &[&str] = &[
    "/", "/etc", "/var", "/usr", "/bin", "/sbin", "/lib", "/lib64", "/boot", "/root", "/sys",
    "/proc",
];

/// Container-backed provider transport.
pub struct ContainerTransport {
    inner: Arc<StdioTransport>,
    image: String,
    volumes: Vec<String>,
    resources: ContainerResources,
    network: NetworkMode,
    read_only: bool,
    runtime: String,
}

impl ContainerTransport {
    /// Build a transport for the given image, validating volume specs
    /// against the deny-list before anything is spawned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a volume spec targets a denied host path
    /// or is malformed (not `host:container[:mode]`).
    pub fn new(
        image: &str,
        volumes: Vec<String>,
        resources: ContainerResources,
        network: NetworkMode,
        read_only: bool,
        env: HashMap<String, String>,
    ) -> Result<Arc<Self>> {
        for spec in &volumes {
            validate_volume_spec(spec)?;
        }
        let runtime = detect_runtime();
        Ok(Arc::new(Self {
            inner: StdioTransport::new(&[runtime.clone()], env, None),
            image: image.to_string(),
            volumes,
            resources,
            network,
            read_only,
            runtime,
        }))
    }

    /// Build the `run` command and spawn it, then perform the MCP handshake
    /// on the resulting stdio pipes exactly as [`StdioTransport`] does.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportError`] on spawn or handshake failure.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut cmd = Command::new(&self.runtime);
        cmd.arg("run").arg("--rm").arg("-i");

        match self.network {
            NetworkMode::None => {
                cmd.arg("--network=none");
            }
            NetworkMode::Bridge => {
                cmd.arg("--network=bridge");
            }
            NetworkMode::Host => {
                cmd.arg("--network=host");
            }
        }
        if self.read_only {
            cmd.arg("--read-only");
        }
        cmd.arg("--cap-drop=all");

        if let Some(ref mem) = self.resources.memory {
            cmd.arg(format!("--memory={mem}"));
        }
        if let Some(ref cpu) = self.resources.cpu {
            cmd.arg(format!("--cpus={cpu}"));
        }
        for v in &self.volumes {
            cmd.arg("-v").arg(v);
        }
        cmd.arg(&self.image);

        self.inner.spawn_from_command(cmd).await
    }
}

/// Prefer rootless `podman`, fall back to classic `docker`.
fn detect_runtime() -> String {
    if which("podman") {
        "podman".to_string()
    } else {
        "docker".to_string()
    }
}

fn which(bin: &str) -> bool {
    std::env::var_os("PATH")
        .map(|paths| {
            std::env::split_paths(&paths).any(|dir| dir.join(bin).is_file())
        })
        .unwrap_or(false)
}

fn validate_volume_spec(spec: &str) -> Result<()> {
    let host = spec.split(':').next().unwrap_or_default();
    if host.is_empty() {
        return Err(Error::Config(format!("malformed volume spec: {spec:?}")));
    }
    if MOUNT_DENY_LIST.contains(&host) {
        return Err(Error::Config(format!(
            "volume spec '{spec}' mounts a denied host path '{host}'"
        )));
    }
    Ok(())
}

#[async_trait]
impl Transport for ContainerTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse> {
        self.inner.request(method, params).await
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.inner.notify(method, params).await
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }

    fn stderr_tail(&self) -> Vec<String> {
        self.inner.stderr_tail()
    }

    fn set_notification_handler(&self, handler: NotificationHandler) {
        self.inner.set_notification_handler(handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_denied_host_paths() {
        for denied in MOUNT_DENY_LIST {
            let spec = format!("{denied}:/data:ro");
            assert!(validate_volume_spec(&spec).is_err(), "{spec} should be denied");
        }
    }

    #[test]
    fn accepts_ordinary_volume_spec() {
        assert!(validate_volume_spec("/home/user/data:/data:rw").is_ok());
    }

    #[test]
    fn rejects_empty_host_path() {
        assert!(validate_volume_spec(":/data:rw").is_err());
    }
}
