//! Who this endpoint is, as reported to the control plane.

use std::path::Path;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use cronsync_config::AgentConfig;
use cronsync_protocols::{CommandRunner, CommandSpec};

const LINUX_MACHINE_ID_FILES: [&str; 2] = ["/etc/machine-id", "/var/lib/dbus/machine-id"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointIdentity {
    pub name: String,
    pub hostname: String,
    pub platform: String,
    pub version: String,
    /// SHA-256 of the platform machine id; stable across reinstalls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine_id: Option<String>,
}

impl EndpointIdentity {
    /// Configured values first, probed values otherwise.
    pub async fn probe(config: &AgentConfig, runner: &dyn CommandRunner) -> Self {
        let hostname = config.hostname.clone().unwrap_or_else(local_hostname);
        Self {
            name: config.name.clone().unwrap_or_else(|| hostname.clone()),
            platform: config
                .platform
                .clone()
                .unwrap_or_else(|| std::env::consts::OS.to_string()),
            version: env!("CARGO_PKG_VERSION").to_string(),
            machine_id: machine_id(runner).await,
            hostname,
        }
    }
}

fn local_hostname() -> String {
    #[cfg(unix)]
    {
        if let Ok(name) = nix::unistd::gethostname() {
            return name.to_string_lossy().into_owned();
        }
    }
    std::env::var("COMPUTERNAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Normalize and hash a raw platform id.
pub fn hash_machine_id(raw: &str) -> Option<String> {
    let normalized = raw.trim().to_lowercase();
    if normalized.is_empty() {
        return None;
    }
    Some(hex::encode(Sha256::digest(normalized.as_bytes())))
}

async fn machine_id(runner: &dyn CommandRunner) -> Option<String> {
    let raw = match std::env::consts::OS {
        "linux" => read_first(&LINUX_MACHINE_ID_FILES),
        "macos" => {
            let spec = CommandSpec::new("ioreg").args(["-rd1", "-c", "IOPlatformExpertDevice"]);
            command_stdout(runner, &spec)
                .await
                .and_then(|out| parse_ioreg_uuid(&out))
        }
        "windows" => {
            let spec = CommandSpec::new("reg").args([
                "query",
                r"HKEY_LOCAL_MACHINE\SOFTWARE\Microsoft\Cryptography",
                "/v",
                "MachineGuid",
            ]);
            command_stdout(runner, &spec)
                .await
                .and_then(|out| parse_machine_guid(&out))
        }
        _ => None,
    };
    if raw.is_none() {
        debug!("No machine id available on this platform");
    }
    raw.as_deref().and_then(hash_machine_id)
}

fn read_first(paths: &[&str]) -> Option<String> {
    paths
        .iter()
        .find_map(|p| std::fs::read_to_string(Path::new(p)).ok())
        .filter(|s| !s.trim().is_empty())
}

async fn command_stdout(runner: &dyn CommandRunner, spec: &CommandSpec) -> Option<String> {
    match runner.run(spec).await {
        Ok(output) if output.success() => Some(output.stdout),
        Ok(output) => {
            debug!("{} exited with {:?}", spec.display(), output.code);
            None
        }
        Err(e) => {
            debug!("{} failed: {}", spec.display(), e);
            None
        }
    }
}

fn parse_ioreg_uuid(output: &str) -> Option<String> {
    output
        .lines()
        .find(|l| l.contains("IOPlatformUUID"))
        .and_then(|l| l.split_once('='))
        .map(|(_, v)| v.trim().trim_matches('"').to_string())
}

fn parse_machine_guid(output: &str) -> Option<String> {
    output
        .lines()
        .find(|l| l.contains("MachineGuid"))
        .and_then(|l| l.split_whitespace().last())
        .map(str::to_string)
}
