//! The check-in helper every managed scheduler entry runs through.
//!
//! The wrapped job keeps the scheduler's stdin/stdout/stderr and its exit
//! code. Reporting problems only ever reach stderr.

use std::path::Path;
use std::process::ExitStatus;
use std::time::{Duration, Instant};

use tracing::debug;
use uuid::Uuid;

use cronsync_config::{Config, ConfigLoader};
use cronsync_daemon::{CheckinRequest, ControlPlaneClient, ControlPlaneError, TokenStore};

/// Exit code when the job could not be started at all.
const SPAWN_FAILED: i32 = 127;

pub(crate) struct CheckinArgs {
    pub id: Option<Uuid>,
    pub name: String,
    pub namespace: String,
    pub command: Vec<String>,
}

/// Run the job, report it, and return the exit code to leave with.
pub(crate) async fn run_checkin(config_path: &Path, args: CheckinArgs) -> i32 {
    let (code, elapsed) = match execute(&args.command).await {
        Ok(result) => result,
        Err(e) => {
            let program = args.command.first().map(String::as_str).unwrap_or_default();
            eprintln!("cronsync: failed to start {}: {}", program, e);
            (SPAWN_FAILED, Duration::ZERO)
        }
    };

    match ConfigLoader::load(config_path) {
        Ok(config) => {
            if let Err(e) = report(&config, &args, code, elapsed).await {
                match e {
                    ControlPlaneError::Disabled | ControlPlaneError::NotEnrolled => {
                        debug!("Check-in not sent: {}", e)
                    }
                    e => eprintln!("cronsync: check-in for {} failed: {}", args.name, e),
                }
            }
        }
        Err(e) => eprintln!("cronsync: check-in for {} skipped: {}", args.name, e),
    }

    eprintln!("cronsync: job {} exited with code {}", args.name, code);
    code
}

/// Run `command` with inherited stdio and return its exit code and duration.
async fn execute(command: &[String]) -> std::io::Result<(i32, Duration)> {
    let Some((program, rest)) = command.split_first() else {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "no command given",
        ));
    };
    let started = Instant::now();
    let status = tokio::process::Command::new(program).args(rest).status().await?;
    Ok((exit_code(status), started.elapsed()))
}

/// The child's exit code, or `128 + signal` when it was killed.
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

async fn report(
    config: &Config,
    args: &CheckinArgs,
    code: i32,
    elapsed: Duration,
) -> Result<(), ControlPlaneError> {
    let client = ControlPlaneClient::from_config(&config.backend)?.ok_or(ControlPlaneError::Disabled)?;
    let token = TokenStore::new(&config.agent.token_path)
        .load()?
        .ok_or(ControlPlaneError::NotEnrolled)?;

    let request = CheckinRequest {
        endpoint_id: token.endpoint_id,
        job_id: args.id,
        job_name: args.name.clone(),
        namespace: args.namespace.clone(),
        status: CheckinRequest::status_for(code).to_string(),
        exit_code: code,
        duration: elapsed.as_secs(),
    };
    client.checkin(&token, &request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use cronsync_daemon::EndpointToken;
    use tempfile::TempDir;
    use wiremock::{Mock, MockServer, ResponseTemplate, matchers};

    fn args(command: &[&str]) -> CheckinArgs {
        CheckinArgs {
            id: Some(Uuid::parse_str("6f1c2e0a-3b9d-4c55-9a51-6a2b0c1d2e3f").unwrap()),
            name: "backup".to_string(),
            namespace: "production".to_string(),
            command: command.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_code_is_forwarded() {
        let (code, _) = execute(&args(&["/bin/sh", "-c", "exit 3"]).command)
            .await
            .unwrap();
        assert_eq!(code, 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_signal_maps_to_128_plus() {
        let (code, _) = execute(&args(&["/bin/sh", "-c", "kill -TERM $$"]).command)
            .await
            .unwrap();
        assert_eq!(code, 128 + 15);
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_failure() {
        let dir = TempDir::new().unwrap();
        let code = run_checkin(
            &dir.path().join("missing.toml"),
            args(&["/nonexistent/cronsync-test-binary"]),
        )
        .await;
        assert_eq!(code, SPAWN_FAILED);
    }

    #[tokio::test]
    async fn test_report_posts_checkin() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/api/runs/check-in"))
            .and(matchers::header("Authorization", "Bearer endpoint-secret"))
            .and(matchers::body_partial_json(serde_json::json!({
                "endpoint_id": 11,
                "job_name": "backup",
                "namespace": "production",
                "status": "failure",
                "exit_code": 2
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let token_path = dir.path().join("token.json");
        TokenStore::new(&token_path)
            .save(&EndpointToken {
                endpoint_id: 11,
                token: "endpoint-secret".to_string(),
            })
            .unwrap();

        let mut config = ConfigLoader::load_str("").unwrap();
        config.backend.api_url = Some(server.uri());
        config.agent.token_path = token_path.to_string_lossy().into_owned();

        report(&config, &args(&["/bin/false"]), 2, Duration::from_secs(4))
            .await
            .unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_wrapped_exit_code_reaches_caller_and_checkin() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/api/runs/check-in"))
            .and(matchers::body_partial_json(serde_json::json!({
                "job_name": "backup",
                "status": "failure",
                "exit_code": 3
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let token_path = dir.path().join("token.json");
        TokenStore::new(&token_path)
            .save(&EndpointToken {
                endpoint_id: 11,
                token: "endpoint-secret".to_string(),
            })
            .unwrap();
        let config_path = dir.path().join("agent.toml");
        std::fs::write(
            &config_path,
            format!(
                "[agent]\ntoken_path = {:?}\n\n[backend]\napi_url = {:?}\n",
                token_path.to_string_lossy(),
                server.uri()
            ),
        )
        .unwrap();

        let code = run_checkin(&config_path, args(&["/bin/sh", "-c", "exit 3"])).await;
        assert_eq!(code, 3);
    }

    #[tokio::test]
    async fn test_report_without_backend() {
        let config = ConfigLoader::load_str("").unwrap();
        let err = report(&config, &args(&["/bin/true"]), 0, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, ControlPlaneError::Disabled));
    }
}
