//! Control-plane HTTP client.
//!
//! Every call is agent-initiated. Transport failures and 5xx/429 responses
//! are retried a bounded number of times; nothing here is ever fatal to the
//! scheduler loop.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use cronsync_config::BackendConfig;
use cronsync_protocols::JobInstance;

use crate::error::ControlPlaneError;
use crate::identity::EndpointIdentity;
use crate::token::EndpointToken;

#[derive(Debug, Clone, Serialize)]
pub struct EnrollRequest {
    pub name: String,
    pub hostname: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine_id: Option<String>,
    pub platform: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_repo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
}

impl EnrollRequest {
    pub fn new(identity: &EndpointIdentity) -> Self {
        Self {
            name: identity.name.clone(),
            hostname: identity.hostname.clone(),
            machine_id: identity.machine_id.clone(),
            platform: identity.platform.clone(),
            version: identity.version.clone(),
            git_repo_url: None,
            git_branch: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct EnrollResponse {
    #[serde(default)]
    endpoint_id: Option<u64>,
    /// Older servers only send this name.
    #[serde(default)]
    agent_id: Option<u64>,
    token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeartbeatRequest {
    pub status: String,
    pub platform: String,
    pub version: String,
    pub hostname: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    pub managed_count: usize,
    pub discovered_count: usize,
}

/// A foreign entry as the control plane's discovery endpoint expects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredJob {
    pub name: String,
    pub schedule: String,
    pub command: String,
    pub namespace: String,
}

impl From<&JobInstance> for DiscoveredJob {
    fn from(instance: &JobInstance) -> Self {
        Self {
            name: instance.job_name.clone(),
            schedule: instance.schedule.clone(),
            command: instance.original_command.clone(),
            namespace: instance.namespace.clone(),
        }
    }
}

/// One completed run of a managed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckinRequest {
    pub endpoint_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
    pub job_name: String,
    pub namespace: String,
    pub status: String,
    pub exit_code: i32,
    /// Whole seconds.
    pub duration: u64,
}

impl CheckinRequest {
    pub fn status_for(exit_code: i32) -> &'static str {
        if exit_code == 0 { "success" } else { "failure" }
    }
}

#[derive(Serialize)]
struct InstancesBody<'a> {
    instances: &'a [JobInstance],
}

#[derive(Serialize)]
struct DiscoveredBody<'a> {
    jobs: &'a [DiscoveredJob],
}

#[derive(Debug, Clone)]
pub struct ControlPlaneClient {
    base_url: String,
    client: reqwest::Client,
    max_retries: u32,
    retry_delay: Duration,
}

impl ControlPlaneClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ControlPlaneError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("cronsync-agent/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ControlPlaneError::Network(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            max_retries: 0,
            retry_delay: Duration::from_millis(500),
        })
    }

    /// `None` when no `api_url` is configured.
    pub fn from_config(config: &BackendConfig) -> Result<Option<Self>, ControlPlaneError> {
        let Some(url) = config.api_url.as_deref().filter(|_| config.is_enabled()) else {
            return Ok(None);
        };
        Ok(Some(
            Self::new(url, config.request_timeout())?
                .with_retries(config.max_retries, Duration::from_millis(500)),
        ))
    }

    pub fn with_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.max_retries = retries;
        self.retry_delay = delay;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_once<B: Serialize + ?Sized>(
        &self,
        url: &str,
        bearer: &str,
        body: &B,
    ) -> Result<reqwest::Response, ControlPlaneError> {
        let response = self
            .client
            .post(url)
            .bearer_auth(bearer)
            .json(body)
            .send()
            .await
            .map_err(|e| ControlPlaneError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(ControlPlaneError::Status { status, message });
        }
        Ok(response)
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        bearer: &str,
        body: &B,
    ) -> Result<reqwest::Response, ControlPlaneError> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 0;
        loop {
            match self.post_once(&url, bearer, body).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!("POST {} failed (attempt {}): {}, retrying", path, attempt, e);
                    tokio::time::sleep(self.retry_delay * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Exchange an enrollment token for endpoint credentials.
    pub async fn enroll(
        &self,
        enrollment_token: &str,
        request: &EnrollRequest,
    ) -> Result<EndpointToken, ControlPlaneError> {
        let response = self
            .post("/api/endpoints/enroll", enrollment_token, request)
            .await?;
        let body: EnrollResponse = response
            .json()
            .await
            .map_err(|e| ControlPlaneError::InvalidResponse(e.to_string()))?;
        let endpoint_id = body.endpoint_id.or(body.agent_id).ok_or_else(|| {
            ControlPlaneError::InvalidResponse("enrollment response has no endpoint id".to_string())
        })?;
        Ok(EndpointToken {
            endpoint_id,
            token: body.token,
        })
    }

    pub async fn heartbeat(
        &self,
        token: &EndpointToken,
        request: &HeartbeatRequest,
    ) -> Result<(), ControlPlaneError> {
        let path = format!("/api/endpoints/{}/heartbeat", token.endpoint_id);
        self.post(&path, &token.token, request).await?;
        Ok(())
    }

    pub async fn report_instances(
        &self,
        token: &EndpointToken,
        instances: &[JobInstance],
    ) -> Result<(), ControlPlaneError> {
        let path = format!("/api/endpoints/{}/job-instances", token.endpoint_id);
        self.post(&path, &token.token, &InstancesBody { instances })
            .await?;
        debug!("Reported {} job instance(s)", instances.len());
        Ok(())
    }

    pub async fn report_discovered(
        &self,
        token: &EndpointToken,
        jobs: &[DiscoveredJob],
    ) -> Result<(), ControlPlaneError> {
        let path = format!("/api/endpoints/{}/discovered-jobs", token.endpoint_id);
        self.post(&path, &token.token, &DiscoveredBody { jobs }).await?;
        debug!("Reported {} discovered job(s)", jobs.len());
        Ok(())
    }

    pub async fn checkin(
        &self,
        token: &EndpointToken,
        request: &CheckinRequest,
    ) -> Result<(), ControlPlaneError> {
        self.post("/api/runs/check-in", &token.token, request).await?;
        Ok(())
    }
}

/// Upstream sink for everything the loops report.
#[async_trait]
pub trait InstanceReporter: Send + Sync {
    async fn heartbeat(&self, request: &HeartbeatRequest) -> Result<(), ControlPlaneError>;

    async fn report_instances(&self, instances: &[JobInstance]) -> Result<(), ControlPlaneError>;

    async fn report_discovered(&self, jobs: &[DiscoveredJob]) -> Result<(), ControlPlaneError>;
}

/// [`InstanceReporter`] bound to one enrolled endpoint.
#[derive(Debug, Clone)]
pub struct EndpointReporter {
    client: ControlPlaneClient,
    token: EndpointToken,
}

impl EndpointReporter {
    pub fn new(client: ControlPlaneClient, token: EndpointToken) -> Self {
        Self { client, token }
    }

    pub fn endpoint_id(&self) -> u64 {
        self.token.endpoint_id
    }
}

#[async_trait]
impl InstanceReporter for EndpointReporter {
    async fn heartbeat(&self, request: &HeartbeatRequest) -> Result<(), ControlPlaneError> {
        self.client.heartbeat(&self.token, request).await
    }

    async fn report_instances(&self, instances: &[JobInstance]) -> Result<(), ControlPlaneError> {
        self.client.report_instances(&self.token, instances).await
    }

    async fn report_discovered(&self, jobs: &[DiscoveredJob]) -> Result<(), ControlPlaneError> {
        self.client.report_discovered(&self.token, jobs).await
    }
}

#[cfg(test)]
#[path = "control_tests.rs"]
mod tests;
