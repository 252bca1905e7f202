//! Orchestration API client.
//!
//! Every request carries the `X-Domino-Api-Key` header. Reads are retried on
//! transport failures and 5xx responses; job submission is attempted once
//! unless the caller opts into retries, since a duplicate submission starts a
//! second job.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use wq_types::{config_error, normalize_api_base, AuthError, RemoteServiceError, WqError, WqResult};

pub const API_KEY_HEADER: &str = "X-Domino-Api-Key";

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each later one.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// A single attempt.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(2_u32.saturating_pow(attempt))
    }
}

macro_rules! id_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

id_newtype!(
    /// Identity behind the API key.
    OwnerId
);
id_newtype!(ProjectId);
id_newtype!(HardwareTierId);

/// A compute profile selectable for a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareTier {
    pub id: HardwareTierId,
    pub name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HardwareTierList {
    hardware_tiers: Vec<HardwareTier>,
}

/// Exact-name scan over `tiers`.
pub fn find_hardware_tier(tiers: &[HardwareTier], name: &str) -> Option<HardwareTierId> {
    tiers.iter().find(|t| t.name == name).map(|t| t.id.clone())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitRef {
    pub ref_type: String,
    pub value: String,
}

impl GitRef {
    pub fn branch(name: impl Into<String>) -> Self {
        Self {
            ref_type: "branches".to_string(),
            value: name.into(),
        }
    }
}

/// Body of `POST /api/jobs/v1/jobs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub project_id: ProjectId,
    pub run_command: String,
    pub main_repo_git_ref: GitRef,
    pub hardware_tier: HardwareTierId,
    pub environment_id: String,
}

/// What the jobs API answered to a submission.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionAck {
    pub job_id: Option<String>,
    pub status_code: u16,
    pub body: Value,
}

/// Read a string or numeric id from the first of `keys` present in `value`.
fn id_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match value.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Async client for the orchestration REST API.
#[derive(Clone)]
pub struct OrchestrationClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    retry: RetryPolicy,
    submit_retry: RetryPolicy,
}

impl std::fmt::Debug for OrchestrationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestrationClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("retry", &self.retry)
            .field("submit_retry", &self.submit_retry)
            .finish()
    }
}

impl OrchestrationClient {
    pub fn new(api_host: &str, api_key: impl Into<String>, timeout: Duration) -> WqResult<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(config_error!("api_key", "the API key is empty"));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| config_error!("api_host", "{e}"))?;
        Ok(Self {
            base_url: normalize_api_base(api_host),
            api_key,
            client,
            retry: RetryPolicy::default(),
            submit_retry: RetryPolicy::none(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_submit_retry(mut self, retry: RetryPolicy) -> Self {
        self.submit_retry = retry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send one request, mapping the response to a status code and JSON body.
    async fn attempt(
        &self,
        method: reqwest::Method,
        url: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> WqResult<(u16, Value)> {
        let mut request = self
            .client
            .request(method, url)
            .header(API_KEY_HEADER, &self.api_key)
            .header(reqwest::header::ACCEPT, "application/json");
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| RemoteServiceError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        let status = response.status();
        let text = response.text().await.map_err(|e| RemoteServiceError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(AuthError::Rejected {
                url: url.to_string(),
                status: status.as_u16(),
            }
            .into());
        }
        if !status.is_success() {
            return Err(RemoteServiceError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body: text,
            }
            .into());
        }

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).map_err(|e| RemoteServiceError::InvalidResponse {
                url: url.to_string(),
                message: e.to_string(),
            })?
        };
        Ok((status.as_u16(), body))
    }

    async fn execute(
        &self,
        method: reqwest::Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
        policy: RetryPolicy,
    ) -> WqResult<(u16, Value)> {
        let url = self.url(path);
        let mut attempt = 0;
        loop {
            tracing::debug!(%method, %url, attempt = attempt + 1, "orchestration request");
            match self.attempt(method.clone(), &url, query, body).await {
                Err(WqError::Remote(e))
                    if e.is_transient() && attempt + 1 < policy.max_attempts =>
                {
                    let delay = policy.delay(attempt);
                    tracing::warn!("{e}; retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> WqResult<Value> {
        let (_, body) = self
            .execute(reqwest::Method::GET, path, query, None, self.retry)
            .await?;
        Ok(body)
    }

    /// `GET /v4/users/self`
    pub async fn resolve_owner(&self) -> WqResult<OwnerId> {
        let path = "/v4/users/self";
        let body = self.get(path, &[]).await?;
        id_field(&body, &["id"])
            .map(OwnerId)
            .ok_or_else(|| {
                RemoteServiceError::InvalidResponse {
                    url: self.url(path),
                    message: "user record has no id".to_string(),
                }
                .into()
            })
    }

    /// `GET /v4/projects?name=&ownerId=`, requiring exactly one match.
    pub async fn resolve_project(&self, owner: &OwnerId, name: &str) -> WqResult<ProjectId> {
        let path = "/v4/projects";
        let body = self
            .get(path, &[("name", name), ("ownerId", owner.0.as_str())])
            .await?;

        let matches: Vec<&Value> = match &body {
            Value::Array(items) => items.iter().collect(),
            Value::Object(_) => vec![&body],
            Value::Null => Vec::new(),
            _ => {
                return Err(RemoteServiceError::InvalidResponse {
                    url: self.url(path),
                    message: "expected a project or a list of projects".to_string(),
                }
                .into())
            }
        };

        match matches.as_slice() {
            [] => Err(RemoteServiceError::ProjectNotFound {
                name: name.to_string(),
                owner: owner.to_string(),
            }
            .into()),
            [project] => id_field(project, &["id", "projectId"])
                .map(ProjectId)
                .ok_or_else(|| {
                    RemoteServiceError::InvalidResponse {
                        url: self.url(path),
                        message: "project record has no id".to_string(),
                    }
                    .into()
                }),
            many => Err(RemoteServiceError::AmbiguousProject {
                name: name.to_string(),
                owner: owner.to_string(),
                count: many.len(),
            }
            .into()),
        }
    }

    /// `GET /v4/hardwareTier`
    pub async fn list_hardware_tiers(&self) -> WqResult<Vec<HardwareTier>> {
        let path = "/v4/hardwareTier";
        let body = self.get(path, &[]).await?;
        let list: HardwareTierList =
            serde_json::from_value(body).map_err(|e| RemoteServiceError::InvalidResponse {
                url: self.url(path),
                message: e.to_string(),
            })?;
        Ok(list.hardware_tiers)
    }

    /// Id of the tier called `name`, or `None` when no tier has that name.
    pub async fn resolve_hardware_tier(&self, name: &str) -> WqResult<Option<HardwareTierId>> {
        let tiers = self.list_hardware_tiers().await?;
        Ok(find_hardware_tier(&tiers, name))
    }

    /// `POST /api/jobs/v1/jobs`
    pub async fn submit_run(&self, request: &RunRequest) -> WqResult<SubmissionAck> {
        let body = serde_json::to_value(request)?;
        let (status_code, body) = self
            .execute(
                reqwest::Method::POST,
                "/api/jobs/v1/jobs",
                &[],
                Some(&body),
                self.submit_retry,
            )
            .await?;
        let job_id = id_field(&body, &["id", "jobId"])
            .or_else(|| body.get("job").and_then(|job| id_field(job, &["id", "jobId"])));
        Ok(SubmissionAck {
            job_id,
            status_code,
            body,
        })
    }

    /// `POST /api/jobs/v1/jobs/{id}/stop`
    pub async fn stop_job(&self, job_id: &str) -> WqResult<()> {
        let path = format!("/api/jobs/v1/jobs/{job_id}/stop");
        self.execute(reqwest::Method::POST, &path, &[], None, self.submit_retry)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wq_types::testing::serve;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn tiers() -> Vec<HardwareTier> {
        serde_json::from_value(json!([
            {"name": "small", "id": "t1"},
            {"name": "large", "id": "t2"}
        ]))
        .unwrap()
    }

    fn client(base: &str) -> OrchestrationClient {
        OrchestrationClient::new(base, "secret-key", Duration::from_secs(5))
            .unwrap()
            .with_retry(RetryPolicy::attempts(3).with_backoff(Duration::from_millis(1)))
    }

    #[test]
    fn hardware_tier_lookup() {
        assert_eq!(
            find_hardware_tier(&tiers(), "large"),
            Some(HardwareTierId("t2".into()))
        );
        assert_eq!(find_hardware_tier(&tiers(), "medium"), None);
        assert_eq!(find_hardware_tier(&[], "small"), None);
    }

    #[test]
    fn run_request_wire_format() {
        let request = RunRequest {
            project_id: ProjectId("p1".into()),
            run_command: "python prep.py".into(),
            main_repo_git_ref: GitRef::branch("dev"),
            hardware_tier: HardwareTierId("t2".into()),
            environment_id: "env-9".into(),
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "projectId": "p1",
                "runCommand": "python prep.py",
                "mainRepoGitRef": {"refType": "branches", "value": "dev"},
                "hardwareTier": "t2",
                "environmentId": "env-9"
            })
        );
    }

    #[test]
    fn retry_delay_doubles() {
        let policy = RetryPolicy::attempts(4).with_backoff(Duration::from_millis(100));
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(400));
        assert_eq!(RetryPolicy::attempts(0).max_attempts, 1);
    }

    #[test]
    fn debug_output_hides_api_key() {
        let client =
            OrchestrationClient::new("example.com", "secret-key", Duration::from_secs(1)).unwrap();
        let shown = format!("{client:?}");
        assert!(!shown.contains("secret-key"));
        assert_eq!(client.base_url(), "https://example.com");
        assert!(OrchestrationClient::new("example.com", " ", Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn owner_lookup_sends_api_key() {
        let server = serve(|_| (200, r#"{"id":"u-42","userName":"alice"}"#.to_string())).await;
        let owner = client(&server.base_url).resolve_owner().await.unwrap();
        assert_eq!(owner, OwnerId("u-42".into()));

        let seen = server.requests();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].target, "/v4/users/self");
        assert_eq!(seen[0].header(API_KEY_HEADER), Some("secret-key"));
    }

    #[tokio::test]
    async fn rejected_key_is_auth_error_without_retry() {
        let server = serve(|_| (401, "{}".to_string())).await;
        let err = client(&server.base_url).resolve_owner().await.unwrap_err();
        assert!(matches!(err, WqError::Auth(AuthError::Rejected { status: 401, .. })));
        assert_eq!(server.requests().len(), 1);
    }

    #[tokio::test]
    async fn reads_retry_transient_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let server = serve(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                (503, "busy".to_string())
            } else {
                (200, r#"{"id":"u-1"}"#.to_string())
            }
        })
        .await;

        let owner = client(&server.base_url).resolve_owner().await.unwrap();
        assert_eq!(owner.0, "u-1");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let server = serve(|_| (500, "boom".to_string())).await;
        let err = client(&server.base_url).resolve_owner().await.unwrap_err();
        assert!(matches!(
            err,
            WqError::Remote(RemoteServiceError::Status { status: 500, .. })
        ));
        assert_eq!(server.requests().len(), 3);
    }

    #[tokio::test]
    async fn project_lookup_requires_exactly_one_match() {
        let server = serve(|request| {
            let body = if request.target.contains("name=none") {
                "[]"
            } else if request.target.contains("name=twice") {
                r#"[{"id":"p1"},{"id":"p2"}]"#
            } else if request.target.contains("name=single") {
                r#"{"id":"p9","name":"single"}"#
            } else {
                r#"[{"id":"p1","name":"wine"}]"#
            };
            (200, body.to_string())
        })
        .await;
        let client = client(&server.base_url);
        let owner = OwnerId("u-1".into());

        assert_eq!(client.resolve_project(&owner, "wine").await.unwrap().0, "p1");
        assert_eq!(client.resolve_project(&owner, "single").await.unwrap().0, "p9");
        assert!(matches!(
            client.resolve_project(&owner, "none").await,
            Err(WqError::Remote(RemoteServiceError::ProjectNotFound { .. }))
        ));
        assert!(matches!(
            client.resolve_project(&owner, "twice").await,
            Err(WqError::Remote(RemoteServiceError::AmbiguousProject { count: 2, .. }))
        ));

        let first = &server.requests()[0];
        assert!(first.target.starts_with("/v4/projects?"));
        assert!(first.target.contains("ownerId=u-1"));
    }

    #[tokio::test]
    async fn hardware_tier_resolution_over_http() {
        let server = serve(|_| {
            (
                200,
                r#"{"hardwareTiers":[{"name":"small","id":"t1"},{"name":"large","id":"t2"}]}"#
                    .to_string(),
            )
        })
        .await;
        let client = client(&server.base_url);
        assert_eq!(
            client.resolve_hardware_tier("large").await.unwrap(),
            Some(HardwareTierId("t2".into()))
        );
        assert_eq!(client.resolve_hardware_tier("medium").await.unwrap(), None);
    }

    #[tokio::test]
    async fn submission_posts_payload_and_reads_job_id() {
        let server = serve(|_| (200, r#"{"id":"job-7","status":"Queued"}"#.to_string())).await;
        let request = RunRequest {
            project_id: ProjectId("p1".into()),
            run_command: "python prep.py".into(),
            main_repo_git_ref: GitRef::branch("test"),
            hardware_tier: HardwareTierId("t1".into()),
            environment_id: "env-1".into(),
        };

        let ack = client(&server.base_url).submit_run(&request).await.unwrap();
        assert_eq!(ack.job_id.as_deref(), Some("job-7"));
        assert_eq!(ack.status_code, 200);

        let seen = server.requests();
        assert_eq!(seen[0].method, "POST");
        assert_eq!(seen[0].target, "/api/jobs/v1/jobs");
        let sent: RunRequest = serde_json::from_str(&seen[0].body).unwrap();
        assert_eq!(sent, request);
    }

    #[tokio::test]
    async fn submission_is_not_retried_by_default() {
        let server = serve(|_| (502, "bad gateway".to_string())).await;
        let request = RunRequest {
            project_id: ProjectId("p1".into()),
            run_command: "cmd".into(),
            main_repo_git_ref: GitRef::branch("dev"),
            hardware_tier: HardwareTierId("t1".into()),
            environment_id: "e".into(),
        };
        let err = client(&server.base_url).submit_run(&request).await.unwrap_err();
        assert!(matches!(
            err,
            WqError::Remote(RemoteServiceError::Status { status: 502, .. })
        ));
        assert_eq!(server.requests().len(), 1);
    }

    #[tokio::test]
    async fn stop_job_posts_to_stop_endpoint() {
        let server = serve(|_| (200, String::new())).await;
        client(&server.base_url).stop_job("job-7").await.unwrap();
        let seen = server.requests();
        assert_eq!(seen[0].method, "POST");
        assert_eq!(seen[0].target, "/api/jobs/v1/jobs/job-7/stop");
    }
}
