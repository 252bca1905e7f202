//! MLflow tracking server backend (REST API 2.0).

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use wq_types::{config_error, normalize_api_base, AuthError, RemoteServiceError, WqResult};

use crate::grid::ParameterSet;
use crate::tracking::{ExperimentId, ModelSnapshot, RunId, RunStatus, Tracker};

const NOT_FOUND_CODE: &str = "RESOURCE_DOES_NOT_EXIST";
const PROXY_SCHEME: &str = "mlflow-artifacts:";

#[derive(Deserialize)]
struct GetExperimentResponse {
    experiment: ExperimentInfo,
}

#[derive(Deserialize)]
struct ExperimentInfo {
    experiment_id: String,
}

#[derive(Deserialize)]
struct CreateExperimentResponse {
    experiment_id: String,
}

#[derive(Deserialize)]
struct CreateRunResponse {
    run: RunEnvelope,
}

#[derive(Deserialize)]
struct RunEnvelope {
    info: RunInfo,
}

#[derive(Deserialize)]
struct RunInfo {
    run_id: String,
    #[serde(default)]
    artifact_uri: Option<String>,
}

/// Client for an MLflow tracking server.
#[derive(Clone)]
pub struct MlflowClient {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for MlflowClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MlflowClient")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl MlflowClient {
    pub fn new(tracking_uri: &str, timeout: Duration) -> WqResult<Self> {
        if tracking_uri.trim().is_empty() {
            return Err(config_error!(wq_types::MLFLOW_TRACKING_URI, "tracking URI is empty"));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| config_error!(wq_types::MLFLOW_TRACKING_URI, "{e}"))?;
        Ok(Self {
            base_url: normalize_api_base(tracking_uri),
            token: None,
            client,
        })
    }

    /// Send `Authorization: Bearer <token>` with every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn api_url(&self, endpoint: &str) -> String {
        format!("{}/api/2.0/mlflow/{}", self.base_url, endpoint)
    }

    /// Upload URL for `path` under the run's artifact root.
    ///
    /// Only roots served through the tracking server's artifact proxy can be
    /// written over HTTP. Without a reported root the server default layout
    /// `<experiment>/<run>/artifacts` is assumed.
    fn artifact_url(&self, run: &RunId, path: &str) -> WqResult<String> {
        let root = match &run.artifact_uri {
            Some(uri) => proxy_path(uri).ok_or_else(|| RemoteServiceError::InvalidResponse {
                url: self.api_url("runs/create"),
                message: format!(
                    "run {} stores artifacts at {uri}, which is not behind the artifact proxy",
                    run.id
                ),
            })?,
            None => format!("{}/{}/artifacts", run.experiment_id, run.id),
        };
        Ok(format!(
            "{}/api/2.0/mlflow-artifacts/artifacts/{}/{}",
            self.base_url, root, path
        ))
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        url: &str,
    ) -> WqResult<reqwest::Response> {
        let request = match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        request.send().await.map_err(|e| {
            RemoteServiceError::Transport {
                url: url.to_string(),
                message: e.to_string(),
            }
            .into()
        })
    }

    async fn check(url: &str, response: reqwest::Response) -> WqResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(AuthError::Rejected {
                url: url.to_string(),
                status: status.as_u16(),
            }
            .into());
        }
        let body = response.text().await.unwrap_or_default();
        Err(RemoteServiceError::Status {
            url: url.to_string(),
            status: status.as_u16(),
            body,
        }
        .into())
    }

    async fn decode<T: DeserializeOwned>(url: &str, response: reqwest::Response) -> WqResult<T> {
        response.json::<T>().await.map_err(|e| {
            RemoteServiceError::InvalidResponse {
                url: url.to_string(),
                message: e.to_string(),
            }
            .into()
        })
    }

    async fn post<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: serde_json::Value,
    ) -> WqResult<T> {
        let url = self.api_url(endpoint);
        tracing::debug!(%url, "POST");
        let response = self.send(self.client.post(&url).json(&body), &url).await?;
        let response = Self::check(&url, response).await?;
        Self::decode(&url, response).await
    }

    async fn post_unit(&self, endpoint: &str, body: serde_json::Value) -> WqResult<()> {
        let _: serde_json::Value = self.post(endpoint, body).await?;
        Ok(())
    }

    async fn upload(&self, run: &RunId, path: &str, bytes: Vec<u8>) -> WqResult<()> {
        let url = self.artifact_url(run, path)?;
        tracing::debug!(%url, size = bytes.len(), "uploading artifact");
        let response = self.send(self.client.put(&url).body(bytes), &url).await?;
        Self::check(&url, response).await?;
        Ok(())
    }
}

/// Path component of an `mlflow-artifacts:` URI, with or without an authority.
fn proxy_path(uri: &str) -> Option<String> {
    let rest = uri.strip_prefix(PROXY_SCHEME)?;
    let path = match rest.strip_prefix("//") {
        Some(authority) => authority.find('/').map(|i| &authority[i..])?,
        None => rest,
    };
    let path = path.trim_matches('/');
    (!path.is_empty()).then(|| path.to_string())
}

#[async_trait]
impl Tracker for MlflowClient {
    async fn get_experiment_by_name(&self, name: &str) -> WqResult<Option<ExperimentId>> {
        let url = self.api_url("experiments/get-by-name");
        let response = self
            .send(self.client.get(&url).query(&[("experiment_name", name)]), &url)
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if response.status() == reqwest::StatusCode::BAD_REQUEST {
            let body = response.text().await.unwrap_or_default();
            if body.contains(NOT_FOUND_CODE) {
                return Ok(None);
            }
            return Err(RemoteServiceError::Status {
                url,
                status: 400,
                body,
            }
            .into());
        }

        let response = Self::check(&url, response).await?;
        let found: GetExperimentResponse = Self::decode(&url, response).await?;
        Ok(Some(ExperimentId(found.experiment.experiment_id)))
    }

    async fn create_experiment(&self, name: &str) -> WqResult<ExperimentId> {
        let created: CreateExperimentResponse = self
            .post("experiments/create", json!({ "name": name }))
            .await?;
        Ok(ExperimentId(created.experiment_id))
    }

    async fn start_run(
        &self,
        experiment: &ExperimentId,
        run_name: Option<&str>,
    ) -> WqResult<RunId> {
        let mut body = json!({
            "experiment_id": experiment.0,
            "start_time": Utc::now().timestamp_millis(),
        });
        if let Some(run_name) = run_name {
            body["run_name"] = json!(run_name);
        }
        let created: CreateRunResponse = self.post("runs/create", body).await?;
        Ok(RunId {
            id: created.run.info.run_id,
            experiment_id: experiment.clone(),
            artifact_uri: created.run.info.artifact_uri,
        })
    }

    async fn log_params(&self, run: &RunId, params: &ParameterSet) -> WqResult<()> {
        let params: Vec<_> = params
            .iter()
            .map(|(key, value)| json!({ "key": key, "value": value.to_string() }))
            .collect();
        self.post_unit("runs/log-batch", json!({ "run_id": run.id, "params": params }))
            .await
    }

    async fn log_metrics(&self, run: &RunId, metrics: &BTreeMap<String, f64>) -> WqResult<()> {
        let timestamp = Utc::now().timestamp_millis();
        let metrics: Vec<_> = metrics
            .iter()
            .map(|(key, value)| {
                json!({ "key": key, "value": value, "timestamp": timestamp, "step": 0 })
            })
            .collect();
        self.post_unit("runs/log-batch", json!({ "run_id": run.id, "metrics": metrics }))
            .await
    }

    async fn log_model(
        &self,
        run: &RunId,
        artifact_path: &str,
        snapshot: &ModelSnapshot,
    ) -> WqResult<()> {
        let model = serde_json::to_vec_pretty(snapshot)?;
        self.upload(run, &format!("{artifact_path}/model.json"), model)
            .await?;

        let example = serde_json::to_vec(&json!({
            "columns": snapshot.features,
            "data": [snapshot.input_example],
        }))?;
        self.upload(run, &format!("{artifact_path}/input_example.json"), example)
            .await?;

        let history = json!([{
            "run_id": run.id,
            "artifact_path": artifact_path,
            "utc_time_created": Utc::now().format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
            "flavors": { "winequal": { "kind": snapshot.kind } },
        }]);
        self.post_unit(
            "runs/set-tag",
            json!({
                "run_id": run.id,
                "key": "mlflow.log-model.history",
                "value": history.to_string(),
            }),
        )
        .await
    }

    async fn end_run(&self, run: &RunId, status: RunStatus) -> WqResult<()> {
        self.post_unit(
            "runs/update",
            json!({
                "run_id": run.id,
                "status": status.as_str(),
                "end_time": Utc::now().timestamp_millis(),
            }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::ParameterValue;
    use crate::model::ModelKind;
    use crate::tracking::ensure_experiment;
    use wq_types::testing::serve;

    fn client(base: &str) -> MlflowClient {
        MlflowClient::new(base, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn missing_experiment_is_none() {
        let server = serve(|_| {
            (404, r#"{"error_code":"RESOURCE_DOES_NOT_EXIST","message":"nope"}"#.to_string())
        })
        .await;
        assert_eq!(
            client(&server.base_url).get_experiment_by_name("x").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn ensure_experiment_creates_when_missing() {
        let server = serve(|request| {
            match (
                request.method.as_str(),
                request.target.split('?').next().unwrap_or_default(),
            ) {
                ("GET", "/api/2.0/mlflow/experiments/get-by-name") => {
                    (404, r#"{"error_code":"RESOURCE_DOES_NOT_EXIST"}"#.to_string())
                }
                ("POST", "/api/2.0/mlflow/experiments/create") => {
                    (200, r#"{"experiment_id":"17"}"#.to_string())
                }
                _ => (500, "{}".to_string()),
            }
        })
        .await;

        let tracker = client(&server.base_url);
        let id = ensure_experiment(&tracker, "demo-alice-wine").await.unwrap();
        assert_eq!(id, ExperimentId("17".into()));

        let seen = server.requests();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].target.contains("experiment_name=demo-alice-wine"));
        let body: serde_json::Value = serde_json::from_str(&seen[1].body).unwrap();
        assert_eq!(body["name"], "demo-alice-wine");
    }

    #[tokio::test]
    async fn existing_experiment_is_reused() {
        let server = serve(|_| {
            (200, r#"{"experiment":{"experiment_id":"3","name":"e"}}"#.to_string())
        })
        .await;
        let id = ensure_experiment(&client(&server.base_url), "e").await.unwrap();
        assert_eq!(id.0, "3");
        assert_eq!(server.requests().len(), 1);
    }

    fn snapshot(params: &ParameterSet) -> ModelSnapshot {
        ModelSnapshot {
            kind: ModelKind::ElasticNet,
            features: vec!["alcohol".into()],
            coefficients: vec![0.3],
            intercept: 2.0,
            hyperparameters: params.clone(),
            input_example: vec![9.4],
        }
    }

    /// Tracking server whose `runs/create` reports `artifact_uri`.
    async fn tracking_server(artifact_uri: &'static str) -> wq_types::testing::StubServer {
        serve(move |request| {
            if request.target.ends_with("runs/create") {
                let info = json!({
                    "run_id": "abc",
                    "status": "RUNNING",
                    "artifact_uri": artifact_uri,
                });
                let body = json!({ "run": { "info": info } });
                (200, body.to_string())
            } else {
                (200, "{}".to_string())
            }
        })
        .await
    }

    #[tokio::test]
    async fn run_lifecycle_requests() {
        let server = tracking_server("mlflow-artifacts:/5/abc/artifacts").await;
        let tracker = client(&server.base_url);
        let exp = ExperimentId("5".into());

        let run = tracker.start_run(&exp, Some("trial-0")).await.unwrap();
        assert_eq!(run.id, "abc");
        assert_eq!(run.artifact_uri.as_deref(), Some("mlflow-artifacts:/5/abc/artifacts"));

        let mut params = ParameterSet::new();
        params.insert("alpha".into(), ParameterValue::Float(0.01));
        tracker.log_params(&run, &params).await.unwrap();
        tracker
            .log_metrics(&run, &BTreeMap::from([("rmse".to_string(), 0.75)]))
            .await
            .unwrap();

        let snapshot = snapshot(&params);
        tracker.log_model(&run, "ElasticNet", &snapshot).await.unwrap();
        tracker.end_run(&run, RunStatus::Finished).await.unwrap();

        let seen = server.requests();
        let targets: Vec<&str> = seen.iter().map(|s| s.target.as_str()).collect();
        assert_eq!(
            targets,
            vec![
                "/api/2.0/mlflow/runs/create",
                "/api/2.0/mlflow/runs/log-batch",
                "/api/2.0/mlflow/runs/log-batch",
                "/api/2.0/mlflow-artifacts/artifacts/5/abc/artifacts/ElasticNet/model.json",
                "/api/2.0/mlflow-artifacts/artifacts/5/abc/artifacts/ElasticNet/input_example.json",
                "/api/2.0/mlflow/runs/set-tag",
                "/api/2.0/mlflow/runs/update",
            ]
        );

        let params_body: serde_json::Value = serde_json::from_str(&seen[1].body).unwrap();
        assert_eq!(params_body["params"][0]["key"], "alpha");
        assert_eq!(params_body["params"][0]["value"], "0.01");

        assert_eq!(seen[3].method, "PUT");
        let uploaded: ModelSnapshot = serde_json::from_str(&seen[3].body).unwrap();
        assert_eq!(uploaded, snapshot);

        let update: serde_json::Value = serde_json::from_str(&seen[6].body).unwrap();
        assert_eq!(update["status"], "FINISHED");
        assert_eq!(update["run_id"], "abc");
    }

    #[tokio::test]
    async fn model_upload_follows_reported_artifact_root() {
        let server = tracking_server("mlflow-artifacts:/custom/abc/artifacts").await;
        let tracker = client(&server.base_url);

        let run = tracker
            .start_run(&ExperimentId("5".into()), None)
            .await
            .unwrap();
        tracker
            .log_model(&run, "ElasticNet", &snapshot(&ParameterSet::new()))
            .await
            .unwrap();

        let puts: Vec<String> = server
            .requests()
            .into_iter()
            .filter(|r| r.method == "PUT")
            .map(|r| r.target)
            .collect();
        assert_eq!(
            puts,
            vec![
                "/api/2.0/mlflow-artifacts/artifacts/custom/abc/artifacts/ElasticNet/model.json",
                "/api/2.0/mlflow-artifacts/artifacts/custom/abc/artifacts/ElasticNet/input_example.json",
            ]
        );
    }

    #[tokio::test]
    async fn artifact_root_outside_proxy_is_rejected() {
        let server = tracking_server("s3://bucket/mlruns/5/abc/artifacts").await;
        let tracker = client(&server.base_url);

        let run = tracker
            .start_run(&ExperimentId("5".into()), None)
            .await
            .unwrap();
        let err = tracker
            .log_model(&run, "ElasticNet", &snapshot(&ParameterSet::new()))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            wq_types::WqError::Remote(RemoteServiceError::InvalidResponse { .. })
        ));
        assert!(server.requests().iter().all(|r| r.method != "PUT"));
    }

    #[test]
    fn proxy_paths() {
        assert_eq!(
            proxy_path("mlflow-artifacts:/1/r/artifacts").as_deref(),
            Some("1/r/artifacts")
        );
        assert_eq!(
            proxy_path("mlflow-artifacts://tracking:5000/1/r/artifacts").as_deref(),
            Some("1/r/artifacts")
        );
        assert_eq!(proxy_path("file:///mlruns/1/r/artifacts"), None);
        assert_eq!(proxy_path("mlflow-artifacts:/"), None);
    }

    #[tokio::test]
    async fn rejected_credentials_are_auth_errors() {
        let server = serve(|_| (401, "{}".to_string())).await;
        let err = client(&server.base_url).create_experiment("x").await.unwrap_err();
        assert!(matches!(err, wq_types::WqError::Auth(_)));
    }

    #[tokio::test]
    async fn server_errors_surface_status() {
        let server = serve(|_| (503, "down".to_string())).await;
        let err = client(&server.base_url).get_experiment_by_name("x").await.unwrap_err();
        match err {
            wq_types::WqError::Remote(e) => assert!(e.is_transient()),
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn empty_uri_is_rejected() {
        assert!(MlflowClient::new("  ", Duration::from_secs(1)).is_err());
    }
}
