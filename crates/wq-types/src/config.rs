//! Run configuration assembled once at startup from the process environment.
//!
//! Every binary builds one immutable value here and passes it down by
//! reference. Lookups go through [`EnvSource`] so tests can supply a map
//! instead of mutating the real environment.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::errors::{ConfigError, WqResult};

pub const DOMINO_PROJECT_OWNER: &str = "DOMINO_PROJECT_OWNER";
pub const DOMINO_PROJECT_NAME: &str = "DOMINO_PROJECT_NAME";
pub const DOMINO_API_HOST: &str = "DOMINO_API_HOST";
pub const DOMINO_DATA_PREP_SCRIPT: &str = "DOMINO_DATA_PREP_SCRIPT";
pub const DOMINO_HARDWARE_TIER: &str = "DOMINO_HARDWARE_TIER";
pub const DOMINO_ENVIRONMENT_ID: &str = "DOMINO_ENVIRONMENT_ID";
pub const DOMINO_STARTING_USERNAME: &str = "DOMINO_STARTING_USERNAME";
pub const MLFLOW_TRACKING_URI: &str = "MLFLOW_TRACKING_URI";
pub const WQ_EXPERIMENT_PREFIX: &str = "WQ_EXPERIMENT_PREFIX";
pub const WQ_DATA_ROOT: &str = "WQ_DATA_ROOT";

/// Where the prep job writes its partitions.
pub const DEFAULT_WRITE_ROOT: &str = "/mnt/data/local";
/// Where the training job reads them back (the same dataset, mounted read-side).
pub const DEFAULT_READ_ROOT: &str = "/mnt/data";
pub const DEFAULT_EXPERIMENT_PREFIX: &str = "demo";

/// Source of configuration variables.
pub trait EnvSource {
    fn var(&self, key: &str) -> Option<String>;
}

/// Reads from `std::env`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Fixed set of variables, used by tests and embedders.
#[derive(Debug, Clone, Default)]
pub struct MapEnv {
    vars: HashMap<String, String>,
}

impl MapEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }
}

impl EnvSource for MapEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}

/// Deployment profile selected on the command line (`dev`, `test`, `prod`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile(String);

impl Profile {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    /// Git branch the jobs API should check out for this profile.
    pub fn branch(&self) -> String {
        self.0.to_lowercase()
    }

    /// Suffix for profile-specific overrides, e.g. `DOMINO_API_HOST_DEV`.
    fn env_suffix(&self) -> String {
        self.0.to_uppercase()
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// JSON profile file: `{ "dev": { "DOMINO_API_HOST": "..." }, "prod": { ... } }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileFile {
    sections: HashMap<String, HashMap<String, String>>,
}

impl ProfileFile {
    pub fn read(path: impl AsRef<Path>) -> WqResult<Self> {
        let path = path.as_ref();
        tracing::debug!("Reading profile file {}", path.display());
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn section(&self, profile: &Profile) -> Option<&HashMap<String, String>> {
        self.sections
            .get(profile.name())
            .or_else(|| self.sections.get(&profile.branch()))
    }
}

/// Layered variable lookup: profile-suffixed env, plain env, then profile file.
struct Resolver<'a> {
    env: &'a dyn EnvSource,
    profile: Option<&'a Profile>,
    file: Option<&'a HashMap<String, String>>,
}

impl<'a> Resolver<'a> {
    fn get(&self, key: &str) -> Option<String> {
        let suffixed = self
            .profile
            .and_then(|p| self.env.var(&format!("{key}_{}", p.env_suffix())));
        suffixed
            .or_else(|| self.env.var(key))
            .or_else(|| self.file.and_then(|f| f.get(key).cloned()))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    /// Look up every key, reporting all missing ones in a single error.
    fn require<const N: usize>(&self, keys: [&str; N]) -> WqResult<[String; N]> {
        let mut missing = Vec::new();
        let values = keys.map(|key| {
            self.get(key).unwrap_or_else(|| {
                missing.push(key.to_string());
                String::new()
            })
        });
        if missing.is_empty() {
            Ok(values)
        } else {
            Err(ConfigError::Missing { keys: missing }.into())
        }
    }
}

/// Everything the job launcher needs to build its requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchConfig {
    pub profile: Profile,
    pub project_owner: String,
    pub project_name: String,
    pub api_host: String,
    pub data_prep_command: String,
    pub hardware_tier: String,
    pub environment_id: String,
}

impl LaunchConfig {
    pub fn from_env(env: &dyn EnvSource, profile: Profile) -> WqResult<Self> {
        Self::load(env, profile, None)
    }

    pub fn from_profile_file(
        path: impl AsRef<Path>,
        profile: Profile,
        env: &dyn EnvSource,
    ) -> WqResult<Self> {
        let path = path.as_ref();
        let file = ProfileFile::read(path)?;
        let section = file.section(&profile).ok_or_else(|| ConfigError::UnknownProfile {
            profile: profile.to_string(),
            path: path.display().to_string(),
        })?;
        Self::load(env, profile.clone(), Some(section))
    }

    fn load(
        env: &dyn EnvSource,
        profile: Profile,
        file: Option<&HashMap<String, String>>,
    ) -> WqResult<Self> {
        let resolver = Resolver {
            env,
            profile: Some(&profile),
            file,
        };
        let [
            project_owner,
            project_name,
            api_host,
            data_prep_command,
            hardware_tier,
            environment_id,
        ] = resolver.require([
            DOMINO_PROJECT_OWNER,
            DOMINO_PROJECT_NAME,
            DOMINO_API_HOST,
            DOMINO_DATA_PREP_SCRIPT,
            DOMINO_HARDWARE_TIER,
            DOMINO_ENVIRONMENT_ID,
        ])?;

        Ok(Self {
            profile,
            project_owner,
            project_name,
            api_host,
            data_prep_command,
            hardware_tier,
            environment_id,
        })
    }

    /// `https://` base URL for the orchestration API.
    pub fn api_base_url(&self) -> String {
        normalize_api_base(&self.api_host)
    }

    /// `owner/project` as the platform displays it.
    pub fn project_path(&self) -> String {
        format!("{}/{}", self.project_owner, self.project_name)
    }
}

/// Settings for the experiment tracker and its naming scheme.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// `None` when running against the in-process tracker.
    pub tracking_uri: Option<String>,
    pub username: String,
    pub project_name: String,
    pub experiment_prefix: String,
}

impl TrackingConfig {
    pub fn from_env(env: &dyn EnvSource) -> WqResult<Self> {
        let resolver = Resolver {
            env,
            profile: None,
            file: None,
        };
        let [username, project_name] =
            resolver.require([DOMINO_STARTING_USERNAME, DOMINO_PROJECT_NAME])?;

        Ok(Self {
            tracking_uri: resolver.get(MLFLOW_TRACKING_URI),
            username,
            project_name,
            experiment_prefix: resolver
                .get(WQ_EXPERIMENT_PREFIX)
                .unwrap_or_else(|| DEFAULT_EXPERIMENT_PREFIX.to_string()),
        })
    }

    /// `<prefix>-<username>-<project>`
    pub fn experiment_name(&self) -> String {
        format!(
            "{}-{}-{}",
            self.experiment_prefix, self.username, self.project_name
        )
    }

    /// `<prefix>-<project>`, the registered-model name.
    pub fn model_name(&self) -> String {
        format!("{}-{}", self.experiment_prefix, self.project_name)
    }
}

/// Paths of the four partition files for one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPaths {
    pub x_train: PathBuf,
    pub x_test: PathBuf,
    pub y_train: PathBuf,
    pub y_test: PathBuf,
}

impl DataPaths {
    pub fn for_project(root: impl AsRef<Path>, project: &str) -> Self {
        let dir = root.as_ref().join(project);
        let file = |part: &str| dir.join(format!("WineQualityData-{part}.csv"));
        Self {
            x_train: file("X_train"),
            x_test: file("X_test"),
            y_train: file("y_train"),
            y_test: file("y_test"),
        }
    }

    /// Resolve the data root from `WQ_DATA_ROOT`, falling back to `default_root`.
    pub fn from_env(env: &dyn EnvSource, default_root: &str) -> WqResult<Self> {
        let resolver = Resolver {
            env,
            profile: None,
            file: None,
        };
        let [project] = resolver.require([DOMINO_PROJECT_NAME])?;
        let root = resolver
            .get(WQ_DATA_ROOT)
            .unwrap_or_else(|| default_root.to_string());
        Ok(Self::for_project(root, &project))
    }

    pub fn all(&self) -> [&Path; 4] {
        [&self.x_train, &self.x_test, &self.y_train, &self.y_test]
    }
}

/// Prefix `https://` when the host carries no scheme and drop trailing slashes.
pub fn normalize_api_base(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.contains("://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}
