use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    /// Directory holding the cache database
    pub data_dir: String,
    /// Directory inside every node that the cluster serves from
    pub cluster_dir: String,
    /// Gates the status and delete endpoints. Empty disables both.
    pub check_password: String,
    /// Enables dangerous operations like purge. Must never be true in production.
    pub test_mode: bool,
    pub request_timeout_secs: u64,
    pub cache: CacheConfig,
    pub github: GitHubConfig,
    pub gitlab: GitLabConfig,
    pub r2: Vec<R2Node>,
    pub b2: Vec<B2Node>,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Lifetime of cached files; 0 disables caching
    pub ttl_seconds: u64,
    /// Larger bodies are served but never cached
    pub max_object_size: u64,
}

#[derive(Debug, Clone)]
pub struct GitHubConfig {
    pub username: String,
    pub token: String,
    /// Repository names; by convention the same as the GitLab node names
    pub repos: Vec<String>,
    pub branch: String,
    pub api_url: String,
    pub raw_url: String,
}

#[derive(Debug, Clone)]
pub struct GitLabConfig {
    pub nodes: Vec<GitLabNode>,
    pub branch: String,
    pub api_url: String,
}

#[derive(Debug, Clone)]
pub struct GitLabNode {
    pub name: String,
    pub project_id: String,
    pub token: String,
}

#[derive(Debug, Clone)]
pub struct R2Node {
    pub name: String,
    pub account_id: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
}

#[derive(Debug, Clone)]
pub struct B2Node {
    pub name: String,
    /// Bare host, e.g. `s3.us-west-004.backblazeb2.com`
    pub endpoint: String,
    pub key_id: String,
    pub application_key: String,
    pub bucket: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 3600,
            max_object_size: 20 * 1024 * 1024, // 20MB
        }
    }
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            token: String::new(),
            repos: Vec::new(),
            branch: "main".to_string(),
            api_url: "https://api.github.com".to_string(),
            raw_url: "https://raw.githubusercontent.com".to_string(),
        }
    }
}

impl Default for GitLabConfig {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            branch: "main".to_string(),
            api_url: "https://gitlab.com/api/v4".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            data_dir: "./data".to_string(),
            cluster_dir: String::new(),
            check_password: String::new(),
            test_mode: false,
            request_timeout_secs: 30,
            cache: CacheConfig::default(),
            github: GitHubConfig::default(),
            gitlab: GitLabConfig::default(),
            r2: Vec::new(),
            b2: Vec::new(),
        }
    }
}

impl GitHubConfig {
    pub fn is_enabled(&self) -> bool {
        !self.username.is_empty() && !self.token.is_empty() && !self.repos.is_empty()
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from any key lookup (the process environment in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string());
        let var_or = |key: &str, default: &str| {
            var(key)
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let number = |key: &str, default: u64| -> Result<u64, ConfigError> {
            match var(key).filter(|v| !v.is_empty()) {
                Some(v) => v.parse().map_err(|_| {
                    ConfigError::ValidationError(format!("{key} must be a non-negative integer"))
                }),
                None => Ok(default),
            }
        };

        let gitlab_nodes: Vec<GitLabNode> = parse_nodes("GITLAB_NODES", var("GITLAB_NODES"), 3)?
            .into_iter()
            .map(|f| GitLabNode {
                name: f[0].clone(),
                project_id: f[1].clone(),
                token: f[2].clone(),
            })
            .collect();

        let r2 = parse_nodes("R2_NODES", var("R2_NODES"), 5)?
            .into_iter()
            .map(|f| R2Node {
                name: f[0].clone(),
                account_id: f[1].clone(),
                access_key_id: f[2].clone(),
                secret_access_key: f[3].clone(),
                bucket: f[4].clone(),
            })
            .collect();

        let b2 = parse_nodes("B2_NODES", var("B2_NODES"), 5)?
            .into_iter()
            .map(|f| B2Node {
                name: f[0].clone(),
                endpoint: f[1].clone(),
                key_id: f[2].clone(),
                application_key: f[3].clone(),
                bucket: f[4].clone(),
            })
            .collect();

        let github_repos: Vec<String> = match var("GITHUB_REPOS").filter(|v| !v.is_empty()) {
            Some(list) => list
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None => gitlab_nodes.iter().map(|n| n.name.clone()).collect(),
        };

        let github_token = var("GITHUB_PAT").unwrap_or_default();
        let check_password = var("CHECK_PASSWORD")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| github_token.clone());

        let config = Config {
            bind_address: var_or("BIND_ADDRESS", &defaults.bind_address),
            data_dir: var_or("DATA_DIR", &defaults.data_dir),
            cluster_dir: var("CLUSTER_DIR")
                .unwrap_or_default()
                .trim_matches('/')
                .to_string(),
            check_password,
            test_mode: var("TEST_MODE")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            request_timeout_secs: number("REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs)?,
            cache: CacheConfig {
                ttl_seconds: number("CACHE_TTL_SECONDS", defaults.cache.ttl_seconds)?,
                max_object_size: number("CACHE_MAX_OBJECT_SIZE", defaults.cache.max_object_size)?,
            },
            github: GitHubConfig {
                username: var("GITHUB_USERNAME").unwrap_or_default(),
                token: github_token,
                repos: github_repos,
                branch: var_or("GITHUB_BRANCH", &defaults.github.branch),
                api_url: var_or("GITHUB_API_URL", &defaults.github.api_url)
                    .trim_end_matches('/')
                    .to_string(),
                raw_url: var_or("GITHUB_RAW_URL", &defaults.github.raw_url)
                    .trim_end_matches('/')
                    .to_string(),
            },
            gitlab: GitLabConfig {
                nodes: gitlab_nodes,
                branch: var_or("GITLAB_BRANCH", &defaults.gitlab.branch),
                api_url: var_or("GITLAB_API_URL", &defaults.gitlab.api_url)
                    .trim_end_matches('/')
                    .to_string(),
            },
            r2,
            b2,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "REQUEST_TIMEOUT_SECS must be greater than 0".to_string(),
            ));
        }

        if self.check_password.contains('/') {
            return Err(ConfigError::ValidationError(
                "CHECK_PASSWORD must not contain '/'".to_string(),
            ));
        }

        if self.check_password.is_empty() {
            tracing::warn!("No CHECK_PASSWORD or GITHUB_PAT set. Status and delete are disabled.");
        }

        if self.github.username.is_empty() != self.github.token.is_empty() {
            tracing::warn!("GitHub needs both GITHUB_USERNAME and GITHUB_PAT, GitHub disabled");
        }

        if self.node_count() == 0 {
            tracing::warn!("No storage nodes configured. Every file request will fail.");
        }

        Ok(())
    }

    /// Number of storage nodes the cluster will be built from.
    pub fn node_count(&self) -> usize {
        let github = if self.github.is_enabled() {
            self.github.repos.len()
        } else {
            0
        };
        github + self.gitlab.nodes.len() + self.r2.len() + self.b2.len()
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache.ttl_seconds > 0
    }
}

/// Parse `a:b:c,d:e:f` style node lists. Entries with an empty field are
/// skipped; entries with the wrong number of fields are rejected.
fn parse_nodes(
    var: &str,
    raw: Option<String>,
    fields: usize,
) -> Result<Vec<Vec<String>>, ConfigError> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };

    let mut nodes = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let parts: Vec<String> = entry.split(':').map(|p| p.trim().to_string()).collect();
        if parts.len() != fields {
            // Only the name is echoed back; the other fields hold credentials.
            return Err(ConfigError::ValidationError(format!(
                "{var}: entry '{}' must have {fields} ':'-separated fields, found {}",
                parts[0],
                parts.len()
            )));
        }
        if parts.iter().any(|p| p.is_empty()) {
            tracing::warn!(var, node = %parts[0], "Skipping incomplete node entry");
            continue;
        }
        nodes.push(parts);
    }
    Ok(nodes)
}
