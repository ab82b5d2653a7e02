//! Configuration loading via `ortho-config`.

use std::ffi::OsString;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::campaign::CampaignRequest;
use crate::directory::RegionFilter;
use crate::eraser::{DEFAULT_EXCLUDED_PREFIX, EraseScope, KeyExclusion};
use crate::executor::FlushPolicy;

/// Default Scaleway API endpoint.
pub const DEFAULT_API_BASE: &str = "https://api.scaleway.com";

/// Default tag key carrying the environment name.
pub const DEFAULT_ENVIRONMENT_TAG_KEY: &str = "cache-environment";

/// Default address the HTTP trigger binds to.
pub const DEFAULT_HTTP_BIND: &str = "127.0.0.1:8080";

/// Configuration file consulted by both configuration structs.
pub const CONFIG_FILE_NAME: &str = "cacheflush.toml";

/// Flush and campaign settings loaded via `ortho-config`.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "CACHEFLUSH",
    discovery(
        app_name = "cacheflush",
        env_var = "CACHEFLUSH_CONFIG_PATH",
        config_file_name = "cacheflush.toml",
        dotfile_name = ".cacheflush.toml",
        project_file_name = "cacheflush.toml"
    )
)]
pub struct FlushConfig {
    /// Environment tag selecting the caches. Required unless passed on the
    /// command line or in the request.
    pub environment: Option<String>,
    /// Comma-separated region allow-list. Empty allows every region.
    #[ortho_config(default = String::new())]
    pub regions: String,
    /// Passes per campaign.
    #[ortho_config(default = 1)]
    pub repeats: u32,
    /// Seconds to wait between passes.
    #[ortho_config(default = 30)]
    pub repeat_delay_seconds: u64,
    /// `full-flush`, `scoped-erase` or `flush-then-erase`.
    #[ortho_config(default = "flush-then-erase".to_owned())]
    pub policy: String,
    /// Database discarded by `flush-then-erase`. Cluster-mode instances only
    /// serve database 0.
    #[ortho_config(default = 0)]
    pub flush_database: u32,
    /// Database targeted by scoped erasure. Cluster-mode instances only serve
    /// database 0, so operations against them fail with a `SELECT` error
    /// unless this is set to 0.
    #[ortho_config(default = 2)]
    pub erase_database: u32,
    /// Reserved key prefix that is never erased.
    #[ortho_config(default = DEFAULT_EXCLUDED_PREFIX.to_owned())]
    pub exclude_prefix: String,
    /// Whether the reserved prefix is matched case-sensitively.
    #[ortho_config(default = true)]
    pub exclude_case_sensitive: bool,
    /// Glob forwarded to the server-side key scan.
    #[ortho_config(default = "*".to_owned())]
    pub scan_match: String,
    /// Keys requested per scan page.
    #[ortho_config(default = 200)]
    pub scan_page_size: usize,
    /// Instances flushed concurrently within a pass.
    #[ortho_config(default = 4)]
    pub instance_concurrency: usize,
    /// Primaries flushed concurrently within an instance.
    #[ortho_config(default = 2)]
    pub node_concurrency: usize,
    /// Seconds allowed for opening one node connection.
    #[ortho_config(default = 10)]
    pub connect_timeout_seconds: u64,
    /// Socket address for `cacheflush serve`.
    #[ortho_config(default = DEFAULT_HTTP_BIND.to_owned())]
    pub http_bind: String,
}

/// Scaleway directory settings derived from environment variables,
/// configuration files, and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "SCW")]
pub struct ScalewayConfig {
    /// Secret key used for authentication. This value is required.
    pub secret_key: String,
    /// Restricts discovery to one project when set.
    pub default_project_id: Option<String>,
    /// ACL user presented to every cache instance.
    #[ortho_config(default = "default".to_owned())]
    pub redis_user: String,
    /// Password presented to every cache instance. This value is required.
    pub redis_password: String,
    /// Tag key whose value names the environment (`<key>=<environment>`).
    #[ortho_config(default = DEFAULT_ENVIRONMENT_TAG_KEY.to_owned())]
    pub environment_tag_key: String,
    /// Base URL of the Scaleway API.
    #[ortho_config(default = DEFAULT_API_BASE.to_owned())]
    pub api_base: String,
}

/// Node policy selected by [`FlushConfig::policy`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PolicyKind {
    /// `full-flush`.
    FullFlush,
    /// `scoped-erase`.
    ScopedErase,
    /// `flush-then-erase`.
    FlushThenErase,
}

impl FromStr for PolicyKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "full-flush" => Ok(Self::FullFlush),
            "scoped-erase" => Ok(Self::ScopedErase),
            "flush-then-erase" => Ok(Self::FlushThenErase),
            other => Err(ConfigError::Invalid(format!(
                "unknown policy '{other}': set CACHEFLUSH_POLICY or policy in {CONFIG_FILE_NAME} \
                 to full-flush, scoped-erase or flush-then-erase"
            ))),
        }
    }
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn missing(&self) -> ConfigError {
        ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to {CONFIG_FILE_NAME}",
            self.description, self.env_var, self.toml_key
        ))
    }

    fn invalid(&self, reason: &str) -> ConfigError {
        ConfigError::Invalid(format!(
            "invalid {} ({reason}): set {} or {} in {CONFIG_FILE_NAME}",
            self.description, self.env_var, self.toml_key
        ))
    }
}

fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(metadata.missing());
    }
    Ok(())
}

fn require_positive(value: usize, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(metadata.invalid("must be at least 1"));
    }
    Ok(())
}

impl FlushConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("cacheflush")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages name the environment
    /// variable and TOML key that fix the problem.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] or [`ConfigError::MissingField`] when
    /// a value cannot be used.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.repeats == 0 {
            return Err(
                FieldMetadata::new("repeat count", "CACHEFLUSH_REPEATS", "repeats")
                    .invalid("must be at least 1"),
            );
        }
        self.policy_kind()?;
        require_field(
            &self.scan_match,
            &FieldMetadata::new("scan match pattern", "CACHEFLUSH_SCAN_MATCH", "scan_match"),
        )?;
        require_positive(
            self.scan_page_size,
            &FieldMetadata::new(
                "scan page size",
                "CACHEFLUSH_SCAN_PAGE_SIZE",
                "scan_page_size",
            ),
        )?;
        require_positive(
            self.instance_concurrency,
            &FieldMetadata::new(
                "instance concurrency",
                "CACHEFLUSH_INSTANCE_CONCURRENCY",
                "instance_concurrency",
            ),
        )?;
        require_positive(
            self.node_concurrency,
            &FieldMetadata::new(
                "node concurrency",
                "CACHEFLUSH_NODE_CONCURRENCY",
                "node_concurrency",
            ),
        )?;
        if self.connect_timeout_seconds == 0 {
            return Err(FieldMetadata::new(
                "connect timeout",
                "CACHEFLUSH_CONNECT_TIMEOUT_SECONDS",
                "connect_timeout_seconds",
            )
            .invalid("must be at least 1"));
        }
        self.http_bind_addr()?;
        Ok(())
    }

    /// Bound on opening one node connection.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    /// Resolves the environment, preferring `override_value` when given.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when neither source names one.
    pub fn environment(&self, override_value: Option<&str>) -> Result<String, ConfigError> {
        override_value
            .or(self.environment.as_deref())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_owned)
            .ok_or_else(|| {
                FieldMetadata::new("environment", "CACHEFLUSH_ENVIRONMENT", "environment")
                    .missing()
            })
    }

    /// Resolves the region filter, preferring `override_value` when given.
    #[must_use]
    pub fn region_filter(&self, override_value: Option<&str>) -> RegionFilter {
        RegionFilter::parse(override_value.unwrap_or(&self.regions))
    }

    /// Parses [`FlushConfig::policy`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for unknown names.
    pub fn policy_kind(&self) -> Result<PolicyKind, ConfigError> {
        self.policy.parse()
    }

    /// Builds the scoped-erase settings.
    #[must_use]
    pub fn erase_scope(&self) -> EraseScope {
        EraseScope {
            database: self.erase_database,
            exclusion: KeyExclusion::new(self.exclude_prefix.clone(), self.exclude_case_sensitive),
            match_pattern: self.scan_match.clone(),
            page_size: self.scan_page_size,
        }
    }

    /// Builds the node policy.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for unknown policy names.
    pub fn flush_policy(&self) -> Result<FlushPolicy, ConfigError> {
        Ok(match self.policy_kind()? {
            PolicyKind::FullFlush => FlushPolicy::FullFlush,
            PolicyKind::ScopedErase => FlushPolicy::ScopedErase(self.erase_scope()),
            PolicyKind::FlushThenErase => FlushPolicy::FlushThenErase {
                database: self.flush_database,
                scope: self.erase_scope(),
            },
        })
    }

    /// Builds a campaign using the configured repeats and delay.
    #[must_use]
    pub fn campaign_request(&self, environment: String, regions: RegionFilter) -> CampaignRequest {
        CampaignRequest {
            environment,
            regions,
            runs: self.repeats,
            delay: Duration::from_secs(self.repeat_delay_seconds),
        }
    }

    /// Parses [`FlushConfig::http_bind`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the value is not a socket
    /// address.
    pub fn http_bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.http_bind.trim().parse().map_err(|_| {
            FieldMetadata::new("HTTP bind address", "CACHEFLUSH_HTTP_BIND", "http_bind")
                .invalid("expected host:port")
        })
    }
}

impl ScalewayConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("cacheflush")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            &self.secret_key,
            &FieldMetadata::new("Scaleway API secret key", "SCW_SECRET_KEY", "secret_key"),
        )?;
        require_field(
            &self.redis_password,
            &FieldMetadata::new("cache password", "SCW_REDIS_PASSWORD", "redis_password"),
        )?;
        require_field(
            &self.environment_tag_key,
            &FieldMetadata::new(
                "environment tag key",
                "SCW_ENVIRONMENT_TAG_KEY",
                "environment_tag_key",
            ),
        )?;
        require_field(
            &self.api_base,
            &FieldMetadata::new("Scaleway API base URL", "SCW_API_BASE", "api_base"),
        )?;
        Ok(())
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configuration value cannot be used.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::EnvGuard;
    use rstest::{fixture, rstest};

    #[fixture]
    fn defaults() -> FlushConfig {
        FlushConfig {
            environment: Some(String::from("staging")),
            regions: String::new(),
            repeats: 1,
            repeat_delay_seconds: 30,
            policy: String::from("flush-then-erase"),
            flush_database: 0,
            erase_database: 2,
            exclude_prefix: String::from("area"),
            exclude_case_sensitive: true,
            scan_match: String::from("*"),
            scan_page_size: 200,
            instance_concurrency: 4,
            node_concurrency: 2,
            connect_timeout_seconds: 10,
            http_bind: String::from(DEFAULT_HTTP_BIND),
        }
    }

    fn scaleway() -> ScalewayConfig {
        ScalewayConfig {
            secret_key: String::from("secret"),
            default_project_id: None,
            redis_user: String::from("default"),
            redis_password: String::from("hunter2"),
            environment_tag_key: String::from(DEFAULT_ENVIRONMENT_TAG_KEY),
            api_base: String::from(DEFAULT_API_BASE),
        }
    }

    #[rstest]
    fn defaults_validate(defaults: FlushConfig) {
        assert!(defaults.validate().is_ok());
        assert_eq!(defaults.flush_policy(), Ok(FlushPolicy::default()));
    }

    #[rstest]
    #[case("full-flush", PolicyKind::FullFlush)]
    #[case("Scoped-Erase", PolicyKind::ScopedErase)]
    #[case(" flush-then-erase ", PolicyKind::FlushThenErase)]
    fn policy_names_parse(#[case] raw: &str, #[case] expected: PolicyKind) {
        assert_eq!(raw.parse::<PolicyKind>(), Ok(expected));
    }

    #[rstest]
    fn unknown_policy_names_the_fix(mut defaults: FlushConfig) {
        defaults.policy = String::from("nuke");

        let Err(ConfigError::Invalid(message)) = defaults.validate() else {
            panic!("expected invalid policy");
        };
        assert!(message.contains("CACHEFLUSH_POLICY"));
        assert!(message.contains("cacheflush.toml"));
    }

    #[rstest]
    fn zero_repeats_are_rejected(mut defaults: FlushConfig) {
        defaults.repeats = 0;

        let Err(ConfigError::Invalid(message)) = defaults.validate() else {
            panic!("expected invalid repeats");
        };
        assert!(message.contains("CACHEFLUSH_REPEATS"));
    }

    #[rstest]
    fn zero_page_size_is_rejected(mut defaults: FlushConfig) {
        defaults.scan_page_size = 0;

        let Err(ConfigError::Invalid(message)) = defaults.validate() else {
            panic!("expected invalid page size");
        };
        assert!(message.contains("scan_page_size"));
    }

    #[rstest]
    fn zero_connect_timeout_is_rejected(mut defaults: FlushConfig) {
        defaults.connect_timeout_seconds = 0;

        let Err(ConfigError::Invalid(message)) = defaults.validate() else {
            panic!("expected invalid connect timeout");
        };
        assert!(message.contains("CACHEFLUSH_CONNECT_TIMEOUT_SECONDS"));
    }

    #[rstest]
    fn bad_bind_address_is_rejected(mut defaults: FlushConfig) {
        defaults.http_bind = String::from("localhost");

        assert!(matches!(defaults.validate(), Err(ConfigError::Invalid(_))));
    }

    #[rstest]
    #[case(Some("production"), "production")]
    #[case(None, "staging")]
    fn environment_prefers_override(
        defaults: FlushConfig,
        #[case] override_value: Option<&str>,
        #[case] expected: &str,
    ) {
        assert_eq!(defaults.environment(override_value).as_deref(), Ok(expected));
    }

    #[rstest]
    fn missing_environment_is_actionable(mut defaults: FlushConfig) {
        defaults.environment = None;

        let Err(ConfigError::MissingField(message)) = defaults.environment(Some("  ")) else {
            panic!("expected missing environment");
        };
        assert!(message.contains("CACHEFLUSH_ENVIRONMENT"));
    }

    #[rstest]
    fn scoped_erase_uses_configured_scope(mut defaults: FlushConfig) {
        defaults.policy = String::from("scoped-erase");
        defaults.erase_database = 5;
        defaults.exclude_prefix = String::from("keep");
        defaults.exclude_case_sensitive = false;

        let Ok(FlushPolicy::ScopedErase(scope)) = defaults.flush_policy() else {
            panic!("expected scoped erase policy");
        };
        assert_eq!(scope.database, 5);
        assert!(scope.exclusion.excludes("KEEP:1"));
    }

    #[rstest]
    fn campaign_request_uses_repeats_and_delay(mut defaults: FlushConfig) {
        defaults.repeats = 3;
        defaults.repeat_delay_seconds = 45;

        let request = defaults.campaign_request(String::from("staging"), RegionFilter::any());

        assert_eq!(request.runs, 3);
        assert_eq!(request.delay, Duration::from_secs(45));
    }

    #[rstest]
    fn region_override_replaces_configured_regions(mut defaults: FlushConfig) {
        defaults.regions = String::from("fr-par");

        assert_eq!(defaults.region_filter(None).regions(), ["fr-par"]);
        assert_eq!(defaults.region_filter(Some("PL-WAW")).regions(), ["pl-waw"]);
    }

    #[rstest]
    fn scaleway_requires_password() {
        let config = ScalewayConfig {
            redis_password: String::from(" "),
            ..scaleway()
        };

        let Err(ConfigError::MissingField(message)) = config.validate() else {
            panic!("expected missing password");
        };
        assert!(message.contains("SCW_REDIS_PASSWORD"));
    }

    #[rstest]
    fn scaleway_defaults_validate() {
        assert!(scaleway().validate().is_ok());
    }

    #[tokio::test]
    async fn environment_variables_override_defaults() {
        let _guard = EnvGuard::set_vars(&[
            ("CACHEFLUSH_ENVIRONMENT", "staging"),
            ("CACHEFLUSH_REPEATS", "3"),
            ("CACHEFLUSH_POLICY", "full-flush"),
        ])
        .await;

        let config = FlushConfig::load_without_cli_args().expect("config loads");

        assert_eq!(config.environment.as_deref(), Some("staging"));
        assert_eq!(config.repeats, 3);
        assert_eq!(config.repeat_delay_seconds, 30);
        assert_eq!(config.flush_policy(), Ok(FlushPolicy::FullFlush));
        assert_eq!(config.exclude_prefix, "area");
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
    }
}
