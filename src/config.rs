//! Client configuration: DSN parsing and [`ClientOptions`].
//!
//! Options are usually loaded from the environment with [`ClientOptions::from_env`],
//! which reads `SENTRY_DSN`, `ENVIRONMENT`, `APP_VERSION` and `HOSTNAME` (a `.env`
//! file is honoured when present).

use reqwest::Url;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{FaultlineError, Result};
use crate::protocol::{Breadcrumb, Event};
use crate::transport::RetryConfig;

/// Placeholder key shipped in sample configuration; a DSN containing it is treated as unset.
pub const PLACEHOLDER_KEY: &str = "your-project-key";

/// Identifier sent in the `X-Sentry-Auth` header.
pub const CLIENT_NAME: &str = concat!("faultline/", env!("CARGO_PKG_VERSION"));

/// Processor run on every event before it is queued. Returning `None` drops the event.
pub type BeforeSend = Arc<dyn Fn(Event) -> Option<Event> + Send + Sync>;

/// Processor run on every breadcrumb before it is recorded. Returning `None` drops it.
pub type BeforeBreadcrumb = Arc<dyn Fn(Breadcrumb) -> Option<Breadcrumb> + Send + Sync>;

/// Parsed Data Source Name: `scheme://public_key@host[:port][/path]/project_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dsn {
    scheme: String,
    public_key: String,
    host: String,
    port: Option<u16>,
    path: String,
    project_id: String,
}

impl Dsn {
    pub fn parse(dsn: &str) -> Result<Self> {
        let url = Url::parse(dsn).map_err(|e| FaultlineError::InvalidDsn(e.to_string()))?;

        let scheme = url.scheme().to_string();
        if scheme != "http" && scheme != "https" {
            return Err(FaultlineError::InvalidDsn(format!("unsupported scheme: {}", scheme)));
        }

        let public_key = url.username().to_string();
        if public_key.is_empty() {
            return Err(FaultlineError::InvalidDsn("missing public key".to_string()));
        }

        let host = url
            .host_str()
            .ok_or_else(|| FaultlineError::InvalidDsn("missing host".to_string()))?
            .to_string();

        let trimmed = url.path().trim_end_matches('/');
        let (path, project_id) = match trimmed.rsplit_once('/') {
            Some((path, project_id)) if !project_id.is_empty() => {
                (path.to_string(), project_id.to_string())
            }
            _ => return Err(FaultlineError::InvalidDsn("missing project id".to_string())),
        };

        Ok(Self {
            scheme,
            public_key,
            host,
            port: url.port(),
            path,
            project_id,
        })
    }

    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Endpoint that accepts envelopes for this project.
    pub fn envelope_url(&self) -> String {
        let port = self.port.map(|p| format!(":{}", p)).unwrap_or_default();
        format!(
            "{}://{}{}{}/api/{}/envelope/",
            self.scheme, self.host, port, self.path, self.project_id
        )
    }

    /// Value of the `X-Sentry-Auth` header.
    pub fn auth_header(&self, client: &str) -> String {
        format!(
            "Sentry sentry_version=7, sentry_client={}, sentry_key={}",
            client, self.public_key
        )
    }
}

impl fmt::Display for Dsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let port = self.port.map(|p| format!(":{}", p)).unwrap_or_default();
        write!(
            f,
            "{}://{}@{}{}{}/{}",
            self.scheme, self.public_key, self.host, port, self.path, self.project_id
        )
    }
}

/// Configuration for a [`crate::Client`].
#[derive(Clone)]
pub struct ClientOptions {
    pub dsn: Option<String>,
    pub environment: Option<String>,
    pub release: Option<String>,
    pub server_name: Option<String>,
    /// Emit SDK diagnostics at debug level.
    pub debug: bool,
    /// Fraction of error/message events that are sent.
    pub sample_rate: f64,
    /// Fraction of transactions that are sent.
    pub traces_sample_rate: f64,
    pub max_breadcrumbs: usize,
    /// Attach a backtrace to message events.
    pub attach_stacktrace: bool,
    /// When false, sensitive request headers are redacted before sending.
    pub send_default_pii: bool,
    /// Exception type names that are never sent.
    pub ignore_errors: Vec<String>,
    /// Tags applied to every event and transaction.
    pub default_tags: BTreeMap<String, String>,
    pub queue_capacity: usize,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub shutdown_timeout: Duration,
    pub http_timeout: Duration,
    pub retry: RetryConfig,
    pub before_send: Option<BeforeSend>,
    pub before_breadcrumb: Option<BeforeBreadcrumb>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            dsn: None,
            environment: None,
            release: None,
            server_name: None,
            debug: false,
            sample_rate: 1.0,
            traces_sample_rate: 0.0,
            max_breadcrumbs: 50,
            attach_stacktrace: false,
            send_default_pii: false,
            ignore_errors: Vec::new(),
            default_tags: BTreeMap::new(),
            queue_capacity: 100,
            batch_size: 10,
            flush_interval: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(2),
            http_timeout: Duration::from_secs(10),
            retry: RetryConfig::default(),
            before_send: None,
            before_breadcrumb: None,
        }
    }
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("dsn", &self.dsn)
            .field("environment", &self.environment)
            .field("release", &self.release)
            .field("server_name", &self.server_name)
            .field("debug", &self.debug)
            .field("sample_rate", &self.sample_rate)
            .field("traces_sample_rate", &self.traces_sample_rate)
            .field("max_breadcrumbs", &self.max_breadcrumbs)
            .field("queue_capacity", &self.queue_capacity)
            .field("batch_size", &self.batch_size)
            .field("before_send", &self.before_send.is_some())
            .field("before_breadcrumb", &self.before_breadcrumb.is_some())
            .finish_non_exhaustive()
    }
}

impl ClientOptions {
    /// Load options from the process environment (and `.env`, if present).
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build options from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = lookup("ENVIRONMENT").unwrap_or_else(|| "development".to_string());
        let version = lookup("APP_VERSION").unwrap_or_else(|| "1.0.0".to_string());
        let production = environment == "production";

        Self {
            dsn: lookup("SENTRY_DSN"),
            server_name: lookup("HOSTNAME"),
            debug: !production,
            traces_sample_rate: if production { 0.1 } else { 1.0 },
            attach_stacktrace: true,
            environment: Some(environment),
            ..Default::default()
        }
        .with_release_prefix("my-app", &version)
    }

    /// Set the release to `<app>@<version>`.
    pub fn with_release_prefix(mut self, app: &str, version: &str) -> Self {
        self.release = Some(format!("{}@{}", app, version));
        self
    }

    pub fn is_production(&self) -> bool {
        self.environment.as_deref() == Some("production")
    }

    /// The parsed DSN, or `None` when no usable DSN is configured.
    ///
    /// An empty DSN or one still holding the placeholder key is "not configured"
    /// rather than an error; a malformed DSN is an error.
    pub fn parsed_dsn(&self) -> Result<Option<Dsn>> {
        match self.dsn.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(dsn) if dsn.contains(PLACEHOLDER_KEY) => Ok(None),
            Some(dsn) => Dsn::parse(dsn).map(Some),
        }
    }

    /// Check numeric settings.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.sample_rate) {
            return Err(FaultlineError::ConfigError(format!(
                "sample_rate must be within 0.0..=1.0, got {}",
                self.sample_rate
            )));
        }
        if !(0.0..=1.0).contains(&self.traces_sample_rate) {
            return Err(FaultlineError::ConfigError(format!(
                "traces_sample_rate must be within 0.0..=1.0, got {}",
                self.traces_sample_rate
            )));
        }
        if self.queue_capacity == 0 {
            return Err(FaultlineError::ConfigError(
                "queue_capacity must be greater than 0".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(FaultlineError::ConfigError(
                "batch_size must be greater than 0".to_string(),
            ));
        }
        self.retry.validate()
    }
}
