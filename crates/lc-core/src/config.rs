//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON or TOML and then
//! overlaid with `API_*` / `LOG_*` environment variables. Every section
//! defaults sensibly so an empty file (or no file at all) is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub conversion: ConversionConfig,
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Deserialize a `Config` from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path. A `.toml` extension selects the
    /// TOML parser, anything else is read as JSON.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml(&contents),
            _ => Self::from_json(&contents),
        }
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    ///
    /// A file that exists but fails to parse is an error: silently running
    /// with defaults would disable authentication.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        match Self::load(path) {
            Ok(cfg) => Ok(cfg),
            Err(Error::Io { source }) if source.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Overlay settings from the process environment.
    ///
    /// Variables whose name or value is not valid UTF-8 are skipped.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_vars(
            std::env::vars_os()
                .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?))),
        )
    }

    /// Overlay settings from `(name, value)` pairs.
    ///
    /// Unknown names are ignored; known names with unparseable values are a
    /// [`Error::Validation`].
    pub fn apply_vars<I, K, V>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let key = key.as_ref();
            let value = value.as_ref().trim();
            match key {
                "API_HOST" => self.server.host = value.to_string(),
                "API_PORT" => self.server.port = parse_var(key, value)?,
                "API_WORKERS" => {
                    self.server.workers = if value.eq_ignore_ascii_case("auto") || value.is_empty() {
                        None
                    } else {
                        Some(parse_var(key, value)?)
                    }
                }
                "API_MAX_FILE_SIZE" => self.server.max_upload_bytes = parse_var(key, value)?,
                "API_AUTH_ENABLED" => self.auth.enabled = parse_bool(key, value)?,
                "API_AUTH_TOKEN" => {
                    self.auth.token = (!value.is_empty()).then(|| value.to_string());
                }
                "API_TIMEOUT" => self.conversion.timeout_secs = parse_var(key, value)?,
                "API_MAX_CONCURRENT" => self.conversion.max_concurrent = parse_var(key, value)?,
                "API_ADMISSION_WAIT" => {
                    self.conversion.admission_wait_secs = parse_var(key, value)?
                }
                "API_RETRY_AFTER" => self.conversion.retry_after_secs = parse_var(key, value)?,
                "API_TEMP_DIR" => {
                    self.conversion.temp_dir = (!value.is_empty()).then(|| PathBuf::from(value));
                }
                "API_ENGINE_PATH" => {
                    self.engine.path = (!value.is_empty()).then(|| PathBuf::from(value));
                }
                "LOG_LEVEL" => self.logging.level = value.to_ascii_lowercase(),
                "LOG_FORMAT" => self.logging.format = value.parse()?,
                _ => {}
            }
        }
        Ok(())
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0; a random port will be assigned".into());
        }

        if self.auth.enabled && self.auth.token.is_none() {
            warnings.push(
                "auth is enabled but no token is set; every protected request will be rejected"
                    .into(),
            );
        }

        if self.conversion.max_concurrent == 0 {
            warnings.push("conversion.max_concurrent is 0; using 1".into());
        }

        if self.conversion.timeout_secs == 0 {
            warnings.push("conversion.timeout_secs is 0; every conversion will time out".into());
        }

        if self.server.max_upload_bytes == 0 {
            warnings.push("server.max_upload_bytes is 0; every upload will be rejected".into());
        }

        warnings
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Validation(format!("invalid value for {key}: {value:?}")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" | "" => Ok(false),
        _ => Err(Error::Validation(format!("invalid value for {key}: {value:?}"))),
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Runtime worker threads (`None` = one per CPU).
    pub workers: Option<usize>,
    /// Largest accepted upload, in bytes.
    pub max_upload_bytes: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 28001,
            workers: None,
            max_upload_bytes: 500 * 1024 * 1024,
        }
    }
}

/// Bearer-token authentication settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub enabled: bool,
    pub token: Option<String>,
}

/// Admission and subprocess limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    /// Conversions allowed to run at once in this process.
    pub max_concurrent: usize,
    /// Wall-clock budget for one engine invocation.
    pub timeout_secs: u64,
    /// How long a request may wait for a free slot before 429.
    pub admission_wait_secs: u64,
    /// Value of the `Retry-After` header on 429 responses.
    pub retry_after_secs: u64,
    /// Root under which per-job scratch directories are created.
    pub temp_dir: Option<PathBuf>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            timeout_secs: 300,
            admission_wait_secs: 10,
            retry_after_secs: 5,
            temp_dir: None,
        }
    }
}

impl ConversionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn admission_wait(&self) -> Duration {
        Duration::from_secs(self.admission_wait_secs)
    }

    /// Effective scratch root (`$TMPDIR/libre-convert` unless configured).
    pub fn scratch_root(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("libre-convert"))
    }
}

/// Location of the conversion engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Explicit path to `soffice`; discovered from `PATH` when unset.
    pub path: Option<PathBuf>,
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Json,
        }
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Plain,
}

impl std::str::FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "plain" | "text" => Ok(Self::Plain),
            other => Err(Error::Validation(format!("unknown log format: {other}"))),
        }
    }
}
