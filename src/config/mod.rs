//! Configuration layer: typed settings with layered precedence
//! (defaults → file → environment → CLI).

use std::{net::SocketAddr, num::NonZeroUsize, path::PathBuf, str::FromStr, time::Duration};

use clap::{Parser, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::router::{
    DEFAULT_API_PREFIXES, DEFAULT_ASSET_EXTENSIONS, DEFAULT_ASSET_PREFIXES,
    DEFAULT_ORIGIN_PREFIXES, PathPrefix, RouteTable,
};
use crate::security::{DEFAULT_BOT_SIGNATURES, DEFAULT_HONEYPOT_PATHS};
use crate::server::DEFAULT_MAX_REQUEST_BYTES;

const LOCAL_CONFIG_BASENAME: &str = "frontdoor";
const ENV_PREFIX: &str = "FRONTDOOR";
const DEFAULT_LISTEN: &str = "127.0.0.1:8080";
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_PUBLIC_ORIGIN: &str = "http://localhost:8080";
const DEFAULT_ORIGIN_DEADLINE_MS: u64 = 5_000;
const DEFAULT_RENDER_DEADLINE_MS: u64 = 25_000;
const DEFAULT_PROBE_DEADLINE_MS: u64 = 3_000;
const DEFAULT_API_FRESH_SECS: u64 = 120;
const DEFAULT_API_STORE_SECS: u64 = 24 * 60 * 60;
const DEFAULT_MIN_BODY_BYTES: usize = 50;
const DEFAULT_ASSET_TTL_SECS: u64 = 24 * 60 * 60;
const DEFAULT_PROBE_TTL_SECS: u64 = 10;
const DEFAULT_GATE_CEILING: usize = 20;
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;
const DEFAULT_WARM_INTERVAL_SECS: u64 = 300;
const DEFAULT_STATUS_PATH: &str = "/__router/status";
const DEFAULT_PROBE_PATH: &str = "/__router/probe";
pub const DEFAULT_WARM_ENDPOINTS: &[&str] = &[
    "/wp-json/wp/v2/posts?per_page=10",
    "/wp-json/wp/v2/pages",
    "/wp-json/wp/v2/categories",
];

/// Command-line arguments for the `frontdoor` binary.
#[derive(Debug, Default, Parser)]
#[command(name = "frontdoor", version, about = "Edge router and cache in front of a content origin and a renderer")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "FRONTDOOR_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    /// Override the listen address.
    #[arg(long = "listen", value_name = "ADDR")]
    pub listen: Option<String>,

    /// Override the content origin base URL.
    #[arg(long = "origin-url", value_name = "URL")]
    pub origin_url: Option<String>,

    /// Override the rendering service base URL.
    #[arg(long = "renderer-url", value_name = "URL")]
    pub renderer_url: Option<String>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Disable the scheduled cache warmer.
    #[arg(long = "no-warmer", action = clap::ArgAction::SetTrue)]
    pub no_warmer: bool,
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub site: SiteSettings,
    pub origin: OriginSettings,
    pub renderer: RendererSettings,
    pub cache: CacheSettings,
    pub gate: GateSettings,
    pub filter: FilterSettings,
    pub routes: RouteTable,
    pub warmer: WarmerSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub listen: SocketAddr,
    pub graceful_shutdown: Duration,
    pub max_request_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct SiteSettings {
    /// Public origin used to build absolute cache keys.
    pub public_origin: Url,
    /// Domain whose Referer lifts the honeypot rule.
    pub domain: String,
}

#[derive(Debug, Clone)]
pub struct OriginSettings {
    /// `None` leaves the content origin unbound; its paths then answer `500`.
    pub base_url: Option<Url>,
    /// Fixed `Host` header for virtual-host routing on the origin.
    pub host: Option<String>,
    pub deadline: Duration,
}

#[derive(Debug, Clone)]
pub struct RendererSettings {
    pub base_url: Option<Url>,
    pub deadline: Duration,
    /// Deadline used by the diagnostics probe against either backend.
    pub probe_deadline: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub api_fresh: Duration,
    pub api_store: Duration,
    pub min_body_bytes: usize,
    pub asset_ttl: Duration,
    pub probe_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct GateSettings {
    pub ceiling: NonZeroUsize,
    pub retry_after: Duration,
}

#[derive(Debug, Clone)]
pub struct FilterSettings {
    pub honeypot_paths: Vec<String>,
    pub bot_signatures: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct WarmerSettings {
    pub enabled: bool,
    pub interval: Duration,
    pub endpoints: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, ConfigError> {
    let mut builder =
        Config::builder().add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("filter.honeypot_paths")
            .with_list_parse_key("filter.bot_signatures")
            .with_list_parse_key("warmer.endpoints")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_cli_overrides(cli);
    Settings::from_raw(raw)
}

/// Resolve configuration from the process arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), ConfigError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    site: RawSiteSettings,
    origin: RawOriginSettings,
    renderer: RawRendererSettings,
    cache: RawCacheSettings,
    gate: RawGateSettings,
    filter: RawFilterSettings,
    routes: RawRoutesSettings,
    warmer: RawWarmerSettings,
    logging: RawLoggingSettings,
}

impl RawSettings {
    fn apply_cli_overrides(&mut self, cli: &CliArgs) {
        if let Some(listen) = cli.listen.as_ref() {
            self.server.listen = Some(listen.clone());
        }
        if let Some(url) = cli.origin_url.as_ref() {
            self.origin.base_url = Some(url.clone());
        }
        if let Some(url) = cli.renderer_url.as_ref() {
            self.renderer.base_url = Some(url.clone());
        }
        if let Some(level) = cli.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = cli.log_json {
            self.logging.json = Some(json);
        }
        if cli.no_warmer {
            self.warmer.enabled = Some(false);
        }
    }
}

impl Settings {
    /// Built-in defaults with no file, environment or CLI layer applied.
    pub fn defaults() -> Result<Self, ConfigError> {
        Self::from_raw(RawSettings::default())
    }

    fn from_raw(raw: RawSettings) -> Result<Self, ConfigError> {
        let RawSettings {
            server,
            site,
            origin,
            renderer,
            cache,
            gate,
            filter,
            routes,
            warmer,
            logging,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            site: build_site_settings(site)?,
            origin: build_origin_settings(origin)?,
            renderer: build_renderer_settings(renderer)?,
            cache: build_cache_settings(cache)?,
            gate: build_gate_settings(gate)?,
            filter: build_filter_settings(filter),
            routes: build_routes(routes)?,
            warmer: build_warmer_settings(warmer)?,
            logging: build_logging_settings(logging)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, ConfigError> {
    let listen = server.listen.unwrap_or_else(|| DEFAULT_LISTEN.to_owned());
    let listen = listen
        .parse::<SocketAddr>()
        .map_err(|err| ConfigError::invalid("server.listen", format!("`{listen}`: {err}")))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);

    let max_request_bytes = server.max_request_bytes.unwrap_or(DEFAULT_MAX_REQUEST_BYTES);
    if max_request_bytes == 0 {
        return Err(ConfigError::invalid(
            "server.max_request_bytes",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        listen,
        graceful_shutdown: Duration::from_secs(graceful_secs),
        max_request_bytes,
    })
}

fn build_site_settings(site: RawSiteSettings) -> Result<SiteSettings, ConfigError> {
    let origin = site
        .public_origin
        .unwrap_or_else(|| DEFAULT_PUBLIC_ORIGIN.to_owned());
    let public_origin = parse_absolute_url(&origin, "site.public_origin")?;

    let domain = match site.domain.map(|d| d.trim().to_ascii_lowercase()) {
        Some(domain) if !domain.is_empty() => domain,
        _ => {
            let host = public_origin.host_str().unwrap_or_default();
            host.strip_prefix("www.").unwrap_or(host).to_ascii_lowercase()
        }
    };

    Ok(SiteSettings {
        public_origin,
        domain,
    })
}

fn build_origin_settings(origin: RawOriginSettings) -> Result<OriginSettings, ConfigError> {
    let base_url = optional_url(origin.base_url, "origin.base_url")?;
    let host = origin
        .host
        .map(|h| h.trim().to_owned())
        .filter(|h| !h.is_empty());
    let deadline = positive_millis(
        origin.deadline_ms.unwrap_or(DEFAULT_ORIGIN_DEADLINE_MS),
        "origin.deadline_ms",
    )?;

    Ok(OriginSettings {
        base_url,
        host,
        deadline,
    })
}

fn build_renderer_settings(renderer: RawRendererSettings) -> Result<RendererSettings, ConfigError> {
    Ok(RendererSettings {
        base_url: optional_url(renderer.base_url, "renderer.base_url")?,
        deadline: positive_millis(
            renderer.deadline_ms.unwrap_or(DEFAULT_RENDER_DEADLINE_MS),
            "renderer.deadline_ms",
        )?,
        probe_deadline: positive_millis(
            renderer.probe_deadline_ms.unwrap_or(DEFAULT_PROBE_DEADLINE_MS),
            "renderer.probe_deadline_ms",
        )?,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, ConfigError> {
    let api_fresh = cache.api_fresh_seconds.unwrap_or(DEFAULT_API_FRESH_SECS);
    let api_store = cache.api_store_seconds.unwrap_or(DEFAULT_API_STORE_SECS);
    if api_store == 0 {
        return Err(ConfigError::invalid(
            "cache.api_store_seconds",
            "must be greater than zero",
        ));
    }
    if api_fresh > api_store {
        return Err(ConfigError::invalid(
            "cache.api_fresh_seconds",
            format!("fresh window ({api_fresh}s) exceeds store window ({api_store}s)"),
        ));
    }

    let asset_ttl = cache.asset_ttl_seconds.unwrap_or(DEFAULT_ASSET_TTL_SECS);
    if asset_ttl == 0 {
        return Err(ConfigError::invalid(
            "cache.asset_ttl_seconds",
            "must be greater than zero",
        ));
    }

    Ok(CacheSettings {
        api_fresh: Duration::from_secs(api_fresh),
        api_store: Duration::from_secs(api_store),
        min_body_bytes: cache.min_body_bytes.unwrap_or(DEFAULT_MIN_BODY_BYTES),
        asset_ttl: Duration::from_secs(asset_ttl),
        probe_ttl: Duration::from_secs(cache.probe_ttl_seconds.unwrap_or(DEFAULT_PROBE_TTL_SECS)),
    })
}

fn build_gate_settings(gate: RawGateSettings) -> Result<GateSettings, ConfigError> {
    let ceiling = NonZeroUsize::new(gate.ceiling.unwrap_or(DEFAULT_GATE_CEILING))
        .ok_or_else(|| ConfigError::invalid("gate.ceiling", "must be greater than zero"))?;
    Ok(GateSettings {
        ceiling,
        retry_after: Duration::from_secs(
            gate.retry_after_seconds.unwrap_or(DEFAULT_RETRY_AFTER_SECS),
        ),
    })
}

fn build_filter_settings(filter: RawFilterSettings) -> FilterSettings {
    FilterSettings {
        honeypot_paths: filter.honeypot_paths.unwrap_or_else(|| owned(DEFAULT_HONEYPOT_PATHS)),
        bot_signatures: filter.bot_signatures.unwrap_or_else(|| owned(DEFAULT_BOT_SIGNATURES)),
    }
}

fn build_routes(routes: RawRoutesSettings) -> Result<RouteTable, ConfigError> {
    let status_path = absolute_path(routes.status_path, DEFAULT_STATUS_PATH, "routes.status_path")?;
    let probe_path = absolute_path(routes.probe_path, DEFAULT_PROBE_PATH, "routes.probe_path")?;
    if status_path == probe_path {
        return Err(ConfigError::invalid(
            "routes.probe_path",
            "must differ from routes.status_path",
        ));
    }

    Ok(RouteTable {
        status_path,
        probe_path,
        origin_prefixes: prefixes(routes.origin_prefixes, DEFAULT_ORIGIN_PREFIXES, "routes.origin_prefixes")?,
        api_prefixes: prefixes(routes.api_prefixes, DEFAULT_API_PREFIXES, "routes.api_prefixes")?,
        asset_prefixes: prefixes(routes.asset_prefixes, DEFAULT_ASSET_PREFIXES, "routes.asset_prefixes")?,
        asset_extensions: routes
            .asset_extensions
            .unwrap_or_else(|| owned(DEFAULT_ASSET_EXTENSIONS))
            .into_iter()
            .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
            .collect(),
    })
}

fn build_warmer_settings(warmer: RawWarmerSettings) -> Result<WarmerSettings, ConfigError> {
    let interval = warmer.interval_seconds.unwrap_or(DEFAULT_WARM_INTERVAL_SECS);
    if interval == 0 {
        return Err(ConfigError::invalid(
            "warmer.interval_seconds",
            "must be greater than zero",
        ));
    }
    let endpoints = warmer
        .endpoints
        .unwrap_or_else(|| owned(DEFAULT_WARM_ENDPOINTS));
    if let Some(bad) = endpoints.iter().find(|e| !e.starts_with('/')) {
        return Err(ConfigError::invalid(
            "warmer.endpoints",
            format!("`{bad}` is not an absolute path"),
        ));
    }

    Ok(WarmerSettings {
        enabled: warmer.enabled.unwrap_or(true),
        interval: Duration::from_secs(interval),
        endpoints,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, ConfigError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            ConfigError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    listen: Option<String>,
    graceful_shutdown_seconds: Option<u64>,
    max_request_bytes: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSiteSettings {
    public_origin: Option<String>,
    domain: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawOriginSettings {
    base_url: Option<String>,
    host: Option<String>,
    deadline_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRendererSettings {
    base_url: Option<String>,
    deadline_ms: Option<u64>,
    probe_deadline_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    api_fresh_seconds: Option<u64>,
    api_store_seconds: Option<u64>,
    min_body_bytes: Option<usize>,
    asset_ttl_seconds: Option<u64>,
    probe_ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawGateSettings {
    ceiling: Option<usize>,
    retry_after_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawFilterSettings {
    honeypot_paths: Option<Vec<String>>,
    bot_signatures: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRoutesSettings {
    status_path: Option<String>,
    probe_path: Option<String>,
    origin_prefixes: Option<Vec<String>>,
    api_prefixes: Option<Vec<String>>,
    asset_prefixes: Option<Vec<String>>,
    asset_extensions: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawWarmerSettings {
    enabled: Option<bool>,
    interval_seconds: Option<u64>,
    endpoints: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_owned()).collect()
}

fn parse_absolute_url(value: &str, key: &'static str) -> Result<Url, ConfigError> {
    let url = Url::parse(value.trim())
        .map_err(|err| ConfigError::invalid(key, format!("`{value}`: {err}")))?;
    if url.cannot_be_a_base() || url.host_str().is_none() {
        return Err(ConfigError::invalid(key, format!("`{value}` is not an absolute http(s) URL")));
    }
    Ok(url)
}

fn optional_url(value: Option<String>, key: &'static str) -> Result<Option<Url>, ConfigError> {
    match value.filter(|v| !v.trim().is_empty()) {
        Some(v) => parse_absolute_url(&v, key).map(Some),
        None => Ok(None),
    }
}

fn positive_millis(value: u64, key: &'static str) -> Result<Duration, ConfigError> {
    if value == 0 {
        return Err(ConfigError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_millis(value))
}

fn absolute_path(value: Option<String>, default: &str, key: &'static str) -> Result<String, ConfigError> {
    let path = value.unwrap_or_else(|| default.to_owned());
    if !path.starts_with('/') {
        return Err(ConfigError::invalid(key, format!("`{path}` must start with `/`")));
    }
    Ok(path)
}

fn prefixes(
    value: Option<Vec<String>>,
    defaults: &[&str],
    key: &'static str,
) -> Result<Vec<PathPrefix>, ConfigError> {
    let list = value.unwrap_or_else(|| owned(defaults));
    list.iter()
        .map(|p| {
            if p.starts_with('/') {
                Ok(PathPrefix::parse(p))
            } else {
                Err(ConfigError::invalid(key, format!("`{p}` must start with `/`")))
            }
        })
        .collect()
}
