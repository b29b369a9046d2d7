use std::collections::BTreeMap;
use std::{env, fs, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use directories::ProjectDirs;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::es_http::RetryPolicy;
use crate::naming::{self, ALL_INDICES};
use crate::operation::OperationKind;

/// Structured configuration document: cluster access, retry counters,
/// per-index overrides, repositories and the retention tables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub es: EsSettings,
    pub timeout: TimeoutSettings,
    pub retry: u32,
    pub sleep_secs: u64,
    pub force: bool,
    pub settings: Settings,
    pub snapshot: SnapshotSettings,
    pub templates: BTreeMap<String, TemplateDoc>,
    pub ilms: BTreeMap<String, IlmDoc>,
    pub slack: SlackSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EsSettings {
    pub url: String,
    pub user: String,
    pub pass: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub connect_secs: u64,
    pub read_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub box_types: BoxTypes,
    pub indices: BTreeMap<String, IndexSettings>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BoxTypes {
    pub ingest: String,
    pub store: String,
}

/// `settings` keys carried by the `SETTINGS` env var as JSON.
#[derive(Debug, Default, Deserialize)]
struct SettingsOverride {
    box_types: Option<BoxTypes>,
    indices: Option<BTreeMap<String, IndexSettings>>,
}

/// Per-prefix overrides. Read-only for the whole run.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    pub skip: BTreeMap<String, bool>,
    pub delete_without_snapshot: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SnapshotSettings {
    pub repos: Vec<RepoSettings>,
    pub poll_interval_secs: u64,
    pub ilm_stop_timeout_secs: u64,
    pub wait_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepoSettings {
    pub name: String,
    #[serde(rename = "type", default = "default_repo_type")]
    pub repo_type: String,
    #[serde(default)]
    pub location: String,
    #[serde(default = "default_soft_deadline")]
    pub soft_deadline_days: i64,
    #[serde(default = "default_hard_deadline")]
    pub hard_deadline_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemplateDoc {
    #[serde(default)]
    pub index_patterns: Vec<String>,
    #[serde(default)]
    pub settings: BTreeMap<String, serde_json::Value>,
}

impl TemplateDoc {
    pub fn lifecycle_name(&self) -> Option<&str> {
        self.settings
            .get("index.lifecycle.name")
            .and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IlmDoc {
    #[serde(default)]
    pub policy: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SlackSettings {
    pub webhook_url: Option<String>,
    pub channel: String,
    pub username: String,
}

/// Timing knobs for the asynchronous cluster operations.
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub interval: Duration,
    pub ilm_stop_timeout: Duration,
    pub wait_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            es: EsSettings::default(),
            timeout: TimeoutSettings::default(),
            retry: 10,
            sleep_secs: 60,
            force: false,
            settings: Settings::default(),
            snapshot: SnapshotSettings::default(),
            templates: BTreeMap::new(),
            ilms: BTreeMap::new(),
            slack: SlackSettings::default(),
        }
    }
}

impl Default for EsSettings {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:9200".into(),
            user: "elastic".into(),
            pass: "".into(),
        }
    }
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            connect_secs: 3,
            read_secs: 120,
        }
    }
}

impl Default for BoxTypes {
    fn default() -> Self {
        Self {
            ingest: "hot".into(),
            store: "warm".into(),
        }
    }
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            repos: Vec::new(),
            poll_interval_secs: 10,
            ilm_stop_timeout_secs: 600,
            wait_timeout_secs: None,
        }
    }
}

impl Default for SlackSettings {
    fn default() -> Self {
        Self {
            webhook_url: None,
            channel: "#ops".into(),
            username: "es-lifecycle".into(),
        }
    }
}

fn default_repo_type() -> String {
    "fs".into()
}

fn default_soft_deadline() -> i64 {
    7
}

fn default_hard_deadline() -> i64 {
    3
}

impl Config {
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let mut cfg = match path {
            Some(path) => Self::from_file(&path)?,
            None => {
                let default_path = default_config_path();
                if default_path.exists() {
                    Self::from_file(&default_path)?
                } else {
                    debug!("no config file found, using defaults");
                    Self::default()
                }
            }
        };

        if let Ok(v) = env::var("ES_URL") {
            cfg.es.url = v;
        }
        if let Ok(v) = env::var("ES_USER") {
            cfg.es.user = v;
        }
        if let Ok(v) = env::var("ES_PASS") {
            cfg.es.pass = v;
        }
        if let Ok(v) = env::var("SLACK_WEBHOOK_URL") {
            cfg.slack.webhook_url = Some(v);
        }
        maybe_env_u64(&mut cfg.timeout.connect_secs, "TIMEOUT_CONNECT");
        maybe_env_u64(&mut cfg.timeout.read_secs, "TIMEOUT_READ");
        maybe_env_u64(&mut cfg.sleep_secs, "SLEEP");
        if let Some(n) = env::var("RETRY").ok().and_then(|v| v.parse::<u32>().ok()) {
            cfg.retry = n;
        }
        if let Ok(v) = env::var("FORCE") {
            cfg.force = is_true(&v);
        }
        if let Ok(v) = env::var("SETTINGS") {
            if !v.trim().is_empty() {
                cfg.merge_settings_json(&v)?;
            }
        }

        validate_required(&cfg)?;
        Ok(cfg)
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str::<Config>(raw)?)
    }

    /// Merge a JSON `settings` object over the loaded one. Box types are
    /// replaced; index entries replace the ones with the same prefix.
    pub fn merge_settings_json(&mut self, raw: &str) -> Result<()> {
        let overrides: SettingsOverride =
            serde_json::from_str(raw).context("parsing SETTINGS json")?;
        debug!("env settings: {:?}", overrides);

        if let Some(box_types) = overrides.box_types {
            self.settings.box_types = box_types;
        }
        if let Some(indices) = overrides.indices {
            self.settings.indices.extend(indices);
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retry,
            sleep: Duration::from_secs(self.sleep_secs),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.connect_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.read_secs)
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            interval: Duration::from_secs(self.snapshot.poll_interval_secs),
            ilm_stop_timeout: Duration::from_secs(self.snapshot.ilm_stop_timeout_secs),
            wait_timeout: self.snapshot.wait_timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn primary_repo(&self) -> Option<&RepoSettings> {
        self.snapshot.repos.first()
    }

    /// Whether `settings.indices.<prefix>.skip.<op>` opts this index out.
    pub fn skip_index(&self, index: &str, op: OperationKind) -> bool {
        let prefix = naming::index_prefix(index);
        let skip = self
            .settings
            .indices
            .get(prefix)
            .and_then(|s| s.skip.get(op.as_str()).copied())
            .unwrap_or(false);
        if skip {
            warn!("{} index {} skipped due settings", prefix, op);
        }
        skip
    }

    /// Only meant for development logs: a global `_all` override lets any
    /// index go without a snapshot.
    pub fn delete_without_snapshot(&self, index: &str) -> bool {
        if self
            .settings
            .indices
            .get(ALL_INDICES)
            .is_some_and(|s| s.delete_without_snapshot)
        {
            warn!("any index can be deleted without snapshot due global settings");
            return true;
        }

        let prefix = naming::index_prefix(index);
        if self
            .settings
            .indices
            .get(prefix)
            .is_some_and(|s| s.delete_without_snapshot)
        {
            warn!("{} index can be deleted without snapshot", prefix);
            return true;
        }
        false
    }
}

/// Index selection by date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateSelection {
    Range { from: NaiveDate, to: NaiveDate },
    DaysAgo(u32),
}

impl DateSelection {
    /// Validates the raw from/to/days-ago triple; exactly one mode may be set.
    pub fn from_raw(from: Option<&str>, to: Option<&str>, days_ago: Option<u32>) -> Result<Self> {
        let from = from.map(str::trim).filter(|s| !s.is_empty());
        let to = to.map(str::trim).filter(|s| !s.is_empty());

        match (from, to, days_ago) {
            (Some(_), Some(_), Some(_)) => {
                anyhow::bail!("FROM-TO and DAYSAGO are mutually exclusive")
            }
            (Some(from), Some(to), None) => {
                let from = parse_cli_date("from", from)?;
                let to = parse_cli_date("to", to)?;
                if from > to {
                    anyhow::bail!(
                        "wrong dates: date to is behind date from. from: {from}, to: {to}"
                    );
                }
                Ok(DateSelection::Range { from, to })
            }
            (None, Some(_), _) => anyhow::bail!("not enough parameters: FROM"),
            (Some(_), None, _) => anyhow::bail!("not enough parameters: TO"),
            (None, None, Some(days)) => Ok(DateSelection::DaysAgo(days)),
            (None, None, None) => anyhow::bail!("not enough parameters: FROM-TO or DAYSAGO"),
        }
    }

    /// Inclusive range, or strictly older than the cutoff.
    pub fn includes(&self, date: NaiveDate, today: NaiveDate) -> bool {
        match *self {
            DateSelection::Range { from, to } => from <= date && date <= to,
            DateSelection::DaysAgo(days) => (today - date).num_days() > i64::from(days),
        }
    }
}

fn parse_cli_date(key: &str, raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("can't parse date {key}: '{raw}'"))
}

/// Parameters of one invocation. Immutable once built.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub task: OperationKind,
    pub prefixes: Vec<String>,
    pub selection: DateSelection,
    pub force: bool,
}

impl RunConfig {
    pub fn new(
        task: OperationKind,
        indices: &str,
        selection: DateSelection,
        force: bool,
    ) -> Result<Self> {
        let prefixes = parse_prefixes(indices);
        if prefixes.is_empty() {
            anyhow::bail!("not enough parameters: INDICES");
        }
        if prefixes.len() > 1 && prefixes.iter().any(|p| p == ALL_INDICES) {
            anyhow::bail!("{ALL_INDICES} can't be combined with other index prefixes");
        }
        Ok(Self {
            task,
            prefixes,
            selection,
            force,
        })
    }
}

pub fn parse_prefixes(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

pub fn is_true(raw: &str) -> bool {
    raw.trim().eq_ignore_ascii_case("true")
}

fn default_config_path() -> PathBuf {
    ProjectDirs::from("com", "es-lifecycle", "es-lifecycle")
        .map(|p| p.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from(".es-lifecycle/config.toml"))
}

fn validate_required(cfg: &Config) -> Result<()> {
    if cfg.es.url.trim().is_empty() {
        anyhow::bail!("ES_URL is required (set via env or config)");
    }
    if cfg.settings.box_types.ingest.trim().is_empty()
        || cfg.settings.box_types.store.trim().is_empty()
    {
        anyhow::bail!("settings.box_types.ingest and settings.box_types.store are required");
    }
    Ok(())
}

fn maybe_env_u64(val: &mut u64, key: &str) {
    if let Ok(v) = env::var(key) {
        if let Ok(n) = v.parse::<u64>() {
            *val = n;
        }
    }
}
