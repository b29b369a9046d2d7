//! Index Catalog: what exists in the cluster, in which state and tier,
//! and which snapshots a repository holds.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::config::{DateSelection, RepoSettings};
use crate::es_http::EsHttp;
use crate::naming;

const METADATA_FILTER: &str = "filter_path=metadata.indices.*.state,\
metadata.indices.*.settings.index.routing.allocation.require.box_type,\
metadata.indices.*.settings.index.frozen";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    Open,
    Closed,
    Frozen,
    NotFound,
    /// The cluster answered something other than found / not found.
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexInfo {
    pub state: IndexState,
    pub box_type: Option<String>,
}

impl IndexInfo {
    pub fn not_found() -> Self {
        Self {
            state: IndexState::NotFound,
            box_type: None,
        }
    }
}

/// Restricts catalog selection to indices in given states and/or tier.
#[derive(Debug, Clone, Default)]
pub struct IndexFilter {
    pub states: Vec<IndexState>,
    pub box_type: Option<String>,
}

impl IndexFilter {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn matches(&self, info: &IndexInfo) -> bool {
        let state_ok = self.states.is_empty() || self.states.contains(&info.state);
        let box_ok = match &self.box_type {
            Some(want) => info.box_type.as_deref() == Some(want.as_str()),
            None => true,
        };
        state_ok && box_ok
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SnapshotState {
    Success,
    InProgress,
    Failed,
    Partial,
    Incompatible,
    #[serde(other)]
    Unknown,
}

impl SnapshotState {
    pub fn is_terminal_failure(&self) -> bool {
        matches!(
            self,
            SnapshotState::Failed | SnapshotState::Partial | SnapshotState::Incompatible
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SnapshotRecord {
    pub snapshot: String,
    pub state: SnapshotState,
    #[serde(default)]
    pub indices: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SnapshotsResp {
    #[serde(default)]
    snapshots: Vec<SnapshotRecord>,
}

#[derive(Debug, Deserialize)]
struct ClusterHealth {
    status: String,
}

#[derive(Clone)]
pub struct IndexCatalog {
    http: EsHttp,
}

impl IndexCatalog {
    pub fn new(http: EsHttp) -> Self {
        Self { http }
    }

    pub fn http(&self) -> &EsHttp {
        &self.http
    }

    pub async fn cluster_health(&self) -> Result<String> {
        let health: ClusterHealth = self
            .http
            .get_json("_cluster/health", "cluster health")
            .await?;
        Ok(health.status)
    }

    /// Every index with its state and tier. Fatal when the cluster does not
    /// answer with success: nothing else can proceed without it.
    pub async fn list_all_indices(&self) -> Result<BTreeMap<String, IndexInfo>> {
        let body: Value = self
            .http
            .get_json(
                &format!("_cluster/state/metadata?{METADATA_FILTER}"),
                "list all indices",
            )
            .await?;
        Ok(parse_index_metadata(&body))
    }

    /// Current state of a single index.
    pub async fn index_info(&self, index: &str) -> Result<IndexInfo> {
        let resp = self
            .http
            .get(&format!("_cluster/state/metadata/{index}?{METADATA_FILTER}"))
            .await?;

        if resp.is_not_found() {
            return Ok(IndexInfo::not_found());
        }
        if !resp.is_success() {
            error!(
                "{} state lookup failed status={} body_sample={}",
                index,
                resp.status,
                resp.snippet()
            );
            return Ok(IndexInfo {
                state: IndexState::Error,
                box_type: None,
            });
        }

        let body: Value = resp.json().context("index state lookup")?;
        Ok(parse_index_metadata(&body)
            .remove(index)
            .unwrap_or_else(IndexInfo::not_found))
    }

    /// Catalog indices passing both the date selection and `filter`, in
    /// catalog order.
    pub async fn select_indices(
        &self,
        selection: &DateSelection,
        filter: &IndexFilter,
        today: NaiveDate,
    ) -> Result<Vec<String>> {
        let all = self.list_all_indices().await?;
        let candidates = all
            .iter()
            .filter(|(_, info)| filter.matches(info))
            .map(|(name, _)| name.as_str());
        Ok(filter_by_date_range(candidates, selection, today))
    }

    pub async fn list_snapshots(&self, repo: &str, only_success: bool) -> Result<Vec<SnapshotRecord>> {
        let resp: SnapshotsResp = self
            .http
            .get_json(&format!("_snapshot/{repo}/_all"), "list snapshots")
            .await?;
        Ok(resp
            .snapshots
            .into_iter()
            .filter(|s| !only_success || s.state == SnapshotState::Success)
            .collect())
    }

    /// Snapshot by exact name; `None` when the repository does not hold it.
    pub async fn find_snapshot(&self, repo: &str, name: &str) -> Result<Option<SnapshotRecord>> {
        let resp = self.http.get(&format!("_snapshot/{repo}/{name}")).await?;
        if resp.is_not_found() {
            return Ok(None);
        }
        if !resp.is_success() {
            anyhow::bail!(
                "find snapshot {} status={} body_sample={}",
                name,
                resp.status,
                resp.snippet()
            );
        }
        let parsed: SnapshotsResp = resp.json().context("find snapshot")?;
        let mut matching = parsed.snapshots.into_iter().filter(|s| s.snapshot == name);
        let first = matching.next();
        if matching.next().is_some() {
            warn!("more than one snapshot named {} in {}", name, repo);
        }
        Ok(first)
    }

    /// Indices captured by snapshots of `repo`, filtered by date.
    pub async fn indices_in_snapshots(
        &self,
        repo: &str,
        selection: &DateSelection,
        today: NaiveDate,
        only_success: bool,
    ) -> Result<Vec<String>> {
        let snapshots = self.list_snapshots(repo, only_success).await?;
        let names: Vec<String> = snapshots
            .iter()
            .filter_map(|s| naming::index_from_snapshot(&s.snapshot).map(String::from))
            .collect();
        Ok(filter_by_date_range(
            names.iter().map(String::as_str),
            selection,
            today,
        ))
    }

    /// First snapshot repository of the cluster. Creates the configured one
    /// when the cluster has none; fails when neither exists. Only one
    /// repository per cluster is supported.
    pub async fn resolve_snapshot_repo(&self, configured: Option<&RepoSettings>) -> Result<String> {
        let repos: BTreeMap<String, Value> = self
            .http
            .get_json("_snapshot", "list snapshot repositories")
            .await?;

        if repos.len() > 1 {
            warn!(
                "{} snapshot repositories found, only one is supported",
                repos.len()
            );
        }
        if let Some(cfg) = configured {
            if repos.contains_key(&cfg.name) {
                return Ok(cfg.name.clone());
            }
        }
        if let Some(name) = repos.keys().next() {
            return Ok(name.clone());
        }

        let Some(cfg) = configured else {
            error!("no snapshot repository in cluster and none configured");
            anyhow::bail!("can't find snapshot repository");
        };

        let body = serde_json::json!({
            "type": cfg.repo_type,
            "settings": { "location": cfg.location }
        });
        let resp = self.http.put(&format!("_snapshot/{}", cfg.name), &body).await?;
        if !resp.is_success() {
            anyhow::bail!(
                "create snapshot repository {} status={} body_sample={}",
                cfg.name,
                resp.status,
                resp.snippet()
            );
        }
        info!("created snapshot repository {} ({})", cfg.name, cfg.repo_type);
        Ok(cfg.name.clone())
    }
}

/// Keep names whose embedded date passes `selection`. Names without a
/// parseable date are logged and dropped.
pub fn filter_by_date_range<'a>(
    names: impl IntoIterator<Item = &'a str>,
    selection: &DateSelection,
    today: NaiveDate,
) -> Vec<String> {
    names
        .into_iter()
        .filter(|name| match naming::parse_index_date(name) {
            Some(date) => selection.includes(date, today),
            None => {
                error!("can't parse date from index name {}, skipping", name);
                false
            }
        })
        .map(String::from)
        .collect()
}

pub fn parse_index_metadata(body: &Value) -> BTreeMap<String, IndexInfo> {
    let Some(indices) = body.pointer("/metadata/indices").and_then(Value::as_object) else {
        return BTreeMap::new();
    };

    indices
        .iter()
        .map(|(name, meta)| (name.clone(), parse_index_entry(meta)))
        .collect()
}

fn parse_index_entry(meta: &Value) -> IndexInfo {
    let settings = meta.get("settings");
    let setting = |nested: &str, flat: &str| -> Option<String> {
        let settings = settings?;
        settings
            .pointer(nested)
            .or_else(|| settings.get(flat))
            .and_then(Value::as_str)
            .map(String::from)
    };

    let box_type = setting(
        "/index/routing/allocation/require/box_type",
        "index.routing.allocation.require.box_type",
    );
    let frozen = setting("/index/frozen", "index.frozen").is_some_and(|v| v == "true");

    let state = match meta.get("state").and_then(Value::as_str) {
        Some("open") if frozen => IndexState::Frozen,
        Some("open") => IndexState::Open,
        Some("close") => IndexState::Closed,
        _ => IndexState::Error,
    };

    IndexInfo { state, box_type }
}
