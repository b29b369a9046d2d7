//! Snapshot creation, restore and deletion, plus the ILM stop/start dance
//! around restores. Every asynchronous cluster operation is awaited by
//! polling at a fixed interval.

use std::collections::HashMap;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::catalog::{IndexCatalog, SnapshotState};
use crate::config::PollSettings;
use crate::es_http::EsHttp;
use crate::naming::snapshot_name;

#[derive(Debug, Deserialize)]
struct IlmStatus {
    operation_mode: String,
}

#[derive(Debug, Default, Deserialize)]
struct IndexRecovery {
    #[serde(default)]
    shards: Vec<ShardRecovery>,
}

#[derive(Debug, Deserialize)]
struct ShardRecovery {
    stage: String,
}

#[derive(Clone)]
pub struct SnapshotCoordinator {
    http: EsHttp,
    catalog: IndexCatalog,
    poll: PollSettings,
}

impl SnapshotCoordinator {
    pub fn new(catalog: IndexCatalog, poll: PollSettings) -> Self {
        Self {
            http: catalog.http().clone(),
            catalog,
            poll,
        }
    }

    /// Snapshot exactly one index into `repo` and wait for a terminal state.
    ///
    /// An existing `SUCCESS` or `IN_PROGRESS` snapshot is left alone; any
    /// other leftover is deleted and taken again. `Ok(false)` means the
    /// cluster refused the request; a snapshot ending `FAILED`, `PARTIAL` or
    /// `INCOMPATIBLE` is an error.
    pub async fn create_snapshot(&self, repo: &str, index: &str) -> Result<bool> {
        let name = snapshot_name(index);

        if let Some(existing) = self.catalog.find_snapshot(repo, &name).await? {
            match existing.state {
                SnapshotState::Success => {
                    info!("{} snapshot {} already exists", index, name);
                    return Ok(true);
                }
                SnapshotState::InProgress => {
                    info!("{} snapshot {} already in progress", index, name);
                    return Ok(true);
                }
                state => {
                    warn!(
                        "{} snapshot {} is {:?}, deleting before retake",
                        index, name, state
                    );
                    if !self.delete_snapshot(repo, &name).await? {
                        return Ok(false);
                    }
                }
            }
        }

        let body = serde_json::json!({
            "indices": index,
            "ignore_unavailable": false,
            "include_global_state": false,
            "partial": false
        });
        let resp = self
            .http
            .put(&format!("_snapshot/{repo}/{name}?wait_for_completion=false"), &body)
            .await?;
        if !resp.is_success() {
            error!(
                "{} snapshot request rejected status={} body_sample={}",
                index,
                resp.status,
                resp.snippet()
            );
            return Ok(false);
        }

        info!("{} snapshot {} started", index, name);
        self.wait_for_snapshot(repo, &name).await?;
        info!("{} snapshot {} done", index, name);
        Ok(true)
    }

    async fn wait_for_snapshot(&self, repo: &str, name: &str) -> Result<()> {
        let started = Instant::now();
        loop {
            let Some(snapshot) = self.catalog.find_snapshot(repo, name).await? else {
                anyhow::bail!("snapshot {name} disappeared from {repo} while waiting");
            };
            match snapshot.state {
                SnapshotState::Success => return Ok(()),
                state if state.is_terminal_failure() => {
                    error!("snapshot {} finished as {:?}", name, state);
                    anyhow::bail!("snapshot {name} finished as {state:?}");
                }
                state => debug!("snapshot {} is {:?}, waiting", name, state),
            }
            self.sleep_or_timeout(started, "snapshot", name).await?;
        }
    }

    /// Restore `index` from its snapshot onto the `box_type` tier.
    ///
    /// ILM is stopped before the restore request and started again once the
    /// flow ends, whatever its result. A failed stop also restarts ILM
    /// before the error is returned.
    pub async fn restore_snapshot(&self, repo: &str, index: &str, box_type: &str) -> Result<bool> {
        let name = snapshot_name(index);

        let Some(snapshot) = self.catalog.find_snapshot(repo, &name).await? else {
            warn!("{} has no snapshot {} in {}", index, name, repo);
            return Ok(false);
        };
        if snapshot.state != SnapshotState::Success {
            warn!(
                "{} snapshot {} is {:?}, can't restore",
                index, name, snapshot.state
            );
            return Ok(false);
        }

        if let Err(err) = self.stop_ilm().await {
            if let Err(start_err) = self.start_ilm().await {
                error!("can't restart ILM after failed stop: {start_err:#}");
            }
            return Err(err);
        }
        let restored = self.restore_and_wait(repo, &name, index, box_type).await;
        self.start_ilm().await?;
        restored
    }

    async fn restore_and_wait(
        &self,
        repo: &str,
        name: &str,
        index: &str,
        box_type: &str,
    ) -> Result<bool> {
        let body = restore_body(index, box_type);
        let resp = self
            .http
            .post(&format!("_snapshot/{repo}/{name}/_restore"), Some(&body))
            .await?;
        if !resp.is_success() {
            error!(
                "{} restore rejected status={} body_sample={}",
                index,
                resp.status,
                resp.snippet()
            );
            return Ok(false);
        }

        info!("{} restore from {} started", index, name);
        self.wait_for_recovery(index).await?;
        info!("{} restored from {}", index, name);
        Ok(true)
    }

    async fn wait_for_recovery(&self, index: &str) -> Result<()> {
        let started = Instant::now();
        loop {
            let resp = self.http.get(&format!("{index}/_recovery")).await?;
            if resp.is_success() {
                let parsed: HashMap<String, IndexRecovery> =
                    resp.json().context("index recovery")?;
                if recovery_done(parsed.get(index)) {
                    return Ok(());
                }
            } else {
                debug!("{} recovery not visible yet status={}", index, resp.status);
            }
            self.sleep_or_timeout(started, "recovery", index).await?;
        }
    }

    /// Stop ILM and wait until it reports `STOPPED`. Timing out is fatal.
    pub async fn stop_ilm(&self) -> Result<()> {
        let resp = self.http.post("_ilm/stop", None).await?;
        if !resp.is_success() {
            anyhow::bail!(
                "can't stop ILM status={} body_sample={}",
                resp.status,
                resp.snippet()
            );
        }

        let deadline = Instant::now() + self.poll.ilm_stop_timeout;
        loop {
            let mode = self.ilm_mode().await?;
            if mode == "STOPPED" {
                info!("ILM stopped");
                return Ok(());
            }
            if Instant::now() >= deadline {
                error!("ILM still {} after {:?}", mode, self.poll.ilm_stop_timeout);
                anyhow::bail!(
                    "ILM did not stop within {:?} (mode {mode})",
                    self.poll.ilm_stop_timeout
                );
            }
            debug!("ILM mode {}, waiting", mode);
            tokio::time::sleep(self.poll.interval).await;
        }
    }

    pub async fn start_ilm(&self) -> Result<()> {
        if self.ilm_mode().await? == "RUNNING" {
            return Ok(());
        }
        let resp = self.http.post("_ilm/start", None).await?;
        if !resp.is_success() {
            anyhow::bail!(
                "can't start ILM status={} body_sample={}",
                resp.status,
                resp.snippet()
            );
        }
        info!("ILM started");
        Ok(())
    }

    async fn ilm_mode(&self) -> Result<String> {
        let status: IlmStatus = self.http.get_json("_ilm/status", "ILM status").await?;
        Ok(status.operation_mode)
    }

    /// Delete a snapshot; a refusal is logged and reported as `false`.
    pub async fn delete_snapshot(&self, repo: &str, name: &str) -> Result<bool> {
        let resp = self.http.delete(&format!("_snapshot/{repo}/{name}")).await?;
        if resp.acknowledged() {
            info!("snapshot {} deleted from {}", name, repo);
            return Ok(true);
        }
        error!(
            "can't delete snapshot {} status={} body_sample={}",
            name,
            resp.status,
            resp.snippet()
        );
        Ok(false)
    }

    async fn sleep_or_timeout(&self, started: Instant, what: &str, name: &str) -> Result<()> {
        if let Some(limit) = self.poll.wait_timeout {
            if started.elapsed() >= limit {
                anyhow::bail!("{what} for {name} not finished within {limit:?}");
            }
        }
        tokio::time::sleep(self.poll.interval).await;
        Ok(())
    }
}

pub fn restore_body(index: &str, box_type: &str) -> Value {
    serde_json::json!({
        "indices": index,
        "include_global_state": false,
        "index_settings": {
            "index.number_of_replicas": 0,
            "index.refresh_interval": "-1",
            "index.routing.allocation.require.box_type": box_type
        }
    })
}

fn recovery_done(recovery: Option<&IndexRecovery>) -> bool {
    recovery.is_some_and(|r| !r.shards.is_empty() && r.shards.iter().all(|s| s.stage == "DONE"))
}
