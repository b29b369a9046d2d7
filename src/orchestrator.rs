//! Lifecycle Orchestrator: resolves the indices of a run and drives each
//! one through the transition its task asks for.
//!
//! Handlers return `Result<Option<bool>>`: `Err` aborts the whole run,
//! `Ok(None)` is a skip (policy, already gone, not applicable) and
//! `Ok(Some(ok))` is tallied into the [`RunOutcome`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::NaiveDate;
use serde_json::json;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::catalog::{IndexCatalog, IndexFilter, IndexInfo, IndexState, SnapshotState};
use crate::config::{Config, DateSelection, RunConfig};
use crate::es_http::EsHttp;
use crate::naming::{self, snapshot_name};
use crate::notify::Notifier;
use crate::operation::OperationKind;
use crate::outcome::RunOutcome;
use crate::retention::{snapshot_decision, RetentionResolver, SnapshotDecision};
use crate::snapshot::SnapshotCoordinator;

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_SOFT_DEADLINE_DAYS: i64 = 7;
const DEFAULT_HARD_DEADLINE_DAYS: i64 = 3;

pub struct Orchestrator {
    catalog: IndexCatalog,
    coordinator: SnapshotCoordinator,
    retention: RetentionResolver,
    notifier: Notifier,
    config: Arc<Config>,
}

/// State scoped to one run.
struct RunCtx<'a> {
    run: &'a RunConfig,
    today: NaiveDate,
    repo: OnceCell<String>,
}

impl Orchestrator {
    pub fn new(
        catalog: IndexCatalog,
        coordinator: SnapshotCoordinator,
        retention: RetentionResolver,
        notifier: Notifier,
        config: Arc<Config>,
    ) -> Self {
        Self {
            catalog,
            coordinator,
            retention,
            notifier,
            config,
        }
    }

    pub fn from_config(config: Arc<Config>) -> Result<Self> {
        let http = EsHttp::new(
            config.es.url.clone(),
            config.es.user.clone(),
            config.es.pass.clone(),
            config.connect_timeout(),
            config.read_timeout(),
            config.retry_policy(),
        )?;
        let catalog = IndexCatalog::new(http);
        let coordinator = SnapshotCoordinator::new(catalog.clone(), config.poll_settings());
        let retention = RetentionResolver::new(&config.templates, &config.ilms);
        let notifier = Notifier::new(config.slack.clone(), NOTIFY_TIMEOUT)?;
        Ok(Self::new(catalog, coordinator, retention, notifier, config))
    }

    pub async fn run(&self, run: &RunConfig) -> Result<RunOutcome> {
        self.run_at(run, chrono::Local::now().date_naive()).await
    }

    /// Same as [`Orchestrator::run`] with an explicit "today".
    pub async fn run_at(&self, run: &RunConfig, today: NaiveDate) -> Result<RunOutcome> {
        let span = info_span!("run", task = %run.task);
        let ctx = RunCtx {
            run,
            today,
            repo: OnceCell::new(),
        };
        self.run_inner(&ctx).instrument(span).await
    }

    async fn run_inner(&self, ctx: &RunCtx<'_>) -> Result<RunOutcome> {
        self.prechecks(ctx.run).await?;

        let indices = self.populate_indices(ctx).await?;
        info!("{} indices for work", indices.len());
        debug!("indices: {:?}", indices);

        let mut outcome = RunOutcome::new();
        for index in &indices {
            let span = info_span!("index", name = %index);
            if let Some(ok) = self.process_index(ctx, index).instrument(span).await? {
                outcome.record(index.as_str(), ok);
            }
        }

        info!(
            succeeded = outcome.succeeded(),
            failed = outcome.failed(),
            "{} finished with {:?}",
            ctx.run.task,
            outcome.status()
        );
        Ok(outcome)
    }

    async fn prechecks(&self, run: &RunConfig) -> Result<()> {
        if let DateSelection::Range { from, to } = run.selection {
            if from > to {
                anyhow::bail!("wrong dates: date to is behind date from. from: {from}, to: {to}");
            }
        }

        if run.force || self.config.force {
            warn!("cluster health check skipped due force");
            return Ok(());
        }
        let health = self.catalog.cluster_health().await?;
        if health != "green" {
            error!("cluster health is {}", health);
            anyhow::bail!("elasticsearch on {} is not green", self.catalog.http().base_url());
        }
        Ok(())
    }

    async fn repo<'c>(&self, ctx: &'c RunCtx<'_>) -> Result<&'c str> {
        let repo = ctx
            .repo
            .get_or_try_init(|| self.catalog.resolve_snapshot_repo(self.config.primary_repo()))
            .await?;
        Ok(repo.as_str())
    }

    /// Explicit ranges expand to concrete names; `_all` and days-ago
    /// cutoffs select from the catalog.
    async fn populate_indices(&self, ctx: &RunCtx<'_>) -> Result<Vec<String>> {
        let prefixes = &ctx.run.prefixes;
        let all = naming::is_all(prefixes);

        let result = match (all, ctx.run.selection) {
            (false, DateSelection::Range { from, to }) => naming::expand_range(prefixes, from, to),
            _ => {
                let mut found = self.catalog_candidates(ctx).await?;
                if !all {
                    found.retain(|name| {
                        prefixes
                            .iter()
                            .any(|p| name.starts_with(&format!("{p}-")))
                    });
                }
                found
            }
        };

        if result.is_empty() {
            error!("no indices for work");
            anyhow::bail!("no indices for work");
        }
        Ok(result)
    }

    async fn catalog_candidates(&self, ctx: &RunCtx<'_>) -> Result<Vec<String>> {
        let selection = &ctx.run.selection;
        let today = ctx.today;
        let box_types = &self.config.settings.box_types;

        let found = match ctx.run.task {
            OperationKind::Open => {
                let filter = IndexFilter {
                    states: vec![IndexState::Closed, IndexState::Frozen],
                    box_type: None,
                };
                let mut found = self.catalog.select_indices(selection, &filter, today).await?;
                let repo = self.repo(ctx).await?;
                for name in self
                    .catalog
                    .indices_in_snapshots(repo, selection, today, true)
                    .await?
                {
                    if !found.contains(&name) {
                        found.push(name);
                    }
                }
                found
            }
            OperationKind::Close => {
                let filter = IndexFilter {
                    states: vec![IndexState::Open],
                    box_type: None,
                };
                self.catalog.select_indices(selection, &filter, today).await?
            }
            OperationKind::Chill => {
                let filter = IndexFilter {
                    states: vec![IndexState::Open],
                    box_type: Some(box_types.ingest.clone()),
                };
                self.catalog.select_indices(selection, &filter, today).await?
            }
            OperationKind::SnapDelete => {
                let repo = self.repo(ctx).await?;
                self.catalog
                    .indices_in_snapshots(repo, selection, today, false)
                    .await?
            }
            OperationKind::Snapshot | OperationKind::Delete => {
                self.catalog
                    .select_indices(selection, &IndexFilter::any(), today)
                    .await?
            }
        };
        Ok(found)
    }

    async fn process_index(&self, ctx: &RunCtx<'_>, index: &str) -> Result<Option<bool>> {
        let task = ctx.run.task;
        if self.config.skip_index(index, task) {
            return Ok(None);
        }

        match task {
            OperationKind::Open => self.open_index(ctx, index).await,
            OperationKind::Close => self.close_index(index).await,
            OperationKind::Chill => self.chill_index(index).await,
            OperationKind::Snapshot => self.snapshot_index(ctx, index).await,
            OperationKind::SnapDelete => self.snapdelete_index(ctx, index).await,
            OperationKind::Delete => self.delete_index(ctx, index).await,
        }
    }

    async fn open_index(&self, ctx: &RunCtx<'_>, index: &str) -> Result<Option<bool>> {
        let info = self.catalog.index_info(index).await?;
        match info.state {
            IndexState::Open => {
                warn!("{} index status already open", index);
                Ok(Some(true))
            }
            IndexState::Closed => self.index_action(index, "open", "_open").await.map(Some),
            IndexState::Frozen => self.index_action(index, "unfreeze", "_unfreeze").await.map(Some),
            IndexState::NotFound => {
                warn!("{} index not found", index);
                info!("{} trying snapshot restore", index);
                let repo = self.repo(ctx).await?;
                let store = &self.config.settings.box_types.store;
                let ok = self.coordinator.restore_snapshot(repo, index, store).await?;
                if ok {
                    info!("{} restore_snapshot success", index);
                } else {
                    error!("{} restore_snapshot fail", index);
                    self.notifier
                        .post(&format!("can't open index {index}: restore from snapshot failed"))
                        .await;
                }
                Ok(Some(ok))
            }
            IndexState::Error => Ok(Some(false)),
        }
    }

    async fn close_index(&self, index: &str) -> Result<Option<bool>> {
        let info = self.catalog.index_info(index).await?;
        let ingest = &self.config.settings.box_types.ingest;
        match info.state {
            IndexState::Open if on_tier(&info, ingest) => {
                error!(
                    "{} index is on ingest tier {}, refusing to close it",
                    index, ingest
                );
                Ok(Some(false))
            }
            IndexState::Open => self.index_action(index, "close", "_close").await.map(Some),
            IndexState::Closed => {
                warn!("{} index status already close", index);
                Ok(Some(true))
            }
            IndexState::Frozen => {
                warn!("{} index is frozen, close not applicable", index);
                Ok(None)
            }
            IndexState::NotFound => {
                warn!("{} index not found, maybe already snapshotted", index);
                Ok(None)
            }
            IndexState::Error => Ok(Some(false)),
        }
    }

    async fn chill_index(&self, index: &str) -> Result<Option<bool>> {
        let info = self.catalog.index_info(index).await?;
        let store = &self.config.settings.box_types.store;
        match info.state {
            IndexState::Open if on_tier(&info, store) => {
                warn!("{} index already {}", index, store);
                Ok(Some(true))
            }
            IndexState::Open => {
                let body = json!({ "index.routing.allocation.require.box_type": store });
                let resp = self
                    .catalog
                    .http()
                    .put(&format!("{index}/_settings"), &body)
                    .await?;
                Ok(Some(log_action(index, "chill", resp.acknowledged())))
            }
            IndexState::Closed | IndexState::Frozen => {
                warn!("{} index is {:?}, chill needs an open index", index, info.state);
                Ok(None)
            }
            IndexState::NotFound => {
                warn!("{} index not found", index);
                Ok(None)
            }
            IndexState::Error => Ok(Some(false)),
        }
    }

    async fn snapshot_index(&self, ctx: &RunCtx<'_>, index: &str) -> Result<Option<bool>> {
        let days = match self.retention.find_delete_after(index, ctx.today) {
            Ok(days) => days,
            Err(err) => {
                self.notifier
                    .post(&format!(
                        "can't snapshot index {index}: can't detect delete date ({err})"
                    ))
                    .await;
                return Ok(None);
            }
        };

        let (soft, hard) = self
            .config
            .primary_repo()
            .map(|r| (r.soft_deadline_days, r.hard_deadline_days))
            .unwrap_or((DEFAULT_SOFT_DEADLINE_DAYS, DEFAULT_HARD_DEADLINE_DAYS));

        let urgent = match snapshot_decision(days, soft, hard) {
            SnapshotDecision::Overdue => {
                let text = format!("index {index} should have been deleted by ILM but it is not");
                error!("{}", text);
                self.notifier.post(&text).await;
                return Ok(None);
            }
            SnapshotDecision::NotDue => {
                debug!("{} will be deleted in {} days, snapshot not due", index, days);
                return Ok(None);
            }
            SnapshotDecision::Due { urgent } => urgent,
        };

        let info = self.catalog.index_info(index).await?;
        match info.state {
            IndexState::NotFound => {
                warn!("{} index not found", index);
                return Ok(None);
            }
            IndexState::Error => return Ok(Some(false)),
            IndexState::Closed => {
                if !self.index_action(index, "open", "_open").await? {
                    return Ok(Some(false));
                }
            }
            IndexState::Open | IndexState::Frozen => {}
        }

        let repo = self.repo(ctx).await?;
        let ok = self.coordinator.create_snapshot(repo, index).await?;
        if !ok {
            if urgent {
                let text = format!("can't snapshot index {index} that will be deleted in {days} days");
                error!("{}", text);
                self.notifier.post_with_icon(&text, Some(":rotating_light:")).await;
            } else {
                error!("can't snapshot index {}", index);
            }
        }
        Ok(Some(ok))
    }

    async fn delete_index(&self, ctx: &RunCtx<'_>, index: &str) -> Result<Option<bool>> {
        let info = self.catalog.index_info(index).await?;
        match info.state {
            IndexState::NotFound => {
                warn!("{} index not found", index);
                return Ok(None);
            }
            IndexState::Error => return Ok(Some(false)),
            IndexState::Open | IndexState::Closed | IndexState::Frozen => {}
        }

        if !self.config.delete_without_snapshot(index) {
            let repo = self.repo(ctx).await?;
            let name = snapshot_name(index);
            match self.catalog.find_snapshot(repo, &name).await? {
                Some(s) if s.state == SnapshotState::Success => {
                    debug!("{} has snapshot {}", index, name);
                }
                Some(s) => {
                    error!(
                        "{} snapshot {} is {:?}, refusing to delete index",
                        index, name, s.state
                    );
                    return Ok(Some(false));
                }
                None => {
                    error!("{} has no snapshot {}, refusing to delete index", index, name);
                    return Ok(Some(false));
                }
            }
        }

        let resp = self.catalog.http().delete(index).await?;
        Ok(Some(log_action(index, "delete", resp.acknowledged())))
    }

    async fn snapdelete_index(&self, ctx: &RunCtx<'_>, index: &str) -> Result<Option<bool>> {
        let repo = self.repo(ctx).await?;
        let name = snapshot_name(index);
        if self.catalog.find_snapshot(repo, &name).await?.is_none() {
            warn!("{} snapshot {} not found", index, name);
            return Ok(None);
        }
        let ok = self.coordinator.delete_snapshot(repo, &name).await?;
        Ok(Some(log_action(index, "snapdelete", ok)))
    }

    /// POST `{index}/{endpoint}` and report whether it was acknowledged.
    async fn index_action(&self, index: &str, action: &str, endpoint: &str) -> Result<bool> {
        let resp = self
            .catalog
            .http()
            .post(&format!("{index}/{endpoint}"), None)
            .await?;
        Ok(log_action(index, action, resp.acknowledged()))
    }
}

fn on_tier(info: &IndexInfo, tier: &str) -> bool {
    info.box_type.as_deref() == Some(tier)
}

fn log_action(index: &str, action: &str, ok: bool) -> bool {
    if ok {
        info!("{} {} success", index, action);
    } else {
        error!("{} {} fail", index, action);
    }
    ok
}
