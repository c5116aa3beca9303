//! Orchestrates a chart request from resolution to a finished artifact.

use std::{sync::Arc, time::Duration, time::Instant};

use metrics::counter;
use tracing::{info, warn};

use crate::application::{
    background::BackgroundTasks,
    repos::{AccessRepo, DatapackRepo, HistoryEntry, HistoryRepo, RetentionRepo},
};
use crate::domain::{CacheKey, CallerIdentity, ChartArtifact, ChartRequest, ProgressEvent};

use super::{
    cache_index::{CacheIndex, CacheLookup},
    channel::ProgressSink,
    error::ChartError,
    finalizer::ArtifactFinalizer,
    renderer::{ChartRenderer, RenderJob},
    resolver::{CallerContext, RequestResolver, ResolvedRequest},
    scheduler::{AdmissionScheduler, SchedulerSnapshot},
};

/// Stores the pipeline reads from and writes to.
#[derive(Clone)]
pub struct ChartCollaborators {
    pub access: Arc<dyn AccessRepo>,
    pub datapacks: Arc<dyn DatapackRepo>,
    pub retention: Arc<dyn RetentionRepo>,
    pub history: Arc<dyn HistoryRepo>,
}

pub struct ChartService {
    resolver: RequestResolver,
    cache: CacheIndex,
    scheduler: AdmissionScheduler,
    renderer: Arc<dyn ChartRenderer>,
    finalizer: ArtifactFinalizer,
    finalize_timeout: Duration,
    datapacks: Arc<dyn DatapackRepo>,
    retention: Arc<dyn RetentionRepo>,
    history: Arc<dyn HistoryRepo>,
    background: BackgroundTasks,
}

impl ChartService {
    pub fn new(
        collaborators: ChartCollaborators,
        cache: CacheIndex,
        scheduler: AdmissionScheduler,
        renderer: Arc<dyn ChartRenderer>,
        finalizer: ArtifactFinalizer,
        finalize_timeout: Duration,
        background: BackgroundTasks,
    ) -> Self {
        let ChartCollaborators {
            access,
            datapacks,
            retention,
            history,
        } = collaborators;
        Self {
            resolver: RequestResolver::new(access, Arc::clone(&datapacks)),
            cache,
            scheduler,
            renderer,
            finalizer,
            finalize_timeout,
            datapacks,
            retention,
            history,
            background,
        }
    }

    pub fn cache(&self) -> &CacheIndex {
        &self.cache
    }

    pub(crate) fn background(&self) -> &BackgroundTasks {
        &self.background
    }

    pub fn scheduler_snapshot(&self) -> SchedulerSnapshot {
        self.scheduler.snapshot()
    }

    /// Produce the chart for `request`, rendering it only when no cached
    /// copy may be used.
    ///
    /// Intermediate events go to `progress`; the terminal outcome is the
    /// return value.
    pub async fn generate(
        &self,
        request: ChartRequest,
        identity: Option<CallerIdentity>,
        progress: &ProgressSink,
    ) -> Result<ChartArtifact, ChartError> {
        let started_at = Instant::now();
        progress.emit(ProgressEvent::Initializing);

        let result = self.generate_inner(&request, identity, progress).await;
        let elapsed_ms = started_at.elapsed().as_millis() as u64;
        match &result {
            Ok(artifact) => info!(
                target = "chartforge::application::chart::service",
                op = "chart::generate",
                result = "ok",
                cache_key = %artifact.cache_key,
                elapsed_ms,
                "Chart request completed"
            ),
            Err(error) => warn!(
                target = "chartforge::application::chart::service",
                op = "chart::generate",
                result = "error",
                error_kind = error.kind(),
                error_code = error.code(),
                error = %error,
                elapsed_ms,
                "Chart request failed"
            ),
        }
        result
    }

    async fn generate_inner(
        &self,
        request: &ChartRequest,
        identity: Option<CallerIdentity>,
        progress: &ProgressSink,
    ) -> Result<ChartArtifact, ChartError> {
        if request.datapack_refs.is_empty() {
            return Err(ChartError::InvalidRequest(
                "at least one datapack is required".to_string(),
            ));
        }

        let key = CacheKey::for_request(request);
        let artifact = self.cache.artifact_for(&key);
        let caller = self.resolver.caller_context(identity).await?;
        let resolved = self.resolver.resolve(request, &caller).await?;

        let _cleanup = TempCleanup {
            service: self,
            titles: resolved.temp_titles.clone(),
        };
        self.produce(request, &caller, &resolved, &artifact, progress)
            .await
    }

    async fn produce(
        &self,
        request: &ChartRequest,
        caller: &CallerContext,
        resolved: &ResolvedRequest,
        artifact: &ChartArtifact,
        progress: &ProgressSink,
    ) -> Result<ChartArtifact, ChartError> {
        let lookup = self
            .cache
            .lookup(artifact, request.use_cache)
            .await
            .map_err(ChartError::internal)?;
        if let CacheLookup::Hit(_) = lookup {
            self.schedule_history(request, caller, resolved, artifact);
            return Ok(artifact.clone());
        }

        let priority = caller.priority();
        self.scheduler.ensure_capacity(priority)?;
        self.persist_inputs(request, resolved, &artifact.cache_key)
            .await?;

        let job = RenderJob {
            is_cross_plot: request.is_cross_plot,
            settings_path: self.cache.settings_path(&artifact.cache_key),
            datapack_paths: resolved.datapack_paths.clone(),
            output_path: artifact.filesystem_path.clone(),
            display_names: resolved.display_names.clone(),
        };
        self.scheduler
            .admit(priority, self.render_in_slot(&job, progress))
            .await??;

        self.schedule_history(request, caller, resolved, artifact);
        Ok(artifact.clone())
    }

    async fn render_in_slot(&self, job: &RenderJob, progress: &ProgressSink) -> Result<(), ChartError> {
        let outcome = self.renderer.render(job, progress).await?;
        if !outcome.is_success() {
            return Err(ChartError::RendererReported {
                code: outcome.known_error_code,
                message: outcome.error_message,
            });
        }

        self.finalizer
            .wait_until_ready(&job.output_path, self.finalize_timeout)
            .await
            .inspect_err(|_| {
                counter!("chartforge_render_failures_total", "kind" => "finalize").increment(1);
            })?;
        Ok(())
    }

    async fn persist_inputs(
        &self,
        request: &ChartRequest,
        resolved: &ResolvedRequest,
        key: &CacheKey,
    ) -> Result<(), ChartError> {
        self.retention
            .touch(&resolved.retained_dirs)
            .await
            .map_err(|err| ChartError::MetadataPersist(err.to_string()))?;

        tokio::fs::create_dir_all(self.cache.chart_dir(key))
            .await
            .map_err(|err| ChartError::MetadataPersist(err.to_string()))?;
        tokio::fs::write(self.cache.settings_path(key), &request.settings_text)
            .await
            .map_err(|err| ChartError::MetadataPersist(err.to_string()))?;
        Ok(())
    }

    fn schedule_history(
        &self,
        request: &ChartRequest,
        caller: &CallerContext,
        resolved: &ResolvedRequest,
        artifact: &ChartArtifact,
    ) {
        if request.is_cross_plot {
            return;
        }
        let Some(identity) = caller.identity else {
            return;
        };

        let entry = HistoryEntry {
            user_uuid: identity.user_uuid,
            cache_key: artifact.cache_key.clone(),
            settings_path: self.cache.settings_path(&artifact.cache_key),
            chart_path: artifact.filesystem_path.clone(),
            datapack_paths: resolved.datapack_paths.clone(),
        };
        let history = Arc::clone(&self.history);
        self.background.spawn("history::record", async move {
            history.record(&entry).await
        });
    }

    fn schedule_temp_cleanup(&self, titles: &[String]) {
        for title in titles {
            let title = title.clone();
            let datapacks = Arc::clone(&self.datapacks);
            let retention = Arc::clone(&self.retention);
            self.background.spawn("datapacks::delete_temp", async move {
                let directory = datapacks.delete_temp(&title).await?;
                retention.forget(&directory).await
            });
        }
    }
}

/// Removes a request's temp datapacks once the request is over, including
/// when its future is dropped mid-render.
struct TempCleanup<'a> {
    service: &'a ChartService,
    titles: Vec<String>,
}

impl Drop for TempCleanup<'_> {
    fn drop(&mut self) {
        self.service.schedule_temp_cleanup(&self.titles);
    }
}
