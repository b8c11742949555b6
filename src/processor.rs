use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::command::MediaRunner;
use crate::error::{PipelineError, PipelineResult};
use crate::fetch::{AssetFetcher, RetryPolicy};
use crate::models::{AssetManifest, JobStatus, VideoEditingJob};
use crate::pipeline::{AssemblyState, Pipeline, StageContext};
use crate::scratch::ScratchDir;
use crate::storage::Publisher;
use crate::template::Template;
use crate::tracker::{JobTracker, Outcome, SharedJobStore};

/// An accepted job, handed from the web layer to the processor.
pub struct JobRequest {
    pub job_id: Uuid,
    pub manifest: AssetManifest,
    pub callback_url: Option<String>,
    pub cancel: CancellationToken,
}

/// Cancellation tokens of jobs still in flight.
#[derive(Clone, Default)]
pub struct CancelRegistry {
    tokens: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
}

impl CancelRegistry {
    pub fn register(&self, id: Uuid) -> CancellationToken {
        let token = CancellationToken::new();
        self.lock().insert(id, token.clone());
        token
    }

    /// Returns whether a running job was signalled.
    pub fn cancel(&self, id: Uuid) -> bool {
        match self.lock().remove(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: Uuid) {
        self.lock().remove(&id);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, CancellationToken>> {
        self.tokens.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("callback delivery to {url} failed: {reason}")]
    DeliveryFailed { url: String, reason: String },
}

#[derive(Debug, Serialize)]
struct CallbackPayload<'a> {
    job_id: Uuid,
    status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    final_video_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    manifest_reference_id: &'a str,
}

/// Runs one manifest through the pipeline and reconciles the outcome into
/// the job store.
pub struct Orchestrator {
    store: SharedJobStore,
    media: Box<dyn MediaRunner>,
    fetcher: AssetFetcher,
    publisher: Box<dyn Publisher>,
    pipeline: Pipeline,
    template: &'static Template,
    scratch_root: PathBuf,
    caption_font: PathBuf,
    callbacks: awc::Client,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: SharedJobStore,
        media: Box<dyn MediaRunner>,
        fetcher: AssetFetcher,
        publisher: Box<dyn Publisher>,
        pipeline: Pipeline,
        template: &'static Template,
        scratch_root: PathBuf,
        caption_font: PathBuf,
    ) -> Self {
        Self {
            store,
            media,
            fetcher,
            publisher,
            pipeline,
            template,
            scratch_root,
            caption_font,
            callbacks: awc::Client::default(),
        }
    }

    /// Builds the video, writes exactly one terminal update and notifies the
    /// callback, if any. Returns the published URL.
    pub async fn process_job(&self, request: JobRequest) -> PipelineResult<String> {
        let tracker = JobTracker::new(self.store.clone(), request.job_id);
        info!(job_id = %request.job_id, reference = %request.manifest.job_reference_id, "processor: starting job");

        let result = self.assemble(&tracker, &request).await;

        let terminal = match &result {
            Ok(url) => tracker.complete(url),
            Err(err) => tracker.fail(&err.to_string()),
        };

        match (&result, terminal) {
            (Ok(url), Ok(Outcome::Applied)) => {
                info!(job_id = %request.job_id, "processor: complete, published {}", url)
            }
            (Err(err), Ok(Outcome::Applied)) => {
                error!(job_id = %request.job_id, "processor: ended with error: {}", err)
            }
            (_, Ok(outcome)) => warn!(
                job_id = %request.job_id,
                "processor: final update {:?}, job was already finished", outcome
            ),
            (_, Err(err)) => error!(job_id = %request.job_id, "processor: could not record outcome: {}", err),
        }

        if let Some(url) = &request.callback_url {
            // Report what the record says, which differs from `result` when
            // the job was cancelled while its last stage was running.
            let recorded = match self.store.get(request.job_id) {
                Ok(job) => job.filter(|job| job.status.is_terminal()),
                Err(err) => {
                    warn!(job_id = %request.job_id, "could not read back job record: {}", err);
                    None
                }
            };
            let payload = callback_payload(&request, recorded.as_ref(), &result);
            if let Err(err) = self.notify(url, &payload).await {
                warn!(job_id = %request.job_id, "{}", err);
            }
        }

        result
    }

    async fn assemble(&self, tracker: &JobTracker, request: &JobRequest) -> PipelineResult<String> {
        let scratch = ScratchDir::create(&self.scratch_root, request.job_id).await?;
        debug!(job_id = %request.job_id, "scratch dir {}", scratch.path().display());

        let outcome = {
            let ctx = StageContext {
                tracker,
                scratch: &scratch,
                media: self.media.as_ref(),
                fetcher: &self.fetcher,
                publisher: self.publisher.as_ref(),
                template: self.template,
                caption_font: &self.caption_font,
                cancel: &request.cancel,
            };
            self.pipeline
                .run(&ctx, AssemblyState::new(request.manifest.clone()))
                .await
        };

        if let Err(err) = scratch.cleanup().await {
            warn!(job_id = %request.job_id, "could not clean scratch dir: {}", err);
        }

        outcome?.published_url.ok_or_else(|| {
            PipelineError::PublishFailed("pipeline finished without publishing".to_owned())
        })
    }

    async fn notify(&self, url: &str, payload: &CallbackPayload<'_>) -> Result<(), CallbackError> {
        let failed = |reason: String| CallbackError::DeliveryFailed {
            url: url.to_owned(),
            reason,
        };

        let response = self
            .callbacks
            .post(url)
            .send_json(payload)
            .await
            .map_err(|e| failed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(failed(format!("endpoint responded {}", response.status())));
        }

        Ok(())
    }
}

/// Builds the callback body from the stored terminal record, falling back to
/// the pipeline result when the record cannot be read.
fn callback_payload<'a>(
    request: &'a JobRequest,
    recorded: Option<&VideoEditingJob>,
    result: &PipelineResult<String>,
) -> CallbackPayload<'a> {
    let (status, final_video_url, error) = match (recorded, result) {
        (Some(job), _) => (job.status, job.final_video_url.clone(), job.error_message.clone()),
        (None, Ok(url)) => (JobStatus::Complete, Some(url.clone()), None),
        (None, Err(err)) => (JobStatus::Failed, None, Some(err.to_string())),
    };

    CallbackPayload {
        job_id: request.job_id,
        status,
        final_video_url,
        error,
        manifest_reference_id: &request.manifest.job_reference_id,
    }
}

/// What the processor thread needs to build its orchestrator.
pub struct ProcessorSettings {
    pub store: SharedJobStore,
    pub media: Box<dyn MediaRunner + Send>,
    pub publisher: Box<dyn Publisher + Send>,
    pub template: &'static Template,
    pub scratch_root: PathBuf,
    pub caption_font: PathBuf,
}

/// Receives accepted jobs and runs each as its own task. Blocks the calling
/// thread until the sending side is dropped.
pub fn processor(
    mut rx: UnboundedReceiver<JobRequest>,
    registry: CancelRegistry,
    settings: ProcessorSettings,
) {
    let pipeline = Pipeline::standard();
    info!("Starting assembly processor with stages {:?}...", pipeline.stage_names());

    let system = actix_web::rt::System::new();
    system.block_on(async move {
        let orchestrator = Rc::new(Orchestrator::new(
            settings.store,
            settings.media,
            AssetFetcher::new(RetryPolicy::default()),
            settings.publisher,
            pipeline,
            settings.template,
            settings.scratch_root,
            settings.caption_font,
        ));

        while let Some(request) = rx.recv().await {
            let orchestrator = orchestrator.clone();
            let registry = registry.clone();
            actix_web::rt::spawn(async move {
                let job_id = request.job_id;
                let _ = orchestrator.process_job(request).await;
                registry.remove(job_id);
            });
        }

        info!("Assembly processor shutdown");
    });
}
