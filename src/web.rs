use actix_web::{
    error, get, http::StatusCode, middleware, post, web, App, HttpResponse, HttpServer, Responder,
    Result,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::{JobStatus, VideoEditingJob};
use crate::processor::{CancelRegistry, JobRequest};
use crate::resolver::ManifestResolver;
use crate::tracker::{SharedJobStore, Transition};

pub struct AppState {
    pub store: SharedJobStore,
    pub resolver: Arc<dyn ManifestResolver>,
    pub channel: UnboundedSender<JobRequest>,
    pub cancellations: CancelRegistry,
    pub expire_finished_jobs_after: Duration,
}

#[derive(Deserialize)]
struct SubmitParams {
    manifest_reference_id: String,
    #[serde(default)]
    callback_url: Option<String>,
}

#[derive(Serialize)]
struct SubmitResponse {
    job_id: Uuid,
    status: &'static str,
}

#[derive(Serialize)]
struct ListResponse {
    jobs: Vec<VideoEditingJob>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "snake_case")]
enum ErrorType {
    ManifestUnresolved,
    NoAssets,
    JobNotFound,
    JobAlreadyComplete,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorType,
    description: String,
}

fn build_error_response(status: StatusCode, error_type: ErrorType, description: &str) -> HttpResponse {
    HttpResponse::build(status).json(ErrorResponse {
        error: error_type,
        description: description.to_owned(),
    })
}

fn job_not_found(id: Uuid) -> HttpResponse {
    build_error_response(
        StatusCode::NOT_FOUND,
        ErrorType::JobNotFound,
        &format!("No job with id {id}"),
    )
}

#[post("/jobs")]
async fn submit(
    data: web::Data<AppState>,
    params: web::Json<SubmitParams>,
) -> Result<impl Responder> {
    let params = params.into_inner();

    let manifest = match data.resolver.resolve(&params.manifest_reference_id).await {
        Ok(manifest) => manifest,
        Err(err) => {
            info!("rejecting manifest {}: {}", params.manifest_reference_id, err);
            return Ok(build_error_response(
                StatusCode::BAD_REQUEST,
                ErrorType::ManifestUnresolved,
                &err.to_string(),
            ));
        }
    };

    if !manifest.has_any_asset() {
        return Ok(build_error_response(
            StatusCode::BAD_REQUEST,
            ErrorType::NoAssets,
            "Manifest does not reference any assets",
        ));
    }

    let job = VideoEditingJob::new(params.manifest_reference_id.clone());
    let job_id = job.id;
    data.store.create(job).map_err(error::ErrorInternalServerError)?;

    let cancel = data.cancellations.register(job_id);
    let request = JobRequest {
        job_id,
        manifest,
        callback_url: params.callback_url,
        cancel,
    };

    if data.channel.send(request).is_err() {
        data.cancellations.remove(job_id);
        error!(job_id = %job_id, "processor is gone, cannot queue job");
        if let Err(err) = data.store.update(
            job_id,
            Transition::Fail {
                message: "Failed to internally queue".to_owned(),
            },
        ) {
            warn!(job_id = %job_id, "could not record queueing failure: {}", err);
        }
        return Err(error::ErrorInternalServerError("Failed to internally queue"));
    }

    info!(job_id = %job_id, "queued manifest {}", params.manifest_reference_id);

    Ok(HttpResponse::Ok().json(SubmitResponse {
        job_id,
        status: "processing",
    }))
}

#[get("/jobs/{id}")]
async fn job_status(data: web::Data<AppState>, id: web::Path<Uuid>) -> Result<impl Responder> {
    let id = id.into_inner();
    match data.store.get(id).map_err(error::ErrorInternalServerError)? {
        Some(job) => Ok(HttpResponse::Ok().json(job)),
        None => Ok(job_not_found(id)),
    }
}

#[post("/jobs/{id}/cancel")]
async fn cancel_job(data: web::Data<AppState>, id: web::Path<Uuid>) -> Result<impl Responder> {
    let id = id.into_inner();

    let Some(job) = data.store.get(id).map_err(error::ErrorInternalServerError)? else {
        return Ok(job_not_found(id));
    };

    if job.status == JobStatus::Complete {
        return Ok(build_error_response(
            StatusCode::BAD_REQUEST,
            ErrorType::JobAlreadyComplete,
            "Cannot cancel completed job",
        ));
    }

    let (outcome, job) = data
        .store
        .update(
            id,
            Transition::Fail {
                message: "Cancelled by user".to_owned(),
            },
        )
        .map_err(error::ErrorInternalServerError)?;

    if data.cancellations.cancel(id) {
        info!(job_id = %id, "signalled running job to stop");
    }
    info!(job_id = %id, "cancel requested: {:?}", outcome);

    Ok(HttpResponse::Ok().json(job))
}

#[get("/jobs")]
async fn list_jobs(data: web::Data<AppState>) -> Result<impl Responder> {
    let keep_for = chrono::Duration::from_std(data.expire_finished_jobs_after)
        .unwrap_or_else(|_| chrono::Duration::zero());

    match data.store.remove_finished_before(Utc::now() - keep_for) {
        Ok(expired) if !expired.is_empty() => info!("expired {} finished jobs", expired.len()),
        Ok(_) => {}
        Err(err) => warn!("could not expire finished jobs: {}", err),
    }

    let jobs = data.store.list().map_err(error::ErrorInternalServerError)?;
    Ok(web::Json(ListResponse { jobs }))
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(submit)
        .service(job_status)
        .service(cancel_job)
        .service(list_jobs);
}

pub async fn start_web_server(app_state: AppState, address: &str, port: u16) -> std::io::Result<()> {
    let app_state = web::Data::new(app_state);

    info!("Starting web server at {address}:{port}...");

    HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .app_data(app_state.clone())
            .configure(routes)
    })
    .bind((address, port))?
    .run()
    .await
}
