use async_trait::async_trait;
use chrono::Utc;

use super::{AssemblyState, Stage, StageContext};
use crate::error::PipelineResult;
use crate::models::JobStatus;
use crate::storage::object_key;

pub struct PublishStage;

#[async_trait(?Send)]
impl Stage for PublishStage {
    fn name(&self) -> &'static str {
        "publish"
    }

    async fn run(&self, ctx: &StageContext<'_>, mut state: AssemblyState) -> PipelineResult<AssemblyState> {
        ctx.tracker
            .advance(JobStatus::Uploading, 90, "Uploading final video");

        let key = object_key(ctx.tracker.job_id(), Utc::now());
        let url = ctx.publisher.publish(state.current_video()?, &key).await?;
        state.published_url = Some(url);

        Ok(state)
    }
}
