//! Completion derivation: pure functions of the last successfully received
//! payload, never of transport state. The staged branch is preferred; the
//! legacy boolean branch is an unconditional fallback because older
//! in-flight jobs only ever emit the legacy shape.

use super::payload::{ProgressPayload, Stage, StageSet, StageStatus};

/// The job is complete only if the expected unit count is known, positive,
/// and fully collected, and every staged status that is present reads
/// `completed`.
pub fn is_complete(payload: &ProgressPayload) -> bool {
    match &payload.stages {
        Some(stages) => staged_complete(stages),
        None => legacy_complete(payload),
    }
}

/// Ready-for-preview fires once collection and scoring are both done, even
/// while a slower downstream stage is still running, so the UI can show
/// partial results early.
pub fn is_ready_for_preview(payload: &ProgressPayload) -> bool {
    match &payload.stages {
        Some(stages) => {
            stage_is_completed(&stages.collection) && stage_is_completed(&stages.scoring)
        }
        None => legacy_units_done(payload) && payload.scoring_complete.unwrap_or(false),
    }
}

fn staged_complete(stages: &StageSet) -> bool {
    let units_done = stages
        .collection
        .as_ref()
        .map(collection_units_done)
        .unwrap_or(false);

    units_done
        && stage_done_if_present(&stages.collection)
        && stage_done_if_present(&stages.scoring)
        && stage_done_if_present(&stages.recommendations)
}

fn collection_units_done(stage: &Stage) -> bool {
    match (stage.total, stage.completed) {
        (Some(total), Some(completed)) => total > 0 && completed >= total,
        _ => false,
    }
}

/// An absent stage cannot block completion; a present one must be finished.
fn stage_done_if_present(stage: &Option<Stage>) -> bool {
    stage
        .as_ref()
        .map(|s| s.status == StageStatus::Completed)
        .unwrap_or(true)
}

fn stage_is_completed(stage: &Option<Stage>) -> bool {
    stage
        .as_ref()
        .map(|s| s.status == StageStatus::Completed)
        .unwrap_or(false)
}

fn legacy_complete(payload: &ProgressPayload) -> bool {
    legacy_units_done(payload)
        && payload.scoring_complete.unwrap_or(false)
        && payload.analysis_complete.unwrap_or(true)
}

fn legacy_units_done(payload: &ProgressPayload) -> bool {
    match (payload.total_queries, payload.completed_queries) {
        (Some(total), Some(completed)) => total > 0 && completed >= total,
        _ => false,
    }
}
