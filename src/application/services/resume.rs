//! Resume logic for the adapter training pipeline
//!
//! A pipeline run can be interrupted at any stage boundary, so re-entry is
//! decided purely from persisted state: the stored status plus aggregate
//! dataset counts. `resume_stage` is the single place that mapping lives.

use crate::domain::entities::{DatasetCounts, PipelineStatus};

/// Whether a drive through the pipeline is a fresh run or a resume of a
/// previously interrupted one. Resumes get the lowered evaluation gate;
/// fresh runs never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    Fresh,
    Resume,
}

/// Gate thresholds and sizes consulted when deciding the next stage
#[derive(Debug, Clone, Copy)]
pub struct GateSettings {
    pub dataset_size: u32,
    pub min_passed: u32,
    pub min_passed_resume: u32,
}

/// Outcome of the resume decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeDecision {
    /// Enter (or re-enter) this stage next
    Run(PipelineStatus),
    /// Quality gate not met; fail with this reason
    Fail(String),
    /// Nothing to do: the pipeline is already terminal
    Terminal,
}

/// Decide the next stage from persisted state alone.
pub fn resume_stage(
    status: PipelineStatus,
    counts: DatasetCounts,
    gates: &GateSettings,
    run: RunKind,
) -> ResumeDecision {
    let required = match run {
        RunKind::Fresh => gates.min_passed,
        RunKind::Resume => gates.min_passed_resume,
    };

    match status {
        PipelineStatus::NoAdapter | PipelineStatus::Pending => {
            ResumeDecision::Run(PipelineStatus::GeneratingDataset)
        }
        PipelineStatus::GeneratingDataset => {
            if counts.total < gates.dataset_size {
                ResumeDecision::Run(PipelineStatus::GeneratingDataset)
            } else {
                ResumeDecision::Run(PipelineStatus::Evaluating)
            }
        }
        PipelineStatus::Evaluating => {
            if counts.pending_eval > 0 {
                ResumeDecision::Run(PipelineStatus::Evaluating)
            } else if counts.passed >= required {
                ResumeDecision::Run(PipelineStatus::Captioning)
            } else {
                ResumeDecision::Fail(format!(
                    "insufficient dataset: {} passed of {} required",
                    counts.passed, required
                ))
            }
        }
        PipelineStatus::Captioning => {
            if counts.captioned < counts.passed {
                ResumeDecision::Run(PipelineStatus::Captioning)
            } else {
                ResumeDecision::Run(PipelineStatus::Training)
            }
        }
        PipelineStatus::Training => {
            // A training status with no captions means the captioning stage
            // never actually produced output; go back and do it
            if counts.captioned == 0 {
                ResumeDecision::Run(PipelineStatus::Captioning)
            } else {
                ResumeDecision::Run(PipelineStatus::Training)
            }
        }
        PipelineStatus::Validating => ResumeDecision::Run(PipelineStatus::Validating),
        PipelineStatus::Deployed | PipelineStatus::Archived => ResumeDecision::Terminal,
        PipelineStatus::Failed => {
            // Operator resume of a failed run: derive the earliest stage
            // whose output is incomplete
            if counts.total < gates.dataset_size && counts.passed < required {
                ResumeDecision::Run(PipelineStatus::GeneratingDataset)
            } else if counts.pending_eval > 0 {
                ResumeDecision::Run(PipelineStatus::Evaluating)
            } else if counts.passed < required {
                ResumeDecision::Run(PipelineStatus::GeneratingDataset)
            } else if counts.captioned < counts.passed {
                ResumeDecision::Run(PipelineStatus::Captioning)
            } else {
                ResumeDecision::Run(PipelineStatus::Training)
            }
        }
    }
}
