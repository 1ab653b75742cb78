//! Cross-machine backup: a JSON bundle of everything durable in the store,
//! written under a privacy-preserving filename (`hash::path_hash` of the
//! project root, never the root itself) so synced backup directories don't
//! leak local filesystem layout.

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::model::{
    Activity, GovernanceAuditEvent, Observation, Plan, PromptBatch, ResolutionEvent, Session,
};

use super::Store;

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct BackupBundle {
    pub schema_version: i32,
    pub sessions: Vec<Session>,
    pub prompt_batches: Vec<PromptBatch>,
    pub observations: Vec<Observation>,
    pub resolution_events: Vec<ResolutionEvent>,
    pub plans: Vec<Plan>,
    pub governance_audit_events: Vec<GovernanceAuditEvent>,
    /// Only populated when the backup config enables activity export — raw
    /// tool-call history is the bulkiest and least durable table, so it's
    /// opt-in.
    pub activities: Vec<Activity>,
}

impl Store {
    /// Serializes the durable state of the store. Activities are included
    /// only when `include_activities` is true.
    pub fn backup_export(&self, include_activities: bool) -> Result<BackupBundle, AppError> {
        let sessions = self.list_sessions(None, usize::MAX, 0)?;
        let mut prompt_batches = Vec::new();
        let mut activities = Vec::new();
        for session in &sessions {
            prompt_batches.extend(self.list_batches_for_session(session.id)?);
            if include_activities {
                activities.extend(self.list_activities_for_session(session.id)?);
            }
        }

        let observations = self.query_observations(None, None, None, usize::MAX, 0)?;
        let mut resolution_events = Vec::new();
        for observation in &observations {
            resolution_events.extend(self.resolution_events_for_observation(observation.id)?);
        }

        let mut plans = Vec::new();
        for session in &sessions {
            plans.extend(self.list_plans_for_session(session.id)?);
        }

        // Governance audit events currently participate in cross-machine
        // backups: the audit trail is evidence of policy decisions made
        // against shared history, not purely local telemetry.
        let governance_audit_events = self.list_governance_events(None, usize::MAX, 0)?;

        Ok(BackupBundle {
            schema_version: super::schema::SCHEMA_VERSION,
            sessions,
            prompt_batches,
            observations,
            resolution_events,
            plans,
            governance_audit_events,
            activities,
        })
    }

    /// Merges a backup bundle into the store. Every insert goes through the
    /// same dedup-hash-aware paths used for live ingestion, so replaying the
    /// same bundle twice (or restoring onto a store that already has
    /// overlapping history) is a no-op for anything already present.
    pub fn backup_import(&self, bundle: &BackupBundle) -> Result<BackupImportSummary, AppError> {
        let mut summary = BackupImportSummary::default();

        for session in &bundle.sessions {
            self.upsert_session(session)?;
            summary.sessions += 1;
        }
        for batch in &bundle.prompt_batches {
            // begin_batch enforces "one active batch per session"; a
            // restored batch that is already completed never trips that
            // check, and an imported active batch racing a live one is
            // surfaced as a conflict rather than silently dropped.
            self.begin_batch(batch)?;
            if batch.status == crate::model::BatchStatus::Completed {
                self.complete_batch(batch.id, batch.response_summary.as_deref())?;
            }
            summary.prompt_batches += 1;
        }
        for activity in &bundle.activities {
            self.append_activity(activity)?;
            summary.activities += 1;
        }
        for observation in &bundle.observations {
            self.insert_observation(observation)?;
            summary.observations += 1;
        }
        for plan in &bundle.plans {
            self.upsert_plan(plan)?;
            summary.plans += 1;
        }
        for event in &bundle.governance_audit_events {
            self.record_governance_event(event)?;
            summary.governance_audit_events += 1;
        }

        Ok(summary)
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct BackupImportSummary {
    pub sessions: usize,
    pub prompt_batches: usize,
    pub activities: usize,
    pub observations: usize,
    pub plans: usize,
    pub governance_audit_events: usize,
}
