use rusqlite::params;
use uuid::Uuid;

use crate::error::AppError;
use crate::model::{GovernanceAuditEvent, GovernanceDecision};

use super::{parse_ts, Store};

fn decision_from_str(s: &str) -> GovernanceDecision {
    match s {
        "allow" => GovernanceDecision::Allow,
        "warn" => GovernanceDecision::Warn,
        "deny" => GovernanceDecision::Deny,
        _ => GovernanceDecision::Observe,
    }
}

fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<GovernanceAuditEvent> {
    let id: String = row.get("id")?;
    let session_id: Option<String> = row.get("session_id")?;
    let decision: String = row.get("decision")?;
    let created_at: String = row.get("created_at")?;
    Ok(GovernanceAuditEvent {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        session_id: session_id.and_then(|s| Uuid::parse_str(&s).ok()),
        tool_name: row.get("tool_name")?,
        rule_name: row.get("rule_name")?,
        decision: decision_from_str(&decision),
        mode: row.get("mode")?,
        message: row.get("message")?,
        created_at: parse_ts(&created_at),
    })
}

impl Store {
    pub fn record_governance_event(&self, event: &GovernanceAuditEvent) -> Result<(), AppError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            r#"
            INSERT INTO governance_audit_events (
                id, session_id, tool_name, rule_name, decision, mode, message, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                event.id.to_string(),
                event.session_id.map(|s| s.to_string()),
                event.tool_name,
                event.rule_name,
                event.decision.as_str(),
                event.mode,
                event.message,
                event.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn list_governance_events(
        &self,
        session_id: Option<Uuid>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<GovernanceAuditEvent>, AppError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let session_str = session_id.map(|s| s.to_string());
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM governance_audit_events
            WHERE (?1 IS NULL OR session_id = ?1)
            ORDER BY created_at DESC
            LIMIT ?2 OFFSET ?3
            "#,
        )?;
        let rows = stmt
            .query_map(params![session_str, limit as i64, offset as i64], row_to_event)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Deletes governance audit events older than `retention_days`. Run
    /// periodically by the background pipeline.
    pub fn prune_governance_events(&self, retention_days: u32) -> Result<usize, AppError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let cutoff = chrono::Utc::now() - chrono::Duration::days(retention_days as i64);
        let deleted = conn.execute(
            "DELETE FROM governance_audit_events WHERE created_at < ?1",
            [cutoff.to_rfc3339()],
        )?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event(created_at: chrono::DateTime<chrono::Utc>) -> GovernanceAuditEvent {
        GovernanceAuditEvent {
            id: Uuid::new_v4(),
            session_id: None,
            tool_name: "Bash".into(),
            rule_name: Some("no-force-push".into()),
            decision: GovernanceDecision::Deny,
            mode: "enforce".into(),
            message: Some("git push --force matched no-force-push".into()),
            created_at,
        }
    }

    #[test]
    fn prune_removes_only_events_older_than_retention() {
        let store = Store::open_in_memory().unwrap();
        let old = sample_event(chrono::Utc::now() - chrono::Duration::days(40));
        let recent = sample_event(chrono::Utc::now());
        store.record_governance_event(&old).unwrap();
        store.record_governance_event(&recent).unwrap();

        let deleted = store.prune_governance_events(30).unwrap();
        assert_eq!(deleted, 1);

        let remaining = store.list_governance_events(None, 10, 0).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, recent.id);
    }
}
