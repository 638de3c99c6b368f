//! Audit trail for sharing and deletion events.
//!
//! One [`AuditRow`] per event, append-only and fully denormalized, written
//! through the [`json_stream`] NDJSON sink.

pub mod json_stream;

use chrono::{DateTime, Utc};
use clinic_core::{AccessGrant, IdentityId, PatientId};
use serde::Serialize;

pub use json_stream::JsonStreamSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    AccessGranted,
    AccessRevoked,
    PatientDeleted,
}

/// One audit line.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRow {
    pub event: AuditEvent,
    pub patient_id: i64,
    /// Grantee for sharing events; absent for deletions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<i64>,
    pub actor_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub created_at: String,
}

impl AuditRow {
    pub fn granted(grant: &AccessGrant) -> Self {
        Self {
            event: AuditEvent::AccessGranted,
            patient_id: grant.patient_id.0,
            subject_id: Some(grant.grantee.0),
            actor_id: grant.granter.0,
            comment: grant.comment.clone(),
            created_at: grant.granted_at.to_rfc3339(),
        }
    }

    pub fn revoked(
        patient: PatientId,
        grantee: IdentityId,
        revoker: IdentityId,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            event: AuditEvent::AccessRevoked,
            patient_id: patient.0,
            subject_id: Some(grantee.0),
            actor_id: revoker.0,
            comment: None,
            created_at: at.to_rfc3339(),
        }
    }

    pub fn deleted(patient: PatientId, actor: IdentityId, at: DateTime<Utc>) -> Self {
        Self {
            event: AuditEvent::PatientDeleted,
            patient_id: patient.0,
            subject_id: None,
            actor_id: actor.0,
            comment: None,
            created_at: at.to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinic_core::GrantId;

    #[test]
    fn granted_row_copies_grant() {
        let grant = AccessGrant {
            id: GrantId(5),
            patient_id: PatientId(2),
            grantee: IdentityId(3),
            granter: IdentityId(1),
            comment: Some("handover".into()),
            granted_at: Utc::now(),
        };
        let row = AuditRow::granted(&grant);
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["event"], "access_granted");
        assert_eq!(json["subject_id"], 3);
        assert_eq!(json["actor_id"], 1);
        assert_eq!(json["comment"], "handover");
    }

    #[test]
    fn deleted_row_has_no_subject() {
        let row = AuditRow::deleted(PatientId(2), IdentityId(1), Utc::now());
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["event"], "patient_deleted");
        assert!(json.get("subject_id").is_none());
    }
}
