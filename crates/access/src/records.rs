//! Patient and visit operations gated by the access rules.
//!
//! Visits carry no owner; they are readable and writable exactly when their
//! patient is.

use chrono::Utc;
use clinic_core::error::{ClinicError, ClinicResult};
use clinic_core::{
    Identity, IdentityId, Patient, PatientDetails, PatientId, Visit, VisitDetails, VisitId,
};

use crate::manager::AccessControl;

impl AccessControl {
    /// Creates a patient owned by `actor`. Ownership is fixed from here on.
    ///
    /// An actor the identity system cannot resolve holds no authority.
    pub async fn create_patient(
        &self,
        actor: IdentityId,
        details: PatientDetails,
    ) -> ClinicResult<Patient> {
        if self.store().get_identity(actor).await?.is_none() {
            tracing::warn!(actor = %actor, "create refused: unknown actor");
            return Err(ClinicError::Forbidden);
        }

        let patient = self
            .store()
            .create_patient(Some(actor), details, Utc::now())
            .await?;
        tracing::info!(
            patient = %patient.id,
            number = %patient.patient_number,
            owner = %actor,
            "patient created"
        );
        Ok(patient)
    }

    pub async fn get_patient(&self, actor: IdentityId, id: PatientId) -> ClinicResult<Patient> {
        self.authorize(actor, id).await?;
        self.store()
            .get_patient(id)
            .await?
            .ok_or_else(|| ClinicError::NotFound(id.to_string()))
    }

    /// Replaces the clinical payload. The owner is never part of an update.
    pub async fn update_patient(
        &self,
        actor: IdentityId,
        id: PatientId,
        details: PatientDetails,
    ) -> ClinicResult<Patient> {
        self.authorize(actor, id).await?;
        let patient = self
            .store()
            .update_patient(id, details, Utc::now())
            .await?
            .ok_or_else(|| ClinicError::NotFound(id.to_string()))?;
        tracing::info!(patient = %id, actor = %actor, "patient updated");
        Ok(patient)
    }

    /// Every patient `actor` may see, ordered by id.
    pub async fn list_patients(&self, actor: IdentityId) -> ClinicResult<Vec<Patient>> {
        let filter = self.accessible(actor).await?;
        self.store().list_patients(&filter).await
    }

    pub async fn add_visit(
        &self,
        actor: IdentityId,
        patient: PatientId,
        details: VisitDetails,
    ) -> ClinicResult<Visit> {
        self.authorize(actor, patient).await?;
        let visit = self
            .store()
            .create_visit(patient, details, Utc::now())
            .await?;
        tracing::info!(visit = %visit.id, patient = %patient, actor = %actor, "visit recorded");
        Ok(visit)
    }

    pub async fn list_visits(
        &self,
        actor: IdentityId,
        patient: PatientId,
    ) -> ClinicResult<Vec<Visit>> {
        self.authorize(actor, patient).await?;
        self.store().list_visits(patient).await
    }

    /// A single visit, gated by its patient's visibility.
    pub async fn get_visit(&self, actor: IdentityId, id: VisitId) -> ClinicResult<Visit> {
        let visit = self
            .store()
            .get_visit(id)
            .await?
            .ok_or_else(|| ClinicError::NotFound(id.to_string()))?;
        self.authorize(actor, visit.patient_id).await?;
        Ok(visit)
    }

    /// Replaces a visit's clinical payload and stamps `last_edited_at`.
    pub async fn update_visit(
        &self,
        actor: IdentityId,
        id: VisitId,
        details: VisitDetails,
    ) -> ClinicResult<Visit> {
        let current = self.get_visit(actor, id).await?;
        let visit = self
            .store()
            .update_visit(id, details, Utc::now())
            .await?
            .ok_or_else(|| ClinicError::NotFound(id.to_string()))?;
        tracing::info!(visit = %id, patient = %current.patient_id, actor = %actor, "visit updated");
        Ok(visit)
    }

    /// Visits across every patient `actor` may see, newest first.
    pub async fn list_all_visits(&self, actor: IdentityId) -> ClinicResult<Vec<Visit>> {
        let filter = self.accessible(actor).await?;
        self.store().list_visits_matching(&filter).await
    }

    /// Active colleagues `actor` could share a patient with.
    pub async fn shareable_identities(&self, actor: IdentityId) -> ClinicResult<Vec<Identity>> {
        let mut identities = self.store().list_identities().await?;
        identities.retain(|i| i.is_active && i.id != actor);
        Ok(identities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use clinic_core::{NewIdentity, Role};
    use clinic_store::{AccessStore, MemoryStore};
    use std::sync::Arc;

    fn details(name: &str) -> PatientDetails {
        PatientDetails::new(
            name,
            NaiveDate::from_ymd_opt(1988, 2, 29).unwrap(),
            "female",
            "555-0144",
        )
    }

    async fn setup() -> (AccessControl, IdentityId, IdentityId) {
        let store = Arc::new(MemoryStore::new());
        let d1 = store
            .create_identity(NewIdentity::new("d1", "Dr One", Role::Standard))
            .await
            .unwrap();
        let d2 = store
            .create_identity(NewIdentity::new("d2", "Dr Two", Role::Standard))
            .await
            .unwrap();
        (AccessControl::new(store), d1.id, d2.id)
    }

    #[tokio::test]
    async fn creator_becomes_owner() {
        let (access, d1, _) = setup().await;
        let patient = access.create_patient(d1, details("Ann")).await.unwrap();
        assert_eq!(patient.owner, Some(d1));
        assert_eq!(patient.patient_number, "P-001");
    }

    #[tokio::test]
    async fn unknown_actor_cannot_create() {
        let (access, _, _) = setup().await;
        let err = access
            .create_patient(IdentityId(50), details("Ann"))
            .await
            .unwrap_err();
        assert!(err.is_forbidden());
    }

    #[tokio::test]
    async fn update_keeps_owner() {
        let (access, d1, d2) = setup().await;
        let patient = access.create_patient(d1, details("Ann")).await.unwrap();
        access.grant(patient.id, d1, &[d2], None).await.unwrap();

        let updated = access
            .update_patient(d2, patient.id, details("Ann Smith"))
            .await
            .unwrap();
        assert_eq!(updated.owner, Some(d1));
        assert_eq!(updated.details.full_name, "Ann Smith");
    }

    #[tokio::test]
    async fn missing_and_hidden_patients() {
        let (access, d1, d2) = setup().await;
        let patient = access.create_patient(d1, details("Ann")).await.unwrap();

        assert!(access
            .get_patient(d2, patient.id)
            .await
            .unwrap_err()
            .is_forbidden());
        assert!(access
            .get_patient(d1, PatientId(999))
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn visits_follow_patient_access() {
        let (access, d1, d2) = setup().await;
        let patient = access.create_patient(d1, details("Ann")).await.unwrap();
        let visit = VisitDetails::new(NaiveDate::from_ymd_opt(2026, 5, 4).unwrap(), "headache");

        assert!(access
            .add_visit(d2, patient.id, visit.clone())
            .await
            .unwrap_err()
            .is_forbidden());
        access.add_visit(d1, patient.id, visit).await.unwrap();
        assert!(access.list_all_visits(d2).await.unwrap().is_empty());

        access.grant(patient.id, d1, &[d2], None).await.unwrap();
        assert_eq!(access.list_visits(d2, patient.id).await.unwrap().len(), 1);
        assert_eq!(access.list_all_visits(d2).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn visit_edit_follows_patient_access() {
        let (access, d1, d2) = setup().await;
        let patient = access.create_patient(d1, details("Ann")).await.unwrap();
        let day = NaiveDate::from_ymd_opt(2026, 6, 11).unwrap();
        let visit = access
            .add_visit(d1, patient.id, VisitDetails::new(day, "back pain"))
            .await
            .unwrap();

        assert!(access
            .get_visit(d1, VisitId(999))
            .await
            .unwrap_err()
            .is_not_found());
        assert!(access.get_visit(d2, visit.id).await.unwrap_err().is_forbidden());
        let mut edit = visit.details.clone();
        edit.notes = Some("physio referral".into());
        assert!(access
            .update_visit(d2, visit.id, edit.clone())
            .await
            .unwrap_err()
            .is_forbidden());

        access.grant(patient.id, d1, &[d2], None).await.unwrap();
        let updated = access.update_visit(d2, visit.id, edit).await.unwrap();
        assert_eq!(updated.details.notes.as_deref(), Some("physio referral"));
        assert!(updated.last_edited_at.is_some());
        assert_eq!(access.get_visit(d1, visit.id).await.unwrap(), updated);
    }

    #[tokio::test]
    async fn shareable_excludes_self() {
        let (access, d1, d2) = setup().await;
        let others = access.shareable_identities(d1).await.unwrap();
        let ids: Vec<IdentityId> = others.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![d2]);
        assert_eq!(access.store().list_identities().await.unwrap().len(), 2);
    }
}
