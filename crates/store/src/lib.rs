//! Persistence abstraction for ownership, access grants, and identities.
//!
//! Two backends:
//! - [`MemoryStore`]: tables behind one async `RwLock`, for tests and tools
//! - [`SqliteStore`]: rusqlite with store-level uniqueness and cascades

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clinic_core::error::ClinicResult;
use clinic_core::{
    AccessFilter, AccessGrant, Identity, IdentityId, NewIdentity, Ownership, Patient,
    PatientDetails, PatientId, Visit, VisitDetails, VisitId,
};
use std::collections::BTreeSet;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Shared record store.
///
/// Every call reads current state; implementations keep no cache that would
/// need invalidating between calls. Each mutating method is one atomic unit:
/// either all of its writes are visible afterwards or none are.
#[async_trait]
pub trait AccessStore: Send + Sync {
    // -- Identities (read-only collaborator, plus seeding) --

    async fn create_identity(&self, identity: NewIdentity) -> ClinicResult<Identity>;

    async fn get_identity(&self, id: IdentityId) -> ClinicResult<Option<Identity>>;

    async fn list_identities(&self) -> ClinicResult<Vec<Identity>>;

    // -- Patients --

    /// Inserts a patient with the next free `P-NNN` number. `owner` is
    /// written here and never again.
    async fn create_patient(
        &self,
        owner: Option<IdentityId>,
        details: PatientDetails,
        at: DateTime<Utc>,
    ) -> ClinicResult<Patient>;

    async fn get_patient(&self, id: PatientId) -> ClinicResult<Option<Patient>>;

    /// `None` when the patient does not exist.
    async fn get_owner(&self, id: PatientId) -> ClinicResult<Option<Ownership>>;

    /// Replaces the clinical payload. Ownership is untouched.
    async fn update_patient(
        &self,
        id: PatientId,
        details: PatientDetails,
        at: DateTime<Utc>,
    ) -> ClinicResult<Option<Patient>>;

    /// Patients passing `filter` exactly as given, ordered by id. A
    /// restricted filter's `shared` set is used as-is, not re-read from the
    /// grant table.
    async fn list_patients(&self, filter: &AccessFilter) -> ClinicResult<Vec<Patient>>;

    /// Deletes the patient together with its visits and grants.
    /// Returns `false` when there was nothing to delete.
    async fn delete_patient(&self, id: PatientId) -> ClinicResult<bool>;

    // -- Visits --

    async fn create_visit(
        &self,
        patient_id: PatientId,
        details: VisitDetails,
        at: DateTime<Utc>,
    ) -> ClinicResult<Visit>;

    async fn get_visit(&self, id: VisitId) -> ClinicResult<Option<Visit>>;

    /// Replaces the clinical payload and stamps `last_edited_at`. The visit
    /// stays attached to its patient.
    async fn update_visit(
        &self,
        id: VisitId,
        details: VisitDetails,
        at: DateTime<Utc>,
    ) -> ClinicResult<Option<Visit>>;

    /// Visits of one patient, newest visit date first.
    async fn list_visits(&self, patient_id: PatientId) -> ClinicResult<Vec<Visit>>;

    /// Visits whose patient passes `filter`, newest visit date first.
    async fn list_visits_matching(&self, filter: &AccessFilter) -> ClinicResult<Vec<Visit>>;

    // -- Access grants --

    async fn has_grant(&self, patient_id: PatientId, grantee: IdentityId) -> ClinicResult<bool>;

    /// Ids of every patient shared with `grantee`.
    async fn shared_patient_ids(&self, grantee: IdentityId) -> ClinicResult<BTreeSet<PatientId>>;

    async fn list_grants(&self, patient_id: PatientId) -> ClinicResult<Vec<AccessGrant>>;

    /// Inserts one grant per grantee as a single unit and returns only the
    /// rows actually created. A grantee that already holds a grant (including
    /// one committed concurrently) is skipped rather than reported as an
    /// error. A missing patient is `NotFound`. Any other failure, such as an
    /// unknown grantee, rolls back the whole batch.
    async fn insert_grants(
        &self,
        patient_id: PatientId,
        granter: IdentityId,
        grantees: &[IdentityId],
        comment: Option<String>,
        at: DateTime<Utc>,
    ) -> ClinicResult<Vec<AccessGrant>>;

    /// Returns `true` if a grant was removed.
    async fn delete_grant(&self, patient_id: PatientId, grantee: IdentityId)
        -> ClinicResult<bool>;
}
