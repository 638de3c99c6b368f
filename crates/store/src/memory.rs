//! In-process [`AccessStore`] backed by ordered maps.
//!
//! All tables sit behind one `tokio::sync::RwLock`, so every mutating call is
//! a single critical section: a batch of grants, or a patient delete with its
//! cascade, is never observed half-applied.

use crate::AccessStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clinic_core::error::{ClinicError, ClinicResult};
use clinic_core::{
    AccessFilter, AccessGrant, GrantId, Identity, IdentityId, NewIdentity, Ownership, Patient,
    PatientDetails, PatientId, Visit, VisitDetails, VisitId,
};
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Tables {
    identities: BTreeMap<IdentityId, Identity>,
    patients: BTreeMap<PatientId, Patient>,
    visits: BTreeMap<VisitId, Visit>,
    /// Keyed by `(patient, grantee)`: the key is the uniqueness constraint.
    grants: BTreeMap<(PatientId, IdentityId), AccessGrant>,
    last_identity: i64,
    last_patient: i64,
    last_visit: i64,
    last_grant: i64,
}

impl Tables {
    fn next_patient_number(&self) -> String {
        let last = self
            .patients
            .values()
            .filter_map(|p| Patient::parse_number(&p.patient_number))
            .max()
            .unwrap_or(0);
        Patient::number_for(last + 1)
    }

    fn sorted_visits<'a>(&self, visits: impl Iterator<Item = &'a Visit>) -> Vec<Visit> {
        let mut out: Vec<Visit> = visits.cloned().collect();
        out.sort_by(|a, b| {
            b.details
                .visit_date
                .cmp(&a.details.visit_date)
                .then(b.id.cmp(&a.id))
        });
        out
    }
}

/// Thread-safe, in-memory record store.
///
/// ```ignore
/// let store: Arc<dyn AccessStore> = Arc::new(MemoryStore::new());
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a patient with a caller-chosen owner, bypassing numbering
    /// checks. Used to load migrated data, including unowned legacy rows.
    pub async fn import_patient(&self, patient: Patient) -> ClinicResult<()> {
        let mut t = self.tables.write().await;
        if t.patients.contains_key(&patient.id) {
            return Err(ClinicError::Store(format!("{} already exists", patient.id)));
        }
        t.last_patient = t.last_patient.max(patient.id.0);
        t.patients.insert(patient.id, patient);
        Ok(())
    }
}

#[async_trait]
impl AccessStore for MemoryStore {
    async fn create_identity(&self, identity: NewIdentity) -> ClinicResult<Identity> {
        let mut t = self.tables.write().await;
        if t.identities
            .values()
            .any(|i| i.username == identity.username)
        {
            return Err(ClinicError::Store(format!(
                "username {:?} already exists",
                identity.username
            )));
        }
        t.last_identity += 1;
        let created = Identity {
            id: IdentityId(t.last_identity),
            username: identity.username,
            full_name: identity.full_name,
            role: identity.role,
            is_active: true,
        };
        t.identities.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_identity(&self, id: IdentityId) -> ClinicResult<Option<Identity>> {
        Ok(self.tables.read().await.identities.get(&id).cloned())
    }

    async fn list_identities(&self) -> ClinicResult<Vec<Identity>> {
        Ok(self.tables.read().await.identities.values().cloned().collect())
    }

    async fn create_patient(
        &self,
        owner: Option<IdentityId>,
        details: PatientDetails,
        at: DateTime<Utc>,
    ) -> ClinicResult<Patient> {
        let mut t = self.tables.write().await;
        if let Some(owner) = owner {
            if !t.identities.contains_key(&owner) {
                return Err(ClinicError::Store(format!("unknown owner {owner}")));
            }
        }
        t.last_patient += 1;
        let patient = Patient {
            id: PatientId(t.last_patient),
            patient_number: t.next_patient_number(),
            owner,
            details,
            created_at: at,
            updated_at: at,
        };
        t.patients.insert(patient.id, patient.clone());
        Ok(patient)
    }

    async fn get_patient(&self, id: PatientId) -> ClinicResult<Option<Patient>> {
        Ok(self.tables.read().await.patients.get(&id).cloned())
    }

    async fn get_owner(&self, id: PatientId) -> ClinicResult<Option<Ownership>> {
        Ok(self
            .tables
            .read()
            .await
            .patients
            .get(&id)
            .map(|p| Ownership::from(p.owner)))
    }

    async fn update_patient(
        &self,
        id: PatientId,
        details: PatientDetails,
        at: DateTime<Utc>,
    ) -> ClinicResult<Option<Patient>> {
        let mut t = self.tables.write().await;
        Ok(t.patients.get_mut(&id).map(|p| {
            p.details = details;
            p.updated_at = at;
            p.clone()
        }))
    }

    async fn list_patients(&self, filter: &AccessFilter) -> ClinicResult<Vec<Patient>> {
        let t = self.tables.read().await;
        Ok(t.patients
            .values()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect())
    }

    async fn delete_patient(&self, id: PatientId) -> ClinicResult<bool> {
        let mut t = self.tables.write().await;
        if t.patients.remove(&id).is_none() {
            return Ok(false);
        }
        t.visits.retain(|_, v| v.patient_id != id);
        t.grants.retain(|(patient_id, _), _| *patient_id != id);
        Ok(true)
    }

    async fn create_visit(
        &self,
        patient_id: PatientId,
        details: VisitDetails,
        at: DateTime<Utc>,
    ) -> ClinicResult<Visit> {
        let mut t = self.tables.write().await;
        if !t.patients.contains_key(&patient_id) {
            return Err(ClinicError::Store(format!("unknown {patient_id}")));
        }
        t.last_visit += 1;
        let visit = Visit {
            id: VisitId(t.last_visit),
            patient_id,
            details,
            created_at: at,
            last_edited_at: None,
        };
        t.visits.insert(visit.id, visit.clone());
        Ok(visit)
    }

    async fn get_visit(&self, id: VisitId) -> ClinicResult<Option<Visit>> {
        Ok(self.tables.read().await.visits.get(&id).cloned())
    }

    async fn update_visit(
        &self,
        id: VisitId,
        details: VisitDetails,
        at: DateTime<Utc>,
    ) -> ClinicResult<Option<Visit>> {
        let mut t = self.tables.write().await;
        Ok(t.visits.get_mut(&id).map(|v| {
            v.details = details;
            v.last_edited_at = Some(at);
            v.clone()
        }))
    }

    async fn list_visits(&self, patient_id: PatientId) -> ClinicResult<Vec<Visit>> {
        let t = self.tables.read().await;
        Ok(t.sorted_visits(t.visits.values().filter(|v| v.patient_id == patient_id)))
    }

    async fn list_visits_matching(&self, filter: &AccessFilter) -> ClinicResult<Vec<Visit>> {
        let t = self.tables.read().await;
        Ok(t.sorted_visits(t.visits.values().filter(|v| {
            t.patients
                .get(&v.patient_id)
                .is_some_and(|p| filter.matches(p))
        })))
    }

    async fn has_grant(&self, patient_id: PatientId, grantee: IdentityId) -> ClinicResult<bool> {
        Ok(self
            .tables
            .read()
            .await
            .grants
            .contains_key(&(patient_id, grantee)))
    }

    async fn shared_patient_ids(&self, grantee: IdentityId) -> ClinicResult<BTreeSet<PatientId>> {
        let t = self.tables.read().await;
        Ok(t.grants
            .keys()
            .filter(|(_, g)| *g == grantee)
            .map(|(p, _)| *p)
            .collect())
    }

    async fn list_grants(&self, patient_id: PatientId) -> ClinicResult<Vec<AccessGrant>> {
        let t = self.tables.read().await;
        let mut grants: Vec<AccessGrant> = t
            .grants
            .range((patient_id, IdentityId(i64::MIN))..=(patient_id, IdentityId(i64::MAX)))
            .map(|(_, g)| g.clone())
            .collect();
        grants.sort_by_key(|g| g.id);
        Ok(grants)
    }

    async fn insert_grants(
        &self,
        patient_id: PatientId,
        granter: IdentityId,
        grantees: &[IdentityId],
        comment: Option<String>,
        at: DateTime<Utc>,
    ) -> ClinicResult<Vec<AccessGrant>> {
        let mut t = self.tables.write().await;

        // Validate the whole batch before touching any table.
        if !t.patients.contains_key(&patient_id) {
            return Err(ClinicError::NotFound(patient_id.to_string()));
        }
        for id in std::iter::once(&granter).chain(grantees) {
            if !t.identities.contains_key(id) {
                return Err(ClinicError::Store(format!("unknown {id}")));
            }
        }

        let mut created = Vec::new();
        for &grantee in grantees {
            if t.grants.contains_key(&(patient_id, grantee)) {
                continue;
            }
            t.last_grant += 1;
            let grant = AccessGrant {
                id: GrantId(t.last_grant),
                patient_id,
                grantee,
                granter,
                comment: comment.clone(),
                granted_at: at,
            };
            t.grants.insert((patient_id, grantee), grant.clone());
            created.push(grant);
        }

        tracing::debug!(patient = %patient_id, created = created.len(), "memory: grants inserted");
        Ok(created)
    }

    async fn delete_grant(
        &self,
        patient_id: PatientId,
        grantee: IdentityId,
    ) -> ClinicResult<bool> {
        Ok(self
            .tables
            .write()
            .await
            .grants
            .remove(&(patient_id, grantee))
            .is_some())
    }
}
