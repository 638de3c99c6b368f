//! Grant/revoke manager and the shared entry point for authorized operations.
//!
//! Authority is deliberately asymmetric: anyone who can see a patient may
//! extend sharing, but only the owner may revoke a grant or delete the
//! patient. Admins are not special-cased for revocation or deletion.

use chrono::Utc;
use clinic_core::error::{ClinicError, ClinicResult};
use clinic_core::{
    AccessFilter, AccessGrant, Accessors, Identity, IdentityId, Ownership, PatientId,
    SharedAccess,
};
use clinic_store::AccessStore;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::Arc;

use crate::evaluator;
use crate::filter;

/// Authorization front for a shared [`AccessStore`].
///
/// Every method takes the acting identity explicitly.
///
/// ```ignore
/// let access = AccessControl::new(Arc::new(SqliteStore::open("clinic.db")?));
/// let created = access.grant(patient, d1, &[d2], Some("second opinion")).await?;
/// ```
#[derive(Clone)]
pub struct AccessControl {
    store: Arc<dyn AccessStore>,
}

impl AccessControl {
    pub fn new(store: Arc<dyn AccessStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &dyn AccessStore {
        self.store.as_ref()
    }

    pub async fn can_access(&self, actor: IdentityId, patient: PatientId) -> ClinicResult<bool> {
        evaluator::can_access(self.store(), actor, patient).await
    }

    pub async fn accessible(&self, actor: IdentityId) -> ClinicResult<AccessFilter> {
        filter::accessible_filter(self.store(), actor).await
    }

    /// Resolves `NotFound` / `Forbidden` for record-level operations.
    pub(crate) async fn authorize(
        &self,
        actor: IdentityId,
        patient: PatientId,
    ) -> ClinicResult<Ownership> {
        let facts = evaluator::gather_facts(self.store(), actor, patient).await?;
        let Some(ownership) = facts.ownership else {
            return Err(ClinicError::NotFound(patient.to_string()));
        };
        let decision = evaluator::evaluate(&facts);
        if !decision.is_allowed() {
            tracing::warn!(actor = %actor, patient = %patient, ?decision, "access denied");
            return Err(ClinicError::Forbidden);
        }
        Ok(ownership)
    }

    async fn ownership(&self, patient: PatientId) -> ClinicResult<Ownership> {
        self.store
            .get_owner(patient)
            .await?
            .ok_or_else(|| ClinicError::NotFound(patient.to_string()))
    }

    /// Shares `patient` with each of `grantees`.
    ///
    /// The owner and anyone already holding a grant are skipped. Returns only
    /// the grants this call created; they are committed together or not at
    /// all.
    pub async fn grant(
        &self,
        patient: PatientId,
        granter: IdentityId,
        grantees: &[IdentityId],
        comment: Option<&str>,
    ) -> ClinicResult<Vec<AccessGrant>> {
        let ownership = self.authorize(granter, patient).await?;

        let mut candidates: SmallVec<[IdentityId; 8]> = grantees
            .iter()
            .copied()
            .filter(|g| !ownership.is_owner(*g))
            .collect();
        candidates.sort_unstable();
        candidates.dedup();

        if candidates.is_empty() {
            tracing::debug!(patient = %patient, "grant: nothing to share");
            return Ok(Vec::new());
        }

        let comment = comment
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(String::from);
        let created = self
            .store
            .insert_grants(patient, granter, &candidates, comment, Utc::now())
            .await?;

        tracing::info!(
            patient = %patient,
            granter = %granter,
            requested = grantees.len(),
            created = created.len(),
            "granted access"
        );
        Ok(created)
    }

    /// Removes `grantee`'s shared access. Owner only.
    ///
    /// `Ok(false)` when there was no grant to remove.
    pub async fn revoke(
        &self,
        patient: PatientId,
        grantee: IdentityId,
        revoker: IdentityId,
    ) -> ClinicResult<bool> {
        let ownership = self.ownership(patient).await?;
        if !ownership.is_owner(revoker) {
            tracing::warn!(patient = %patient, revoker = %revoker, "revoke refused: not owner");
            return Err(ClinicError::Forbidden);
        }

        let removed = self.store.delete_grant(patient, grantee).await?;
        tracing::info!(patient = %patient, grantee = %grantee, removed, "revoke");
        Ok(removed)
    }

    /// Owner and shared-access list, `None` if the patient does not exist.
    ///
    /// Performs no authorization; callers check `can_access` first.
    pub async fn list_accessors(&self, patient: PatientId) -> ClinicResult<Option<Accessors>> {
        let Some(ownership) = self.store.get_owner(patient).await? else {
            return Ok(None);
        };

        let grants = self.store.list_grants(patient).await?;
        let mut names: HashMap<IdentityId, Option<Identity>> = HashMap::new();
        for id in ownership
            .owner()
            .into_iter()
            .chain(grants.iter().flat_map(|g| [g.grantee, g.granter]))
        {
            if !names.contains_key(&id) {
                let identity = self.store.get_identity(id).await?;
                names.insert(id, identity);
            }
        }
        let lookup = |id: IdentityId| names.get(&id).and_then(Option::as_ref);

        let shared_with = grants
            .into_iter()
            .map(|grant| SharedAccess {
                grantee_username: lookup(grant.grantee).map(|i| i.username.clone()),
                grantee_name: lookup(grant.grantee).map(|i| i.full_name.clone()),
                granter_name: lookup(grant.granter).map(|i| i.full_name.clone()),
                grant,
            })
            .collect();

        Ok(Some(Accessors {
            patient_id: patient,
            owner_id: ownership.owner(),
            owner: ownership.owner().and_then(lookup).cloned(),
            shared_with,
        }))
    }

    /// [`list_accessors`](Self::list_accessors) for an actor who may see the
    /// patient. A missing patient is `NotFound`, never `Forbidden`.
    pub async fn accessors(
        &self,
        actor: IdentityId,
        patient: PatientId,
    ) -> ClinicResult<Accessors> {
        self.authorize(actor, patient).await?;
        self.list_accessors(patient)
            .await?
            .ok_or_else(|| ClinicError::NotFound(patient.to_string()))
    }

    /// Deletes a patient with its visits and grants. Owner only.
    pub async fn delete_patient(&self, patient: PatientId, actor: IdentityId) -> ClinicResult<()> {
        let ownership = self.ownership(patient).await?;
        if !ownership.is_owner(actor) {
            tracing::warn!(patient = %patient, actor = %actor, "delete refused: not owner");
            return Err(ClinicError::Forbidden);
        }

        // A concurrent delete may have won; the end state is the same.
        let deleted = self.store.delete_patient(patient).await?;
        tracing::info!(patient = %patient, actor = %actor, deleted, "patient deleted");
        Ok(())
    }
}
