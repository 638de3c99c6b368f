//! Accessible-set construction.
//!
//! Produces the base [`AccessFilter`] for an actor. Membership in the filter
//! coincides with [`can_access`](crate::evaluator::can_access) returning
//! `true` for every existing patient.

use clinic_core::error::ClinicResult;
use clinic_core::{AccessFilter, IdentityId, Role};
use clinic_store::AccessStore;

use crate::evaluator::actor_role;

/// Builds the actor's filter from current grant state.
///
/// Admins get [`AccessFilter::Unrestricted`], which also admits legacy
/// unowned patients. Everyone else gets their owned patients plus the ones
/// shared with them.
pub async fn accessible_filter(
    store: &dyn AccessStore,
    actor: IdentityId,
) -> ClinicResult<AccessFilter> {
    if actor_role(store, actor).await? == Some(Role::Admin) {
        tracing::debug!(actor = %actor, "unrestricted filter");
        return Ok(AccessFilter::Unrestricted);
    }

    let shared = store.shared_patient_ids(actor).await?;
    tracing::debug!(actor = %actor, shared = shared.len(), "restricted filter");
    Ok(AccessFilter::Restricted { actor, shared })
}
