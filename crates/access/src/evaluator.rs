//! Point access decisions for a single `(actor, patient)` pair.
//!
//! [`evaluate`] is the pure rule table. [`gather_facts`] reads the current
//! store state it needs; nothing is cached between calls, so a grant or
//! revoke is visible to the very next check.

use clinic_core::error::ClinicResult;
use clinic_core::{IdentityId, Ownership, PatientId, Role};
use clinic_store::AccessStore;

/// Everything the rule table looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordFacts {
    pub actor: IdentityId,
    /// `None` when the identity system does not know the actor; such an
    /// actor is treated as a standard practitioner.
    pub actor_role: Option<Role>,
    /// `None` when the patient does not exist.
    pub ownership: Option<Ownership>,
    pub has_grant: bool,
}

/// Which rule settled the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Decision {
    Admin,
    Missing,
    Owner,
    Shared,
    Denied,
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Admin | Self::Owner | Self::Shared)
    }
}

/// First match wins: admin, missing record, owner, explicit grant, deny.
///
/// An unowned legacy record never matches the owner rule.
pub fn evaluate(facts: &RecordFacts) -> Decision {
    if facts.actor_role == Some(Role::Admin) {
        return Decision::Admin;
    }
    let Some(ownership) = facts.ownership else {
        return Decision::Missing;
    };
    if ownership.is_owner(facts.actor) {
        return Decision::Owner;
    }
    if facts.has_grant {
        Decision::Shared
    } else {
        Decision::Denied
    }
}

pub async fn actor_role(store: &dyn AccessStore, actor: IdentityId) -> ClinicResult<Option<Role>> {
    Ok(store.get_identity(actor).await?.map(|identity| identity.role))
}

/// Reads identity, ownership and, only when it can matter, grant state.
pub async fn gather_facts(
    store: &dyn AccessStore,
    actor: IdentityId,
    patient: PatientId,
) -> ClinicResult<RecordFacts> {
    let actor_role = actor_role(store, actor).await?;
    let ownership = store.get_owner(patient).await?;
    let has_grant = match ownership {
        Some(o) if actor_role != Some(Role::Admin) && !o.is_owner(actor) => {
            store.has_grant(patient, actor).await?
        }
        _ => false,
    };
    Ok(RecordFacts {
        actor,
        actor_role,
        ownership,
        has_grant,
    })
}

/// `CanAccess`: `false` for a missing record, never a domain error.
pub async fn can_access(
    store: &dyn AccessStore,
    actor: IdentityId,
    patient: PatientId,
) -> ClinicResult<bool> {
    let facts = gather_facts(store, actor, patient).await?;
    let decision = evaluate(&facts);
    tracing::debug!(actor = %actor, patient = %patient, ?decision, "access decision");
    Ok(decision.is_allowed())
}
