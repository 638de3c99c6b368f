//! Domain models, shared types, and error definitions.
//!
//! Foundation crate -- no async or I/O dependencies.

pub mod error;
pub mod types;

pub use error::{ClinicError, ClinicResult};
pub use types::{
    AccessFilter, AccessGrant, Accessors, GrantId, Identity, IdentityId, NewIdentity, Ownership,
    Patient, PatientDetails, PatientId, Role, SharedAccess, Visit, VisitDetails, VisitId,
};
