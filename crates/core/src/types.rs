//! Domain types for clinic records and their sharing state.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::ClinicError;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{} {}", $label, self.0)
            }
        }

        impl FromStr for $name {
            type Err = ClinicError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim()
                    .parse::<i64>()
                    .map($name)
                    .map_err(|e| ClinicError::InvalidInput(format!("bad {} id {s:?}: {e}", $label)))
            }
        }
    };
}

id_type!(
    /// Stable identity id, resolved by the external identity system.
    IdentityId,
    "identity"
);
id_type!(PatientId, "patient");
id_type!(VisitId, "visit");
id_type!(GrantId, "grant");

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Flat role set. `Admin` bypasses every ownership and sharing rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Standard,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Standard => "standard",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ClinicError;

    /// Anything other than `admin` is a standard practitioner; the clinic's
    /// user table stores `doctor` for those.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "standard" | "doctor" => Ok(Role::Standard),
            other => Err(ClinicError::InvalidInput(format!("unknown role {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    pub username: String,
    pub full_name: String,
    pub role: Role,
    pub is_active: bool,
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Seed data for an identity. Credentials live with the identity system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewIdentity {
    pub username: String,
    pub full_name: String,
    pub role: Role,
}

impl NewIdentity {
    pub fn new(username: impl Into<String>, full_name: impl Into<String>, role: Role) -> Self {
        Self {
            username: username.into(),
            full_name: full_name.into(),
            role,
        }
    }
}

// ---------------------------------------------------------------------------
// Patients and visits
// ---------------------------------------------------------------------------

/// Clinical payload of a patient. Irrelevant to authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientDetails {
    pub full_name: String,
    pub date_of_birth: NaiveDate,
    pub gender: String,
    pub contact_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allergies: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chronic_conditions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_medications: Option<String>,
}

impl PatientDetails {
    pub fn new(
        full_name: impl Into<String>,
        date_of_birth: NaiveDate,
        gender: impl Into<String>,
        contact_number: impl Into<String>,
    ) -> Self {
        Self {
            full_name: full_name.into(),
            date_of_birth,
            gender: gender.into(),
            contact_number: contact_number.into(),
            email: None,
            address: None,
            allergies: None,
            chronic_conditions: None,
            current_medications: None,
        }
    }
}

/// The protected record.
///
/// `owner` is written once, at creation, and is `None` only for records
/// migrated from before ownership existed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patient {
    pub id: PatientId,
    /// Human-facing number, `P-001` onwards.
    pub patient_number: String,
    pub owner: Option<IdentityId>,
    #[serde(flatten)]
    pub details: PatientDetails,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Patient {
    pub fn is_owned_by(&self, identity: IdentityId) -> bool {
        self.owner == Some(identity)
    }

    /// Formats the `n`th patient number.
    pub fn number_for(n: u64) -> String {
        format!("P-{n:03}")
    }

    /// Parses the numeric part of a `P-NNN` patient number.
    pub fn parse_number(number: &str) -> Option<u64> {
        number.strip_prefix("P-")?.parse().ok()
    }
}

/// Ownership state of an existing patient, as reported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ownership {
    Owned(IdentityId),
    /// Legacy record created before ownership existed.
    Unowned,
}

impl Ownership {
    pub fn owner(self) -> Option<IdentityId> {
        match self {
            Self::Owned(id) => Some(id),
            Self::Unowned => None,
        }
    }

    pub fn is_owner(self, identity: IdentityId) -> bool {
        self == Self::Owned(identity)
    }
}

impl From<Option<IdentityId>> for Ownership {
    fn from(owner: Option<IdentityId>) -> Self {
        owner.map_or(Self::Unowned, Self::Owned)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitDetails {
    pub visit_date: NaiveDate,
    pub chief_complaint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prescription: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl VisitDetails {
    pub fn new(visit_date: NaiveDate, chief_complaint: impl Into<String>) -> Self {
        Self {
            visit_date,
            chief_complaint: chief_complaint.into(),
            diagnosis: None,
            prescription: None,
            notes: None,
        }
    }
}

/// A visit has no owner of its own; it is visible exactly when its patient is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visit {
    pub id: VisitId,
    pub patient_id: PatientId,
    #[serde(flatten)]
    pub details: VisitDetails,
    pub created_at: DateTime<Utc>,
    /// Set on every edit; `None` until the first one.
    pub last_edited_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Sharing
// ---------------------------------------------------------------------------

/// Explicit shared access to one patient for one grantee.
///
/// At most one exists per `(patient_id, grantee)`. `granter` is kept for
/// audit only and confers no authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGrant {
    pub id: GrantId,
    pub patient_id: PatientId,
    pub grantee: IdentityId,
    pub granter: IdentityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub granted_at: DateTime<Utc>,
}

/// A grant enriched with display names for the grantee and granter.
///
/// Names are `None` when the identity no longer resolves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedAccess {
    #[serde(flatten)]
    pub grant: AccessGrant,
    pub grantee_username: Option<String>,
    pub grantee_name: Option<String>,
    pub granter_name: Option<String>,
}

/// Everyone with access to a patient, apart from admins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accessors {
    pub patient_id: PatientId,
    pub owner_id: Option<IdentityId>,
    /// `None` for legacy unowned patients, or an owner the identity
    /// system no longer knows.
    pub owner: Option<Identity>,
    pub shared_with: Vec<SharedAccess>,
}

// ---------------------------------------------------------------------------
// Accessible-set filter
// ---------------------------------------------------------------------------

/// Base predicate selecting the patients an actor may see.
///
/// Callers compose it with their own conditions; it never stands for a
/// finished result set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessFilter {
    /// Every patient, legacy unowned ones included.
    Unrestricted,
    /// `owner == actor OR id ∈ shared`.
    Restricted {
        actor: IdentityId,
        shared: BTreeSet<PatientId>,
    },
}

impl AccessFilter {
    pub fn is_unrestricted(&self) -> bool {
        matches!(self, Self::Unrestricted)
    }

    /// Point form of the predicate, usable without a full `Patient`.
    pub fn allows(&self, patient_id: PatientId, owner: Option<IdentityId>) -> bool {
        match self {
            Self::Unrestricted => true,
            Self::Restricted { actor, shared } => {
                owner == Some(*actor) || shared.contains(&patient_id)
            }
        }
    }

    pub fn matches(&self, patient: &Patient) -> bool {
        self.allows(patient.id, patient.owner)
    }

    /// Drops every patient the filter rejects, keeping order.
    pub fn retain(&self, patients: &mut Vec<Patient>) {
        if self.is_unrestricted() {
            return;
        }
        patients.retain(|p| self.matches(p));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patient(id: i64, owner: Option<i64>) -> Patient {
        let now = Utc::now();
        Patient {
            id: PatientId(id),
            patient_number: Patient::number_for(id as u64),
            owner: owner.map(IdentityId),
            details: PatientDetails::new(
                "Jane Roe",
                NaiveDate::from_ymd_opt(1980, 4, 2).unwrap(),
                "female",
                "555-0100",
            ),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn role_parses_clinic_spellings() {
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!("Doctor".parse::<Role>().unwrap(), Role::Standard);
        assert_eq!("standard".parse::<Role>().unwrap(), Role::Standard);
        assert!("nurse".parse::<Role>().is_err());
    }

    #[test]
    fn ids_parse_and_display() {
        let id: PatientId = " 42 ".parse().unwrap();
        assert_eq!(id, PatientId(42));
        assert_eq!(id.to_string(), "patient 42");
        assert!("abc".parse::<IdentityId>().is_err());
    }

    #[test]
    fn patient_numbers() {
        assert_eq!(Patient::number_for(1), "P-001");
        assert_eq!(Patient::number_for(1234), "P-1234");
        assert_eq!(Patient::parse_number("P-017"), Some(17));
        assert_eq!(Patient::parse_number("X-017"), None);
    }

    #[test]
    fn restricted_filter_matches_owner_or_shared() {
        let filter = AccessFilter::Restricted {
            actor: IdentityId(1),
            shared: [PatientId(3)].into_iter().collect(),
        };
        assert!(filter.matches(&patient(1, Some(1))));
        assert!(!filter.matches(&patient(2, Some(2))));
        assert!(filter.matches(&patient(3, Some(2))));
        // Legacy unowned records only through an explicit grant.
        assert!(!filter.matches(&patient(4, None)));
    }

    #[test]
    fn unrestricted_filter_includes_unowned() {
        assert!(AccessFilter::Unrestricted.matches(&patient(9, None)));
    }

    #[test]
    fn retain_keeps_order() {
        let filter = AccessFilter::Restricted {
            actor: IdentityId(1),
            shared: [PatientId(4)].into_iter().collect(),
        };
        let mut list = vec![
            patient(1, Some(1)),
            patient(2, Some(5)),
            patient(3, Some(1)),
            patient(4, None),
        ];
        filter.retain(&mut list);
        let ids: Vec<i64> = list.iter().map(|p| p.id.0).collect();
        assert_eq!(ids, vec![1, 3, 4]);
    }

    #[test]
    fn patient_json_flattens_details() {
        let json = serde_json::to_value(patient(1, None)).unwrap();
        assert_eq!(json["full_name"], "Jane Roe");
        assert_eq!(json["owner"], serde_json::Value::Null);
        assert!(json.get("email").is_none());
    }
}
