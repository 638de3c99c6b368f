//! SQLite-backed [`AccessStore`] using rusqlite.
//!
//! Uniqueness of `(patient_id, user_id)` grants is a `UNIQUE` index, so two
//! racing grant requests resolve to one persisted row: the loser's
//! `INSERT OR IGNORE` changes nothing and is reported as a skipped grantee.
//! Patient deletion removes visits and grants in the same transaction.

use crate::AccessStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clinic_core::error::{ClinicError, ClinicResult};
use clinic_core::{
    AccessFilter, AccessGrant, GrantId, Identity, IdentityId, NewIdentity, Ownership, Patient,
    PatientDetails, PatientId, Role, Visit, VisitDetails, VisitId,
};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS users (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        username   TEXT    NOT NULL UNIQUE,
        full_name  TEXT    NOT NULL,
        role       TEXT    NOT NULL,
        is_active  INTEGER NOT NULL DEFAULT 1
    );

    CREATE TABLE IF NOT EXISTS patients (
        id                  INTEGER PRIMARY KEY AUTOINCREMENT,
        patient_number      TEXT    NOT NULL UNIQUE,
        owner_id            INTEGER REFERENCES users(id),
        full_name           TEXT    NOT NULL,
        date_of_birth       TEXT    NOT NULL,
        gender              TEXT    NOT NULL,
        contact_number      TEXT    NOT NULL,
        email               TEXT,
        address             TEXT,
        allergies           TEXT,
        chronic_conditions  TEXT,
        current_medications TEXT,
        created_at          TEXT    NOT NULL,
        updated_at          TEXT    NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_patients_owner ON patients(owner_id);

    CREATE TABLE IF NOT EXISTS visits (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        patient_id      INTEGER NOT NULL REFERENCES patients(id) ON DELETE CASCADE,
        visit_date      TEXT    NOT NULL,
        chief_complaint TEXT    NOT NULL,
        diagnosis       TEXT,
        prescription    TEXT,
        notes           TEXT,
        created_at      TEXT    NOT NULL,
        last_edited_at  TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_visits_patient ON visits(patient_id);

    CREATE TABLE IF NOT EXISTS patient_access (
        id             INTEGER PRIMARY KEY AUTOINCREMENT,
        patient_id     INTEGER NOT NULL REFERENCES patients(id) ON DELETE CASCADE,
        user_id        INTEGER NOT NULL REFERENCES users(id),
        granted_by     INTEGER NOT NULL REFERENCES users(id),
        access_comment TEXT,
        granted_at     TEXT    NOT NULL
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_patient_access_unique
        ON patient_access(patient_id, user_id);
    CREATE INDEX IF NOT EXISTS idx_patient_access_user ON patient_access(user_id);
";

const PATIENT_COLUMNS: &str = "p.id, p.patient_number, p.owner_id, p.full_name, p.date_of_birth, \
     p.gender, p.contact_number, p.email, p.address, p.allergies, p.chronic_conditions, \
     p.current_medications, p.created_at, p.updated_at";

const VISIT_COLUMNS: &str = "v.id, v.patient_id, v.visit_date, v.chief_complaint, v.diagnosis, \
     v.prescription, v.notes, v.created_at, v.last_edited_at";

const GRANT_COLUMNS: &str = "id, patient_id, user_id, granted_by, access_comment, granted_at";

/// An [`AccessFilter`] rendered as a SQL `WHERE` fragment over `patients p`.
///
/// The restricted form binds the actor as `?1` and each shared id after it,
/// so the query sees exactly the set carried by the filter. Callers may `AND`
/// further conditions onto `clause`, numbering their own parameters after
/// `params.len()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlPredicate {
    pub clause: String,
    pub params: Vec<i64>,
}

impl SqlPredicate {
    pub fn from_filter(filter: &AccessFilter) -> Self {
        match filter {
            AccessFilter::Unrestricted => Self {
                clause: "1 = 1".into(),
                params: Vec::new(),
            },
            AccessFilter::Restricted { actor, shared } if shared.is_empty() => Self {
                clause: "p.owner_id = ?1".into(),
                params: vec![actor.0],
            },
            AccessFilter::Restricted { actor, shared } => {
                let placeholders = (2..shared.len() + 2)
                    .map(|i| format!("?{i}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                let mut params = Vec::with_capacity(shared.len() + 1);
                params.push(actor.0);
                params.extend(shared.iter().map(|id| id.0));
                Self {
                    clause: format!("(p.owner_id = ?1 OR p.id IN ({placeholders}))"),
                    params,
                }
            }
        }
    }
}

/// Record store on a single SQLite connection.
///
/// ```ignore
/// let store = SqliteStore::open("clinic.db")?;
/// ```
#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: String,
}

impl SqliteStore {
    /// Opens (or creates) the database at `path` and ensures the schema.
    pub fn open(path: &str) -> ClinicResult<Self> {
        if path.is_empty() {
            return Err(ClinicError::InvalidInput(
                "database path must not be empty".into(),
            ));
        }

        let conn = Connection::open(path)
            .map_err(|e| ClinicError::Store(format!("Failed to open {path}: {e}")))?;
        Self::init(conn, path)
    }

    pub fn open_in_memory() -> ClinicResult<Self> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        Self::init(conn, ":memory:")
    }

    fn init(conn: Connection, path: &str) -> ClinicResult<Self> {
        conn.pragma_update(None, "foreign_keys", true)
            .map_err(store_err)?;
        conn.execute_batch(SCHEMA).map_err(store_err)?;

        tracing::info!(path, "database opened");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path.to_string(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Inserts a patient row as-is. Used to load migrated data, including
    /// legacy rows without an owner.
    pub async fn import_patient(&self, patient: Patient) -> ClinicResult<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO patients (id, patient_number, owner_id, full_name, date_of_birth, \
                 gender, contact_number, email, address, allergies, chronic_conditions, \
                 current_medications, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    patient.id.0,
                    patient.patient_number,
                    patient.owner.map(|o| o.0),
                    patient.details.full_name,
                    patient.details.date_of_birth,
                    patient.details.gender,
                    patient.details.contact_number,
                    patient.details.email,
                    patient.details.address,
                    patient.details.allergies,
                    patient.details.chronic_conditions,
                    patient.details.current_medications,
                    patient.created_at,
                    patient.updated_at,
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Runs `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> ClinicResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|e| ClinicError::Store(format!("connection lock poisoned: {e}")))?;
            f(&mut guard).map_err(store_err)
        })
        .await
        .map_err(|e| ClinicError::Internal(format!("spawn_blocking panicked: {e}")))?
    }
}

fn store_err(e: rusqlite::Error) -> ClinicError {
    ClinicError::Store(e.to_string())
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn row_to_identity(row: &Row<'_>) -> rusqlite::Result<Identity> {
    let role: String = row.get(3)?;
    let role = role
        .parse::<Role>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;
    Ok(Identity {
        id: IdentityId(row.get(0)?),
        username: row.get(1)?,
        full_name: row.get(2)?,
        role,
        is_active: row.get(4)?,
    })
}

fn row_to_patient(row: &Row<'_>) -> rusqlite::Result<Patient> {
    Ok(Patient {
        id: PatientId(row.get(0)?),
        patient_number: row.get(1)?,
        owner: row.get::<_, Option<i64>>(2)?.map(IdentityId),
        details: PatientDetails {
            full_name: row.get(3)?,
            date_of_birth: row.get(4)?,
            gender: row.get(5)?,
            contact_number: row.get(6)?,
            email: row.get(7)?,
            address: row.get(8)?,
            allergies: row.get(9)?,
            chronic_conditions: row.get(10)?,
            current_medications: row.get(11)?,
        },
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

fn row_to_visit(row: &Row<'_>) -> rusqlite::Result<Visit> {
    Ok(Visit {
        id: VisitId(row.get(0)?),
        patient_id: PatientId(row.get(1)?),
        details: VisitDetails {
            visit_date: row.get(2)?,
            chief_complaint: row.get(3)?,
            diagnosis: row.get(4)?,
            prescription: row.get(5)?,
            notes: row.get(6)?,
        },
        created_at: row.get(7)?,
        last_edited_at: row.get(8)?,
    })
}

fn row_to_grant(row: &Row<'_>) -> rusqlite::Result<AccessGrant> {
    Ok(AccessGrant {
        id: GrantId(row.get(0)?),
        patient_id: PatientId(row.get(1)?),
        grantee: IdentityId(row.get(2)?),
        granter: IdentityId(row.get(3)?),
        comment: row.get(4)?,
        granted_at: row.get(5)?,
    })
}

fn fetch_patient(conn: &Connection, id: PatientId) -> rusqlite::Result<Option<Patient>> {
    conn.query_row(
        &format!("SELECT {PATIENT_COLUMNS} FROM patients p WHERE p.id = ?1"),
        [id.0],
        row_to_patient,
    )
    .optional()
}

fn fetch_visit(conn: &Connection, id: VisitId) -> rusqlite::Result<Option<Visit>> {
    conn.query_row(
        &format!("SELECT {VISIT_COLUMNS} FROM visits v WHERE v.id = ?1"),
        [id.0],
        row_to_visit,
    )
    .optional()
}

// ---------------------------------------------------------------------------
// AccessStore
// ---------------------------------------------------------------------------

#[async_trait]
impl AccessStore for SqliteStore {
    async fn create_identity(&self, identity: NewIdentity) -> ClinicResult<Identity> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO users (username, full_name, role, is_active) VALUES (?1, ?2, ?3, 1)",
                params![identity.username, identity.full_name, identity.role.as_str()],
            )?;
            Ok(Identity {
                id: IdentityId(conn.last_insert_rowid()),
                username: identity.username,
                full_name: identity.full_name,
                role: identity.role,
                is_active: true,
            })
        })
        .await
    }

    async fn get_identity(&self, id: IdentityId) -> ClinicResult<Option<Identity>> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, username, full_name, role, is_active FROM users WHERE id = ?1",
                [id.0],
                row_to_identity,
            )
            .optional()
        })
        .await
    }

    async fn list_identities(&self) -> ClinicResult<Vec<Identity>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, username, full_name, role, is_active FROM users ORDER BY id",
            )?;
            let rows = stmt.query_map([], row_to_identity)?;
            rows.collect()
        })
        .await
    }

    async fn create_patient(
        &self,
        owner: Option<IdentityId>,
        details: PatientDetails,
        at: DateTime<Utc>,
    ) -> ClinicResult<Patient> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let last: Option<i64> = tx.query_row(
                "SELECT MAX(CAST(SUBSTR(patient_number, 3) AS INTEGER)) FROM patients \
                 WHERE patient_number LIKE 'P-%'",
                [],
                |row| row.get(0),
            )?;
            let number = Patient::number_for(last.unwrap_or(0).max(0) as u64 + 1);
            tx.execute(
                "INSERT INTO patients (patient_number, owner_id, full_name, date_of_birth, \
                 gender, contact_number, email, address, allergies, chronic_conditions, \
                 current_medications, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
                params![
                    number,
                    owner.map(|o| o.0),
                    details.full_name,
                    details.date_of_birth,
                    details.gender,
                    details.contact_number,
                    details.email,
                    details.address,
                    details.allergies,
                    details.chronic_conditions,
                    details.current_medications,
                    at,
                ],
            )?;
            let id = PatientId(tx.last_insert_rowid());
            tx.commit()?;
            Ok(Patient {
                id,
                patient_number: number,
                owner,
                details,
                created_at: at,
                updated_at: at,
            })
        })
        .await
    }

    async fn get_patient(&self, id: PatientId) -> ClinicResult<Option<Patient>> {
        self.with_conn(move |conn| fetch_patient(conn, id)).await
    }

    async fn get_owner(&self, id: PatientId) -> ClinicResult<Option<Ownership>> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT owner_id FROM patients WHERE id = ?1",
                [id.0],
                |row| row.get::<_, Option<i64>>(0),
            )
            .optional()
            .map(|found| found.map(|owner| Ownership::from(owner.map(IdentityId))))
        })
        .await
    }

    async fn update_patient(
        &self,
        id: PatientId,
        details: PatientDetails,
        at: DateTime<Utc>,
    ) -> ClinicResult<Option<Patient>> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let changed = tx.execute(
                "UPDATE patients SET full_name = ?2, date_of_birth = ?3, gender = ?4, \
                 contact_number = ?5, email = ?6, address = ?7, allergies = ?8, \
                 chronic_conditions = ?9, current_medications = ?10, updated_at = ?11 \
                 WHERE id = ?1",
                params![
                    id.0,
                    details.full_name,
                    details.date_of_birth,
                    details.gender,
                    details.contact_number,
                    details.email,
                    details.address,
                    details.allergies,
                    details.chronic_conditions,
                    details.current_medications,
                    at,
                ],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            let patient = fetch_patient(&tx, id)?;
            tx.commit()?;
            Ok(patient)
        })
        .await
    }

    async fn list_patients(&self, filter: &AccessFilter) -> ClinicResult<Vec<Patient>> {
        let predicate = SqlPredicate::from_filter(filter);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PATIENT_COLUMNS} FROM patients p WHERE {} ORDER BY p.id",
                predicate.clause
            ))?;
            let rows = stmt.query_map(params_from_iter(predicate.params.iter()), row_to_patient)?;
            rows.collect()
        })
        .await
    }

    async fn delete_patient(&self, id: PatientId) -> ClinicResult<bool> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let grants = tx.execute("DELETE FROM patient_access WHERE patient_id = ?1", [id.0])?;
            let visits = tx.execute("DELETE FROM visits WHERE patient_id = ?1", [id.0])?;
            let deleted = tx.execute("DELETE FROM patients WHERE id = ?1", [id.0])?;
            tx.commit()?;
            tracing::debug!(patient = %id, grants, visits, "sqlite: patient deleted");
            Ok(deleted > 0)
        })
        .await
    }

    async fn create_visit(
        &self,
        patient_id: PatientId,
        details: VisitDetails,
        at: DateTime<Utc>,
    ) -> ClinicResult<Visit> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO visits (patient_id, visit_date, chief_complaint, diagnosis, \
                 prescription, notes, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    patient_id.0,
                    details.visit_date,
                    details.chief_complaint,
                    details.diagnosis,
                    details.prescription,
                    details.notes,
                    at,
                ],
            )?;
            Ok(Visit {
                id: VisitId(conn.last_insert_rowid()),
                patient_id,
                details,
                created_at: at,
                last_edited_at: None,
            })
        })
        .await
    }

    async fn get_visit(&self, id: VisitId) -> ClinicResult<Option<Visit>> {
        self.with_conn(move |conn| fetch_visit(conn, id)).await
    }

    async fn update_visit(
        &self,
        id: VisitId,
        details: VisitDetails,
        at: DateTime<Utc>,
    ) -> ClinicResult<Option<Visit>> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let changed = tx.execute(
                "UPDATE visits SET visit_date = ?2, chief_complaint = ?3, diagnosis = ?4, \
                 prescription = ?5, notes = ?6, last_edited_at = ?7 WHERE id = ?1",
                params![
                    id.0,
                    details.visit_date,
                    details.chief_complaint,
                    details.diagnosis,
                    details.prescription,
                    details.notes,
                    at,
                ],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            let visit = fetch_visit(&tx, id)?;
            tx.commit()?;
            Ok(visit)
        })
        .await
    }

    async fn list_visits(&self, patient_id: PatientId) -> ClinicResult<Vec<Visit>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {VISIT_COLUMNS} FROM visits v WHERE v.patient_id = ?1 \
                 ORDER BY v.visit_date DESC, v.id DESC"
            ))?;
            let rows = stmt.query_map([patient_id.0], row_to_visit)?;
            rows.collect()
        })
        .await
    }

    async fn list_visits_matching(&self, filter: &AccessFilter) -> ClinicResult<Vec<Visit>> {
        let predicate = SqlPredicate::from_filter(filter);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {VISIT_COLUMNS} FROM visits v JOIN patients p ON p.id = v.patient_id \
                 WHERE {} ORDER BY v.visit_date DESC, v.id DESC",
                predicate.clause
            ))?;
            let rows = stmt.query_map(params_from_iter(predicate.params.iter()), row_to_visit)?;
            rows.collect()
        })
        .await
    }

    async fn has_grant(&self, patient_id: PatientId, grantee: IdentityId) -> ClinicResult<bool> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM patient_access WHERE patient_id = ?1 AND user_id = ?2)",
                [patient_id.0, grantee.0],
                |row| row.get(0),
            )
        })
        .await
    }

    async fn shared_patient_ids(&self, grantee: IdentityId) -> ClinicResult<BTreeSet<PatientId>> {
        self.with_conn(move |conn| {
            let mut stmt =
                conn.prepare("SELECT patient_id FROM patient_access WHERE user_id = ?1")?;
            let rows = stmt.query_map([grantee.0], |row| row.get(0).map(PatientId))?;
            rows.collect()
        })
        .await
    }

    async fn list_grants(&self, patient_id: PatientId) -> ClinicResult<Vec<AccessGrant>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {GRANT_COLUMNS} FROM patient_access WHERE patient_id = ?1 ORDER BY id"
            ))?;
            let rows = stmt.query_map([patient_id.0], row_to_grant)?;
            rows.collect()
        })
        .await
    }

    async fn insert_grants(
        &self,
        patient_id: PatientId,
        granter: IdentityId,
        grantees: &[IdentityId],
        comment: Option<String>,
        at: DateTime<Utc>,
    ) -> ClinicResult<Vec<AccessGrant>> {
        let grantees = grantees.to_vec();
        let created = self.with_conn(move |conn| {
            // Dropping `tx` without commit rolls back every insert below.
            let tx = conn.transaction()?;
            let exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM patients WHERE id = ?1)",
                [patient_id.0],
                |row| row.get(0),
            )?;
            if !exists {
                return Ok(None);
            }
            let mut created = Vec::with_capacity(grantees.len());
            {
                let mut stmt = tx.prepare(
                    "INSERT OR IGNORE INTO patient_access \
                     (patient_id, user_id, granted_by, access_comment, granted_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                for grantee in grantees {
                    let inserted =
                        stmt.execute(params![patient_id.0, grantee.0, granter.0, comment, at])?;
                    if inserted == 0 {
                        continue;
                    }
                    created.push(AccessGrant {
                        id: GrantId(tx.last_insert_rowid()),
                        patient_id,
                        grantee,
                        granter,
                        comment: comment.clone(),
                        granted_at: at,
                    });
                }
            }
            tx.commit()?;
            Ok(Some(created))
        })
        .await?;
        created.ok_or_else(|| ClinicError::NotFound(patient_id.to_string()))
    }

    async fn delete_grant(
        &self,
        patient_id: PatientId,
        grantee: IdentityId,
    ) -> ClinicResult<bool> {
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM patient_access WHERE patient_id = ?1 AND user_id = ?2",
                [patient_id.0, grantee.0],
            )
            .map(|n| n > 0)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn details(name: &str) -> PatientDetails {
        PatientDetails::new(
            name,
            NaiveDate::from_ymd_opt(1990, 6, 15).unwrap(),
            "female",
            "555-0199",
        )
    }

    async fn seeded() -> (SqliteStore, IdentityId, IdentityId) {
        let store = SqliteStore::open_in_memory().unwrap();
        let d1 = store
            .create_identity(NewIdentity::new("d1", "Dr One", Role::Standard))
            .await
            .unwrap();
        let d2 = store
            .create_identity(NewIdentity::new("d2", "Dr Two", Role::Standard))
            .await
            .unwrap();
        (store, d1.id, d2.id)
    }

    #[test]
    fn empty_path_rejected() {
        assert!(matches!(
            SqliteStore::open(""),
            Err(ClinicError::InvalidInput(_))
        ));
    }

    #[test]
    fn predicate_binds_actor_and_shared_ids() {
        let owned_only = SqlPredicate::from_filter(&AccessFilter::Restricted {
            actor: IdentityId(4),
            shared: BTreeSet::new(),
        });
        assert_eq!(owned_only.clause, "p.owner_id = ?1");
        assert_eq!(owned_only.params, vec![4]);

        let shared = SqlPredicate::from_filter(&AccessFilter::Restricted {
            actor: IdentityId(4),
            shared: [PatientId(9), PatientId(2)].into_iter().collect(),
        });
        assert_eq!(shared.clause, "(p.owner_id = ?1 OR p.id IN (?2, ?3))");
        assert_eq!(shared.params, vec![4, 2, 9]);

        assert!(SqlPredicate::from_filter(&AccessFilter::Unrestricted)
            .params
            .is_empty());
    }

    #[tokio::test]
    async fn patient_round_trips_through_rows() {
        let (store, d1, _) = seeded().await;
        let mut d = details("Ada");
        d.allergies = Some("penicillin".into());
        let created = store.create_patient(Some(d1), d, Utc::now()).await.unwrap();
        let loaded = store.get_patient(created.id).await.unwrap().unwrap();
        assert_eq!(loaded.patient_number, "P-001");
        assert_eq!(loaded.owner, Some(d1));
        assert_eq!(loaded.details.allergies.as_deref(), Some("penicillin"));
        assert_eq!(
            store.get_owner(created.id).await.unwrap(),
            Some(Ownership::Owned(d1))
        );
        assert_eq!(store.get_owner(PatientId(99)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn insert_or_ignore_keeps_one_grant() {
        let (store, d1, d2) = seeded().await;
        let p = store.create_patient(Some(d1), details("Ada"), Utc::now()).await.unwrap();

        let first = store
            .insert_grants(p.id, d1, &[d2, d2], Some("consult".into()), Utc::now())
            .await
            .unwrap();
        let again = store.insert_grants(p.id, d1, &[d2], None, Utc::now()).await.unwrap();

        assert_eq!(first.len(), 1);
        assert!(again.is_empty());
        let grants = store.list_grants(p.id).await.unwrap();
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].comment.as_deref(), Some("consult"));
    }

    #[tokio::test]
    async fn foreign_key_failure_rolls_back_batch() {
        let (store, d1, d2) = seeded().await;
        let p = store.create_patient(Some(d1), details("Ada"), Utc::now()).await.unwrap();

        let result = store
            .insert_grants(p.id, d1, &[d2, IdentityId(404)], None, Utc::now())
            .await;
        assert!(matches!(result, Err(ClinicError::Store(_))));
        assert!(store.list_grants(p.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn grants_on_missing_patient_are_not_found() {
        let (store, d1, d2) = seeded().await;
        let err = store
            .insert_grants(PatientId(12), d1, &[d2], None, Utc::now())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn filter_shared_set_is_taken_as_given() {
        let (store, d1, d2) = seeded().await;
        let p = store.create_patient(Some(d1), details("Ada"), Utc::now()).await.unwrap();
        let visit = VisitDetails::new(NaiveDate::from_ymd_opt(2026, 1, 8).unwrap(), "rash");
        store.create_visit(p.id, visit, Utc::now()).await.unwrap();

        // No grant row exists; the filter alone admits the patient.
        let filter = AccessFilter::Restricted {
            actor: d2,
            shared: [p.id].into_iter().collect(),
        };
        assert_eq!(store.list_patients(&filter).await.unwrap().len(), 1);
        assert_eq!(store.list_visits_matching(&filter).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn visit_update_round_trips() {
        let (store, d1, _) = seeded().await;
        let p = store.create_patient(Some(d1), details("Ada"), Utc::now()).await.unwrap();
        let day = NaiveDate::from_ymd_opt(2026, 2, 2).unwrap();
        let visit = store
            .create_visit(p.id, VisitDetails::new(day, "fever"), Utc::now())
            .await
            .unwrap();

        let mut details = visit.details.clone();
        details.prescription = Some("paracetamol".into());
        let edited = store
            .update_visit(visit.id, details, Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert!(edited.last_edited_at.is_some());
        assert_eq!(edited.details.prescription.as_deref(), Some("paracetamol"));
        assert_eq!(store.get_visit(visit.id).await.unwrap(), Some(edited));
        assert!(store.get_visit(VisitId(77)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_cascades_in_one_transaction() {
        let (store, d1, d2) = seeded().await;
        let p = store.create_patient(Some(d1), details("Ada"), Utc::now()).await.unwrap();
        let visit = VisitDetails::new(NaiveDate::from_ymd_opt(2026, 2, 2).unwrap(), "fever");
        store.create_visit(p.id, visit, Utc::now()).await.unwrap();
        store.insert_grants(p.id, d1, &[d2], None, Utc::now()).await.unwrap();

        assert!(store.delete_patient(p.id).await.unwrap());
        assert!(store.get_patient(p.id).await.unwrap().is_none());
        assert!(store.list_visits(p.id).await.unwrap().is_empty());
        assert!(store.shared_patient_ids(d2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn restricted_listing_uses_owner_and_grants() {
        let (store, d1, d2) = seeded().await;
        let own = store.create_patient(Some(d2), details("Own"), Utc::now()).await.unwrap();
        let shared = store.create_patient(Some(d1), details("Shared"), Utc::now()).await.unwrap();
        store.create_patient(Some(d1), details("Hidden"), Utc::now()).await.unwrap();
        store.insert_grants(shared.id, d1, &[d2], None, Utc::now()).await.unwrap();

        let filter = AccessFilter::Restricted {
            actor: d2,
            shared: store.shared_patient_ids(d2).await.unwrap(),
        };
        let ids: Vec<PatientId> = store
            .list_patients(&filter)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec![own.id, shared.id]);
        assert_eq!(
            store.list_patients(&AccessFilter::Unrestricted).await.unwrap().len(),
            3
        );
    }
}
