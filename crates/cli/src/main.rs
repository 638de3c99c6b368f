//! CLI for clinic records and patient sharing.
//!
//! Every command runs as the identity given by `--actor` (or `CLINIC_ACTOR`)
//! against the SQLite database at `--db`.

use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use clinic_access::audit::{AuditRow, JsonStreamSink};
use clinic_access::{AccessControl, AccessorReport};
use clinic_core::{
    ClinicError, IdentityId, NewIdentity, Patient, PatientDetails, PatientId, Role, Visit,
    VisitDetails, VisitId,
};
use clinic_store::{AccessStore, SqliteStore};
use std::fs::OpenOptions;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "clinic", version, about = "Clinic records with owner-controlled sharing")]
struct Cli {
    /// SQLite database file.
    #[arg(long, env = "CLINIC_DB", default_value = "clinic.db", global = true)]
    db: String,

    /// Identity id the command runs as.
    #[arg(long, env = "CLINIC_ACTOR", global = true)]
    actor: Option<IdentityId>,

    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Audit output for sharing and deletion events: "ndjson" writes NDJSON
    /// to stdout, "ndjson:/path/to/file" appends to a file.
    #[arg(long, global = true)]
    audit: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register an identity (admin or standard).
    AddUser {
        username: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "standard")]
        role: Role,
    },

    /// Create a patient owned by the actor.
    AddPatient {
        #[arg(long)]
        name: String,
        /// Date of birth, YYYY-MM-DD.
        #[arg(long)]
        dob: NaiveDate,
        #[arg(long)]
        gender: String,
        #[arg(long)]
        contact: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        address: Option<String>,
        #[arg(long)]
        allergies: Option<String>,
        #[arg(long)]
        conditions: Option<String>,
        #[arg(long)]
        medications: Option<String>,
    },

    /// Show one patient.
    Show { patient: PatientId },

    /// List every patient the actor may see.
    List,

    /// Report whether the actor may access a patient.
    Check { patient: PatientId },

    /// Share a patient with one or more colleagues.
    Share {
        patient: PatientId,
        #[arg(required = true)]
        grantees: Vec<IdentityId>,
        #[arg(long)]
        comment: Option<String>,
    },

    /// Remove a colleague's shared access. Owner only.
    Revoke {
        patient: PatientId,
        grantee: IdentityId,
    },

    /// Show the owner and everyone a patient is shared with.
    Accessors { patient: PatientId },

    /// Delete a patient with its visits and grants. Owner only.
    Delete { patient: PatientId },

    /// Record a visit for a patient.
    AddVisit {
        patient: PatientId,
        /// Visit date, YYYY-MM-DD.
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        complaint: String,
        #[arg(long)]
        diagnosis: Option<String>,
        #[arg(long)]
        prescription: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },

    /// Show one visit.
    Visit { visit: VisitId },

    /// Edit a visit. Fields left out keep their current value.
    EditVisit {
        visit: VisitId,
        /// Visit date, YYYY-MM-DD.
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        complaint: Option<String>,
        #[arg(long)]
        diagnosis: Option<String>,
        #[arg(long)]
        prescription: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },

    /// List visits for one patient, or across every visible patient.
    Visits { patient: Option<PatientId> },

    /// List colleagues the actor could share with.
    Colleagues,
}

fn require_actor(actor: Option<IdentityId>) -> Result<IdentityId, ClinicError> {
    actor.ok_or_else(|| ClinicError::InvalidInput("--actor (or CLINIC_ACTOR) is required".into()))
}

fn print_patient(p: &Patient) {
    let owner = p
        .owner
        .map(|o| o.to_string())
        .unwrap_or_else(|| "unowned".to_string());
    println!(
        "{:>5}  {}  {:<28} {}  {:<8} {}  [{}]",
        p.id.0,
        p.patient_number,
        p.details.full_name,
        p.details.date_of_birth,
        p.details.gender,
        p.details.contact_number,
        owner
    );
}

fn print_visit(v: &Visit) {
    println!(
        "{:>5}  {}  patient {:<5} {}{}",
        v.id.0,
        v.details.visit_date,
        v.patient_id.0,
        v.details.chief_complaint,
        v.details
            .diagnosis
            .as_deref()
            .map(|d| format!(" -> {d}"))
            .unwrap_or_default()
    );
}

fn write_audit(spec: &str, rows: &[AuditRow]) -> Result<(), Box<dyn std::error::Error>> {
    if rows.is_empty() {
        return Ok(());
    }

    if spec == "ndjson" {
        let mut s = JsonStreamSink::stdout();
        s.write_rows(rows)?;
        let n = s.finish()?;
        tracing::info!(rows = n, "audit: wrote to stdout");
    } else if let Some(path) = spec.strip_prefix("ndjson:") {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut s = JsonStreamSink::new(file);
        s.write_rows(rows)?;
        let n = s.finish()?;
        tracing::info!(rows = n, path, "audit: appended to file");
    } else {
        eprintln!("Unknown audit sink: {spec}. Use 'ndjson' or 'ndjson:/path'");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let store = Arc::new(SqliteStore::open(&cli.db)?);
    let access = AccessControl::new(store);
    let json = cli.json;
    let mut audit_rows: Vec<AuditRow> = Vec::new();

    match cli.command {
        Commands::AddUser {
            username,
            name,
            role,
        } => {
            let identity = access
                .store()
                .create_identity(NewIdentity::new(username, name, role))
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&identity)?);
            } else {
                println!(
                    "Created {} {} ({})",
                    identity.role.as_str(),
                    identity.username,
                    identity.id
                );
            }
        }

        Commands::AddPatient {
            name,
            dob,
            gender,
            contact,
            email,
            address,
            allergies,
            conditions,
            medications,
        } => {
            let actor = require_actor(cli.actor)?;
            let mut details = PatientDetails::new(name, dob, gender, contact);
            details.email = email;
            details.address = address;
            details.allergies = allergies;
            details.chronic_conditions = conditions;
            details.current_medications = medications;

            let patient = access.create_patient(actor, details).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&patient)?);
            } else {
                println!(
                    "Created {} ({}) owned by {}",
                    patient.patient_number, patient.id, actor
                );
            }
        }

        Commands::Show { patient } => {
            let actor = require_actor(cli.actor)?;
            let p = access.get_patient(actor, patient).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&p)?);
            } else {
                print_patient(&p);
                let d = &p.details;
                for (label, value) in [
                    ("Email", &d.email),
                    ("Address", &d.address),
                    ("Allergies", &d.allergies),
                    ("Conditions", &d.chronic_conditions),
                    ("Medications", &d.current_medications),
                ] {
                    if let Some(value) = value {
                        println!("       {label}: {value}");
                    }
                }
            }
        }

        Commands::List => {
            let actor = require_actor(cli.actor)?;
            let patients = access.list_patients(actor).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&patients)?);
            } else {
                for p in &patients {
                    print_patient(p);
                }
                eprintln!("{} patient(s)", patients.len());
            }
        }

        Commands::Check { patient } => {
            let actor = require_actor(cli.actor)?;
            let allowed = access.can_access(actor, patient).await?;
            if json {
                println!(
                    "{}",
                    serde_json::json!({ "actor": actor, "patient": patient, "allowed": allowed })
                );
            } else {
                println!(
                    "{actor} {} access {patient}",
                    if allowed { "may" } else { "may not" }
                );
            }
        }

        Commands::Share {
            patient,
            grantees,
            comment,
        } => {
            let actor = require_actor(cli.actor)?;
            let created = access
                .grant(patient, actor, &grantees, comment.as_deref())
                .await?;
            audit_rows.extend(created.iter().map(AuditRow::granted));
            if json {
                println!("{}", serde_json::to_string_pretty(&created)?);
            } else if created.is_empty() {
                println!("No new grants: everyone listed already has access");
            } else {
                for grant in &created {
                    println!("Shared {patient} with {}", grant.grantee);
                }
            }
        }

        Commands::Revoke { patient, grantee } => {
            let actor = require_actor(cli.actor)?;
            let removed = access.revoke(patient, grantee, actor).await?;
            if removed {
                audit_rows.push(AuditRow::revoked(patient, grantee, actor, Utc::now()));
            }
            if json {
                println!("{}", serde_json::json!({ "removed": removed }));
            } else if removed {
                println!("Revoked {grantee} from {patient}");
            } else {
                println!("{grantee} had no shared access to {patient}");
            }
        }

        Commands::Accessors { patient } => {
            let actor = require_actor(cli.actor)?;
            let accessors = access.accessors(actor, patient).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&accessors)?);
            } else {
                print!("{}", AccessorReport::build(&accessors).render());
            }
        }

        Commands::Delete { patient } => {
            let actor = require_actor(cli.actor)?;
            access.delete_patient(patient, actor).await?;
            audit_rows.push(AuditRow::deleted(patient, actor, Utc::now()));
            if json {
                println!("{}", serde_json::json!({ "deleted": patient }));
            } else {
                println!("Deleted {patient}");
            }
        }

        Commands::AddVisit {
            patient,
            date,
            complaint,
            diagnosis,
            prescription,
            notes,
        } => {
            let actor = require_actor(cli.actor)?;
            let mut details = VisitDetails::new(date, complaint);
            details.diagnosis = diagnosis;
            details.prescription = prescription;
            details.notes = notes;

            let visit = access.add_visit(actor, patient, details).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&visit)?);
            } else {
                println!("Recorded {} for {patient}", visit.id);
            }
        }

        Commands::Visit { visit } => {
            let actor = require_actor(cli.actor)?;
            let v = access.get_visit(actor, visit).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&v)?);
            } else {
                print_visit(&v);
                for (label, value) in [
                    ("Prescription", &v.details.prescription),
                    ("Notes", &v.details.notes),
                ] {
                    if let Some(value) = value {
                        println!("       {label}: {value}");
                    }
                }
                if let Some(at) = v.last_edited_at {
                    println!("       Last edited: {}", at.format("%Y-%m-%d %H:%M"));
                }
            }
        }

        Commands::EditVisit {
            visit,
            date,
            complaint,
            diagnosis,
            prescription,
            notes,
        } => {
            let actor = require_actor(cli.actor)?;
            let mut details = access.get_visit(actor, visit).await?.details;
            if let Some(date) = date {
                details.visit_date = date;
            }
            if let Some(complaint) = complaint {
                details.chief_complaint = complaint;
            }
            details.diagnosis = diagnosis.or(details.diagnosis);
            details.prescription = prescription.or(details.prescription);
            details.notes = notes.or(details.notes);

            let updated = access.update_visit(actor, visit, details).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&updated)?);
            } else {
                println!("Updated {} for patient {}", updated.id, updated.patient_id.0);
            }
        }

        Commands::Visits { patient } => {
            let actor = require_actor(cli.actor)?;
            let visits = match patient {
                Some(patient) => access.list_visits(actor, patient).await?,
                None => access.list_all_visits(actor).await?,
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&visits)?);
            } else {
                for v in &visits {
                    print_visit(v);
                }
                eprintln!("{} visit(s)", visits.len());
            }
        }

        Commands::Colleagues => {
            let actor = require_actor(cli.actor)?;
            let colleagues = access.shareable_identities(actor).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&colleagues)?);
            } else {
                for c in &colleagues {
                    println!("{:>5}  {:<16} {}", c.id.0, c.username, c.full_name);
                }
            }
        }
    }

    if let Some(ref spec) = cli.audit {
        write_audit(spec, &audit_rows)?;
    }

    Ok(())
}
