use chrono::{NaiveDate, Utc};
use clinic_access::{evaluate, AccessControl, RecordFacts};
use clinic_core::{IdentityId, NewIdentity, Ownership, PatientDetails, PatientId, Role};
use clinic_store::{AccessStore, MemoryStore};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const DOCTORS: i64 = 20;

/// Populates a store with `patients` records spread over `DOCTORS` owners,
/// every fifth one shared with the next doctor over.
async fn populate(patients: usize) -> (AccessControl, IdentityId, IdentityId) {
    let store = Arc::new(MemoryStore::new());
    let admin = store
        .create_identity(NewIdentity::new("admin", "Admin", Role::Admin))
        .await
        .unwrap();
    let mut doctors = Vec::new();
    for i in 0..DOCTORS {
        let d = store
            .create_identity(NewIdentity::new(format!("d{i}"), format!("Dr {i}"), Role::Standard))
            .await
            .unwrap();
        doctors.push(d.id);
    }

    let dob = NaiveDate::from_ymd_opt(1980, 1, 1).unwrap();
    for i in 0..patients {
        let owner = doctors[i % doctors.len()];
        let details = PatientDetails::new(format!("Patient {i}"), dob, "other", "555-0100");
        let p = store
            .create_patient(Some(owner), details, Utc::now())
            .await
            .unwrap();
        if i % 5 == 0 {
            let colleague = doctors[(i + 1) % doctors.len()];
            store
                .insert_grants(p.id, owner, &[colleague], None, Utc::now())
                .await
                .unwrap();
        }
    }

    (AccessControl::new(store), admin.id, doctors[1])
}

// ---------------------------------------------------------------------------
// Benchmark: pure rule table
// ---------------------------------------------------------------------------

fn bench_evaluate(c: &mut Criterion) {
    let facts = RecordFacts {
        actor: IdentityId(2),
        actor_role: Some(Role::Standard),
        ownership: Some(Ownership::Owned(IdentityId(1))),
        has_grant: true,
    };
    c.bench_function("evaluate", |b| b.iter(|| black_box(evaluate(black_box(&facts)))));
}

// ---------------------------------------------------------------------------
// Benchmark: point checks vs one filtered listing
// ---------------------------------------------------------------------------

fn bench_point_checks_vs_filter(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("visible_set");
    group.sample_size(20);
    for count in [500usize, 2_000, 5_000] {
        let (access, admin, doctor) = rt.block_on(populate(count));
        let ids: Vec<PatientId> = (1..=count as i64).map(PatientId).collect();

        group.bench_with_input(BenchmarkId::new("can_access_each", count), &ids, |b, ids| {
            b.to_async(&rt).iter(|| async {
                let mut visible = 0usize;
                for id in ids {
                    if access.can_access(doctor, *id).await.unwrap() {
                        visible += 1;
                    }
                }
                black_box(visible)
            });
        });

        group.bench_function(BenchmarkId::new("list_patients", count), |b| {
            b.to_async(&rt)
                .iter(|| async { black_box(access.list_patients(doctor).await.unwrap().len()) });
        });

        group.bench_function(BenchmarkId::new("list_patients_admin", count), |b| {
            b.to_async(&rt)
                .iter(|| async { black_box(access.list_patients(admin).await.unwrap().len()) });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_evaluate, bench_point_checks_vs_filter);
criterion_main!(benches);
