//! Accessor report.
//!
//! Turns an [`Accessors`] listing into a fixed-width panel naming the owner
//! and every colleague the patient is shared with.

use chrono::NaiveDate;
use clinic_core::{Accessors, PatientId};

/// Display-ready view of a patient's accessors.
#[derive(Debug)]
pub struct AccessorReport {
    pub patient_id: PatientId,
    pub owner: String,
    pub rows: Vec<AccessorRow>,
}

/// One shared-access line.
#[derive(Debug)]
pub struct AccessorRow {
    pub grantee: String,
    pub granted_on: NaiveDate,
    pub granted_by: String,
    pub comment: Option<String>,
}

impl AccessorReport {
    pub fn build(accessors: &Accessors) -> Self {
        let owner = match (&accessors.owner, accessors.owner_id) {
            (Some(identity), _) => format!("{} ({})", identity.full_name, identity.username),
            (None, Some(id)) => format!("Unknown ({id})"),
            (None, None) => "Unowned (legacy record)".to_string(),
        };

        let rows = accessors
            .shared_with
            .iter()
            .map(|s| AccessorRow {
                grantee: match (&s.grantee_name, &s.grantee_username) {
                    (Some(name), Some(username)) => format!("{name} ({username})"),
                    (Some(name), None) => name.clone(),
                    _ => format!("Unknown ({})", s.grant.grantee),
                },
                granted_on: s.grant.granted_at.date_naive(),
                granted_by: s
                    .granter_name
                    .clone()
                    .unwrap_or_else(|| format!("Unknown ({})", s.grant.granter)),
                comment: s.grant.comment.clone(),
            })
            .collect();

        AccessorReport {
            patient_id: accessors.patient_id,
            owner,
            rows,
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();

        out.push_str(&border('╔', '╗'));
        push_line(&mut out, &format!("ACCESS — {}", self.patient_id));
        out.push_str(&border('╠', '╣'));
        push_line(&mut out, &format!("Owner: {}", self.owner));
        out.push_str(&border('╠', '╣'));

        if self.rows.is_empty() {
            push_line(&mut out, "This patient has not been shared with anyone.");
        } else {
            for (i, row) in self.rows.iter().enumerate() {
                push_line(&mut out, &format!("{}. {}", i + 1, row.grantee));
                push_line(
                    &mut out,
                    &format!("   Granted {} by {}", row.granted_on, row.granted_by),
                );
                if let Some(comment) = &row.comment {
                    push_line(&mut out, &format!("   \"{comment}\""));
                }
            }
        }

        out.push_str(&border('╚', '╝'));
        out
    }
}

/// Inner width of the panel, between the vertical borders.
const PANEL_WIDTH: usize = 62;

fn border(left: char, right: char) -> String {
    format!("{left}{}{right}\n", "═".repeat(PANEL_WIDTH))
}

/// Writes one bordered line, truncating with `…` when `text` does not fit.
fn push_line(out: &mut String, text: &str) {
    let room = PANEL_WIDTH - 3;
    let mut body: String = text.chars().take(room).collect();
    if text.chars().count() > room {
        body.pop();
        body.push('…');
    }
    let pad = room - body.chars().count();
    out.push_str(&format!("║  {body}{} ║\n", " ".repeat(pad)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use clinic_core::{AccessGrant, GrantId, Identity, IdentityId, Role, SharedAccess};

    fn accessors(owner: Option<Identity>, owner_id: Option<IdentityId>) -> Accessors {
        Accessors {
            patient_id: PatientId(3),
            owner_id,
            owner,
            shared_with: vec![SharedAccess {
                grant: AccessGrant {
                    id: GrantId(1),
                    patient_id: PatientId(3),
                    grantee: IdentityId(2),
                    granter: IdentityId(1),
                    comment: Some("second opinion".into()),
                    granted_at: Utc.with_ymd_and_hms(2026, 10, 1, 9, 30, 0).unwrap(),
                },
                grantee_username: Some("d2".into()),
                grantee_name: Some("Dr Two".into()),
                granter_name: None,
            }],
        }
    }

    #[test]
    fn render_lists_owner_and_grants() {
        let owner = Identity {
            id: IdentityId(1),
            username: "d1".into(),
            full_name: "Dr One".into(),
            role: Role::Standard,
            is_active: true,
        };
        let report = AccessorReport::build(&accessors(Some(owner), Some(IdentityId(1))));
        let text = report.render();
        assert!(text.contains("Owner: Dr One (d1)"));
        assert!(text.contains("1. Dr Two (d2)"));
        assert!(text.contains("Granted 2026-10-01 by Unknown (identity 1)"));
        assert!(text.contains("\"second opinion\""));
    }

    #[test]
    fn every_line_closes_the_box() {
        let owner = Identity {
            id: IdentityId(1),
            username: "d1".into(),
            full_name: "Dr Bartholomew Alexander Montgomery-Fitzwilliam the Third".into(),
            role: Role::Standard,
            is_active: true,
        };
        let text = AccessorReport::build(&accessors(Some(owner), Some(IdentityId(1)))).render();
        let widths: Vec<usize> = text.lines().map(|l| l.chars().count()).collect();
        assert!(widths.iter().all(|w| *w == PANEL_WIDTH + 2), "{widths:?}");
        assert!(text
            .lines()
            .skip(1)
            .all(|l| l.ends_with('║') || l.ends_with('╣') || l.ends_with('╝')));
        assert!(text.contains("Owner: Dr Bartholomew"));
        assert!(text.contains('…'));
    }

    #[test]
    fn legacy_owner_label() {
        let report = AccessorReport::build(&accessors(None, None));
        assert_eq!(report.owner, "Unowned (legacy record)");
        assert_eq!(report.rows.len(), 1);
    }
}
