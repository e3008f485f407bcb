//! Title matching decision table.

use super::upgrade_code::{self, UpgradeCodePlan};
use crate::models::TitleRow;
use uuid::Uuid;

/// What to do with an incoming fact that had no checksum hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TitleDecision {
    /// No title matches the name; create one.
    Create,
    /// Link to this title unchanged.
    Link { title_id: Uuid },
    /// Fill this title's empty upgrade code, then link to it.
    Backfill { title_id: Uuid, was_null: bool },
    /// The name-matched title owns a different upgrade code. Link to the
    /// title owning the fact's code, or create one.
    Redirect { name_match: Uuid },
}

/// Pick the name-matched title to reconcile against.
///
/// Preference: the candidate carrying the fact's upgrade code, then one
/// without an upgrade code, then the oldest.
pub fn choose_candidate<'a>(
    candidates: &'a [TitleRow],
    fact_code: Option<&str>,
) -> Option<&'a TitleRow> {
    if let Some(code) = fact_code
        && let Some(exact) = oldest(candidates.iter().filter(|t| t.upgrade_code() == Some(code)))
    {
        return Some(exact);
    }
    if let Some(empty) = oldest(candidates.iter().filter(|t| t.upgrade_code().is_none())) {
        return Some(empty);
    }
    oldest(candidates.iter())
}

fn oldest<'a>(rows: impl Iterator<Item = &'a TitleRow>) -> Option<&'a TitleRow> {
    rows.min_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.title_id.cmp(&b.title_id))
    })
}

/// Decide how a fact maps onto its name-matched candidates.
pub fn decide(candidates: &[TitleRow], fact_code: Option<&str>) -> TitleDecision {
    let Some(candidate) = choose_candidate(candidates, fact_code) else {
        return TitleDecision::Create;
    };
    match upgrade_code::plan(candidate.upgrade_code.as_deref(), fact_code) {
        UpgradeCodePlan::NoOp => TitleDecision::Link {
            title_id: candidate.title_id,
        },
        UpgradeCodePlan::Backfill { was_null } => TitleDecision::Backfill {
            title_id: candidate.title_id,
            was_null,
        },
        UpgradeCodePlan::Conflict => TitleDecision::Redirect {
            name_match: candidate.title_id,
        },
    }
}
