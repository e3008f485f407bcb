//! Upgrade code reconciliation.
//!
//! A title's upgrade code only ever moves from empty to a single value.

/// What to do with a title's stored upgrade code given an incoming one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeCodePlan {
    /// Incoming code is empty or already stored.
    NoOp,
    /// Stored code is empty or `NULL`; fill it in.
    Backfill { was_null: bool },
    /// Stored code is set to a different value. Never overwrite it.
    Conflict,
}

/// Decide how to reconcile `stored` with `incoming`.
pub fn plan(stored: Option<&str>, incoming: Option<&str>) -> UpgradeCodePlan {
    let Some(incoming) = incoming.map(str::trim).filter(|code| !code.is_empty()) else {
        return UpgradeCodePlan::NoOp;
    };
    match stored.map(str::trim) {
        None => UpgradeCodePlan::Backfill { was_null: true },
        Some("") => UpgradeCodePlan::Backfill { was_null: false },
        Some(code) if code == incoming => UpgradeCodePlan::NoOp,
        Some(_) => UpgradeCodePlan::Conflict,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_incoming_is_noop() {
        assert_eq!(plan(Some("{A}"), None), UpgradeCodePlan::NoOp);
        assert_eq!(plan(Some("{A}"), Some("  ")), UpgradeCodePlan::NoOp);
        assert_eq!(plan(None, Some("")), UpgradeCodePlan::NoOp);
    }

    #[test]
    fn test_backfill_distinguishes_null_from_empty() {
        assert_eq!(
            plan(None, Some("{A}")),
            UpgradeCodePlan::Backfill { was_null: true }
        );
        assert_eq!(
            plan(Some(""), Some("{A}")),
            UpgradeCodePlan::Backfill { was_null: false }
        );
    }

    #[test]
    fn test_same_code_is_noop_and_different_code_conflicts() {
        assert_eq!(plan(Some("{A}"), Some(" {A} ")), UpgradeCodePlan::NoOp);
        assert_eq!(plan(Some("{A}"), Some("{B}")), UpgradeCodePlan::Conflict);
    }
}
