//! Pagination, ordering and team scoping for list queries.

use serde::{Deserialize, Serialize};

/// Default page size.
pub const DEFAULT_PER_PAGE: u32 = 20;

/// Largest page size a caller may request.
pub const MAX_PER_PAGE: u32 = 1000;

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

impl OrderDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Page and order selection for list queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListOptions {
    /// Zero-based page number.
    pub page: u32,
    pub per_page: u32,
    /// Column to order by. Each listing accepts a fixed set of keys.
    pub order_key: Option<String>,
    pub order_direction: Option<OrderDirection>,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            page: 0,
            per_page: DEFAULT_PER_PAGE,
            order_key: None,
            order_direction: None,
        }
    }
}

impl ListOptions {
    /// Order by `key` in `direction`.
    pub fn ordered_by(mut self, key: impl Into<String>, direction: OrderDirection) -> Self {
        self.order_key = Some(key.into());
        self.order_direction = Some(direction);
        self
    }

    /// Effective page size, clamped to `1..=MAX_PER_PAGE`.
    pub fn limit(&self) -> u32 {
        self.per_page.clamp(1, MAX_PER_PAGE)
    }

    /// Row offset of the first item on the requested page.
    pub fn offset(&self) -> u64 {
        u64::from(self.page) * u64::from(self.limit())
    }

    /// Resolve the requested order against the keys a listing supports.
    ///
    /// Returns the static key so it can be spliced into SQL safely. When no
    /// key is requested the listing's default applies; when a key is given
    /// without a direction, ascending is used.
    pub fn resolve_order(
        &self,
        allowed: &[&'static str],
        default: (&'static str, OrderDirection),
    ) -> crate::Result<(&'static str, OrderDirection)> {
        let Some(requested) = self.order_key.as_deref() else {
            return Ok((default.0, self.order_direction.unwrap_or(default.1)));
        };
        let key = allowed
            .iter()
            .find(|k| k.eq_ignore_ascii_case(requested))
            .ok_or_else(|| {
                crate::Error::InvalidListOptions(format!(
                    "unsupported order_key '{requested}' (expected one of: {})",
                    allowed.join(", ")
                ))
            })?;
        Ok((*key, self.order_direction.unwrap_or_default()))
    }
}

/// Pagination metadata returned with list results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationMetadata {
    pub has_next_results: bool,
    pub has_previous_results: bool,
}

impl PaginationMetadata {
    /// Trim a result set fetched with `limit + 1` rows and derive metadata.
    pub fn from_overfetch<T>(rows: &mut Vec<T>, opts: &ListOptions) -> Self {
        let limit = opts.limit() as usize;
        let has_next_results = rows.len() > limit;
        rows.truncate(limit);
        Self {
            has_next_results,
            has_previous_results: opts.page > 0,
        }
    }
}

/// Which aggregate rows a count query reads.
///
/// Aggregates are stored under `(team_id, global_stats)`: the global row is
/// `(0, true)`, hosts without a team are `(0, false)` and team `g` is
/// `(g, false)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountScope {
    #[default]
    Global,
    NoTeam,
    Team(i64),
}

impl CountScope {
    pub fn team_id(&self) -> i64 {
        match self {
            Self::Global | Self::NoTeam => 0,
            Self::Team(id) => *id,
        }
    }

    pub fn global_stats(&self) -> bool {
        matches!(self, Self::Global)
    }

    /// Map an optional team filter: `None` is global, `Some(0)` is hosts
    /// without a team.
    pub fn from_team_filter(team_id: Option<i64>) -> Self {
        match team_id {
            None => Self::Global,
            Some(0) => Self::NoTeam,
            Some(id) => Self::Team(id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_and_offset() {
        let opts = ListOptions {
            page: 2,
            per_page: 10,
            ..Default::default()
        };
        assert_eq!(opts.limit(), 10);
        assert_eq!(opts.offset(), 20);

        let zero = ListOptions {
            per_page: 0,
            ..Default::default()
        };
        assert_eq!(zero.limit(), 1);
    }

    #[test]
    fn test_resolve_order_default_and_allowed() {
        let allowed = ["name", "hosts_count"];
        let default = ("hosts_count", OrderDirection::Desc);

        let opts = ListOptions::default();
        assert_eq!(
            opts.resolve_order(&allowed, default).unwrap(),
            ("hosts_count", OrderDirection::Desc)
        );

        let opts = ListOptions::default().ordered_by("NAME", OrderDirection::Asc);
        assert_eq!(
            opts.resolve_order(&allowed, default).unwrap(),
            ("name", OrderDirection::Asc)
        );
    }

    #[test]
    fn test_resolve_order_rejects_unknown_key() {
        let opts = ListOptions::default().ordered_by("name; DROP TABLE hosts", OrderDirection::Asc);
        let err = opts
            .resolve_order(&["name"], ("name", OrderDirection::Asc))
            .unwrap_err();
        assert!(err.to_string().contains("unsupported order_key"));
    }

    #[test]
    fn test_pagination_from_overfetch() {
        let opts = ListOptions {
            page: 1,
            per_page: 2,
            ..Default::default()
        };
        let mut rows = vec![1, 2, 3];
        let meta = PaginationMetadata::from_overfetch(&mut rows, &opts);
        assert_eq!(rows, vec![1, 2]);
        assert!(meta.has_next_results);
        assert!(meta.has_previous_results);
    }

    #[test]
    fn test_count_scope_keys() {
        assert_eq!(CountScope::from_team_filter(None), CountScope::Global);
        assert_eq!(CountScope::from_team_filter(Some(0)), CountScope::NoTeam);
        assert_eq!(CountScope::from_team_filter(Some(7)), CountScope::Team(7));
        assert!(CountScope::Global.global_stats());
        assert!(!CountScope::NoTeam.global_stats());
        assert_eq!(CountScope::Team(7).team_id(), 7);
    }
}
