//! Tier-grouped display of a session
//!
//! Rows are filtered (group, search text), ordered by group then row order,
//! paginated, and returned grouped. Failed rows sit in the low group and are
//! flagged for attention along with successes below the confidence threshold.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{BatchSession, BatchState, BatchStatistics, ConfidenceTier, RowStatus, SessionRow};

/// Display group of a row slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewGroup {
    High,
    Medium,
    Low,
    Excluded,
    Pending,
}

impl ViewGroup {
    pub const ALL: [ViewGroup; 5] = [
        ViewGroup::High,
        ViewGroup::Medium,
        ViewGroup::Low,
        ViewGroup::Excluded,
        ViewGroup::Pending,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ViewGroup::High => "high",
            ViewGroup::Medium => "medium",
            ViewGroup::Low => "low",
            ViewGroup::Excluded => "excluded",
            ViewGroup::Pending => "pending",
        }
    }

    pub fn of(row: &SessionRow) -> ViewGroup {
        match row.status {
            RowStatus::Excluded => ViewGroup::Excluded,
            RowStatus::Pending => ViewGroup::Pending,
            RowStatus::Failed => ViewGroup::Low,
            RowStatus::Success => match row.tier() {
                Some(ConfidenceTier::High) => ViewGroup::High,
                Some(ConfidenceTier::Medium) => ViewGroup::Medium,
                _ => ViewGroup::Low,
            },
        }
    }
}

impl std::str::FromStr for ViewGroup {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ViewGroup::ALL
            .into_iter()
            .find(|g| g.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown tier '{}' (expected high, medium, low, excluded or pending)", s))
    }
}

/// Query parameters for `GET /sessions/:id/view`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ViewQuery {
    pub tier: Option<String>,
    pub search: Option<String>,
    /// 1-based
    pub page: Option<usize>,
    pub per_page: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ViewRow {
    #[serde(flatten)]
    pub row: SessionRow,
    pub group: ViewGroup,
    pub needs_attention: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupView {
    pub group: ViewGroup,
    /// Matching rows in this group across all pages
    pub total: usize,
    /// Matching rows in this group on the current page
    pub rows: Vec<ViewRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub session_id: Uuid,
    pub filename: String,
    pub state: BatchState,
    pub statistics: BatchStatistics,
    pub confidence_threshold: f64,
    pub groups: Vec<GroupView>,
    pub needs_attention: usize,
    pub total_matching: usize,
    pub page: usize,
    pub per_page: usize,
    pub total_pages: usize,
}

impl SessionView {
    /// Build the view; an unknown tier filter is an error for the caller to report
    pub fn build(
        session: &BatchSession,
        query: &ViewQuery,
        confidence_threshold: f64,
        default_per_page: usize,
    ) -> Result<SessionView, String> {
        let tier = query
            .tier
            .as_deref()
            .filter(|t| !t.trim().is_empty() && !t.eq_ignore_ascii_case("all"))
            .map(str::parse::<ViewGroup>)
            .transpose()?;
        let needle = query
            .search
            .as_deref()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());

        let mut matching: Vec<ViewRow> = session
            .rows
            .iter()
            .filter(|row| tier.map_or(true, |t| ViewGroup::of(row) == t))
            .filter(|row| needle.as_deref().map_or(true, |n| matches_search(row, n)))
            .map(|row| ViewRow {
                row: row.clone(),
                group: ViewGroup::of(row),
                needs_attention: needs_attention(row, confidence_threshold),
            })
            .collect();
        matching.sort_by_key(|r| (r.group, r.row.row_index));

        let per_page = query.per_page.unwrap_or(default_per_page).max(1);
        let total_matching = matching.len();
        let total_pages = total_matching.div_ceil(per_page).max(1);
        let page = query.page.unwrap_or(1).clamp(1, total_pages);
        let needs_attention_count = matching.iter().filter(|r| r.needs_attention).count();

        let mut groups: Vec<GroupView> = ViewGroup::ALL
            .into_iter()
            .filter(|g| tier.map_or(true, |t| t == *g))
            .map(|group| GroupView {
                group,
                total: matching.iter().filter(|r| r.group == group).count(),
                rows: Vec::new(),
            })
            .collect();

        for row in matching.into_iter().skip((page - 1) * per_page).take(per_page) {
            if let Some(g) = groups.iter_mut().find(|g| g.group == row.group) {
                g.rows.push(row);
            }
        }

        Ok(SessionView {
            session_id: session.session_id,
            filename: session.filename.clone(),
            state: session.state,
            statistics: session.statistics.clone(),
            confidence_threshold,
            groups,
            needs_attention: needs_attention_count,
            total_matching,
            page,
            per_page,
            total_pages,
        })
    }
}

/// Failed rows, and successes below the threshold
pub fn needs_attention(row: &SessionRow, threshold: f64) -> bool {
    match row.status {
        RowStatus::Failed => true,
        RowStatus::Success => row.confidence().is_some_and(|c| c < threshold),
        RowStatus::Pending | RowStatus::Excluded => false,
    }
}

/// Case-insensitive match over description, code and rationale
fn matches_search(row: &SessionRow, needle: &str) -> bool {
    if row.item.description.to_lowercase().contains(needle) {
        return true;
    }
    row.result.as_ref().is_some_and(|r| {
        r.suggested_code.to_lowercase().contains(needle) || r.rationale.to_lowercase().contains(needle)
    })
}
