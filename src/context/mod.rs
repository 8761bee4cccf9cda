//! 4.F — context assembler: collects, orders, dedups, and budgets contextual
//! material for a target task into a renderable bundle.

pub mod budget;

use serde::{Deserialize, Serialize};

use crate::repository::models::ContextSectionRow;

/// Priority order is the declaration order of these variants (ascending
/// discriminant = higher priority), per SPEC_FULL.md §4.F.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    PinnedRootBrief,
    PinnedParentChain,
    Index,
    DepRequires,
    DepRefers,
    Ancestor,
    Retrieved,
    HSibling,
    Sibling,
    Manual,
}

impl SectionKind {
    pub fn is_pinned(&self) -> bool {
        matches!(self, SectionKind::PinnedRootBrief | SectionKind::PinnedParentChain)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SectionKind::PinnedRootBrief => "pinned:root_brief",
            SectionKind::PinnedParentChain => "pinned:parent_chain",
            SectionKind::Index => "index",
            SectionKind::DepRequires => "dep:requires",
            SectionKind::DepRefers => "dep:refers",
            SectionKind::Ancestor => "ancestor",
            SectionKind::Retrieved => "retrieved",
            SectionKind::HSibling => "h_sibling",
            SectionKind::Sibling => "sibling",
            SectionKind::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub task_id: i64,
    pub name: String,
    pub short_name: String,
    pub kind: SectionKind,
    pub content: String,
    pub pinned: bool,
    pub retrieval_score: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bundle {
    pub task_id: i64,
    pub sections: Vec<Section>,
    pub combined: String,
    pub budget_info: Option<budget::BudgetInfo>,
}

pub struct AssembleOptions {
    pub max_chars: Option<usize>,
    pub per_section_max: Option<usize>,
    pub strategy: budget::SummarizeStrategy,
}

impl Default for AssembleOptions {
    fn default() -> Self {
        Self {
            max_chars: None,
            per_section_max: None,
            strategy: budget::SummarizeStrategy::Truncate,
        }
    }
}

/// Assembles candidate sections for `task_id` into a stable-ordered,
/// deduplicated bundle, applying the budget only when requested.
pub fn assemble(task_id: i64, candidates: Vec<Section>, opts: &AssembleOptions) -> Bundle {
    let mut seen = std::collections::HashSet::new();
    let mut deduped: Vec<Section> = Vec::new();

    // Candidates must already arrive in priority order; the first occurrence
    // of a task id under the higher-priority kind wins.
    for section in candidates {
        if seen.insert(section.task_id) {
            deduped.push(section);
        }
    }

    deduped.sort_by_key(|s| (s.kind, s.task_id));

    let budget_info = if opts.max_chars.is_some() || opts.per_section_max.is_some() {
        let info = budget::apply_budget(&mut deduped, opts.max_chars, opts.per_section_max, opts.strategy);
        Some(info)
    } else {
        None
    };

    let combined = deduped
        .iter()
        .map(|s| format!("## {}\n\n{}", s.short_name, s.content))
        .collect::<Vec<_>>()
        .join("\n\n");

    Bundle {
        task_id,
        sections: deduped,
        combined,
        budget_info,
    }
}

pub fn section_from_row(row: ContextSectionRow, kind: SectionKind) -> Section {
    Section {
        task_id: row.task_id,
        name: row.name,
        short_name: row.short_name,
        kind,
        content: row.content,
        pinned: kind.is_pinned(),
        retrieval_score: row.retrieval_score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(task_id: i64, kind: SectionKind, content: &str) -> Section {
        Section {
            task_id,
            name: format!("task-{task_id}"),
            short_name: format!("T{task_id}"),
            kind,
            content: content.into(),
            pinned: kind.is_pinned(),
            retrieval_score: None,
        }
    }

    #[test]
    fn dedup_keeps_first_occurrence_under_higher_priority_kind() {
        let candidates = vec![
            section(1, SectionKind::DepRequires, "requires content"),
            section(1, SectionKind::Sibling, "sibling content"),
        ];
        let bundle = assemble(99, candidates, &AssembleOptions::default());
        assert_eq!(bundle.sections.len(), 1);
        assert_eq!(bundle.sections[0].kind, SectionKind::DepRequires);
    }

    #[test]
    fn ordering_follows_priority_then_task_id() {
        let candidates = vec![
            section(3, SectionKind::Sibling, "c"),
            section(1, SectionKind::DepRequires, "a"),
            section(2, SectionKind::DepRefers, "b"),
        ];
        let bundle = assemble(99, candidates, &AssembleOptions::default());
        let kinds: Vec<_> = bundle.sections.iter().map(|s| s.kind).collect();
        assert_eq!(kinds, vec![SectionKind::DepRequires, SectionKind::DepRefers, SectionKind::Sibling]);
    }

    #[test]
    fn combined_joins_sections_with_headers() {
        let candidates = vec![section(1, SectionKind::Index, "hello")];
        let bundle = assemble(99, candidates, &AssembleOptions::default());
        assert_eq!(bundle.combined, "## T1\n\nhello");
    }
}
