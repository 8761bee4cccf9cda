//! Budget application for a context bundle (SPEC_FULL.md §4.F), grounded in
//! the reference `context_budget.py` summarizer.

use serde::{Deserialize, Serialize};

use super::Section;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummarizeStrategy {
    Truncate,
    Sentence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TruncatedReason {
    None,
    PerSection,
    Total,
    Both,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionBudget {
    pub original_len: usize,
    pub new_len: usize,
    pub truncated: bool,
    pub strategy: SummarizeStrategy,
    pub allowed: usize,
    pub allowed_by_per_section: bool,
    pub allowed_by_total: bool,
    pub truncated_reason: TruncatedReason,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetInfo {
    pub total_original_chars: usize,
    pub total_new_chars: usize,
    pub max_chars: Option<usize>,
    pub per_section_max: Option<usize>,
    pub strategy: SummarizeStrategy,
    pub sections: Vec<SectionBudget>,
}

const SENTENCE_BOUNDARIES: &[char] = &['.', '!', '?', '。', '！', '？', '\n'];

/// Summarizes `content` to at most `cap` characters, per `strategy`.
fn summarize(content: &str, cap: usize, strategy: SummarizeStrategy) -> String {
    let chars: Vec<char> = content.chars().collect();
    if chars.len() <= cap {
        return content.to_string();
    }

    match strategy {
        SummarizeStrategy::Truncate => chars[..cap].iter().collect(),
        SummarizeStrategy::Sentence => {
            let window = &chars[..cap];
            let last_boundary = window
                .iter()
                .enumerate()
                .filter(|(_, c)| SENTENCE_BOUNDARIES.contains(c))
                .map(|(i, _)| i)
                .last();
            match last_boundary {
                Some(idx) => chars[..=idx].iter().collect(),
                None => chars[..cap].iter().collect(),
            }
        }
    }
}

/// Mutates `sections` in place (trimming non-pinned content) and returns the
/// bundle-level budget report.
pub fn apply_budget(
    sections: &mut [Section],
    max_chars: Option<usize>,
    per_section_max: Option<usize>,
    strategy: SummarizeStrategy,
) -> BudgetInfo {
    let per_section_cap = per_section_max.unwrap_or(usize::MAX);
    let mut remaining_total = max_chars.unwrap_or(usize::MAX);

    let mut total_original = 0usize;
    let mut total_new = 0usize;
    let mut reports = Vec::with_capacity(sections.len());

    for section in sections.iter_mut() {
        let original_len = section.content.chars().count();
        total_original += original_len;

        if section.pinned {
            total_new += original_len;
            reports.push(SectionBudget {
                original_len,
                new_len: original_len,
                truncated: false,
                strategy,
                allowed: original_len,
                allowed_by_per_section: false,
                allowed_by_total: false,
                truncated_reason: TruncatedReason::None,
            });
            continue;
        }

        let allowed = per_section_cap.min(remaining_total);
        let allowed_by_per_section = per_section_cap <= remaining_total;
        let allowed_by_total = remaining_total <= per_section_cap;

        if original_len <= allowed {
            total_new += original_len;
            remaining_total = remaining_total.saturating_sub(original_len);
            reports.push(SectionBudget {
                original_len,
                new_len: original_len,
                truncated: false,
                strategy,
                allowed,
                allowed_by_per_section,
                allowed_by_total,
                truncated_reason: TruncatedReason::None,
            });
            continue;
        }

        let new_content = summarize(&section.content, allowed, strategy);
        let new_len = new_content.chars().count();
        section.content = new_content;

        let truncated_reason = if allowed_by_per_section && allowed_by_total {
            TruncatedReason::Both
        } else if allowed_by_per_section {
            TruncatedReason::PerSection
        } else {
            TruncatedReason::Total
        };

        total_new += new_len;
        remaining_total = remaining_total.saturating_sub(new_len);

        reports.push(SectionBudget {
            original_len,
            new_len,
            truncated: true,
            strategy,
            allowed,
            allowed_by_per_section,
            allowed_by_total,
            truncated_reason,
        });
    }

    BudgetInfo {
        total_original_chars: total_original,
        total_new_chars: total_new,
        max_chars,
        per_section_max,
        strategy,
        sections: reports,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SectionKind;

    fn section(kind: SectionKind, content: &str) -> Section {
        Section {
            task_id: 1,
            name: "t".into(),
            short_name: "t".into(),
            kind,
            content: content.into(),
            pinned: kind.is_pinned(),
            retrieval_score: None,
        }
    }

    #[test]
    fn pinned_sections_are_never_trimmed() {
        let mut sections = vec![section(SectionKind::PinnedRootBrief, &"x".repeat(5000))];
        let info = apply_budget(&mut sections, Some(100), Some(50), SummarizeStrategy::Truncate);
        assert_eq!(sections[0].content.chars().count(), 5000);
        assert_eq!(info.total_original_chars, 5000);
    }

    #[test]
    fn two_sections_split_budget_per_section_then_total() {
        let mut sections = vec![
            section(SectionKind::DepRefers, &"a".repeat(1000)),
            section(SectionKind::Sibling, &"b".repeat(1000)),
        ];
        let info = apply_budget(&mut sections, Some(1500), Some(800), SummarizeStrategy::Truncate);
        assert_eq!(sections[0].content.chars().count(), 800);
        assert_eq!(info.sections[0].truncated_reason, TruncatedReason::PerSection);
        assert_eq!(sections[1].content.chars().count(), 700);
        assert_eq!(info.sections[1].truncated_reason, TruncatedReason::Total);
    }

    #[test]
    fn content_that_fits_is_not_truncated() {
        let mut sections = vec![section(SectionKind::Sibling, "short")];
        let info = apply_budget(&mut sections, Some(1000), Some(500), SummarizeStrategy::Truncate);
        assert!(!info.sections[0].truncated);
        assert_eq!(info.sections[0].truncated_reason, TruncatedReason::None);
    }

    #[test]
    fn sentence_strategy_cuts_at_boundary() {
        let mut sections = vec![section(SectionKind::Sibling, "First sentence. Second sentence. Third.")];
        let info = apply_budget(&mut sections, Some(25), None, SummarizeStrategy::Sentence);
        assert!(sections[0].content.ends_with('.'));
        assert!(info.sections[0].truncated);
    }
}
