use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::warn;

pub mod store;

pub use store::{RubricStore, RubricSummary};

const FALLBACK_CRITERIA_COUNT: usize = 5;
const FALLBACK_MAX_SCORE: f64 = 10.0;

/// `Name (0-10):` criterion lines, optionally numbered.
static RANGE_CRITERION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:\d+\.\s*)?(.+?)\s*\((\d+)\s*-\s*(\d+)\)\s*:?\s*$")
        .expect("range criterion pattern")
});

/// Legacy `Name (10 marks):` lines still found in saved rubrics.
static MARKS_CRITERION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:\d+\.\s*)?(.+?)\s*\((\d+)\s+marks?\)\s*:?\s*$")
        .expect("marks criterion pattern")
});

pub const DEFAULT_RUBRIC_NAME: &str = "Default Standard Rubric";

pub const DEFAULT_RUBRIC_TEXT: &str = "\
Standard Academic Essay Evaluation Rubric:

1. Thesis & Argument (0-10):
   - Clear, specific thesis statement
   - Well-developed argument with logical progression
   - Strong supporting evidence

2. Organization & Structure (0-10):
   - Effective introduction and conclusion
   - Clear paragraph structure with topic sentences
   - Smooth transitions between ideas

3. Evidence & Analysis (0-10):
   - Relevant, specific evidence supporting claims
   - Thoughtful analysis of evidence
   - Consideration of counterarguments

4. Writing Style & Clarity (0-10):
   - Clear, concise prose
   - Appropriate academic tone
   - Varied sentence structure

5. Grammar & Mechanics (0-10):
   - Correct grammar, spelling, and punctuation
   - Proper citation format
   - Appropriate word choice
";

/// One named criterion with its maximum score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CriterionSpec {
    pub name: String,
    pub max_score: f64,
}

/// A scoring rubric: free-text guidance plus the criterion table parsed out
/// of it. When nothing parses, a generic criterion set stands in so an
/// evaluation is never blocked on rubric formatting.
#[derive(Debug, Clone)]
pub struct Rubric {
    pub title: Option<String>,
    pub text: String,
    pub criteria: Vec<CriterionSpec>,
}

impl Rubric {
    pub fn from_text(title: Option<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        let criteria = parse_criteria(&text).unwrap_or_else(|| {
            warn!("no criteria parsed from rubric text, substituting a generic criterion set");
            fallback_criteria()
        });
        Self {
            title,
            text,
            criteria,
        }
    }

    pub fn default_rubric() -> Self {
        Self::from_text(Some(DEFAULT_RUBRIC_NAME.to_string()), DEFAULT_RUBRIC_TEXT)
    }

    pub fn total_possible(&self) -> f64 {
        self.criteria.iter().map(|criterion| criterion.max_score).sum()
    }

    /// Maximum score for a criterion reported by the model, matched by name
    /// case-insensitively with a substring fallback for slight rewordings.
    pub fn max_for(&self, name: &str) -> Option<f64> {
        let wanted = name.trim().to_lowercase();
        if wanted.is_empty() {
            return None;
        }

        if let Some(criterion) = self
            .criteria
            .iter()
            .find(|criterion| criterion.name.to_lowercase() == wanted)
        {
            return Some(criterion.max_score);
        }

        self.criteria
            .iter()
            .find(|criterion| {
                let known = criterion.name.to_lowercase();
                known.contains(&wanted) || wanted.contains(&known)
            })
            .map(|criterion| criterion.max_score)
    }
}

/// Parses criterion definition lines. Returns `None` when not a single line
/// matches, so the caller can substitute the generic fallback.
fn parse_criteria(text: &str) -> Option<Vec<CriterionSpec>> {
    let mut criteria = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let parsed = if let Some(captures) = RANGE_CRITERION.captures(line) {
            let name = captures[1].trim().to_string();
            let max: f64 = captures[3].parse().ok()?;
            Some((name, max))
        } else if let Some(captures) = MARKS_CRITERION.captures(line) {
            let name = captures[1].trim().to_string();
            let max: f64 = captures[2].parse().ok()?;
            Some((name, max))
        } else {
            None
        };

        if let Some((name, max)) = parsed {
            if name.is_empty() || max <= 0.0 {
                warn!(line, "skipping criterion line with empty name or non-positive maximum");
                continue;
            }
            criteria.push(CriterionSpec {
                name,
                max_score: max,
            });
        }
    }

    if criteria.is_empty() {
        None
    } else {
        Some(criteria)
    }
}

fn fallback_criteria() -> Vec<CriterionSpec> {
    (1..=FALLBACK_CRITERIA_COUNT)
        .map(|i| CriterionSpec {
            name: format!("Criterion {i}"),
            max_score: FALLBACK_MAX_SCORE,
        })
        .collect()
}

/// True when a line declares a criterion with a score range, which rules it
/// out as a rubric title.
pub(crate) fn is_criterion_line(line: &str) -> bool {
    RANGE_CRITERION.is_match(line) || MARKS_CRITERION.is_match(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rubric_parses_five_criteria() {
        let rubric = Rubric::default_rubric();
        assert_eq!(rubric.criteria.len(), 5);
        assert_eq!(rubric.criteria[0].name, "Thesis & Argument");
        assert_eq!(rubric.criteria[4].name, "Grammar & Mechanics");
        assert!((rubric.total_possible() - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn total_is_the_sum_of_criterion_maxima() {
        let rubric = Rubric::from_text(None, "Depth (0-20):\nStyle (0-5):\n");
        let sum: f64 = rubric.criteria.iter().map(|c| c.max_score).sum();
        assert!((rubric.total_possible() - sum).abs() < f64::EPSILON);
        assert!((rubric.total_possible() - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn marks_style_lines_are_accepted() {
        let rubric = Rubric::from_text(None, "1. Argument (15 marks):\n2. Clarity (5 marks)\n");
        assert_eq!(rubric.criteria.len(), 2);
        assert!((rubric.criteria[0].max_score - 15.0).abs() < f64::EPSILON);
        assert!((rubric.criteria[1].max_score - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unparsable_rubric_falls_back_to_generic_criteria() {
        let rubric = Rubric::from_text(None, "Grade holistically, rewarding bold ideas.");
        assert_eq!(rubric.criteria.len(), 5);
        assert_eq!(rubric.criteria[0].name, "Criterion 1");
        assert!((rubric.total_possible() - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_maximum_criteria_are_dropped() {
        let rubric = Rubric::from_text(None, "Effort (0-0):\nContent (0-10):\n");
        assert_eq!(rubric.criteria.len(), 1);
        assert_eq!(rubric.criteria[0].name, "Content");
    }

    #[test]
    fn max_for_matches_exactly_then_by_substring() {
        let rubric = Rubric::default_rubric();
        assert_eq!(rubric.max_for("thesis & argument"), Some(10.0));
        assert_eq!(rubric.max_for("Thesis"), Some(10.0));
        assert_eq!(rubric.max_for("Penmanship"), None);
        assert_eq!(rubric.max_for(""), None);
    }

    #[test]
    fn criterion_lines_are_not_titles() {
        assert!(is_criterion_line("1. Thesis & Argument (0-10):"));
        assert!(is_criterion_line("Argument (15 marks):"));
        assert!(!is_criterion_line("History Essay Rubric"));
    }
}
