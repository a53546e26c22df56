use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

/// Minimum non-whitespace characters a candidate must carry to survive the
/// final filter.
const MIN_SEGMENT_CHARS: usize = 250;
/// Minimum stripped length for fragments produced by the whitespace-gap
/// fallback split.
const GAP_FALLBACK_MIN_CHARS: usize = 300;
/// Text ahead of the first name marker is usually a cover page, so it joins
/// the result only past a higher bar.
const LEADING_BLOCK_MIN_CHARS: usize = 500;
/// Unmatched text between two marker-delimited segments folds in past this.
const INTER_BLOCK_MIN_CHARS: usize = 100;

const MAX_NAME_SCAN_LINES: usize = 15;
const MAX_NAME_LINE_LEN: usize = 30;

/// Line-anchored student name markers, case-insensitive. The longer keyword
/// alternatives come first so `Student Name:` never half-matches as
/// `Student:`.
static NAME_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^\s*(?:Student Name|Student|Name|Author|By)\s*:\s*([A-Za-z]+(?: [A-Za-z'\-]+){0,3})")
        .expect("name marker pattern")
});

static GAP_SPLIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{4,}").expect("gap pattern"));

/// A bare run of 1-4 name-like tokens, used for the first-line fallback.
static BARE_NAME_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z'\-]+(?: [A-Za-z'\-]+){0,3}$").expect("bare name pattern"));

static HEADER_KEYWORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:Student|Name|Date|Course|Professor|Assignment|Class|ID)")
        .expect("header keyword pattern")
});

const PLACEHOLDER_NAMES: &[&str] = &["unknown student", "student name", "unknown", ""];

/// Splits one uploaded document into candidate per-student essays.
///
/// Marker-based splitting first; a whitespace-gap fallback when fewer than
/// two markers exist; the whole text as a last resort. A single marker means
/// one essay with a name header, not a batch.
pub fn split_essays(text: &str) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let markers: Vec<usize> = NAME_MARKER.find_iter(text).map(|m| m.start()).collect();
    debug!(count = markers.len(), "located student name markers");

    let candidates = match markers.len() {
        0 => {
            let fragments = split_on_gaps(trimmed);
            if fragments.len() >= 2 {
                fragments
            } else {
                return vec![trimmed.to_string()];
            }
        }
        1 => return vec![trimmed.to_string()],
        _ => marker_segments(text, &markers),
    };

    let kept: Vec<String> = candidates
        .into_iter()
        .map(|candidate| candidate.trim().to_string())
        .filter(|candidate| non_whitespace_len(candidate) >= MIN_SEGMENT_CHARS)
        .collect();

    if kept.is_empty() {
        if non_whitespace_len(trimmed) > 0 {
            warn!("all candidate segments fell under the length floor, treating input as one essay");
            vec![trimmed.to_string()]
        } else {
            Vec::new()
        }
    } else {
        kept
    }
}

fn split_on_gaps(text: &str) -> Vec<String> {
    GAP_SPLIT
        .split(text)
        .map(str::trim)
        .filter(|fragment| fragment.len() > GAP_FALLBACK_MIN_CHARS)
        .map(str::to_string)
        .collect()
}

/// Each segment spans from its marker to the next marker (or end of text).
/// Unmatched gaps join the result at the bar appropriate to their position.
fn marker_segments(text: &str, markers: &[usize]) -> Vec<String> {
    let mut segments = Vec::new();
    let mut last_end = 0usize;

    for (i, &start) in markers.iter().enumerate() {
        if start > last_end {
            let gap = text[last_end..start].trim();
            let bar = if i == 0 {
                LEADING_BLOCK_MIN_CHARS
            } else {
                INTER_BLOCK_MIN_CHARS
            };
            if gap.len() > bar {
                if i == 0 {
                    warn!(
                        chars = gap.len(),
                        "substantial text before the first name marker, keeping it as its own segment"
                    );
                }
                segments.push(gap.to_string());
            }
        }

        let end = markers.get(i + 1).copied().unwrap_or(text.len());
        segments.push(text[start..end].to_string());
        last_end = end;
    }

    segments
}

/// Heuristically pulls a student name out of an essay's opening lines.
///
/// Marker patterns win; otherwise a short bare-name first line is accepted
/// when the following line does not look like another header field.
/// Placeholder strings never come back as a name.
pub fn extract_student_name(essay: &str) -> Option<String> {
    let head: Vec<&str> = essay.lines().take(MAX_NAME_SCAN_LINES).collect();
    let head_text = head.join("\n");

    if let Some(captures) = NAME_MARKER.captures(&head_text) {
        let name = captures[1].trim().to_string();
        if !is_placeholder_name(&name) {
            return Some(name);
        }
    }

    let first_line = head.first().map(|line| line.trim()).unwrap_or("");
    if !first_line.is_empty()
        && first_line.len() < MAX_NAME_LINE_LEN
        && BARE_NAME_LINE.is_match(first_line)
        && !is_placeholder_name(first_line)
    {
        let second_line = head.get(1).map(|line| line.trim()).unwrap_or("");
        if !HEADER_KEYWORD.is_match(second_line) {
            return Some(first_line.to_string());
        }
    }

    None
}

/// True for names the model (or a template) uses when it has no real name.
pub fn is_placeholder_name(name: &str) -> bool {
    let normalized = name.trim().to_ascii_lowercase();
    PLACEHOLDER_NAMES.contains(&normalized.as_str())
}

fn non_whitespace_len(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn essay_body(seed: &str) -> String {
        // Comfortably past the 250 non-whitespace character floor.
        format!("{seed} ").repeat(60).trim().to_string()
    }

    #[test]
    fn two_markers_yield_two_segments() {
        let text = format!(
            "Student Name: Jane Doe\n\n{}\n\nStudent Name: John Roe\n\n{}",
            essay_body("alpha"),
            essay_body("beta"),
        );
        let segments = split_essays(&text);
        assert_eq!(segments.len(), 2);
        assert!(segments[0].contains("Jane Doe"));
        assert!(segments[0].contains("alpha"));
        assert!(segments[1].contains("John Roe"));
        assert!(segments[1].contains("beta"));
    }

    #[test]
    fn one_marker_is_a_single_essay() {
        let text = format!("Name: Jane Doe\n\n{}", essay_body("gamma"));
        let segments = split_essays(&text);
        assert_eq!(segments, vec![text.trim().to_string()]);
    }

    #[test]
    fn no_markers_and_no_gaps_is_a_single_essay() {
        let text = essay_body("delta");
        let segments = split_essays(&text);
        assert_eq!(segments, vec![text.clone()]);
    }

    #[test]
    fn gap_fallback_splits_on_blank_runs() {
        let text = format!("{}\n\n\n\n\n{}", essay_body("first"), essay_body("second"));
        let segments = split_essays(&text);
        assert_eq!(segments.len(), 2);
        assert!(segments[0].contains("first"));
        assert!(segments[1].contains("second"));
    }

    #[test]
    fn short_gap_fragments_do_not_split() {
        let text = format!("{}\n\n\n\n\ntoo short", essay_body("solo"));
        let segments = split_essays(&text);
        assert_eq!(segments.len(), 1);
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(split_essays("").is_empty());
        assert!(split_essays("   \n\n  ").is_empty());
    }

    #[test]
    fn short_marker_segments_fall_back_to_whole_text() {
        // Both marker-delimited pieces are under the floor, so the original
        // text survives as one essay instead of vanishing.
        let text = "Student Name: Jane Doe\nshort\n\nStudent Name: John Roe\nalso short";
        let segments = split_essays(text);
        assert_eq!(segments, vec![text.trim().to_string()]);
    }

    #[test]
    fn marker_keywords_are_case_insensitive() {
        let text = format!(
            "STUDENT NAME: Jane Doe\n\n{}\n\nby: John Roe\n\n{}",
            essay_body("epsilon"),
            essay_body("zeta"),
        );
        assert_eq!(split_essays(&text).len(), 2);
    }

    #[test]
    fn name_extraction_prefers_markers() {
        let essay = "Course: Writing 101\nStudent Name: Mary O'Brien\n\nThe essay begins here.";
        assert_eq!(extract_student_name(essay).as_deref(), Some("Mary O'Brien"));
    }

    #[test]
    fn name_extraction_reads_author_and_by_forms() {
        assert_eq!(
            extract_student_name("Author: Jean-Luc Picard\n\nBody.").as_deref(),
            Some("Jean-Luc Picard")
        );
        assert_eq!(
            extract_student_name("By: Ada Lovelace\n\nBody.").as_deref(),
            Some("Ada Lovelace")
        );
    }

    #[test]
    fn bare_first_line_counts_as_a_name() {
        let essay = "Jane Doe\nAn essay about oceans.\nMore text.";
        assert_eq!(extract_student_name(essay).as_deref(), Some("Jane Doe"));
    }

    #[test]
    fn bare_first_line_is_rejected_when_followed_by_header() {
        let essay = "Jane Doe\nCourse: Writing 101\nMore text.";
        assert_eq!(extract_student_name(essay), None);
    }

    #[test]
    fn placeholder_names_are_filtered() {
        assert_eq!(extract_student_name("Name: Unknown Student\n\nBody."), None);
        assert!(is_placeholder_name("Unknown Student"));
        assert!(is_placeholder_name("student name"));
        assert!(is_placeholder_name(""));
        assert!(!is_placeholder_name("Jane Doe"));
    }
}
