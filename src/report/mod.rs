use std::io::Cursor;

use docx_rs::{AlignmentType, Docx, Paragraph, Run, Table, TableCell, TableRow};
use tracing::error;

use crate::eval::{EvaluationRecord, HighlightedPassage};

pub mod convert;

const HEADER_COLOR: &str = "1a365d";
const ACCENT_COLOR: &str = "3b82f6";
const SUCCESS_COLOR: &str = "10b981";
const WARNING_COLOR: &str = "f59e0b";
const DANGER_COLOR: &str = "ef4444";
const TEXT_COLOR: &str = "1f2937";

const TITLE_SIZE: usize = 40;
const SUBTITLE_SIZE: usize = 28;
const SECTION_SIZE: usize = 26;
const BODY_SIZE: usize = 20;

/// Which optional report sections the caller wants rendered.
#[derive(Debug, Clone, Copy)]
pub struct ReportSections {
    pub include_criteria: bool,
    pub include_passages: bool,
    pub include_suggestions: bool,
    pub include_mini_lessons: bool,
}

impl Default for ReportSections {
    fn default() -> Self {
        Self {
            include_criteria: true,
            include_passages: true,
            include_suggestions: true,
            include_mini_lessons: true,
        }
    }
}

/// Renders one evaluation record as a formatted DOCX report.
///
/// Rendering never fails outward: a build error degrades to a minimal
/// "generation error" document so the caller can still stream something.
pub fn render_report(record: &EvaluationRecord, sections: ReportSections) -> Vec<u8> {
    let docx = if record.error {
        error_document(record)
    } else {
        full_document(record, sections)
    };

    match pack(docx) {
        Ok(bytes) => bytes,
        Err(err) => {
            error!(?err, student = %record.student_name, "report build failed, emitting fallback document");
            pack(fallback_document(record, &err.to_string())).unwrap_or_default()
        }
    }
}

fn pack(mut docx: Docx) -> anyhow::Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    docx.build().pack(&mut cursor)?;
    Ok(cursor.into_inner())
}

fn full_document(record: &EvaluationRecord, sections: ReportSections) -> Docx {
    let max_total = record.max_score_total();
    let overall_color = score_color(record.overall_score, max_total);

    let mut docx = Docx::new()
        .add_paragraph(title_paragraph("Essay Evaluation Report"))
        .add_paragraph(
            Paragraph::new()
                .align(AlignmentType::Center)
                .add_run(
                    Run::new()
                        .add_text(format!("Student: {}", record.student_name))
                        .size(SUBTITLE_SIZE)
                        .color(ACCENT_COLOR),
                ),
        )
        .add_paragraph(
            Paragraph::new()
                .align(AlignmentType::Center)
                .add_run(
                    Run::new()
                        .add_text("Overall Score: ")
                        .size(SUBTITLE_SIZE)
                        .color(TEXT_COLOR),
                )
                .add_run(
                    Run::new()
                        .add_text(format!("{:.1}", record.overall_score))
                        .size(SUBTITLE_SIZE)
                        .bold()
                        .color(overall_color),
                )
                .add_run(
                    Run::new()
                        .add_text(format!(" / {max_total:.1}"))
                        .size(SUBTITLE_SIZE)
                        .color(TEXT_COLOR),
                ),
        );

    if sections.include_criteria {
        docx = docx.add_paragraph(section_paragraph("Evaluation Breakdown"));
        if record.criteria.is_empty() {
            docx = docx.add_paragraph(body_paragraph("No evaluation criteria data available."));
        } else {
            docx = docx.add_table(criteria_table(record));
        }
    }

    if sections.include_passages && !record.highlighted_passages.is_empty() {
        docx = docx.add_paragraph(section_paragraph("Areas for Improvement / Strengths"));
        for (i, passage) in record.highlighted_passages.iter().enumerate() {
            docx = docx.add_table(passage_box(i + 1, passage));
            docx = docx.add_paragraph(Paragraph::new());
        }
    }

    if sections.include_suggestions && !record.suggestions.is_empty() {
        docx = docx.add_paragraph(section_paragraph("General Suggestions"));
        for suggestion in &record.suggestions {
            docx = docx.add_paragraph(bullet_paragraph(suggestion, TEXT_COLOR));
        }
    }

    if sections.include_mini_lessons && !record.mini_lessons.is_empty() {
        docx = docx.add_paragraph(section_paragraph("Mini-Lessons"));
        for lesson in &record.mini_lessons {
            docx = docx.add_paragraph(bullet_paragraph(lesson, TEXT_COLOR));
        }
    }

    docx.add_paragraph(footer_paragraph())
}

/// Error records render as a single failure page, nothing else.
fn error_document(record: &EvaluationRecord) -> Docx {
    let message = record
        .error_message
        .as_deref()
        .unwrap_or("The evaluation could not be completed.");

    Docx::new()
        .add_paragraph(title_paragraph("Essay Evaluation Report"))
        .add_paragraph(
            Paragraph::new()
                .align(AlignmentType::Center)
                .add_run(
                    Run::new()
                        .add_text(format!("Student: {}", record.student_name))
                        .size(SUBTITLE_SIZE)
                        .color(ACCENT_COLOR),
                ),
        )
        .add_paragraph(section_paragraph("Evaluation Failed"))
        .add_paragraph(
            Paragraph::new().add_run(
                Run::new()
                    .add_text(message)
                    .size(BODY_SIZE)
                    .color(DANGER_COLOR),
            ),
        )
        .add_paragraph(footer_paragraph())
}

fn fallback_document(record: &EvaluationRecord, error_msg: &str) -> Docx {
    Docx::new()
        .add_paragraph(title_paragraph("Error Generating Report"))
        .add_paragraph(body_paragraph(&format!(
            "An unexpected error occurred while generating the report for student '{}'.",
            record.student_name
        )))
        .add_paragraph(body_paragraph(&format!("Error details: {error_msg}")))
        .add_paragraph(body_paragraph(
            "Please check the server logs for more information or try again.",
        ))
}

fn criteria_table(record: &EvaluationRecord) -> Table {
    let mut rows = vec![TableRow::new(vec![
        header_cell("Criterion"),
        header_cell("Score"),
        header_cell("Feedback"),
    ])];

    for criterion in &record.criteria {
        let color = score_color(criterion.score, criterion.max_score);
        rows.push(TableRow::new(vec![
            TableCell::new().add_paragraph(
                Paragraph::new().add_run(
                    Run::new()
                        .add_text(criterion.name.clone())
                        .size(BODY_SIZE)
                        .bold()
                        .color(TEXT_COLOR),
                ),
            ),
            TableCell::new().add_paragraph(
                Paragraph::new()
                    .align(AlignmentType::Center)
                    .add_run(
                        Run::new()
                            .add_text(format!("{:.1}", criterion.score))
                            .size(BODY_SIZE)
                            .color(color),
                    )
                    .add_run(
                        Run::new()
                            .add_text(format!(" / {:.1}", criterion.max_score))
                            .size(BODY_SIZE)
                            .color(TEXT_COLOR),
                    ),
            ),
            TableCell::new().add_paragraph(
                Paragraph::new().add_run(
                    Run::new()
                        .add_text(criterion.feedback.clone())
                        .size(BODY_SIZE)
                        .color(TEXT_COLOR),
                ),
            ),
        ]));
    }

    Table::new(rows).set_grid(vec![2600, 1400, 5000])
}

fn passage_box(number: usize, passage: &HighlightedPassage) -> Table {
    let mut cell = TableCell::new().add_paragraph(
        Paragraph::new()
            .add_run(
                Run::new()
                    .add_text(format!("Passage {number}: "))
                    .size(BODY_SIZE)
                    .bold()
                    .color(TEXT_COLOR),
            )
            .add_run(
                Run::new()
                    .add_text(passage.text.clone())
                    .size(BODY_SIZE)
                    .highlight("yellow")
                    .color(TEXT_COLOR),
            ),
    );

    if !passage.issue.is_empty() {
        cell = cell.add_paragraph(labeled_paragraph(
            "Issue/Strength: ",
            &passage.issue,
            DANGER_COLOR,
        ));
    }
    if !passage.suggestion.is_empty() {
        cell = cell.add_paragraph(labeled_paragraph(
            "Suggestion: ",
            &passage.suggestion,
            ACCENT_COLOR,
        ));
    }
    if let Some(example) = &passage.example_revision {
        cell = cell.add_paragraph(
            Paragraph::new()
                .add_run(
                    Run::new()
                        .add_text("Example Revision: ")
                        .size(BODY_SIZE)
                        .bold()
                        .color(SUCCESS_COLOR),
                )
                .add_run(
                    Run::new()
                        .add_text(example.clone())
                        .size(BODY_SIZE)
                        .italic()
                        .color(SUCCESS_COLOR),
                ),
        );
    }

    Table::new(vec![TableRow::new(vec![cell])]).set_grid(vec![9000])
}

fn labeled_paragraph(label: &str, text: &str, color: &str) -> Paragraph {
    Paragraph::new()
        .add_run(
            Run::new()
                .add_text(label)
                .size(BODY_SIZE)
                .bold()
                .color(color),
        )
        .add_run(Run::new().add_text(text).size(BODY_SIZE).color(color))
}

fn title_paragraph(text: &str) -> Paragraph {
    Paragraph::new().align(AlignmentType::Center).add_run(
        Run::new()
            .add_text(text)
            .size(TITLE_SIZE)
            .bold()
            .color(HEADER_COLOR),
    )
}

fn section_paragraph(text: &str) -> Paragraph {
    Paragraph::new().add_run(
        Run::new()
            .add_text(text)
            .size(SECTION_SIZE)
            .bold()
            .color(HEADER_COLOR),
    )
}

fn body_paragraph(text: &str) -> Paragraph {
    Paragraph::new().add_run(Run::new().add_text(text).size(BODY_SIZE).color(TEXT_COLOR))
}

fn bullet_paragraph(text: &str, color: &str) -> Paragraph {
    Paragraph::new().add_run(
        Run::new()
            .add_text(format!("\u{2022} {text}"))
            .size(BODY_SIZE)
            .color(color),
    )
}

fn header_cell(text: &str) -> TableCell {
    TableCell::new().add_paragraph(
        Paragraph::new().align(AlignmentType::Center).add_run(
            Run::new()
                .add_text(text)
                .size(BODY_SIZE)
                .bold()
                .color(HEADER_COLOR),
        ),
    )
}

fn footer_paragraph() -> Paragraph {
    let date = chrono::Local::now().format("%Y-%m-%d");
    Paragraph::new().align(AlignmentType::Center).add_run(
        Run::new()
            .add_text(format!("Generated by AI Essay Grader | {date}"))
            .size(16)
            .color("9ca3af"),
    )
}

/// Banding shared by the overall score and each criterion row.
pub(crate) fn score_color(score: f64, max_score: f64) -> &'static str {
    if max_score <= 0.0 {
        return TEXT_COLOR;
    }
    let percentage = score / max_score;
    if percentage >= 0.8 {
        SUCCESS_COLOR
    } else if percentage >= 0.6 {
        ACCENT_COLOR
    } else if percentage >= 0.4 {
        WARNING_COLOR
    } else {
        DANGER_COLOR
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use crate::eval::CriterionScore;

    use super::*;

    fn sample_record() -> EvaluationRecord {
        EvaluationRecord {
            student_name: "Jane Doe".to_string(),
            overall_score: 41.0,
            criteria: vec![
                CriterionScore {
                    name: "Thesis & Argument".to_string(),
                    score: 9.0,
                    max_score: 10.0,
                    feedback: "Clear and specific.".to_string(),
                },
                CriterionScore {
                    name: "Evidence & Analysis".to_string(),
                    score: 32.0,
                    max_score: 40.0,
                    feedback: "Well supported.".to_string(),
                },
            ],
            suggestions: vec!["Vary sentence openings.".to_string()],
            highlighted_passages: vec![HighlightedPassage {
                text: "The ocean is big.".to_string(),
                issue: "Vague claim".to_string(),
                suggestion: "Quantify the scale.".to_string(),
                example_revision: Some("The Pacific spans a third of the globe.".to_string()),
            }],
            mini_lessons: vec!["Topic sentences frame each paragraph.".to_string()],
            error: false,
            error_message: None,
        }
    }

    fn document_xml(bytes: &[u8]) -> String {
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
        let mut file = archive.by_name("word/document.xml").unwrap();
        let mut xml = String::new();
        file.read_to_string(&mut xml).unwrap();
        xml
    }

    #[test]
    fn score_bands_match_the_thresholds() {
        assert_eq!(score_color(8.0, 10.0), SUCCESS_COLOR);
        assert_eq!(score_color(6.0, 10.0), ACCENT_COLOR);
        assert_eq!(score_color(4.0, 10.0), WARNING_COLOR);
        assert_eq!(score_color(3.9, 10.0), DANGER_COLOR);
        assert_eq!(score_color(5.0, 0.0), TEXT_COLOR);
    }

    #[test]
    fn full_report_contains_every_enabled_section() {
        let bytes = render_report(&sample_record(), ReportSections::default());
        assert!(!bytes.is_empty());
        let xml = document_xml(&bytes);
        assert!(xml.contains("Essay Evaluation Report"));
        assert!(xml.contains("Jane Doe"));
        assert!(xml.contains("Evaluation Breakdown"));
        assert!(xml.contains("Thesis &amp; Argument"));
        assert!(xml.contains("Areas for Improvement / Strengths"));
        assert!(xml.contains("General Suggestions"));
        assert!(xml.contains("Mini-Lessons"));
    }

    #[test]
    fn disabled_sections_are_omitted() {
        let sections = ReportSections {
            include_criteria: false,
            include_passages: false,
            include_suggestions: false,
            include_mini_lessons: false,
        };
        let xml = document_xml(&render_report(&sample_record(), sections));
        assert!(xml.contains("Jane Doe"));
        assert!(!xml.contains("Evaluation Breakdown"));
        assert!(!xml.contains("Areas for Improvement"));
        assert!(!xml.contains("General Suggestions"));
        assert!(!xml.contains("Mini-Lessons"));
    }

    #[test]
    fn error_records_render_a_minimal_failure_page() {
        let record = EvaluationRecord::failure("John Roe", "model unavailable");
        let xml = document_xml(&render_report(&record, ReportSections::default()));
        assert!(xml.contains("Evaluation Failed"));
        assert!(xml.contains("John Roe"));
        assert!(xml.contains("model unavailable"));
        assert!(!xml.contains("Evaluation Breakdown"));
    }

    #[test]
    fn rendering_is_deterministic_for_identical_input() {
        let record = sample_record();
        let first = render_report(&record, ReportSections::default());
        let second = render_report(&record, ReportSections::default());
        assert_eq!(first, second);
    }
}
