//! Expectation reports.

use std::fmt;

/// Title of the section that lists suggestions.
pub(crate) const SUGGESTIONS: &str = "Suggestions";
pub(crate) const MESSAGE_DIFF: &str = "Message Diff";
pub(crate) const MESSAGE_TYPE_DIFF: &str = "Message Type Diff";
pub(crate) const LOG_MESSAGES: &str = "Log Messages";

/// The result of one expectation, with the results of its children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    /// Result of the whole expectation tree this report belongs to.
    pub tree_ok: bool,
    pub ok: bool,
    /// What was expected, as an imperative sentence.
    pub criteria: String,
    /// Short summary of the result.
    pub outcome: String,
    /// What actually happened.
    pub explanation: String,
    pub sections: Vec<ReportSection>,
    pub sub_reports: Vec<Report>,
}

/// A titled block of report content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportSection {
    pub title: String,
    pub content: Vec<String>,
}

impl Report {
    pub fn new(tree_ok: bool, ok: bool, criteria: impl Into<String>) -> Self {
        Self {
            tree_ok,
            ok,
            criteria: criteria.into(),
            outcome: String::new(),
            explanation: String::new(),
            sections: Vec::new(),
            sub_reports: Vec::new(),
        }
    }

    pub fn with_outcome(mut self, outcome: impl Into<String>) -> Self {
        self.outcome = outcome.into();
        self
    }

    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = explanation.into();
        self
    }

    /// Add a suggestion. Duplicate suggestions are ignored.
    pub fn suggest(&mut self, suggestion: impl Into<String>) {
        let suggestion = suggestion.into();
        let section = self.section_mut(SUGGESTIONS);
        if !section.content.contains(&suggestion) {
            section.content.push(suggestion);
        }
    }

    /// Append lines to the named section, creating it if needed.
    pub fn add_section(&mut self, title: &str, lines: impl IntoIterator<Item = String>) {
        self.section_mut(title).content.extend(lines);
    }

    pub fn append(&mut self, sub_report: Report) {
        self.sub_reports.push(sub_report);
    }

    /// The named section, if present.
    pub fn section(&self, title: &str) -> Option<&ReportSection> {
        self.sections.iter().find(|s| s.title == title)
    }

    pub fn suggestions(&self) -> &[String] {
        self.section(SUGGESTIONS)
            .map(|s| s.content.as_slice())
            .unwrap_or_default()
    }

    fn section_mut(&mut self, title: &str) -> &mut ReportSection {
        let index = match self.sections.iter().position(|s| s.title == title) {
            Some(index) => index,
            None => {
                self.sections.push(ReportSection {
                    title: title.to_string(),
                    content: Vec::new(),
                });
                self.sections.len() - 1
            }
        };
        &mut self.sections[index]
    }

    fn write_node(&self, f: &mut fmt::Formatter<'_>, indent: &str) -> fmt::Result {
        let marker = if self.ok { '✓' } else { '✗' };
        write!(f, "{indent}{marker} {}", self.criteria)?;
        if !self.outcome.is_empty() {
            write!(f, " ({})", self.outcome)?;
        }
        writeln!(f)?;

        let detail = format!("{indent}  | ");
        if !self.explanation.is_empty() {
            writeln!(f, "{detail}")?;
            writeln!(f, "{detail}EXPLANATION")?;
            for line in self.explanation.lines() {
                writeln!(f, "{detail}    {line}")?;
            }
        }
        for section in &self.sections {
            writeln!(f, "{detail}")?;
            writeln!(f, "{detail}{}", section.title.to_uppercase())?;
            let bullet = section.title == SUGGESTIONS || section.title == LOG_MESSAGES;
            for entry in &section.content {
                for (i, line) in entry.lines().enumerate() {
                    match (bullet, i) {
                        (true, 0) => writeln!(f, "{detail}    • {line}")?,
                        (true, _) => writeln!(f, "{detail}      {line}")?,
                        (false, _) => writeln!(f, "{detail}    {line}")?,
                    }
                }
            }
        }

        if !self.sub_reports.is_empty() {
            let child_indent = format!("{indent}  ");
            for sub in &self.sub_reports {
                writeln!(f)?;
                sub.write_node(f, &child_indent)?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_node(f, "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_passing_leaf() {
        let report = Report::new(true, true, "record a specific 'OrderPlaced' event")
            .with_outcome("the expected event was recorded");
        assert_eq!(
            report.to_string(),
            "✓ record a specific 'OrderPlaced' event (the expected event was recorded)\n"
        );
    }

    #[test]
    fn test_render_sections_and_children() {
        let mut report = Report::new(false, false, "all of")
            .with_outcome("1 of the 2 sub-assertions failed");
        let mut child = Report::new(false, false, "record a specific 'OrderPlaced' event")
            .with_explanation("a similar event was recorded by the 'orders' aggregate");
        child.suggest("check the content of the message");
        child.suggest("check the content of the message");
        child.add_section(MESSAGE_DIFF, ["- a".to_string(), "+ b".to_string()]);
        report.append(child);
        report.append(Report::new(false, true, "execute any 'ReserveStock' command"));

        let rendered = report.to_string();
        assert!(rendered.starts_with("✗ all of (1 of the 2 sub-assertions failed)\n"));
        assert!(rendered.contains("  ✗ record a specific 'OrderPlaced' event\n"));
        assert!(rendered.contains("    | SUGGESTIONS\n    |     • check the content of the message\n"));
        assert!(rendered.contains("    | MESSAGE DIFF\n    |     - a\n    |     + b\n"));
        assert!(rendered.contains("  ✓ execute any 'ReserveStock' command\n"));
        assert_eq!(report.sub_reports[0].suggestions().len(), 1);
    }
}
