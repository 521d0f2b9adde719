//! Location-aware diagnostics.
//!
//! Passes never throw: they append `Diagnostic`s to the per-context
//! `Diagnostics` sink and keep going, so one run surfaces as many problems
//! as the program has. A pass "fails" when the sink holds at least one
//! error at the end of it.
//!
//! Rendered form, matching what tests assert on:
//!
//! ```text
//! stdin:1:12-16: ERROR: Unknown identifier: 'fake'
//! kprobe:f { fake }
//!            ^^^^
//! HINT: did you mean ...?
//! ```

use std::fmt;

use crate::foundation::{SourceMap, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "WARNING"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}

/// One diagnostic: severity, location, message, optional hints.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub span: Span,
    pub message: String,
    pub hints: Vec<String>,
}

impl Diagnostic {
    pub fn new(severity: Severity, span: Span, message: impl Into<String>) -> Self {
        Self {
            severity,
            span,
            message: message.into(),
            hints: Vec::new(),
        }
    }

    /// Attach a `HINT:` line, rendered directly below the diagnostic.
    pub fn hint(&mut self, hint: impl Into<String>) -> &mut Self {
        self.hints.push(hint.into());
        self
    }
}

/// Append-only diagnostic sink, one per AST context.
///
/// Diagnostics are kept in emission order, which the analyser guarantees is
/// source order (it walks the tree in order and reports as it goes).
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, span: Span, message: impl Into<String>) -> &mut Diagnostic {
        self.push(Diagnostic::new(Severity::Error, span, message))
    }

    pub fn warning(&mut self, span: Span, message: impl Into<String>) -> &mut Diagnostic {
        self.push(Diagnostic::new(Severity::Warning, span, message))
    }

    pub fn push(&mut self, diag: Diagnostic) -> &mut Diagnostic {
        self.entries.push(diag);
        self.entries.last_mut().expect("just pushed")
    }

    /// True when no error-severity diagnostic has been recorded.
    pub fn ok(&self) -> bool {
        !self.entries.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn error_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    /// Drain all entries. Inference passes that run before the final pass
    /// use this to throw away diagnostics from not-yet-settled types.
    pub fn take(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.entries)
    }

    pub fn emit(&self, sources: &SourceMap) -> String {
        DiagnosticPrinter::new(sources).format_all(self.entries.iter())
    }
}

/// Renders diagnostics with a source excerpt and caret underline.
pub struct DiagnosticPrinter<'a> {
    sources: &'a SourceMap,
}

impl<'a> DiagnosticPrinter<'a> {
    pub fn new(sources: &'a SourceMap) -> Self {
        Self { sources }
    }

    pub fn format(&self, diag: &Diagnostic) -> String {
        let mut out = String::new();
        let (line, col) = self.sources.line_col(&diag.span);
        let len = diag.span.end.saturating_sub(diag.span.start).max(1);
        out.push_str(&format!(
            "{}:{}:{}-{}: {}: {}\n",
            self.sources.file_path(&diag.span).display(),
            line,
            col,
            col + len,
            diag.severity,
            diag.message
        ));

        let file = self.sources.file(&diag.span);
        if let Some(text) = file.line_text(line) {
            out.push_str(text);
            out.push('\n');
            // Clamp the underline to the excerpt; multi-line spans underline
            // to the end of the first line.
            let width = (len as usize).min(text.len().saturating_sub(col as usize - 1)).max(1);
            out.push_str(&" ".repeat(col as usize - 1));
            out.push_str(&"^".repeat(width));
            out.push('\n');
        }

        for hint in &diag.hints {
            out.push_str(&format!("HINT: {hint}\n"));
        }
        out
    }

    pub fn format_all<'d>(&self, diags: impl Iterator<Item = &'d Diagnostic>) -> String {
        diags.map(|d| self.format(d)).collect()
    }
}
