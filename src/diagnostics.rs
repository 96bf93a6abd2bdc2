//! Kernel-source diagnostics
//!
//! Front-end errors carry a byte span into the kernel source. They are
//! rendered two ways: as a plain-text compiler log (the build log a device
//! reports after a failed build) and as a miette report for the CLI.

use codespan_reporting::diagnostic::{Diagnostic as CodespanDiagnostic, Label};
use codespan_reporting::files::SimpleFile;
use codespan_reporting::term::{self, termcolor::NoColor};
use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

use crate::common::Span;

/// Convert our Span to miette's SourceSpan
impl From<Span> for SourceSpan {
    fn from(span: Span) -> Self {
        SourceSpan::new(span.start.into(), span.len())
    }
}

/// Error located in kernel source
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SourceError {
    pub message: String,
    pub span: Span,
}

impl SourceError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }

    /// Attach the source text for miette rendering
    pub fn into_report(self, name: &str, source: &str) -> KernelSourceReport {
        KernelSourceReport {
            message: self.message,
            span: self.span.into(),
            src: NamedSource::new(name, source.to_string()),
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
#[error("{message}")]
#[diagnostic(code(kernel::source))]
pub struct KernelSourceReport {
    message: String,
    #[label("here")]
    span: SourceSpan,
    #[source_code]
    src: NamedSource<String>,
}

/// Render errors as a plain-text build log
pub fn render_build_log(name: &str, source: &str, errors: &[SourceError]) -> String {
    let file = SimpleFile::new(name, source);
    let config = term::Config::default();
    let mut writer = NoColor::new(Vec::new());

    for error in errors {
        let end = error.span.end.min(source.len());
        let start = error.span.start.min(end);
        let diagnostic = CodespanDiagnostic::error()
            .with_message(&error.message)
            .with_labels(vec![Label::primary((), start..end)]);
        if term::emit(&mut writer, &config, &file, &diagnostic).is_err() {
            // Span could not be resolved against the file; keep the message
            let line = format!("error: {}\n", error.message);
            writer.get_mut().extend_from_slice(line.as_bytes());
        }
    }

    String::from_utf8_lossy(&writer.into_inner()).into_owned()
}
