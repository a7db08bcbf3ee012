//! Error types and diagnostic reporting
//!
//! Only the front end and the driver produce `CompileError`s. The
//! allocation core treats inconsistent input as a programming defect and
//! asserts instead.

use codespan_reporting::diagnostic::{Diagnostic, Label};
use codespan_reporting::files::SimpleFiles;
use codespan_reporting::term;
use codespan_reporting::term::termcolor::{ColorChoice, StandardStream};
use thiserror::Error;
use super::Span;

/// Compile error with source location
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("Lexer error at {span:?}: {message}")]
    Lexer { message: String, span: Span },

    #[error("Parser error at {span:?}: {message}")]
    Parser { message: String, span: Span },

    #[error("Semantic error at {span:?}: {message}")]
    Semantic { message: String, span: Span },

    #[error("Code generation error: {message}")]
    Codegen { message: String },

    #[error("Backend error: {message}")]
    Backend { message: String },
}

impl CompileError {
    pub fn lexer(message: impl Into<String>, span: Span) -> Self {
        Self::Lexer {
            message: message.into(),
            span,
        }
    }

    pub fn parser(message: impl Into<String>, span: Span) -> Self {
        Self::Parser {
            message: message.into(),
            span,
        }
    }

    pub fn semantic(message: impl Into<String>, span: Span) -> Self {
        Self::Semantic {
            message: message.into(),
            span,
        }
    }

    pub fn codegen(message: impl Into<String>) -> Self {
        Self::Codegen {
            message: message.into(),
        }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Source location, if the error carries one
    pub fn span(&self) -> Option<Span> {
        match self {
            CompileError::Lexer { span, .. }
            | CompileError::Parser { span, .. }
            | CompileError::Semantic { span, .. } => Some(*span),
            _ => None,
        }
    }
}

pub type CompileResult<T> = Result<T, CompileError>;

/// Diagnostic reporter for pretty error output
pub struct DiagnosticReporter {
    files: SimpleFiles<String, String>,
    writer: StandardStream,
    config: term::Config,
}

impl DiagnosticReporter {
    pub fn new() -> Self {
        Self {
            files: SimpleFiles::new(),
            writer: StandardStream::stderr(ColorChoice::Auto),
            config: term::Config::default(),
        }
    }

    pub fn add_file(&mut self, name: impl Into<String>, source: impl Into<String>) -> usize {
        self.files.add(name.into(), source.into())
    }

    /// Build the diagnostic for an error without printing it
    pub fn diagnostic(file_id: usize, error: &CompileError) -> Diagnostic<usize> {
        let labelled = |title: &str, message: &str, span: &Span| {
            Diagnostic::error()
                .with_message(title.to_string())
                .with_labels(vec![
                    Label::primary(file_id, span.start..span.end).with_message(message.to_string())
                ])
        };

        match error {
            CompileError::Lexer { message, span } => labelled("Lexer error", message, span),
            CompileError::Parser { message, span } => labelled("Syntax error", message, span),
            CompileError::Semantic { message, span } => labelled("Semantic error", message, span),

            CompileError::Codegen { message } => {
                Diagnostic::error().with_message(format!("Code generation error: {}", message))
            }

            CompileError::Backend { message } => {
                Diagnostic::error().with_message(format!("Backend error: {}", message))
            }
        }
    }

    pub fn report_error(&self, file_id: usize, error: &CompileError) {
        let diagnostic = Self::diagnostic(file_id, error);
        let _ = term::emit(&mut self.writer.lock(), &self.config, &self.files, &diagnostic);
    }
}

impl Default for DiagnosticReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_accessor() {
        let err = CompileError::semantic("unknown variable", Span::new(4, 7));
        assert_eq!(err.span(), Some(Span::new(4, 7)));
        assert_eq!(CompileError::backend("no target").span(), None);
    }

    #[test]
    fn test_diagnostic_labels_span() {
        let err = CompileError::parser("expected ';'", Span::new(10, 11));
        let diagnostic = DiagnosticReporter::diagnostic(0, &err);
        assert_eq!(diagnostic.message, "Syntax error");
        assert_eq!(diagnostic.labels.len(), 1);
        assert_eq!(diagnostic.labels[0].range, 10..11);
    }
}
