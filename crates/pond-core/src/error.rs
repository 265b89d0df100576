use std::fmt;

/// Where in the source a compile diagnostic points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorLocation {
    /// A concrete lexeme, quoted in the output.
    Lexeme(String),
    /// The end of the source.
    AtEnd,
    /// No location (the token itself was a scan error carrying its message).
    Bare,
}

/// A single compile-time diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub line: u16,
    pub location: ErrorLocation,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            ErrorLocation::Lexeme(lexeme) => {
                write!(f, "{}: Error at '{}': {}", self.line, lexeme, self.message)
            }
            ErrorLocation::AtEnd => write!(f, "{}: Error at end: {}", self.line, self.message),
            ErrorLocation::Bare => write!(f, "{}: Error: {}", self.line, self.message),
        }
    }
}

/// Everything a failed compile produced, one line per diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostics(pub Vec<Diagnostic>);

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, diag) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{diag}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PondError {
    #[error("{0}")]
    Compile(Diagnostics),

    #[error("{message}\n[line {line}] in script")]
    Runtime { message: String, line: u16 },

    #[error("Could not open file \"{path}\".")]
    Io { path: String },
}

impl PondError {
    pub fn runtime(message: impl Into<String>, line: u16) -> Self {
        PondError::Runtime {
            message: message.into(),
            line,
        }
    }

    /// The process exit code this error maps to.
    pub fn exit_code(&self) -> i32 {
        match self {
            PondError::Compile(_) => 65,
            PondError::Runtime { .. } => 70,
            PondError::Io { .. } => 74,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_at_lexeme() {
        let d = Diagnostic {
            line: 3,
            location: ErrorLocation::Lexeme("=".to_string()),
            message: "Invalid assignment target.".to_string(),
        };
        assert_eq!(d.to_string(), "3: Error at '=': Invalid assignment target.");
    }

    #[test]
    fn test_diagnostic_at_end() {
        let d = Diagnostic {
            line: 1,
            location: ErrorLocation::AtEnd,
            message: "Expected ';' after statement.".to_string(),
        };
        assert_eq!(d.to_string(), "1: Error at end: Expected ';' after statement.");
    }

    #[test]
    fn test_runtime_error_display() {
        let e = PondError::runtime("Undefined variable 'x'.", 7);
        assert_eq!(e.to_string(), "Undefined variable 'x'.\n[line 7] in script");
        assert_eq!(e.exit_code(), 70);
    }

    #[test]
    fn test_diagnostics_join_with_newlines() {
        let ds = Diagnostics(vec![
            Diagnostic {
                line: 1,
                location: ErrorLocation::Bare,
                message: "Unterminated string".to_string(),
            },
            Diagnostic {
                line: 2,
                location: ErrorLocation::AtEnd,
                message: "Expected expression".to_string(),
            },
        ]);
        let rendered = ds.to_string();
        assert_eq!(rendered.lines().count(), 2);
        assert!(rendered.starts_with("1: Error: Unterminated string"));
    }
}
