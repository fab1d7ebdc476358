//! Structured error reports for log fields.

use serde::Serialize;

/// An error flattened into `{error, stack}` for structured logging.
///
/// `stack` holds the messages of the error's source chain, outermost first,
/// excluding the top-level message itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub error: String,
    pub stack: Vec<String>,
}

impl ErrorReport {
    /// Builds a report from an error and its `source()` chain.
    pub fn new(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut stack = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            stack.push(cause.to_string());
            source = cause.source();
        }
        Self {
            error: err.to_string(),
            stack,
        }
    }
}

impl std::fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.error)?;
        for cause in &self.stack {
            write!(f, ": {cause}")?;
        }
        Ok(())
    }
}

/// Formats an error for a log line.
pub fn format_error(err: &(dyn std::error::Error + 'static)) -> ErrorReport {
    ErrorReport::new(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Outer(std::io::Error);

    impl std::fmt::Display for Outer {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "publish failed")
        }
    }

    impl std::error::Error for Outer {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn report_collects_source_chain() {
        let err = Outer(std::io::Error::other("socket closed"));
        let report = format_error(&err);
        assert_eq!(report.error, "publish failed");
        assert_eq!(report.stack, vec!["socket closed".to_string()]);
        assert_eq!(report.to_string(), "publish failed: socket closed");
    }

    #[test]
    fn report_serializes_error_and_stack() {
        let err = std::io::Error::other("boom");
        let json = serde_json::to_value(format_error(&err)).unwrap();
        assert_eq!(json["error"], "boom");
        assert!(json["stack"].as_array().unwrap().is_empty());
    }
}
