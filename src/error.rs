//! Error types for the rate-limiting engine
use std::fmt;

/// Unified error type for every engine component.
///
/// Parsing and validation failures abort a configuration load outright;
/// per-scope decision errors are logged by the executor and leave the scope
/// at its previous rate.
#[derive(Debug, Clone, PartialEq)]
pub enum WeirError {
    /// A retry policy ran out of attempts.
    OverMaxRetries,
    /// A limiter refused the request because the window/bucket is exhausted.
    OverMaxLimit,
    /// The limiter has been closed; no further admissions.
    Closed,
    /// `Executor::notify` was asked for a scope that was never registered.
    MetricsChannelNotExists,
    /// The rate store was asked to delete a key it does not hold.
    DelConfig,
    /// A configuration source declared a format the engine cannot parse.
    FileType,
    /// The hash ring holds no nodes, or an add/remove was given none.
    EmptyNode,
    /// The operation's cancellation token fired.
    Cancelled,
    /// Configuration failed validation.
    InvalidConfig { msg: String },
    /// The trigger lexer or parser rejected its input.
    Parse { position: usize, msg: String },
    /// Trigger evaluation failed against a metric snapshot.
    Eval { msg: String },
}

impl fmt::Display for WeirError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OverMaxRetries => write!(f, "over max retry limit"),
            Self::OverMaxLimit => write!(f, "over max limit"),
            Self::Closed => write!(f, "limiter closed"),
            Self::MetricsChannelNotExists => write!(f, "metrics channel not exists"),
            Self::DelConfig => write!(f, "delete rate config error"),
            Self::FileType => write!(f, "unsupported file type"),
            Self::EmptyNode => write!(f, "empty node"),
            Self::Cancelled => write!(f, "operation cancelled"),
            Self::InvalidConfig { msg } => write!(f, "invalid config: {}", msg),
            Self::Parse { msg, .. } => write!(f, "{}", msg),
            Self::Eval { msg } => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for WeirError {}

impl WeirError {
    pub(crate) fn parse(position: usize, msg: impl Into<String>) -> Self {
        Self::Parse { position, msg: msg.into() }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidConfig { msg: msg.into() }
    }

    pub(crate) fn eval(msg: impl Into<String>) -> Self {
        Self::Eval { msg: msg.into() }
    }

    /// Check if this error means a limiter refused the request.
    pub fn is_over_limit(&self) -> bool {
        matches!(self, Self::OverMaxLimit)
    }

    /// Check if this error came from a closed limiter or executor.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Check if this error came from a fired cancellation token.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Byte offset of a lex/parse failure, if this is a parse error.
    pub fn position(&self) -> Option<usize> {
        match self {
            Self::Parse { position, .. } => Some(*position),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_taxonomy() {
        assert_eq!(WeirError::OverMaxLimit.to_string(), "over max limit");
        assert_eq!(WeirError::Closed.to_string(), "limiter closed");
        assert_eq!(WeirError::EmptyNode.to_string(), "empty node");
        assert_eq!(
            WeirError::invalid("rules must not be empty").to_string(),
            "invalid config: rules must not be empty"
        );
    }

    #[test]
    fn parse_errors_carry_position() {
        let err = WeirError::parse(11, "invalid character in number: 0.00, position: 11");
        assert_eq!(err.position(), Some(11));
        assert_eq!(err.to_string(), "invalid character in number: 0.00, position: 11");
        assert_eq!(WeirError::Closed.position(), None);
    }

    #[test]
    fn predicates_cover_variants() {
        assert!(WeirError::OverMaxLimit.is_over_limit());
        assert!(!WeirError::OverMaxLimit.is_closed());
        assert!(WeirError::Closed.is_closed());
        assert!(WeirError::Cancelled.is_cancelled());
    }
}
