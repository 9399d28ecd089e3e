use thiserror::Error;

/// Errors raised while parsing or validating Clash rules.
///
/// Parse errors are always surfaced to the caller and never fatal: a rule
/// that fails to parse is reported and skipped by bulk loaders.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleError {
    /// The rule kind token is not a recognised Clash rule type.
    #[error("unknown rule kind: {0}")]
    UnknownRuleKind(String),

    /// The payload does not validate against the rule kind (unparseable
    /// CIDR, uncompilable regex, non-numeric port, ...).
    #[error("invalid payload for {kind}: {payload}")]
    InvalidPayload { kind: String, payload: String },

    /// The rule text is structurally malformed: missing fields, mismatched
    /// parentheses, or nesting beyond the permitted depth.
    #[error("malformed rule expression: {0}")]
    MalformedExpression(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = RuleError::UnknownRuleKind("DOMAIN-FOO".into());
        assert_eq!(err.to_string(), "unknown rule kind: DOMAIN-FOO");

        let err = RuleError::InvalidPayload {
            kind: "IP-CIDR".into(),
            payload: "not-a-cidr".into(),
        };
        assert_eq!(err.to_string(), "invalid payload for IP-CIDR: not-a-cidr");

        let err = RuleError::MalformedExpression("mismatched parentheses".into());
        assert_eq!(
            err.to_string(),
            "malformed rule expression: mismatched parentheses"
        );
    }
}
