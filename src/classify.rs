//! Error classifier: ordered keyword rules over raw failure text
//!
//! Classification is an ordered, data-driven list of `(keywords → kind)`
//! rules evaluated top-to-bottom against the lowercased failure text; the
//! first match wins and no match resolves to `INTERNAL_ERROR`. Rules are
//! ordered specific-before-general so that, say, `index_not_found` is
//! recognized before the broader search-index family.

use crate::error::ErrorKind;

/// A single classification rule: any keyword hit selects `kind`
#[derive(Debug, Clone)]
pub struct ClassifierRule {
    pub kind: ErrorKind,
    pub keywords: &'static [&'static str],
}

impl ClassifierRule {
    fn matches(&self, lowered: &str) -> bool {
        self.keywords.iter().any(|kw| lowered.contains(kw))
    }
}

/// Ordered rule list with a guaranteed default
#[derive(Debug)]
pub struct ErrorClassifier {
    rules: Vec<ClassifierRule>,
}

impl ErrorClassifier {
    /// The standard rule set, specific rules first
    pub fn standard() -> Self {
        use ErrorKind::*;

        let rules = vec![
            // Data quality: exact validator phrasing first
            ClassifierRule {
                kind: MissingField,
                keywords: &["missing required field", "field is required"],
            },
            ClassifierRule {
                kind: InvalidFieldType,
                keywords: &["invalid field type", "type mismatch"],
            },
            ClassifierRule {
                kind: InvalidMessageFormat,
                keywords: &[
                    "invalid message format",
                    "unexpected token",
                    "malformed",
                    "expected value",
                    "unexpected end of json",
                    "eof while parsing",
                ],
            },
            ClassifierRule {
                kind: ValidationError,
                keywords: &["validation failed", "unsupported operation", "unexpected table"],
            },
            // Structural search-index problems before the generic family
            ClassifierRule {
                kind: IndexNotFound,
                keywords: &["index_not_found", "no such index"],
            },
            ClassifierRule {
                kind: MappingError,
                keywords: &[
                    "mapper_parsing",
                    "mapping error",
                    "strict_dynamic_mapping",
                    "illegal_argument_exception",
                ],
            },
            ClassifierRule {
                kind: QueueNotFound,
                keywords: &["no queue", "queue not found", "exchange not found", "no exchange"],
            },
            // Business rules
            ClassifierRule {
                kind: RecordAlreadyExists,
                keywords: &["version_conflict", "already exists", "duplicate document"],
            },
            ClassifierRule {
                kind: PermissionDenied,
                keywords: &[
                    "permission denied",
                    "access denied",
                    "unauthorized",
                    "security_exception",
                    "403",
                ],
            },
            ClassifierRule {
                kind: InvalidOperation,
                keywords: &["invalid operation", "operation not allowed"],
            },
            ClassifierRule {
                kind: RecordNotFound,
                keywords: &["document missing", "document not found", "record not found", "404"],
            },
            // Resource exhaustion before the transient families: an OOM
            // message often mentions the dependency by name too
            ClassifierRule {
                kind: OutOfMemory,
                keywords: &["out of memory", "circuit_breaking_exception", "heap space", "oom"],
            },
            ClassifierRule {
                kind: RateLimitExceeded,
                keywords: &["rate limit", "too many requests", "429"],
            },
            // Terminal markers emitted by the retry machinery
            ClassifierRule {
                kind: MaxRetriesExceeded,
                keywords: &["max retries exceeded", "maximum retries"],
            },
            ClassifierRule {
                kind: RetryFailed,
                keywords: &["retry failed"],
            },
            // Transient infrastructure, most specific first
            ClassifierRule {
                kind: ConnectionRefused,
                keywords: &["connection refused", "econnrefused"],
            },
            ClassifierRule {
                kind: ConnectionTimeout,
                keywords: &["timed out", "timeout", "etimedout"],
            },
            ClassifierRule {
                kind: ElasticsearchUnavailable,
                keywords: &[
                    "no living connections",
                    "elasticsearch unavailable",
                    "elasticsearch connection",
                    "cluster_block_exception",
                    "503",
                ],
            },
            ClassifierRule {
                kind: RabbitmqUnavailable,
                keywords: &["rabbitmq", "amqp", "channel closed", "broker unavailable"],
            },
            ClassifierRule {
                kind: DatabaseUnavailable,
                keywords: &[
                    "mongodb",
                    "database connection",
                    "datastore unavailable",
                    "topology was destroyed",
                ],
            },
            ClassifierRule {
                kind: NetworkError,
                keywords: &[
                    "network",
                    "connection reset",
                    "econnreset",
                    "socket hang up",
                    "getaddrinfo",
                    "dns",
                    "enotfound",
                ],
            },
        ];

        Self { rules }
    }

    /// Classify raw failure text; first matching rule wins
    pub fn classify(&self, message: &str) -> ErrorKind {
        let lowered = message.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.matches(&lowered))
            .map(|rule| rule.kind)
            .unwrap_or(ErrorKind::InternalError)
    }

    /// Classify an error, folding in its source chain so that wrapped
    /// causes ("apply failed: connection refused") still match
    pub fn classify_error(&self, error: &anyhow::Error) -> ErrorKind {
        self.classify(&format!("{error:#}"))
    }

    /// The rule list, in evaluation order
    pub fn rules(&self) -> &[ClassifierRule] {
        &self.rules
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_family() {
        let c = ErrorClassifier::standard();

        assert_eq!(c.classify("connect ECONNREFUSED 127.0.0.1:9200"), ErrorKind::ConnectionRefused);
        assert_eq!(c.classify("Request timed out after 30000ms"), ErrorKind::ConnectionTimeout);
        assert_eq!(c.classify("No Living connections"), ErrorKind::ElasticsearchUnavailable);
        assert_eq!(c.classify("AMQP channel closed unexpectedly"), ErrorKind::RabbitmqUnavailable);
        assert_eq!(c.classify("MongoDB topology was destroyed"), ErrorKind::DatabaseUnavailable);
        assert_eq!(c.classify("socket hang up"), ErrorKind::NetworkError);
    }

    #[test]
    fn test_specific_beats_general() {
        let c = ErrorClassifier::standard();

        // Contains both "index_not_found" and could look like a generic
        // search-index failure; the specific rule is evaluated first
        assert_eq!(
            c.classify("index_not_found_exception: no such index [listings]"),
            ErrorKind::IndexNotFound
        );

        // "connection refused" wins over the generic network family
        assert_eq!(
            c.classify("network failure: connection refused by peer"),
            ErrorKind::ConnectionRefused
        );
    }

    #[test]
    fn test_data_quality_family() {
        let c = ErrorClassifier::standard();

        assert_eq!(c.classify("missing required field: recordId"), ErrorKind::MissingField);
        assert_eq!(c.classify("expected value at line 1 column 1"), ErrorKind::InvalidMessageFormat);
        assert_eq!(c.classify("validation failed for operation"), ErrorKind::ValidationError);
    }

    #[test]
    fn test_business_family() {
        let c = ErrorClassifier::standard();

        assert_eq!(c.classify("version_conflict_engine_exception"), ErrorKind::RecordAlreadyExists);
        assert_eq!(c.classify("document missing exception"), ErrorKind::RecordNotFound);
        assert_eq!(c.classify("security_exception: action denied"), ErrorKind::PermissionDenied);
    }

    #[test]
    fn test_resource_and_terminal() {
        let c = ErrorClassifier::standard();

        assert_eq!(c.classify("circuit_breaking_exception: data too large"), ErrorKind::OutOfMemory);
        assert_eq!(c.classify("429 Too Many Requests"), ErrorKind::RateLimitExceeded);
        assert_eq!(c.classify("max retries exceeded for message"), ErrorKind::MaxRetriesExceeded);
    }

    #[test]
    fn test_unmatched_defaults_to_internal() {
        let c = ErrorClassifier::standard();
        assert_eq!(c.classify("some novel failure nobody anticipated"), ErrorKind::InternalError);
        assert_eq!(c.classify(""), ErrorKind::InternalError);
    }

    #[test]
    fn test_case_insensitive() {
        let c = ErrorClassifier::standard();
        assert_eq!(c.classify("CONNECTION REFUSED"), ErrorKind::ConnectionRefused);
    }

    #[test]
    fn test_classify_error_includes_chain() {
        let c = ErrorClassifier::standard();
        let root = anyhow::anyhow!("connection refused");
        let wrapped = root.context("failed to apply INSERT for record 42");
        assert_eq!(c.classify_error(&wrapped), ErrorKind::ConnectionRefused);
    }

    #[test]
    fn test_rules_exposed_in_order() {
        let c = ErrorClassifier::standard();
        assert!(!c.rules().is_empty());
        assert_eq!(c.rules()[0].kind, ErrorKind::MissingField);
    }
}
