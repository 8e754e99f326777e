use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RelayError;

pub const DEFAULT_CONTENT_TYPE: &str = "application/json";
pub const SUCCESS_OUTPUT: &[u8] = b"OK";

/// One job execution handed to us by the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub job_name: String,
    #[serde(default)]
    pub config: HashMap<String, String>,
}

impl ExecutionRequest {
    pub fn new(job_name: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            config: HashMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }
}

/// A config value that could not be parsed. The request still goes ahead
/// with the field's default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseWarning {
    pub key: &'static str,
    pub value: String,
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' has invalid value {:?}", self.key, self.value)
    }
}

/// Everything `basic_publish` needs, parsed once from the request config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishParameters {
    pub exchange: String,
    pub routing_key: String,
    pub mandatory: bool,
    pub immediate: bool,
    pub content_type: String,
    pub payload: Vec<u8>,
}

impl PublishParameters {
    /// Parses the loosely typed request config.
    ///
    /// Missing keys take their defaults. Malformed `mandatory`/`immediate`
    /// values fall back to `false` and are returned as warnings.
    pub fn from_config(config: &HashMap<String, String>) -> (Self, Vec<ParseWarning>) {
        let mut warnings = Vec::new();
        let mut flag = |key: &'static str| match config.get(key) {
            None => false,
            Some(raw) => parse_bool(raw).unwrap_or_else(|| {
                warnings.push(ParseWarning {
                    key,
                    value: raw.clone(),
                });
                false
            }),
        };

        let mandatory = flag("mandatory");
        let immediate = flag("immediate");

        let params = PublishParameters {
            exchange: config.get("exchange").cloned().unwrap_or_default(),
            routing_key: config.get("queue_name").cloned().unwrap_or_default(),
            mandatory,
            immediate,
            content_type: config
                .get("header")
                .cloned()
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            payload: config
                .get("payload")
                .map(|p| p.as_bytes().to_vec())
                .unwrap_or_default(),
        };
        (params, warnings)
    }
}

/// Accepts the same spellings job definitions have always used for flags.
fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

/// What the orchestrator gets back: the output bytes and, on failure, the
/// error. On failure the output is the error's text.
#[derive(Debug)]
pub struct ExecutionResponse {
    pub output: Vec<u8>,
    pub error: Option<RelayError>,
}

impl ExecutionResponse {
    pub fn ok() -> Self {
        Self {
            output: SUCCESS_OUTPUT.to_vec(),
            error: None,
        }
    }

    pub fn failed(error: RelayError) -> Self {
        Self {
            output: error.to_string().into_bytes(),
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_when_keys_missing() {
        let (params, warnings) = PublishParameters::from_config(&HashMap::new());
        assert!(warnings.is_empty());
        assert_eq!(params.exchange, "");
        assert_eq!(params.routing_key, "");
        assert!(!params.mandatory);
        assert!(!params.immediate);
        assert_eq!(params.content_type, "application/json");
        assert!(params.payload.is_empty());
    }

    #[test]
    fn test_all_keys_present() {
        let (params, warnings) = PublishParameters::from_config(&config(&[
            ("exchange", "jobs"),
            ("queue_name", "q1"),
            ("mandatory", "true"),
            ("immediate", "T"),
            ("header", "text/plain"),
            ("payload", "hello"),
        ]));
        assert!(warnings.is_empty());
        assert_eq!(params.exchange, "jobs");
        assert_eq!(params.routing_key, "q1");
        assert!(params.mandatory);
        assert!(params.immediate);
        assert_eq!(params.content_type, "text/plain");
        assert_eq!(params.payload, b"hello");
    }

    #[test]
    fn test_malformed_flag_defaults_false_with_warning() {
        let (params, warnings) = PublishParameters::from_config(&config(&[
            ("queue_name", "q1"),
            ("mandatory", "notabool"),
            ("immediate", "yes"),
        ]));
        assert!(!params.mandatory);
        assert!(!params.immediate);
        assert_eq!(
            warnings,
            vec![
                ParseWarning {
                    key: "mandatory",
                    value: "notabool".to_string()
                },
                ParseWarning {
                    key: "immediate",
                    value: "yes".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_parse_bool_spellings() {
        for t in ["1", "t", "T", "TRUE", "true", "True"] {
            assert_eq!(parse_bool(t), Some(true), "{}", t);
        }
        for f in ["0", "f", "F", "FALSE", "false", "False"] {
            assert_eq!(parse_bool(f), Some(false), "{}", f);
        }
        assert_eq!(parse_bool(""), None);
        assert_eq!(parse_bool("tRuE"), None);
    }

    #[test]
    fn test_failed_response_carries_error_text() {
        let resp = ExecutionResponse::failed(RelayError::Publish("boom".to_string()));
        assert!(!resp.is_ok());
        assert_eq!(resp.output, b"Publish error: boom");
    }
}
