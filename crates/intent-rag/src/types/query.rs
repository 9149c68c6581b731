//! Query request types

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Basic query request (`/intent`, `/query`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    /// The user's question
    pub query: String,
}

/// Query request with intent routing (`/query_with_intent`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentQueryRequest {
    /// The user's question
    pub query: String,

    /// Stream the answer incrementally (default: true)
    #[serde(default = "default_stream")]
    pub stream: bool,
}

/// Query-string parameters for `/query/simple`
#[derive(Debug, Clone, Deserialize)]
pub struct SimpleQueryParams {
    pub query: String,
}

fn default_stream() -> bool {
    true
}

/// Reject empty or whitespace-only queries
pub fn validate_query(query: &str) -> Result<&str> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Err(Error::validation("Query must not be empty"));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_defaults_to_true() {
        let request: IntentQueryRequest = serde_json::from_str(r#"{"query": "hi"}"#).unwrap();
        assert!(request.stream);
    }

    #[test]
    fn test_validate_query() {
        assert!(validate_query("   ").is_err());
        assert_eq!(validate_query("  how do I squat?  ").unwrap(), "how do I squat?");
    }
}
