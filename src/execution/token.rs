//! Opaque continuation tokens

use super::bundle::TableQuery;
use crate::error::{QueryError, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Encodes the query of the next page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryNextPageToken(String);

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenPayload {
    query: TableQuery,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_bytes_per_page: Option<u64>,
}

impl QueryNextPageToken {
    pub fn new(query: &TableQuery, max_bytes_per_page: Option<u64>) -> Result<Self> {
        let payload = TokenPayload {
            query: query.clone(),
            max_bytes_per_page,
        };
        let json = serde_json::to_vec(&payload)
            .map_err(|e| QueryError::Internal(format!("Could not encode next page token: {}", e)))?;
        Ok(Self(URL_SAFE_NO_PAD.encode(json)))
    }

    pub fn from_token(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn token(&self) -> &str {
        &self.0
    }

    pub fn decode(&self) -> Result<(TableQuery, Option<u64>)> {
        let bytes = URL_SAFE_NO_PAD
            .decode(self.0.as_bytes())
            .map_err(|e| QueryError::InvalidArgument(format!("Invalid next page token: {}", e)))?;
        let payload: TokenPayload = serde_json::from_slice(&bytes)
            .map_err(|e| QueryError::InvalidArgument(format!("Invalid next page token: {}", e)))?;
        Ok((payload.query, payload.max_bytes_per_page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_carries_query_and_budget() {
        let mut query = TableQuery::new("select * from syn123 where \"has space\" = 'x'");
        query.offset = Some(25);
        let token = QueryNextPageToken::new(&query, Some(4096)).unwrap();
        assert!(!token.token().contains('='));

        let (decoded, budget) = token.decode().unwrap();
        assert_eq!(decoded, query);
        assert_eq!(budget, Some(4096));
    }

    #[test]
    fn test_garbage_token() {
        let err = QueryNextPageToken::from_token("not a token!").decode().unwrap_err();
        assert!(matches!(err, QueryError::InvalidArgument(_)));
        let err = QueryNextPageToken::from_token(URL_SAFE_NO_PAD.encode(b"[1,2]"))
            .decode()
            .unwrap_err();
        assert!(matches!(err, QueryError::InvalidArgument(_)));
    }
}
