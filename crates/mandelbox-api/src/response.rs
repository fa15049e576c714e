// Status-plus-body response wrapper.
//
// Every remote call in this crate resolves to an `ApiResponse` once the
// server has answered, regardless of status code. A body that is missing or
// fails to parse yields `json: None`; classification happens upstream.

use serde::de::DeserializeOwned;
use tracing::trace;

use crate::error::Error;

/// A remote response reduced to its status code and optionally-parsed body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse<T> {
    pub status: u16,
    pub json: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn new(status: u16, json: Option<T>) -> Self {
        Self { status, json }
    }

    /// Whether the status code is one of `codes`.
    pub fn status_in(&self, codes: &[u16]) -> bool {
        codes.contains(&self.status)
    }

    pub fn is_ok(&self) -> bool {
        self.status == 200
    }

    /// Map the parsed body, keeping the status.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ApiResponse<U> {
        ApiResponse {
            status: self.status,
            json: self.json.map(f),
        }
    }
}

impl<T: DeserializeOwned> ApiResponse<T> {
    /// Read a `reqwest::Response` into a status and a best-effort JSON body.
    pub(crate) async fn read(resp: reqwest::Response) -> Result<Self, Error> {
        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(Error::Transport)?;
        let json = if body.trim().is_empty() {
            None
        } else {
            match serde_json::from_str(&body) {
                Ok(value) => Some(value),
                Err(e) => {
                    trace!(status, error = %e, "response body is not the expected JSON");
                    None
                }
            }
        };
        Ok(Self { status, json })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_in_matches_any_listed_code() {
        let resp: ApiResponse<()> = ApiResponse::new(202, None);
        assert!(resp.status_in(&[200, 202]));
        assert!(!resp.status_in(&[401, 422]));
        assert!(!resp.is_ok());
    }

    #[test]
    fn map_keeps_status() {
        let resp = ApiResponse::new(200, Some(2_u32)).map(|n| n * 10);
        assert_eq!(resp, ApiResponse::new(200, Some(20)));
    }
}
