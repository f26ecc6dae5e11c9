//! Response helpers shared by every outbound client.

use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::error::{status_error, Error, Result};

/// Body of a 200 response, or the mapped error for anything else.
pub(crate) async fn read_ok_body(res: Response) -> Result<Vec<u8>> {
    let status = res.status();
    let bytes = res.bytes().await?;
    if status != StatusCode::OK {
        return Err(status_error(status, &String::from_utf8_lossy(&bytes)));
    }
    Ok(bytes.to_vec())
}

/// Decode a JSON body, naming the endpoint and failing field on mismatch.
pub(crate) fn decode_json<T: DeserializeOwned>(endpoint: &str, bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| Error::decode(endpoint, e))
}

/// Body of any 2xx response. Used where servers answer `201 Created`.
pub(crate) async fn read_success_body(res: Response) -> Result<Vec<u8>> {
    let status = res.status();
    let bytes = res.bytes().await?;
    if !status.is_success() {
        return Err(status_error(status, &String::from_utf8_lossy(&bytes)));
    }
    Ok(bytes.to_vec())
}
