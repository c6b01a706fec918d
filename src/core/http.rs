//! Blocking HTTP helpers on top of `ureq`.
//!
//! One agent per call so each request carries its own global timeout
//! (audio and artwork use different bounds).

use std::io::Read;
use std::time::Duration;

use log::trace;

use crate::core::error::{CoreError, Result};

fn agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

/// Map transport errors onto the core taxonomy
pub fn map_error(url: &str, error: ureq::Error) -> CoreError {
    match error {
        ureq::Error::StatusCode(404) => CoreError::NotFound(url.to_string()),
        ureq::Error::StatusCode(code) => CoreError::FetchFailed(format!("{}: HTTP {}", url, code)),
        ureq::Error::Timeout(_) => CoreError::FetchFailed(format!("{}: timed out", url)),
        other => CoreError::FetchFailed(format!("{}: {}", url, other)),
    }
}

/// GET `url` and return a streaming body reader
pub fn open_stream(url: &str, timeout: Duration) -> Result<Box<dyn Read + Send>> {
    trace!("GET {} (timeout {:?})", url, timeout);
    let response = agent(timeout).get(url).call().map_err(|e| map_error(url, e))?;
    Ok(Box::new(response.into_body().into_reader()))
}

/// GET `url` and read the whole body as text
pub fn get_text(url: &str, timeout: Duration) -> Result<String> {
    trace!("GET {} (timeout {:?})", url, timeout);
    let mut response = agent(timeout).get(url).call().map_err(|e| map_error(url, e))?;
    response
        .body_mut()
        .read_to_string()
        .map_err(|e| map_error(url, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            map_error("http://x", ureq::Error::StatusCode(404)),
            CoreError::NotFound(_)
        ));
        assert!(matches!(
            map_error("http://x", ureq::Error::StatusCode(500)),
            CoreError::FetchFailed(_)
        ));
    }
}
