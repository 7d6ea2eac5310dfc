// SPDX-License-Identifier: Apache-2.0

use std::error::Error;
use std::net::SocketAddr;

use tower::BoxError;

/// Parse an endpoint
pub fn parse_endpoint(s: &str) -> Result<SocketAddr, Box<dyn Error + Send + Sync + 'static>> {
    // Use actual localhost address instead of localhost name
    let s = if s.starts_with("localhost:") {
        s.replace("localhost:", "127.0.0.1:")
    } else {
        s.to_string()
    };
    let sa: SocketAddr = s.parse()?;
    Ok(sa)
}

/// Parse unix file permissions given in octal, with or without a leading
/// `0` or `0o`
pub(crate) fn parse_file_mode(s: &str) -> Result<u32, BoxError> {
    let s = s.trim();
    let digits = s.strip_prefix("0o").unwrap_or(s);
    let mode = u32::from_str_radix(digits, 8)
        .map_err(|e| format!("invalid file permissions {:?}: {}", s, e))?;
    if mode > 0o777 {
        return Err(format!("file permissions out of range: {}", s).into());
    }
    Ok(mode)
}
