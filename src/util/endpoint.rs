use std::net::IpAddr;
use thiserror::Error;
use url::Url;

/// Reasons an API base URL is refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EndpointError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    #[error("Insecure base URL: HTTPS required (except loopback for development)")]
    Insecure,
    #[error("Base URL must not carry a query or fragment")]
    HasQuery,
}

/// Validate the backend base URL.
///
/// The API token travels on every request, so plain `http` is accepted only
/// for loopback hosts. The returned URL always ends in `/` so endpoint paths
/// can be joined onto it.
pub fn validate_api_base(url_str: &str) -> Result<Url, EndpointError> {
    let mut url = Url::parse(url_str)?;

    match url.scheme() {
        "https" => {}
        "http" => {
            if !is_loopback(&url) {
                return Err(EndpointError::Insecure);
            }
            tracing::warn!(base_url = %url, "Using non-HTTPS API base URL (loopback only)");
        }
        scheme => return Err(EndpointError::UnsupportedScheme(scheme.to_owned())),
    }

    if url.query().is_some() || url.fragment().is_some() {
        return Err(EndpointError::HasQuery);
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn is_loopback(url: &Url) -> bool {
    match url.host_str() {
        Some("localhost") => true,
        Some(host) => host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<IpAddr>()
            .is_ok_and(|ip| ip.is_loopback()),
        None => false,
    }
}
