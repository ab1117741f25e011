//! Endpoint URL helpers for the opc.tcp scheme.

use log::error;
use uasc_types::StatusCode;
use url::Url;

/// The URL scheme of the OPC UA TCP binary mapping.
pub const OPC_TCP_SCHEME: &str = "opc.tcp";

fn opc_url_from_str(s: &str) -> Result<Url, StatusCode> {
    Url::parse(s).map_err(|err| {
        error!("Cannot parse url \"{}\", error = {:?}", s, err);
        StatusCode::BadTcpEndpointUrlInvalid
    })
}

/// Test if the url is a valid opc.tcp url.
pub fn is_opc_ua_binary_url(url: &str) -> bool {
    opc_url_from_str(url).is_ok_and(|url| url.scheme() == OPC_TCP_SCHEME)
}

/// Extract the host and port from an endpoint url, substituting
/// `default_port` when the url carries none.
pub fn hostname_port_from_url(url: &str, default_port: u16) -> Result<(String, u16), StatusCode> {
    let url = opc_url_from_str(url)?;
    if url.scheme() != OPC_TCP_SCHEME {
        error!("Url \"{}\" does not use the opc.tcp scheme", url);
        return Err(StatusCode::BadTcpEndpointUrlInvalid);
    }
    let host = url
        .host_str()
        .ok_or(StatusCode::BadTcpEndpointUrlInvalid)?
        .to_string();
    Ok((host, url.port().unwrap_or(default_port)))
}

/// Compare two endpoint urls ignoring the host part. A client may reach the
/// server through a name the server does not know itself by.
pub fn url_matches_except_host(a: &str, b: &str) -> bool {
    let (Ok(a), Ok(b)) = (opc_url_from_str(a), opc_url_from_str(b)) else {
        return false;
    };
    a.scheme() == b.scheme()
        && a.port_or_known_default() == b.port_or_known_default()
        && a.path().trim_end_matches('/') == b.path().trim_end_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_check() {
        assert!(is_opc_ua_binary_url("opc.tcp://localhost:4841/UA/Sample"));
        assert!(!is_opc_ua_binary_url("http://localhost:4841"));
        assert!(!is_opc_ua_binary_url("not a url"));
    }

    #[test]
    fn host_and_port() {
        assert_eq!(
            hostname_port_from_url("opc.tcp://localhost:4841/x", 4840).unwrap(),
            ("localhost".to_string(), 4841)
        );
        assert_eq!(
            hostname_port_from_url("opc.tcp://10.0.0.7", 4840).unwrap(),
            ("10.0.0.7".to_string(), 4840)
        );
    }

    #[test]
    fn match_ignores_host() {
        assert!(url_matches_except_host(
            "opc.tcp://server.internal:4841/UA",
            "opc.tcp://10.0.0.7:4841/UA"
        ));
        assert!(!url_matches_except_host(
            "opc.tcp://a:4841/UA",
            "opc.tcp://a:4842/UA"
        ));
    }
}
