//! CORS policy: the deployed frontend, local development ports, private-LAN
//! origins, and Railway preview domains are allowed; everything else is
//! rejected with a log line.

use axum::http::{header, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};

const LOCALHOST_PORTS: [u16; 3] = [3000, 5173, 8080];
const RAILWAY_SUFFIXES: [&str; 2] = [".railway.app", ".up.railway.app"];

/// Build the gateway [`CorsLayer`].
pub fn build_cors_layer(frontend_url: Option<String>) -> CorsLayer {
    let allow_origin = AllowOrigin::predicate(move |origin: &HeaderValue, _| {
        let origin_str = origin.to_str().unwrap_or("");
        let allowed = origin_allowed(origin_str, frontend_url.as_deref());
        if !allowed {
            tracing::warn!(origin = %origin_str, "CORS origin rejected");
        }
        allowed
    });

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}

/// Decide whether `origin` may call the gateway.
fn origin_allowed(origin: &str, frontend_url: Option<&str>) -> bool {
    if origin.is_empty() {
        return false;
    }
    if let Some(frontend) = frontend_url {
        if origin.eq_ignore_ascii_case(frontend.trim_end_matches('/')) {
            return true;
        }
    }

    let Some((scheme, rest)) = origin.split_once("://") else {
        return false;
    };
    if scheme != "http" && scheme != "https" {
        return false;
    }
    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port_str)) if port_str.chars().all(|c| c.is_ascii_digit()) => {
            (host, port_str.parse::<u16>().ok())
        }
        _ => (rest, None),
    };

    // Local development ports.
    if (host == "localhost" || host == "127.0.0.1")
        && port.is_some_and(|p| LOCALHOST_PORTS.contains(&p))
    {
        return true;
    }

    // Private-LAN origins (phone testing against a dev machine).
    if is_private_lan_host(host) {
        return true;
    }

    // Railway deployments.
    RAILWAY_SUFFIXES
        .iter()
        .any(|suffix| host.ends_with(suffix))
}

/// RFC 1918 ranges: 10/8, 172.16/12, 192.168/16.
fn is_private_lan_host(host: &str) -> bool {
    let mut octets = host.split('.');
    let (Some(a), Some(b), Some(c), Some(d), None) = (
        octets.next(),
        octets.next(),
        octets.next(),
        octets.next(),
        octets.next(),
    ) else {
        return false;
    };
    let parse = |s: &str| s.parse::<u8>().ok();
    let (Some(a), Some(b), Some(_), Some(_)) = (parse(a), parse(b), parse(c), parse(d)) else {
        return false;
    };
    match a {
        10 => true,
        172 => (16..=31).contains(&b),
        192 => b == 168,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frontend_url_is_allowed() {
        assert!(origin_allowed(
            "https://tinge.example.com",
            Some("https://tinge.example.com")
        ));
        assert!(!origin_allowed("https://evil.example.com", Some("https://tinge.example.com")));
    }

    #[test]
    fn localhost_dev_ports() {
        assert!(origin_allowed("http://localhost:3000", None));
        assert!(origin_allowed("http://localhost:5173", None));
        assert!(origin_allowed("http://127.0.0.1:8080", None));
        assert!(!origin_allowed("http://localhost:9999", None));
        assert!(!origin_allowed("http://localhost", None));
    }

    #[test]
    fn private_lan_ranges() {
        assert!(origin_allowed("http://192.168.1.42:5173", None));
        assert!(origin_allowed("http://10.0.0.7:3000", None));
        assert!(origin_allowed("http://172.16.0.2:8080", None));
        assert!(origin_allowed("http://172.31.255.255", None));
        assert!(!origin_allowed("http://172.32.0.1:3000", None));
        assert!(!origin_allowed("http://8.8.8.8:3000", None));
    }

    #[test]
    fn railway_suffixes() {
        assert!(origin_allowed("https://tinge-production.up.railway.app", None));
        assert!(origin_allowed("https://tinge.railway.app", None));
        assert!(!origin_allowed("https://railway.app.evil.com", None));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(!origin_allowed("", None));
        assert!(!origin_allowed("not-a-url", None));
        assert!(!origin_allowed("ftp://192.168.1.1", None));
        assert!(!origin_allowed("http://192.168.1", None));
    }
}
