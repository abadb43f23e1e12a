use axum::http::{Request, header};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tower_governor::{GovernorError, key_extractor::KeyExtractor};
use uuid::Uuid;

/// Rate-limit key: the bearer session id when one is sent, the client IP otherwise.
///
/// The IP is taken from X-Forwarded-For, then X-Real-IP, then the peer address.
/// Requests with none of these share the localhost bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOrIpKeyExtractor;

impl KeyExtractor for SessionOrIpKeyExtractor {
    type Key = String;

    fn extract<T>(&self, req: &Request<T>) -> Result<Self::Key, GovernorError> {
        if let Some(id) = bearer_session_id(req) {
            return Ok(format!("session:{id}"));
        }
        Ok(format!("ip:{}", client_ip(req)))
    }
}

/// Rate-limit key for credential checks: always the client IP.
///
/// Session ids are free to mint, so keying logins on them would hand every new
/// session a fresh bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIpKeyExtractor;

impl KeyExtractor for ClientIpKeyExtractor {
    type Key = IpAddr;

    fn extract<T>(&self, req: &Request<T>) -> Result<Self::Key, GovernorError> {
        Ok(client_ip(req))
    }
}

fn bearer_session_id<T>(req: &Request<T>) -> Option<Uuid> {
    req.headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")?
        .trim()
        .parse()
        .ok()
}

fn client_ip<T>(req: &Request<T>) -> IpAddr {
    let forwarded = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|first| first.trim().parse().ok());
    if let Some(ip) = forwarded {
        return ip;
    }

    let real_ip = req
        .headers()
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok());
    if let Some(ip) = real_ip {
        return ip;
    }

    req.extensions()
        .get::<axum::extract::ConnectInfo<SocketAddr>>()
        .map_or(IpAddr::V4(Ipv4Addr::LOCALHOST), |info| info.0.ip())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use tokio_test::assert_ok;

    #[test]
    fn bearer_session_wins_over_ip() {
        let id = Uuid::new_v4();
        let req = Request::builder()
            .header(header::AUTHORIZATION, format!("Bearer {id}"))
            .header("x-forwarded-for", "10.0.0.7")
            .body(Body::empty())
            .unwrap();
        assert_eq!(assert_ok!(SessionOrIpKeyExtractor.extract(&req)), format!("session:{id}"));
    }

    #[test]
    fn falls_back_through_forwarding_headers() {
        let req = Request::builder()
            .header(header::AUTHORIZATION, "Bearer not-a-uuid")
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(assert_ok!(SessionOrIpKeyExtractor.extract(&req)), "ip:203.0.113.9");

        let req = Request::builder()
            .header("x-real-ip", "198.51.100.4")
            .body(Body::empty())
            .unwrap();
        assert_eq!(assert_ok!(SessionOrIpKeyExtractor.extract(&req)), "ip:198.51.100.4");

        let req = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(assert_ok!(SessionOrIpKeyExtractor.extract(&req)), "ip:127.0.0.1");
    }

    #[test]
    fn login_key_ignores_the_session() {
        let keys: Vec<IpAddr> = (0..3)
            .map(|_| {
                let req = Request::builder()
                    .header(header::AUTHORIZATION, format!("Bearer {}", Uuid::new_v4()))
                    .header("x-real-ip", "198.51.100.4")
                    .body(Body::empty())
                    .unwrap();
                assert_ok!(ClientIpKeyExtractor.extract(&req))
            })
            .collect();
        assert!(keys.iter().all(|ip| ip.to_string() == "198.51.100.4"));
    }
}
