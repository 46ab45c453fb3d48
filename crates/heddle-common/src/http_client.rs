//! Minimal HTTP client abstraction shared across crates, plus the hardened
//! reqwest-backed implementation used in production.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

/// HTTP client trait for sending raw HTTP requests.
pub trait HttpClient {
    /// Error type returned by the HTTP client
    type Error: std::error::Error + Display + Send + Sync + 'static;

    /// Send an HTTP request and return the response.
    fn send_http(
        &self,
        request: http::Request<Vec<u8>>,
    ) -> impl Future<Output = core::result::Result<http::Response<Vec<u8>>, Self::Error>> + Send;
}

impl<T: HttpClient + Sync> HttpClient for Arc<T> {
    type Error = T::Error;

    fn send_http(
        &self,
        request: http::Request<Vec<u8>>,
    ) -> impl Future<Output = core::result::Result<http::Response<Vec<u8>>, Self::Error>> + Send
    {
        self.as_ref().send_http(request)
    }
}

#[cfg(feature = "reqwest-client")]
pub use hardened::HardenedClient;

#[cfg(feature = "reqwest-client")]
mod hardened {
    use std::net::{IpAddr, SocketAddr};
    use std::sync::Arc;
    use std::time::Duration;

    use reqwest::dns::{Addrs, Name, Resolve, Resolving};

    use super::HttpClient;
    use crate::error::TransportError;
    use crate::safety::is_safe_url;

    const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
    const READ_TIMEOUT: Duration = Duration::from_secs(10);
    const USER_AGENT: &str = concat!("heddle/", env!("CARGO_PKG_VERSION"));

    /// Outbound HTTP client for untrusted, user-supplied endpoints.
    ///
    /// Redirects are never followed: the safety filter runs before a request is
    /// issued, and a redirect would be an unfiltered second hop. DNS answers in
    /// private, loopback, or link-local ranges are refused before a connection
    /// is attempted.
    #[derive(Clone)]
    pub struct HardenedClient {
        inner: reqwest::Client,
    }

    impl HardenedClient {
        pub fn new() -> Result<Self, reqwest::Error> {
            let inner = reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .connect_timeout(CONNECT_TIMEOUT)
                .timeout(READ_TIMEOUT)
                .user_agent(USER_AGENT)
                .dns_resolver(Arc::new(PublicAddrResolver))
                .build()?;
            Ok(Self { inner })
        }
    }

    impl HttpClient for HardenedClient {
        type Error = TransportError;

        async fn send_http(
            &self,
            request: http::Request<Vec<u8>>,
        ) -> Result<http::Response<Vec<u8>>, Self::Error> {
            let target = request.uri().to_string();
            if !is_safe_url(&target) {
                return Err(TransportError::UnsafeUrl(target));
            }

            let (parts, body) = request.into_parts();
            let mut req = self
                .inner
                .request(parts.method, parts.uri.to_string())
                .body(body);
            for (name, value) in parts.headers.iter() {
                req = req.header(name.as_str(), value.as_bytes());
            }

            let resp = req
                .send()
                .await
                .map_err(|e| TransportError::Other(Box::new(e)))?;

            let mut builder = http::Response::builder().status(resp.status());
            for (name, value) in resp.headers().iter() {
                builder = builder.header(name.as_str(), value.as_bytes());
            }
            let body = resp
                .bytes()
                .await
                .map_err(|e| TransportError::Other(Box::new(e)))?
                .to_vec();

            builder
                .body(body)
                .map_err(|e| TransportError::InvalidRequest(e.to_string()))
        }
    }

    /// DNS resolver that refuses answers outside the public address space.
    struct PublicAddrResolver;

    impl Resolve for PublicAddrResolver {
        fn resolve(&self, name: Name) -> Resolving {
            let host = name.as_str().to_string();
            Box::pin(async move {
                let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host.as_str(), 0))
                    .await
                    .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)?
                    .filter(|addr| ip_is_public(addr.ip()))
                    .collect();
                if addrs.is_empty() {
                    return Err(Box::new(TransportError::UnsafeUrl(format!(
                        "{host} resolves only to non-public addresses"
                    )))
                        as Box<dyn std::error::Error + Send + Sync>);
                }
                Ok(Box::new(addrs.into_iter()) as Addrs)
            })
        }
    }

    /// Whether an address is routable on the public internet.
    pub(crate) fn ip_is_public(ip: IpAddr) -> bool {
        match ip {
            IpAddr::V4(v4) => {
                let octets = v4.octets();
                !(v4.is_unspecified()
                    || v4.is_loopback()
                    || v4.is_private()
                    || v4.is_link_local()
                    || v4.is_broadcast()
                    || v4.is_documentation()
                    // CGNAT 100.64.0.0/10
                    || (octets[0] == 100 && (octets[1] & 0xc0) == 64))
            }
            IpAddr::V6(v6) => {
                if let Some(mapped) = v6.to_ipv4_mapped() {
                    return ip_is_public(IpAddr::V4(mapped));
                }
                let seg = v6.segments();
                !(v6.is_unspecified()
                    || v6.is_loopback()
                    // unique-local fc00::/7
                    || (seg[0] & 0xfe00) == 0xfc00
                    // link-local fe80::/10
                    || (seg[0] & 0xffc0) == 0xfe80)
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn public_address_classes() {
            assert!(!ip_is_public("127.0.0.1".parse().unwrap()));
            assert!(!ip_is_public("10.1.2.3".parse().unwrap()));
            assert!(!ip_is_public("192.168.0.10".parse().unwrap()));
            assert!(!ip_is_public("169.254.0.1".parse().unwrap()));
            assert!(!ip_is_public("100.64.0.1".parse().unwrap()));
            assert!(!ip_is_public("::1".parse().unwrap()));
            assert!(!ip_is_public("fe80::1".parse().unwrap()));
            assert!(!ip_is_public("fd00::1".parse().unwrap()));
            assert!(!ip_is_public("::ffff:10.0.0.1".parse().unwrap()));
            assert!(ip_is_public("1.1.1.1".parse().unwrap()));
            assert!(ip_is_public("2606:4700::1111".parse().unwrap()));
        }
    }
}
