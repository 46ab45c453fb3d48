//! Authorization server discovery: PDS `oauth-protected-resource` lookup and
//! `oauth-authorization-server` metadata fetch with profile validation.

use heddle_common::{HttpClient, is_safe_url};
use http::{Request, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::OAuthError;
use crate::types::{AuthServerMetadata, ProtectedResourceMetadata};

/// Resolves the authorization server that protects a PDS, via
/// `/.well-known/oauth-protected-resource` (RFC 9728). The atproto profile
/// requires exactly one entry in `authorization_servers`.
pub async fn resolve_pds_authserver<C>(client: &C, pds_url: &Url) -> Result<Url, OAuthError>
where
    C: HttpClient + Sync,
{
    let endpoint = pds_url.join("/.well-known/oauth-protected-resource")?;
    let metadata: ProtectedResourceMetadata = get_json(client, &endpoint).await?;
    let issuer = match metadata.authorization_servers.as_slice() {
        [issuer] => issuer,
        [] => {
            return Err(OAuthError::InvalidServerMetadata(format!(
                "no authorization server listed for PDS {pds_url}"
            )));
        }
        _ => {
            return Err(OAuthError::InvalidServerMetadata(format!(
                "PDS {pds_url} lists multiple authorization servers"
            )));
        }
    };
    Ok(Url::parse(issuer)?)
}

/// Fetches and validates authorization server metadata (RFC 8414). The
/// returned issuer string is the document's own validated `issuer` (origin
/// only, per the profile), trimmed of a trailing slash so later equality
/// checks are not sensitive to that quirk.
pub async fn fetch_authserver_meta<C>(
    client: &C,
    issuer: &Url,
) -> Result<AuthServerMetadata, OAuthError>
where
    C: HttpClient + Sync,
{
    let endpoint = issuer.join("/.well-known/oauth-authorization-server")?;
    let mut metadata: AuthServerMetadata = get_json(client, &endpoint).await?;
    metadata.validate(issuer)?;
    let trimmed = metadata.issuer.trim_end_matches('/').len();
    metadata.issuer.truncate(trimmed);
    Ok(metadata)
}

/// Issuer equality up to URL normalization: same scheme, host, default-port,
/// and path, treating a missing path and `/` as equal.
pub(crate) fn issuer_equivalent(a: &str, b: &str) -> bool {
    fn normalize(url: &Url) -> Option<(String, String, u16, String)> {
        if url.query().is_some() || url.fragment().is_some() {
            return None;
        }
        let scheme = url.scheme().to_string();
        let host = url.host_str()?.to_string();
        let port = url.port_or_known_default()?;
        let path = match url.path() {
            "" | "/" => "/".to_string(),
            other => other.to_string(),
        };
        Some((scheme, host, port, path))
    }

    match (Url::parse(a), Url::parse(b)) {
        (Ok(ua), Ok(ub)) => match (normalize(&ua), normalize(&ub)) {
            (Some(na), Some(nb)) => na == nb,
            _ => false,
        },
        _ => a == b,
    }
}

/// GET through the safety filter, insisting on exactly 200. Redirects are
/// not followed, so a 3xx here is a failure like any other status.
async fn get_json<C, T>(client: &C, url: &Url) -> Result<T, OAuthError>
where
    C: HttpClient + Sync,
    T: DeserializeOwned,
{
    if !is_safe_url(url.as_str()) {
        return Err(OAuthError::UnsafeUrl(url.to_string()));
    }
    let request = Request::builder()
        .method("GET")
        .uri(url.as_str())
        .body(Vec::new())?;
    let response = client
        .send_http(request)
        .await
        .map_err(OAuthError::transport)?;
    if response.status() != StatusCode::OK {
        return Err(OAuthError::UpstreamHttp {
            status: response.status(),
            body: serde_json::from_slice(response.body()).ok(),
        });
    }
    Ok(serde_json::from_slice(response.body())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FixtureHttp, valid_metadata};

    #[test]
    fn issuer_equivalence_ignores_trailing_slash() {
        assert!(issuer_equivalent(
            "https://auth.example",
            "https://auth.example/"
        ));
        assert!(issuer_equivalent(
            "https://auth.example:443",
            "https://auth.example"
        ));
        assert!(!issuer_equivalent(
            "https://auth.example",
            "https://other.example"
        ));
        assert!(!issuer_equivalent(
            "https://auth.example",
            "https://auth.example/tenant"
        ));
    }

    #[tokio::test]
    async fn pds_discovery_requires_single_authserver() {
        let mut http = FixtureHttp::new();
        http.json(
            "https://pds.example/.well-known/oauth-protected-resource",
            r#"{"authorization_servers": ["https://auth.example"]}"#,
        );
        let pds = Url::parse("https://pds.example").unwrap();
        let issuer = resolve_pds_authserver(&http, &pds).await.unwrap();
        assert_eq!(issuer.as_str(), "https://auth.example/");

        let mut http = FixtureHttp::new();
        http.json(
            "https://pds.example/.well-known/oauth-protected-resource",
            r#"{"authorization_servers": ["https://a.example", "https://b.example"]}"#,
        );
        assert!(matches!(
            resolve_pds_authserver(&http, &pds).await,
            Err(OAuthError::InvalidServerMetadata(_))
        ));
    }

    #[tokio::test]
    async fn metadata_fetch_rejects_non_200() {
        let mut http = FixtureHttp::new();
        http.status(
            "https://auth.example/.well-known/oauth-authorization-server",
            404,
        );
        let issuer = Url::parse("https://auth.example").unwrap();
        assert!(matches!(
            fetch_authserver_meta(&http, &issuer).await,
            Err(OAuthError::UpstreamHttp { .. })
        ));
    }

    #[tokio::test]
    async fn metadata_fetch_validates_and_normalizes_issuer() {
        let mut http = FixtureHttp::new();
        http.json(
            "https://auth.example/.well-known/oauth-authorization-server",
            &serde_json::to_string(&valid_metadata("https://auth.example")).unwrap(),
        );
        let issuer = Url::parse("https://auth.example").unwrap();
        let meta = fetch_authserver_meta(&http, &issuer).await.unwrap();
        assert_eq!(meta.issuer, "https://auth.example");
    }

    #[tokio::test]
    async fn stored_issuer_is_the_documents_not_the_fetch_url() {
        // A login may start from an issuer URL carrying a path; the
        // well-known fetch still resolves against the origin, and the
        // issuer we keep is the document's validated one.
        let mut http = FixtureHttp::new();
        http.json(
            "https://auth.example/.well-known/oauth-authorization-server",
            &serde_json::to_string(&valid_metadata("https://auth.example")).unwrap(),
        );
        let issuer = Url::parse("https://auth.example/some/path").unwrap();
        let meta = fetch_authserver_meta(&http, &issuer).await.unwrap();
        assert_eq!(meta.issuer, "https://auth.example");

        // A trailing slash in the document is trimmed for later equality.
        let mut http = FixtureHttp::new();
        http.json(
            "https://auth.example/.well-known/oauth-authorization-server",
            &serde_json::to_string(&valid_metadata("https://auth.example/")).unwrap(),
        );
        let issuer = Url::parse("https://auth.example").unwrap();
        let meta = fetch_authserver_meta(&http, &issuer).await.unwrap();
        assert_eq!(meta.issuer, "https://auth.example");
    }

    #[tokio::test]
    async fn refuses_unsafe_targets() {
        let http = FixtureHttp::new();
        let pds = Url::parse("https://pds.example:8443").unwrap();
        assert!(matches!(
            resolve_pds_authserver(&http, &pds).await,
            Err(OAuthError::UnsafeUrl(_))
        ));
    }
}
