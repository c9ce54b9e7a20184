//! Request rewriting toward the upstream.
//!
//! The director is what makes this a reverse proxy: it runs on every request
//! before dispatch and points it at the configured origin.

use axum::http::header::HOST;
use axum::http::request::Parts;
use axum::http::uri::{PathAndQuery, Uri};

use crate::upstream::UpstreamTarget;

/// Rewrites an inbound request head in place. Infallible.
pub trait Director: Send + Sync {
    fn rewrite(&self, parts: &mut Parts);
}

/// Points requests at a single fixed upstream origin.
#[derive(Debug, Clone)]
pub struct UpstreamDirector {
    target: UpstreamTarget,
}

impl UpstreamDirector {
    pub fn new(target: UpstreamTarget) -> Self {
        Self { target }
    }

    pub fn target(&self) -> &UpstreamTarget {
        &self.target
    }
}

impl Director for UpstreamDirector {
    fn rewrite(&self, parts: &mut Parts) {
        let mut uri_parts = std::mem::take(&mut parts.uri).into_parts();
        uri_parts.scheme = Some(self.target.scheme().clone());
        uri_parts.authority = Some(self.target.authority().clone());
        uri_parts.path_and_query = match uri_parts.path_and_query.take() {
            Some(path) if path.as_str() != "*" => Some(path),
            // Asterisk-form (`OPTIONS *`) has no absolute-URL spelling; ask the
            // origin's root instead.
            _ => Some(PathAndQuery::from_static("/")),
        };

        // Scheme, authority and path are all present, so this cannot fail.
        parts.uri = Uri::from_parts(uri_parts).unwrap_or_default();
        parts.headers.insert(HOST, self.target.host_header().clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn director(target: &str) -> UpstreamDirector {
        UpstreamDirector::new(UpstreamTarget::parse(target).unwrap())
    }

    fn rewrite(director: &UpstreamDirector, request: Request<()>) -> Parts {
        let (mut parts, _) = request.into_parts();
        director.rewrite(&mut parts);
        parts
    }

    #[test]
    fn origin_form_gets_target_scheme_and_authority() {
        let parts = rewrite(
            &director("http://127.0.0.1:9001"),
            Request::get("/x?y=1")
                .header(HOST, "127.0.0.1:9000")
                .body(())
                .unwrap(),
        );
        assert_eq!(parts.uri.to_string(), "http://127.0.0.1:9001/x?y=1");
        assert_eq!(parts.headers[HOST], "127.0.0.1:9001");
    }

    #[test]
    fn absolute_form_authority_is_replaced() {
        let parts = rewrite(
            &director("https://backend.internal:8443"),
            Request::post("http://attacker.example/login")
                .body(())
                .unwrap(),
        );
        assert_eq!(parts.uri.scheme_str(), Some("https"));
        assert_eq!(
            parts.uri.authority().map(|a| a.as_str()),
            Some("backend.internal:8443")
        );
        assert_eq!(parts.uri.path(), "/login");
        assert_eq!(parts.headers[HOST], "backend.internal:8443");
    }

    #[test]
    fn target_path_is_not_prepended() {
        let parts = rewrite(
            &director("http://backend.local/api"),
            Request::get("/health").body(()).unwrap(),
        );
        assert_eq!(parts.uri.to_string(), "http://backend.local/health");
    }

    #[test]
    fn only_one_host_header_survives() {
        let parts = rewrite(
            &director("http://127.0.0.1:9001"),
            Request::get("/")
                .header(HOST, "a.example")
                .header(HOST, "b.example")
                .body(())
                .unwrap(),
        );
        assert_eq!(parts.headers.get_all(HOST).iter().count(), 1);
    }

    #[test]
    fn asterisk_form_targets_origin_root() {
        let parts = rewrite(
            &director("http://127.0.0.1:9001"),
            Request::options("*").body(()).unwrap(),
        );
        assert_eq!(parts.uri.to_string(), "http://127.0.0.1:9001/");
        assert_eq!(parts.headers[HOST], "127.0.0.1:9001");
    }
}
