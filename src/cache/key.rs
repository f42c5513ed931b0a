use std::fmt;

use url::Url;

use crate::http::Method;

/// Canonical request identity: method plus absolute URL.
///
/// Request headers (cookies, user agent, language) are deliberately not part
/// of the key; one entry serves every visitor.
///
/// ```
/// use frontdoor::cache::CacheKey;
/// use frontdoor::http::Method;
/// use url::Url;
///
/// let origin = Url::parse("https://www.example.com").unwrap();
/// let key = CacheKey::for_target(&Method::Get, &origin, "/api/posts?page=2").unwrap();
/// assert_eq!(key.as_str(), "GET https://www.example.com/api/posts?page=2");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(method: &Method, url: &Url) -> Self {
        Self(format!("{method} {url}"))
    }

    /// Resolves `target` (path and query) against the public origin.
    pub fn for_target(method: &Method, origin: &Url, target: &str) -> Result<Self, url::ParseError> {
        Ok(Self::new(method, &origin.join(target)?))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> Url {
        Url::parse("https://www.example.com/").unwrap()
    }

    #[test]
    fn method_is_part_of_identity() {
        let get = CacheKey::for_target(&Method::Get, &origin(), "/api/posts").unwrap();
        let head = CacheKey::for_target(&Method::Head, &origin(), "/api/posts").unwrap();
        assert_ne!(get, head);
    }

    #[test]
    fn query_is_part_of_identity() {
        let a = CacheKey::for_target(&Method::Get, &origin(), "/api/posts?page=1").unwrap();
        let b = CacheKey::for_target(&Method::Get, &origin(), "/api/posts?page=2").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn absolute_target_path_replaces_origin_path() {
        let base = Url::parse("https://www.example.com/blog/").unwrap();
        let key = CacheKey::for_target(&Method::Get, &base, "/wp-json/wp/v2/posts").unwrap();
        assert_eq!(key.as_str(), "GET https://www.example.com/wp-json/wp/v2/posts");
    }
}
