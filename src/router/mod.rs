//! Request classification: decide which branch of the edge handles a request.
//!
//! Every request lands in exactly one [`Classification`]:
//!
//! | Order | Check                          | Result                         |
//! |-------|--------------------------------|--------------------------------|
//! | 1     | exact diagnostic path          | [`Classification::Diagnostic`] |
//! | 2     | honeypot path / bot User-Agent | [`Classification::Blocked`]    |
//! | 3     | content-management prefix      | [`Classification::ContentOrigin`] |
//! | 4     | anything else                  | [`Classification::Application`] |
//!
//! Prefixes match on whole path segments: `/wp-json` matches `/wp-json` and
//! `/wp-json/wp/v2/posts`, never `/wp-jsonx`. Prefixes and incoming paths are
//! both compared in canonical form, so `//wp-json` and `/./wp-json/` match too.

use crate::http::{Method, Request, canonical_path};
use crate::security::{AbuseFilter, Verdict};

/// Content-management paths served by the content origin.
pub const DEFAULT_ORIGIN_PREFIXES: &[&str] = &[
    "/wp-admin",
    "/wp-content/plugins",
    "/wp-content/uploads",
    "/wp-includes",
    "/wp-json",
    "/api",
    "/wp-login.php",
    "/wp-signup.php",
    "/wp-cron.php",
    "/wp-comments-post.php",
    "/xmlrpc.php",
    "/sitemap.xml",
    "/sitemap_index.xml",
    "/wp-sitemap.xml",
    "/robots.txt",
];

/// JSON API namespaces whose `GET` responses go through the SWR cache.
pub const DEFAULT_API_PREFIXES: &[&str] = &["/wp-json", "/api"];

/// Application paths relayed as static assets.
pub const DEFAULT_ASSET_PREFIXES: &[&str] = &["/_next/static", "/static", "/assets"];

pub const DEFAULT_ASSET_EXTENSIONS: &[&str] = &[
    "js", "css", "map", "png", "jpg", "jpeg", "gif", "svg", "webp", "avif", "ico", "woff",
    "woff2", "ttf", "otf",
];

/// Why a request was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReason {
    Honeypot,
    Bot(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticPath {
    /// Configuration and counters snapshot.
    Status,
    /// Live backend probe.
    Probe,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Blocked(BlockReason),
    Diagnostic(DiagnosticPath),
    /// `cacheable` is set for `GET` reads of an API namespace.
    ContentOrigin { cacheable: bool },
    /// `asset` is set for `GET`s of static files.
    Application { asset: bool },
}


/// A path prefix matched on segment boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPrefix(String);

impl PathPrefix {
    pub fn parse(prefix: &str) -> Self {
        Self(canonical_path(prefix))
    }

    /// `true` when `path` equals the prefix or continues it with `/`.
    /// Both sides are compared in [`canonical_path`] form.
    pub fn matches(&self, path: &str) -> bool {
        let path = canonical_path(path);
        match path.strip_prefix(self.0.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/') || self.0 == "/",
            None => false,
        }
    }
}

/// Static routing table.
#[derive(Debug, Clone)]
pub struct RouteTable {
    pub status_path: String,
    pub probe_path: String,
    pub origin_prefixes: Vec<PathPrefix>,
    pub api_prefixes: Vec<PathPrefix>,
    pub asset_prefixes: Vec<PathPrefix>,
    pub asset_extensions: Vec<String>,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self {
            status_path: "/__router/status".to_owned(),
            probe_path: "/__router/probe".to_owned(),
            origin_prefixes: DEFAULT_ORIGIN_PREFIXES.iter().map(|p| PathPrefix::parse(p)).collect(),
            api_prefixes: DEFAULT_API_PREFIXES.iter().map(|p| PathPrefix::parse(p)).collect(),
            asset_prefixes: DEFAULT_ASSET_PREFIXES.iter().map(|p| PathPrefix::parse(p)).collect(),
            asset_extensions: DEFAULT_ASSET_EXTENSIONS.iter().map(|e| (*e).to_owned()).collect(),
        }
    }
}

impl RouteTable {
    fn diagnostic(&self, path: &str) -> Option<DiagnosticPath> {
        let path = canonical_path(path);
        if path == canonical_path(&self.status_path) {
            Some(DiagnosticPath::Status)
        } else if path == canonical_path(&self.probe_path) {
            Some(DiagnosticPath::Probe)
        } else {
            None
        }
    }

    fn is_asset(&self, path: &str) -> bool {
        if self.asset_prefixes.iter().any(|p| p.matches(path)) {
            return true;
        }
        let file = path.rsplit('/').next().unwrap_or_default();
        file.rsplit_once('.').is_some_and(|(stem, ext)| {
            !stem.is_empty()
                && self
                    .asset_extensions
                    .iter()
                    .any(|e| e.eq_ignore_ascii_case(ext))
        })
    }
}

/// Pure request classifier: routing table plus abuse filter.
#[derive(Debug, Clone)]
pub struct Classifier {
    routes: RouteTable,
    filter: AbuseFilter,
}

impl Classifier {
    pub fn new(routes: RouteTable, filter: AbuseFilter) -> Self {
        Self { routes, filter }
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn classify(&self, request: &Request) -> Classification {
        let path = canonical_path(request.path());
        let path = path.as_str();

        if let Some(diag) = self.routes.diagnostic(path) {
            return Classification::Diagnostic(diag);
        }

        match self
            .filter
            .check(path, request.user_agent(), request.referer())
        {
            Verdict::Allow => {}
            Verdict::Honeypot => return Classification::Blocked(BlockReason::Honeypot),
            Verdict::Bot(sig) => return Classification::Blocked(BlockReason::Bot(sig)),
        }

        let is_get = *request.method() == Method::Get;
        if self.routes.origin_prefixes.iter().any(|p| p.matches(path)) {
            let cacheable = is_get && self.routes.api_prefixes.iter().any(|p| p.matches(path));
            return Classification::ContentOrigin { cacheable };
        }

        Classification::Application {
            asset: is_get && self.routes.is_asset(path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> Classifier {
        Classifier::new(RouteTable::default(), AbuseFilter::with_defaults("example.com"))
    }

    fn get(path: &str) -> Request {
        Request::new(Method::Get, path).header("User-Agent", "Mozilla/5.0")
    }

    // ── PathPrefix ────────────────────────────────────────────────────────────

    #[test]
    fn prefix_matches_exact_and_nested() {
        let p = PathPrefix::parse("/wp-json");
        assert!(p.matches("/wp-json"));
        assert!(p.matches("/wp-json/"));
        assert!(p.matches("/wp-json/wp/v2/posts"));
    }

    #[test]
    fn prefix_does_not_match_longer_segment() {
        let p = PathPrefix::parse("/wp-json");
        assert!(!p.matches("/wp-jsonx"));
        assert!(!p.matches("/wp-json.bak"));
        assert!(!p.matches("/"));
    }

    #[test]
    fn prefix_trailing_slash_normalized() {
        let p = PathPrefix::parse("/wp-admin/");
        assert!(p.matches("/wp-admin"));
        assert!(p.matches("/wp-admin/edit.php"));
    }

    #[test]
    fn prefix_matches_dot_and_doubled_slash_spellings() {
        let p = PathPrefix::parse("/wp-admin");
        assert!(p.matches("//wp-admin"));
        assert!(p.matches("/./wp-admin/edit.php"));
        assert!(p.matches("/blog/../wp-admin"));
        assert!(!p.matches("/wp-admin/.."));
    }

    // ── Classifier ────────────────────────────────────────────────────────────

    #[test]
    fn obfuscated_honeypot_paths_are_blocked() {
        let c = classifier();
        for path in ["//.env", "/./wp-config.php", "/static/../.git/config"] {
            assert_eq!(
                c.classify(&get(path)),
                Classification::Blocked(BlockReason::Honeypot),
                "{path}"
            );
        }
    }

    #[test]
    fn diagnostic_paths_come_first() {
        let c = classifier();
        let scanner = Request::new(Method::Get, "/__router/status").header("User-Agent", "nikto");
        assert_eq!(
            c.classify(&scanner),
            Classification::Diagnostic(DiagnosticPath::Status)
        );
        assert_eq!(
            c.classify(&get("/__router/probe")),
            Classification::Diagnostic(DiagnosticPath::Probe)
        );
    }

    #[test]
    fn blocked_before_routing() {
        let c = classifier();
        assert_eq!(
            c.classify(&get("/.env")),
            Classification::Blocked(BlockReason::Honeypot)
        );
        let bot = Request::new(Method::Get, "/wp-json/wp/v2/posts").header("User-Agent", "SemrushBot");
        assert_eq!(
            c.classify(&bot),
            Classification::Blocked(BlockReason::Bot("semrushbot".into()))
        );
    }

    #[test]
    fn api_reads_are_cacheable_origin_requests() {
        let c = classifier();
        assert_eq!(
            c.classify(&get("/wp-json/wp/v2/posts")),
            Classification::ContentOrigin { cacheable: true }
        );
        assert_eq!(
            c.classify(&get("/api/posts")),
            Classification::ContentOrigin { cacheable: true }
        );
    }

    #[test]
    fn origin_writes_and_admin_are_not_cacheable() {
        let c = classifier();
        let post = Request::new(Method::Post, "/wp-comments-post.php");
        assert_eq!(
            c.classify(&post),
            Classification::ContentOrigin { cacheable: false }
        );
        assert_eq!(
            c.classify(&get("/wp-admin/edit.php")),
            Classification::ContentOrigin { cacheable: false }
        );
        let api_post = Request::new(Method::Post, "/wp-json/wp/v2/comments");
        assert_eq!(
            c.classify(&api_post),
            Classification::ContentOrigin { cacheable: false }
        );
    }

    #[test]
    fn lookalike_paths_go_to_application() {
        let c = classifier();
        assert_eq!(
            c.classify(&get("/wp-jsonx")),
            Classification::Application { asset: false }
        );
        assert_eq!(
            c.classify(&get("/apis/overview")),
            Classification::Application { asset: false }
        );
    }

    #[test]
    fn static_files_are_assets() {
        let c = classifier();
        assert_eq!(
            c.classify(&get("/_next/static/chunks/main.js")),
            Classification::Application { asset: true }
        );
        assert_eq!(
            c.classify(&get("/favicon.ico")),
            Classification::Application { asset: true }
        );
        assert_eq!(
            c.classify(&get("/blog/hello-world")),
            Classification::Application { asset: false }
        );
        assert_eq!(
            c.classify(&get("/.well-known")),
            Classification::Application { asset: false }
        );
    }

    #[test]
    fn internal_calls_without_user_agent_pass() {
        let c = classifier();
        let internal = Request::new(Method::Get, "/wp-json/wp/v2/pages");
        assert_eq!(
            c.classify(&internal),
            Classification::ContentOrigin { cacheable: true }
        );
    }
}
