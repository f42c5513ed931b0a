use url::Url;

use crate::http::canonical_path;

/// Exploit and admin-probe paths nobody legitimate asks for.
pub const DEFAULT_HONEYPOT_PATHS: &[&str] = &[
    "/.env",
    "/.git",
    "/.aws",
    "/.DS_Store",
    "/wp-config.php",
    "/wp-config.php.bak",
    "/wp-admin/install.php",
    "/wp-admin/setup-config.php",
    "/phpmyadmin",
    "/pma",
    "/myadmin",
    "/adminer.php",
    "/administrator",
    "/server-status",
    "/cgi-bin",
    "/vendor/phpunit",
    "/wp-content/debug.log",
];

/// Lowercase User-Agent fragments of crawlers, scrapers and scanners.
pub const DEFAULT_BOT_SIGNATURES: &[&str] = &[
    "ahrefsbot",
    "semrushbot",
    "mj12bot",
    "dotbot",
    "petalbot",
    "bytespider",
    "blexbot",
    "dataforseobot",
    "serpstatbot",
    "megaindex",
    "sqlmap",
    "nikto",
    "nmap",
    "masscan",
    "zgrab",
    "nuclei",
    "wpscan",
    "acunetix",
    "python-requests",
    "scrapy",
    "go-http-client",
    "libwww-perl",
];

/// Outcome of the abuse checks, in evaluation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    /// Path is (under) a honeypot and the referer is not the site itself.
    Honeypot,
    /// User-Agent contains this signature.
    Bot(String),
}

/// Stateless request screen: honeypot paths first, then User-Agent signatures.
///
/// Neither check looks at the body and neither does I/O.
#[derive(Debug, Clone)]
pub struct AbuseFilter {
    honeypots: Vec<String>,
    signatures: Vec<String>,
    site_domain: String,
}

impl AbuseFilter {
    pub fn new<H, S>(honeypots: H, signatures: S, site_domain: &str) -> Self
    where
        H: IntoIterator,
        H::Item: AsRef<str>,
        S: IntoIterator,
        S::Item: AsRef<str>,
    {
        Self {
            honeypots: honeypots
                .into_iter()
                .map(|p| canonical_path(p.as_ref()).to_ascii_lowercase())
                .filter(|p| p != "/")
                .collect(),
            signatures: signatures
                .into_iter()
                .map(|s| s.as_ref().to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
            site_domain: site_domain.to_ascii_lowercase(),
        }
    }

    /// A filter with the built-in lists.
    pub fn with_defaults(site_domain: &str) -> Self {
        Self::new(DEFAULT_HONEYPOT_PATHS, DEFAULT_BOT_SIGNATURES, site_domain)
    }

    pub fn check(&self, path: &str, user_agent: Option<&str>, referer: Option<&str>) -> Verdict {
        if self.is_honeypot(path) && !self.is_own_referer(referer) {
            return Verdict::Honeypot;
        }
        // An absent UA is typical of service-to-service calls, never a bot by itself.
        let Some(ua) = user_agent.map(str::trim).filter(|ua| !ua.is_empty()) else {
            return Verdict::Allow;
        };
        let ua = ua.to_ascii_lowercase();
        match self.signatures.iter().find(|sig| ua.contains(sig.as_str())) {
            Some(sig) => Verdict::Bot(sig.clone()),
            None => Verdict::Allow,
        }
    }

    fn is_honeypot(&self, path: &str) -> bool {
        let path = canonical_path(path).to_ascii_lowercase();
        self.honeypots.iter().any(|hp| {
            path == *hp
                || path
                    .strip_prefix(hp.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }

    fn is_own_referer(&self, referer: Option<&str>) -> bool {
        let Some(host) = referer
            .and_then(|r| Url::parse(r).ok())
            .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
        else {
            return false;
        };
        host == self.site_domain
            || host
                .strip_suffix(self.site_domain.as_str())
                .is_some_and(|sub| sub.ends_with('.'))
    }
}
