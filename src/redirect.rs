//! Post-action redirect allow-list.
//!
//! Candidates are compared on scheme, authority and path only; query and
//! fragment never take part. Allow-list patterns use glob syntax with `.`
//! treated as a separator in both host and path, so `*.example.com` matches
//! one label, `partner.example.com` never matches `partner.example.com.evil.com`
//! and `/docs.*` matches `/docs.html`.

use glob::{MatchOptions, Pattern};
use tracing::{debug, warn};
use url::Url;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone)]
struct AllowPattern {
    scheme: String,
    authority: Pattern,
    path: Pattern,
    base_path: String,
}

impl AllowPattern {
    fn parse(raw: &str) -> Option<Self> {
        let (scheme, rest) = raw.trim().split_once("://")?;
        if scheme.is_empty() || rest.is_empty() {
            return None;
        }
        let (authority, path) = match rest.find('/') {
            Some(index) => rest.split_at(index),
            None => (rest, "/"),
        };
        if authority.is_empty() {
            return None;
        }

        let path = dots_as_separators(path);
        let path = if path.ends_with("/**") {
            path
        } else if path.ends_with("/*") {
            format!("{path}*")
        } else if path.ends_with('*') {
            path
        } else if path.ends_with('/') {
            format!("{path}**")
        } else {
            format!("{path}/**")
        };
        let base_path = path
            .trim_end_matches('*')
            .trim_end_matches('/')
            .to_string();

        Some(Self {
            scheme: scheme.to_ascii_lowercase(),
            authority: Pattern::new(&dots_as_separators(authority)).ok()?,
            path: Pattern::new(&path).ok()?,
            base_path,
        })
    }

    fn matches(&self, candidate: &Candidate) -> bool {
        if self.scheme != candidate.scheme {
            return false;
        }
        if !self
            .authority
            .matches_with(&dots_as_separators(&candidate.authority), MATCH_OPTIONS)
        {
            return false;
        }
        let path = dots_as_separators(&candidate.path);
        path.trim_end_matches('/').eq_ignore_ascii_case(&self.base_path)
            || self.path.matches_with(&path, MATCH_OPTIONS)
    }
}

struct Candidate {
    scheme: String,
    authority: String,
    path: String,
}

impl Candidate {
    fn parse(value: &str) -> Option<Self> {
        let url = Url::parse(value.trim()).ok()?;
        if url.cannot_be_a_base() {
            return None;
        }
        let host = url.host_str()?;
        let authority = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        Some(Self {
            scheme: url.scheme().to_string(),
            authority,
            path: url.path().to_string(),
        })
    }
}

fn dots_as_separators(value: &str) -> String {
    value.replace('.', "/")
}

#[derive(Debug, Clone)]
pub struct RedirectValidator {
    client: Option<Url>,
    patterns: Vec<AllowPattern>,
}

impl RedirectValidator {
    /// Build a validator; patterns that cannot be parsed are skipped.
    #[must_use]
    pub fn new(client_url: Option<&str>, allowed: &[String]) -> Self {
        let client = client_url.and_then(|url| match Url::parse(url) {
            Ok(parsed) if !parsed.cannot_be_a_base() => Some(parsed),
            _ => {
                warn!(client_url = url, "ignoring unparsable client URL");
                None
            }
        });

        let patterns = allowed
            .iter()
            .filter(|raw| !raw.trim().is_empty())
            .filter_map(|raw| {
                let pattern = AllowPattern::parse(raw);
                if pattern.is_none() {
                    warn!(pattern = %raw, "ignoring malformed redirect pattern");
                }
                pattern
            })
            .collect();

        Self { client, patterns }
    }

    /// `true` when `candidate` may be echoed back to a browser.
    #[must_use]
    pub fn validate(&self, candidate: &str) -> bool {
        let Some(parsed) = Candidate::parse(candidate) else {
            debug!(redirect_to = candidate, "rejecting malformed redirect");
            return false;
        };

        if self.client.is_none() && self.patterns.is_empty() {
            return true;
        }

        if let Some(client) = &self.client
            && within_client(client, candidate)
        {
            return true;
        }

        self.patterns.iter().any(|pattern| pattern.matches(&parsed))
    }
}

fn within_client(client: &Url, candidate: &str) -> bool {
    let Ok(candidate) = Url::parse(candidate.trim()) else {
        return false;
    };
    if candidate.origin() != client.origin() {
        return false;
    }
    let base = client.path().trim_end_matches('/');
    let path = candidate.path();
    base.is_empty()
        || path == base
        || path
            .strip_prefix(base)
            .is_some_and(|rest| rest.starts_with('/'))
}
