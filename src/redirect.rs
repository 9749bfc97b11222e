//! Post-login redirect sanitization.
//!
//! Every candidate, however malformed, maps to a same-origin relative path:
//! either the candidate's own path plus its allow-listed query parameters,
//! or the default safe path.

use url::{Origin, Url, form_urlencoded};

/// Where rejected candidates land.
pub const DEFAULT_SAFE_PATH: &str = "/dashboard";
/// Login surface that receives the `callbackUrl` parameter.
pub const DEFAULT_LOGIN_PATH: &str = "/login";
/// Query parameters allowed to survive into a callback path.
pub const ALLOWED_CALLBACK_PARAMS: [&str; 5] = ["tab", "page", "filter", "sort", "view"];
/// Retained query values must be shorter than this many characters.
pub const MAX_CALLBACK_PARAM_LEN: usize = 100;

// Nested encodings beyond this depth are rejected outright.
const MAX_DECODE_ROUNDS: usize = 3;

/// A path (plus optional sanitized query) on the trusted origin.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SafeRelativePath(String);

impl SafeRelativePath {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl AsRef<str> for SafeRelativePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SafeRelativePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validates "return here after login" URLs against one trusted origin.
#[derive(Debug, Clone)]
pub struct RedirectValidator {
    base: Url,
    origin: Origin,
    default_path: String,
    login_path: String,
}

impl RedirectValidator {
    #[must_use]
    pub fn new(trusted_origin: Url) -> Self {
        let origin = trusted_origin.origin();
        Self {
            base: trusted_origin,
            origin,
            default_path: DEFAULT_SAFE_PATH.into(),
            login_path: DEFAULT_LOGIN_PATH.into(),
        }
    }

    /// Override the fallback path. Ignored unless it is itself a plain
    /// relative path.
    #[must_use]
    pub fn with_default_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        if is_plain_relative(&path) {
            self.default_path = path;
        }
        self
    }

    /// Override the login path used by [`login_redirect`](Self::login_redirect).
    #[must_use]
    pub fn with_login_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        if is_plain_relative(&path) {
            self.login_path = path;
        }
        self
    }

    #[must_use]
    pub fn trusted_origin(&self) -> &Origin {
        &self.origin
    }

    #[must_use]
    pub fn default_path(&self) -> SafeRelativePath {
        SafeRelativePath(self.default_path.clone())
    }

    /// Sanitize `candidate` into a same-origin relative path.
    ///
    /// Rejections (cross-origin, traversal, malformed) yield the default
    /// safe path and are logged at `warn`.
    #[must_use]
    pub fn validate(&self, candidate: &str) -> SafeRelativePath {
        match self.try_validate(candidate) {
            Ok(path) => path,
            Err(reason) => {
                tracing::warn!(reason, candidate_len = candidate.len(), "Rejected callback URL");
                self.default_path()
            }
        }
    }

    /// `{login_path}?callbackUrl=<sanitized candidate>`.
    #[must_use]
    pub fn login_redirect(&self, candidate: &str) -> String {
        let callback = self.validate(candidate);
        format!(
            "{}?callbackUrl={}",
            self.login_path,
            urlencoding::encode(callback.as_str())
        )
    }

    fn try_validate(&self, candidate: &str) -> Result<SafeRelativePath, &'static str> {
        if candidate.is_empty() {
            return Err("empty");
        }
        if candidate.chars().any(char::is_control) {
            return Err("control character");
        }
        if candidate.contains('\\') {
            return Err("backslash");
        }

        let resolved = if candidate.starts_with('/') {
            if candidate.starts_with("//") {
                return Err("protocol-relative");
            }
            if has_parent_segment(candidate) {
                return Err("path traversal");
            }
            self.base.join(candidate).map_err(|_| "unparseable")?
        } else {
            let url = Url::parse(candidate).map_err(|_| "unparseable")?;
            if url.origin() != self.origin {
                return Err("cross-origin");
            }
            if has_parent_segment(candidate) {
                return Err("path traversal");
            }
            url
        };

        if resolved.origin() != self.origin {
            return Err("cross-origin");
        }
        let path = resolved.path();
        if !path.starts_with('/') || path.starts_with("//") {
            return Err("not a local path");
        }

        let query = sanitized_query(&resolved);
        Ok(SafeRelativePath(if query.is_empty() {
            path.to_owned()
        } else {
            format!("{path}?{query}")
        }))
    }
}

/// Re-serialize only allow-listed parameters; for repeated keys the last
/// value wins.
fn sanitized_query(url: &Url) -> String {
    let mut kept: Vec<(String, String)> = Vec::new();
    for (key, value) in url.query_pairs() {
        let name: &str = &key;
        if !ALLOWED_CALLBACK_PARAMS.contains(&name)
            || value.chars().count() >= MAX_CALLBACK_PARAM_LEN
        {
            continue;
        }
        kept.retain(|(k, _)| k != name);
        kept.push((name.to_owned(), value.into_owned()));
    }

    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in &kept {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}

/// Detects `..` path segments in the path part of `raw`, including
/// percent-encoded and double-encoded forms.
pub(crate) fn has_parent_segment(raw: &str) -> bool {
    let path = raw.split(['?', '#']).next().unwrap_or_default();
    let mut current = path.to_owned();

    for _ in 0..=MAX_DECODE_ROUNDS {
        if current
            .split(['/', '\\'])
            .any(|segment| segment == ".." || segment == ".%2e" || segment == "%2e.")
        {
            return true;
        }
        // Escapes that are not UTF-8 cannot spell `..`; decode them lossily.
        let decoded =
            String::from_utf8_lossy(&urlencoding::decode_binary(current.as_bytes())).into_owned();
        if decoded == current {
            return false;
        }
        current = decoded;
    }
    // Still changing after several rounds: treat as hostile.
    true
}

fn is_plain_relative(path: &str) -> bool {
    path.starts_with('/')
        && !path.starts_with("//")
        && !path.contains('\\')
        && !path.chars().any(char::is_control)
        && !has_parent_segment(path)
}
