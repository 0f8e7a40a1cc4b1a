//! Identifier normalization.
//!
//! Raw identifiers arrive in many shapes (`@John.Smith`, `100004`,
//! `https://m.facebook.com/profile.php?id=100004&ref=x`). Everything is
//! reduced to an [`Identifier`] whose [`key`](Identifier::key) is compared
//! exactly by the resolver.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use proofly_core::ProfileRecord;

/// `scheme://` prefix.
static SCHEME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.-]*://").unwrap());

/// `www.` / `m.` / `mobile.` host prefix.
static HOST_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?i)(www|m|mobile)\.").unwrap());

/// `id=<digits>` query parameter.
static ID_PARAM: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:^|&)id=(\d+)(?:&|$)").unwrap());

/// A Facebook vanity username.
static USERNAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9.]+$").unwrap());

/// First path segments that are never usernames.
const RESERVED_PATHS: &[&str] = &[
    "people", "pages", "groups", "events", "photo.php", "photos", "watch", "story.php",
    "permalink.php", "profile.php", "home.php", "login", "search",
];

/// Query keys that never identify a profile.
const TRACKING_KEYS: &[&str] = &[
    "ref", "fref", "hc_ref", "hc_location", "fbclid", "gclid", "mibextid", "trk", "rdid",
    "share_url", "sk",
];

/// Kind of a normalized identifier; declaration order is canonical-id priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IdentifierKind {
    Numeric,
    Username,
    Url,
}

/// A normalized exact identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Identifier {
    /// Digits only.
    Numeric(String),
    /// Lower-cased, no leading `@`.
    Username(String),
    /// `host/path[?query]` with scheme and `www.`/`m.` removed; a bare
    /// host keeps its trailing `/`.
    Url(String),
}

impl Identifier {
    pub fn kind(&self) -> IdentifierKind {
        match self {
            Identifier::Numeric(_) => IdentifierKind::Numeric,
            Identifier::Username(_) => IdentifierKind::Username,
            Identifier::Url(_) => IdentifierKind::Url,
        }
    }

    /// The bare normalized value.
    pub fn value(&self) -> &str {
        match self {
            Identifier::Numeric(v) | Identifier::Username(v) | Identifier::Url(v) => v,
        }
    }

    /// Key used for exact matching. Prefixed so a numeric id never collides
    /// with a username or URL of the same text.
    pub fn key(&self) -> String {
        match self {
            Identifier::Numeric(v) => format!("id:{}", v),
            Identifier::Username(v) => format!("user:{}", v),
            Identifier::Url(v) => format!("url:{}", v),
        }
    }

    /// Whether the remote relationship checks accept this identifier.
    pub fn is_facebook_style(&self) -> bool {
        matches!(self, Identifier::Numeric(_) | Identifier::Username(_))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.value())
    }
}

/// Normalize a numeric id: trimmed, ASCII digits only.
pub fn numeric_id(raw: &str) -> Option<Identifier> {
    let trimmed = raw.trim();
    if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
        Some(Identifier::Numeric(trimmed.to_string()))
    } else {
        None
    }
}

/// Normalize a username-like id.
///
/// All-digit values become numeric ids; values that look like URLs are
/// normalized as URLs.
pub fn username(raw: &str) -> Vec<Identifier> {
    let trimmed = raw.trim();
    if trimmed.contains('/') {
        return profile_url(trimmed);
    }
    let name = trimmed.trim_start_matches('@').to_lowercase();
    if name.is_empty() {
        return Vec::new();
    }
    match numeric_id(&name) {
        Some(numeric) => vec![numeric],
        None => vec![Identifier::Username(name)],
    }
}

/// Normalize a profile URL.
///
/// Yields the URL identifier plus any id embedded in it: the numeric id of
/// `profile.php?id=N`, or the username of `facebook.com/<username>`.
pub fn profile_url(raw: &str) -> Vec<Identifier> {
    let trimmed = raw.trim();
    let without_scheme = SCHEME.replace(trimmed, "");
    let without_prefix = HOST_PREFIX.replace(&without_scheme, "");

    let (location, query) = match without_prefix.split_once('?') {
        Some((location, query)) => (location, Some(query.split('#').next().unwrap_or(""))),
        None => (without_prefix.split('#').next().unwrap_or(""), None),
    };
    let (host, path) = match location.split_once('/') {
        Some((host, path)) => (host.to_lowercase(), path.trim_matches('/')),
        None => (location.to_lowercase(), ""),
    };
    if host.is_empty() {
        return Vec::new();
    }

    let is_facebook = host == "facebook.com" || host.ends_with(".facebook.com") || host == "fb.com";
    let mut ids = Vec::new();

    if is_facebook && path.eq_ignore_ascii_case("profile.php") {
        if let Some(id) = query.and_then(|q| ID_PARAM.captures(q)).map(|c| c[1].to_string()) {
            ids.push(Identifier::Url(format!("{}/profile.php?id={}", host, id)));
            ids.push(Identifier::Numeric(id));
            return ids;
        }
    }

    // On Facebook the path alone names the profile; elsewhere the query
    // may carry the identity (`/profile/view?id=111`).
    let query = if is_facebook {
        None
    } else {
        query.and_then(identifying_query)
    };
    // Always carries a `/`, which usernames and numeric ids never do, so
    // canonical ids of different kinds cannot share text.
    let mut location = format!("{}/{}", host, path);
    if let Some(query) = query {
        location.push('?');
        location.push_str(&query);
    }
    ids.push(Identifier::Url(location));

    if is_facebook && !path.contains('/') && USERNAME.is_match(path) {
        let lowered = path.to_lowercase();
        if !RESERVED_PATHS.contains(&lowered.as_str()) {
            ids.extend(username(&lowered));
        }
    }
    ids
}

/// Query parameters sorted, with empty pairs and tracking keys removed.
fn identifying_query(query: &str) -> Option<String> {
    let mut pairs: Vec<&str> = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter(|pair| {
            let key = pair.split('=').next().unwrap_or("").to_ascii_lowercase();
            !(key.is_empty()
                || key.starts_with("utm_")
                || key.starts_with("__")
                || TRACKING_KEYS.contains(&key.as_str()))
        })
        .collect();
    if pairs.is_empty() {
        return None;
    }
    pairs.sort_unstable();
    pairs.dedup();
    Some(pairs.join("&"))
}

/// Every exact identifier carried by a profile record, deduplicated, in
/// field order (facebook id, numeric id, username, profile URL).
pub fn record_identifiers(record: &ProfileRecord) -> Vec<Identifier> {
    let mut ids: Vec<Identifier> = Vec::new();
    let mut push_all = |found: Vec<Identifier>| {
        for id in found {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    };

    if let Some(raw) = record.facebook_id.as_deref() {
        push_all(username(raw));
    }
    if let Some(raw) = record.numeric_id.as_deref() {
        push_all(numeric_id(raw).into_iter().collect());
    }
    if let Some(raw) = record.username.as_deref() {
        push_all(username(raw));
    }
    if let Some(raw) = record.profile_url.as_deref() {
        push_all(profile_url(raw));
    }
    ids
}

/// Normalized email for candidate matching.
pub fn email(raw: &str) -> Option<String> {
    let trimmed = raw.trim().to_lowercase();
    (trimmed.contains('@') && trimmed.len() > 2).then_some(trimmed)
}

/// Normalized full name for candidate matching: lower-cased, single spaces.
pub fn full_name(raw: &str) -> Option<String> {
    let joined = raw
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ");
    (!joined.is_empty()).then_some(joined)
}
