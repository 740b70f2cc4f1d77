//! Translate between server file URIs and client filesystem paths.
//!
//! DBGp engines report locations as `file://` URIs built from the
//! debuggee's own filesystem view, which may be a different machine, a
//! container, or simply a different path prefix than what the IDE has
//! checked out. [`PathMapping`] holds an ordered table of
//! server-prefix/client-prefix pairs and picks the longest matching prefix
//! in either direction; [`path_to_uri`]/[`uri_to_path`] implement the
//! underlying conversion rules (Windows drive letters, UNC shares, POSIX
//! paths) a single mapping entry's two sides are translated through.

#![warn(missing_docs)]

use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use url::Url;

const UNSAFE_PATH_CHARS: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'|')
    .add(b'^')
    .add(b'[')
    .add(b']');

/// Convert a client filesystem path to a `file://` URI.
///
/// - `<letter>:\…` or `<letter>:/…` (Windows absolute path) becomes
///   `file:///<letter>:/…`, back-slashes mapped to forward slashes and
///   unsafe characters percent-encoded.
/// - `\\host\share\…` (UNC path) becomes `file://host/share/…`, the host
///   lowercased.
/// - A bare drive letter `<letter>:` is normalized to `<letter>:\` first.
/// - Anything else is treated as a POSIX path: `file://` + the path.
#[must_use]
pub fn path_to_uri(path: &str) -> String {
    if let Some(unc_rest) = path.strip_prefix(r"\\") {
        let mut parts = unc_rest.splitn(2, ['\\', '/']);
        let host = parts.next().unwrap_or("").to_ascii_lowercase();
        let remainder = parts.next().unwrap_or("");
        let encoded = encode_path_segments(&remainder.replace('\\', "/"));
        return format!("file://{host}/{encoded}");
    }

    if is_bare_drive_letter(path) {
        return path_to_uri(&format!(r"{path}\"));
    }

    if is_windows_drive_path(path) {
        let drive = &path[..1];
        let remainder = &path[2..]; // skip "<letter>:"
        let remainder = remainder.replace('\\', "/");
        let remainder = remainder.trim_start_matches('/');
        let encoded = encode_path_segments(remainder);
        return format!("file:///{drive}:/{encoded}");
    }

    let encoded = encode_path_segments(path);
    format!("file://{encoded}")
}

/// Convert a `file://` URI to the filesystem path it denotes. URIs with a
/// non-`file` scheme (`dbgp:…`, `sshfs://…`) pass through unchanged.
#[must_use]
pub fn uri_to_path(uri: &str) -> String {
    if !is_file_uri(uri) {
        return uri.to_string();
    }

    let rest = &uri[FILE_SCHEME_PREFIX.len()..];

    if let Some(after_slash) = rest.strip_prefix('/') {
        let decoded = percent_decode_str(after_slash).decode_utf8_lossy();
        if is_drive_prefixed(&decoded) {
            return decoded.replace('/', "\\");
        }
        return format!("/{decoded}");
    }

    if rest.is_empty() {
        return "/".to_string();
    }

    // UNC form: host/remainder.
    let mut parts = rest.splitn(2, '/');
    let host = parts.next().unwrap_or("").to_ascii_lowercase();
    let remainder = parts.next().unwrap_or("");
    let decoded = percent_decode_str(remainder).decode_utf8_lossy().replace('/', "\\");
    format!(r"\\{host}\{decoded}")
}

const FILE_SCHEME_PREFIX: &str = "file://";

fn is_file_uri(uri: &str) -> bool {
    match Url::parse(uri) {
        Ok(url) => url.scheme() == "file",
        Err(_) => uri.starts_with(FILE_SCHEME_PREFIX),
    }
}

fn encode_path_segments(path: &str) -> String {
    path.split('/').map(|seg| utf8_percent_encode(seg, UNSAFE_PATH_CHARS).to_string()).collect::<Vec<_>>().join("/")
}

fn is_bare_drive_letter(path: &str) -> bool {
    path.len() == 2 && path.as_bytes()[0].is_ascii_alphabetic() && path.as_bytes()[1] == b':'
}

fn is_windows_drive_path(path: &str) -> bool {
    path.len() >= 3
        && path.as_bytes()[0].is_ascii_alphabetic()
        && path.as_bytes()[1] == b':'
        && matches!(path.as_bytes()[2], b'\\' | b'/')
}

fn is_drive_prefixed(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Windows-URI detection used by [`same_uri`]: `file:///<letter>:/…` or an
/// authority-bearing `file://<host>/…` (UNC) form.
fn is_windows_style_uri(uri: &str) -> bool {
    if let Some(rest) = uri.strip_prefix("file:///") {
        return is_drive_prefixed(rest);
    }
    if let Some(rest) = uri.strip_prefix(FILE_SCHEME_PREFIX) {
        return !rest.is_empty() && !rest.starts_with('/');
    }
    false
}

/// Case-fold a URI for use as a lookup key, the way log points and
/// breakpoints key themselves: lowercased if it is a Windows-style
/// `file://` URI, unchanged otherwise (POSIX URIs are case-sensitive).
#[must_use]
pub fn case_fold_key(uri: &str) -> String {
    if is_windows_style_uri(uri) { uri.to_ascii_lowercase() } else { uri.to_string() }
}

/// URI equality per the DBGp adapter's rules: byte-equal, except when
/// either side is a Windows-style `file://` URI, in which case the
/// comparison is case-insensitive.
#[must_use]
pub fn same_uri(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    if is_windows_style_uri(a) || is_windows_style_uri(b) {
        return a.eq_ignore_ascii_case(b);
    }
    false
}

fn normalize_prefix(uri: &str) -> String {
    if uri.ends_with('/') { uri.to_string() } else { format!("{uri}/") }
}

/// Normalize one side of a mapping entry to URL form: a raw filesystem
/// path (POSIX, Windows drive, or UNC) is run through [`path_to_uri`]; an
/// entry that is already a URI (contains a `scheme://`) passes through
/// unchanged.
fn ensure_uri_form(side: &str) -> String {
    if side.contains("://") { side.to_string() } else { path_to_uri(side) }
}

/// One server-URI/client-URI pair in a [`PathMapping`] table.
#[derive(Debug, Clone)]
struct Entry {
    server: String,
    client: String,
}

/// An ordered table of server-URI/client-path-URI prefix pairs.
///
/// Lookups pick the longest matching prefix; an entry whose `client` side
/// (for [`to_server`](PathMapping::to_server)) or `server` side (for
/// [`to_client`](PathMapping::to_client)) matches exactly beats any
/// prefix match.
#[derive(Debug, Clone, Default)]
pub struct PathMapping {
    entries: Vec<Entry>,
}

impl PathMapping {
    /// Build a mapping from `(server_side, client_side)` pairs. Each side may
    /// be given as a raw filesystem path or as a URI already; raw paths are
    /// run through [`path_to_uri`] first, then both sides are normalized to
    /// end with a trailing slash for prefix comparison.
    pub fn new(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        let entries = pairs
            .into_iter()
            .map(|(server, client)| Entry {
                server: normalize_prefix(&ensure_uri_form(&server)),
                client: normalize_prefix(&ensure_uri_form(&client)),
            })
            .collect();
        Self { entries }
    }

    /// Translate a server file URI to the corresponding client filesystem
    /// path. Entries are matched against their server side; on a match the
    /// matched prefix is replaced with the paired client prefix and the
    /// remainder is translated to a path. With no match, the server URI is
    /// converted to a path unchanged.
    #[must_use]
    pub fn to_client(&self, server_uri: &str) -> String {
        match self.best_match(server_uri, Side::Server) {
            Some((matched_len, replacement)) => uri_to_path(&format!("{replacement}{}", &server_uri[matched_len..])),
            None => uri_to_path(server_uri),
        }
    }

    /// Translate a client filesystem path to the corresponding server file
    /// URI. The path is first converted to its client URI form, then
    /// matched against entries' client side; on a match the matched prefix
    /// is replaced with the paired server prefix. With no match, the
    /// client URI form is returned unchanged.
    #[must_use]
    pub fn to_server(&self, client_path: &str) -> String {
        let client_uri = path_to_uri(client_path);
        match self.best_match(&client_uri, Side::Client) {
            Some((matched_len, replacement)) => format!("{replacement}{}", &client_uri[matched_len..]),
            None => client_uri,
        }
    }

    fn best_match(&self, uri: &str, side: Side) -> Option<(usize, &str)> {
        let mut best: Option<(usize, &str)> = None;
        for entry in &self.entries {
            let (this, other) = match side {
                Side::Server => (&entry.server, &entry.client),
                Side::Client => (&entry.client, &entry.server),
            };
            let bare = this.trim_end_matches('/');
            if uri == bare {
                return Some((uri.len(), other.trim_end_matches('/')));
            }
            if uri.starts_with(this.as_str()) {
                let len = this.len();
                if best.is_none_or(|(best_len, _)| len > best_len) {
                    best = Some((len, other.as_str()));
                }
            }
        }
        best
    }
}

#[derive(Clone, Copy)]
enum Side {
    Server,
    Client,
}
