//! HKP request dispatch and response formatting.
//!
//! The HKP format is HTML, and rather odd as far as status codes go. For
//! interoperability the output matches what PKS keyservers generate, down to
//! the whitespace: business errors (no search term, no matches, backend
//! trouble) are answered with `200 OK` and an error page, and only malformed
//! requests get a 4xx status.

use std::collections::HashMap;
use std::fmt::Write as _;

use http::header::{CONNECTION, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use tracing::{debug, warn};

use crate::html::{escape_html, format_fingerprint, last_chars};
use crate::keystore::{KeyRecord, KeyStore};

/// Path serving index, vindex and get operations.
pub const LOOKUP_PATH: &str = "/pks/lookup";
/// Path for key submission, which is always refused.
pub const ADD_PATH: &str = "/pks/add";

const HKP_ERROR_PREFIX: &str = "<title>Public Key Server -- Error</title><p>\r\n\
                                <h1>Public Key Server -- Error</h1><p>\r\n";

const HKP_INDEX_SUFFIX: &str = "</pre>";
const HKP_INDEX_REVOKED: &str = "*** KEY REVOKED ***";
const HKP_INDEX_UID_INDENT: &str = "                               ";

const HKP_GET_SUFFIX: &str = "\r\n</pre>";

/// Body sent for any request to [`ADD_PATH`].
pub const HKP_ADD_RESPONSE: &str = "<title>Public Key Server -- Error</title><p>\r\n\
                                    <h1>Public Key Server -- Error</h1><p>\r\n\
                                    Adding of keys not allowed";

/// Body sent for unknown paths.
pub const HKP_NOTFOUND_RESPONSE: &str =
    "<HEAD><TITLE>404 Not Found</TITLE></HEAD><BODY>unknown uri in pks request</BODY>\r\n";

const ERR_NO_QUERY: &str = "pks request had no query string";
const ERR_NO_OP: &str = "pks request did not include an <b>op</b> property";
const ERR_BAD_OP: &str = "pks request had an invalid <b>op</b> property";
const ERR_NO_SEARCH: &str = "pks request did not include a <b>search</b> property";
const ERR_RETRIEVE: &str = "Error retrieving key(s)";
const ERR_NO_KEYS: &str = "No matching keys in database";
const ERR_NO_KEY: &str = "No matching key in database";

/// A response produced by [`HkpDispatcher::handle`].
#[derive(Debug, Clone)]
pub struct HkpResponse {
    /// HTTP status.
    pub status: StatusCode,
    /// Response body.
    pub body: Vec<u8>,
    /// Response headers.
    pub headers: HeaderMap,
}

impl HkpResponse {
    fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html"));
        headers.insert(CONNECTION, HeaderValue::from_static("close"));
        Self {
            status,
            body: body.into(),
            headers,
        }
    }

    /// An HKP error page. Served with `200 OK`, as PKS does.
    fn error(details: &str) -> Self {
        Self::new(StatusCode::OK, format!("{HKP_ERROR_PREFIX}{details}"))
    }

    /// The body as text, lossily decoded.
    pub fn body_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Parse a raw query string into a parameter map. Later duplicates win.
pub fn parse_query(query: Option<&str>) -> HashMap<String, String> {
    query
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .into_owned()
                .collect()
        })
        .unwrap_or_default()
}

/// Routes HKP requests to a [`KeyStore`] and renders PKS-compatible pages.
#[derive(Debug, Clone)]
pub struct HkpDispatcher<K> {
    keystore: K,
}

impl<K: KeyStore> HkpDispatcher<K> {
    /// Create a dispatcher serving keys from `keystore`.
    pub fn new(keystore: K) -> Self {
        Self { keystore }
    }

    /// Handle one request.
    pub fn handle(
        &self,
        method: &Method,
        path: &str,
        query: &HashMap<String, String>,
    ) -> HkpResponse {
        debug!(%method, path, "HKP request");

        if path == ADD_PATH {
            return HkpResponse::new(StatusCode::METHOD_NOT_ALLOWED, HKP_ADD_RESPONSE);
        }
        if *method != Method::GET {
            return HkpResponse::new(StatusCode::METHOD_NOT_ALLOWED, Vec::new());
        }
        if path != LOOKUP_PATH {
            return HkpResponse::new(StatusCode::NOT_FOUND, HKP_NOTFOUND_RESPONSE);
        }

        if query.is_empty() {
            let mut response = HkpResponse::error(ERR_NO_QUERY);
            response.status = StatusCode::METHOD_NOT_ALLOWED;
            return response;
        }

        match query.get("op").map(String::as_str) {
            None | Some("") => HkpResponse::error(ERR_NO_OP),
            Some(op) if op.eq_ignore_ascii_case("index") => self.lookup_index(query, false),
            Some(op) if op.eq_ignore_ascii_case("vindex") => self.lookup_index(query, true),
            Some(op) if op.eq_ignore_ascii_case("get") => self.lookup_get(query),
            Some(_) => HkpResponse::error(ERR_BAD_OP),
        }
    }

    fn lookup_index(&self, query: &HashMap<String, String>, verbose: bool) -> HkpResponse {
        let fingerprints = query
            .get("fingerprint")
            .is_some_and(|v| v.eq_ignore_ascii_case("on"));

        let search = match search_term(query) {
            Some(s) => s,
            None => return HkpResponse::error(ERR_NO_SEARCH),
        };

        let keys = match self.keystore.query(search, verbose) {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "HKP server key store error");
                return HkpResponse::error(ERR_RETRIEVE);
            }
        };

        // Not finding any keys is an error condition.
        if keys.is_empty() {
            return HkpResponse::error(ERR_NO_KEYS);
        }

        let term = escape_html(search);
        let mut page = if verbose {
            format!(
                "<title>Public Key Server -- Verbose Index ``{term}''</title><p>\
                 <h1>Public Key Server -- Verbose Index ``{term}''</h1><p>\
                 <pre>"
            )
        } else {
            format!(
                "<title>Public Key Server -- Verbose Index ``{term}''</title><p>\
                 <h1>Public Key Server -- Verbose Index ``{term}''</h1><p>\
                 <pre>Type bits /keyID    Date       User ID\r\n"
            )
        };

        for key in &keys {
            append_key_info(&mut page, key, verbose, fingerprints);
        }
        page.push_str(HKP_INDEX_SUFFIX);

        debug!(matches = keys.len(), verbose, "HKP index served");
        HkpResponse::new(StatusCode::OK, page)
    }

    fn lookup_get(&self, query: &HashMap<String, String>) -> HkpResponse {
        let search = match search_term(query) {
            Some(s) => s,
            None => return HkpResponse::error(ERR_NO_SEARCH),
        };

        let armored = match self.keystore.export_armored(search) {
            Ok(armored) => armored,
            Err(e) => {
                warn!(error = %e, "HKP server key store error");
                return HkpResponse::error(ERR_RETRIEVE);
            }
        };

        if armored.is_empty() {
            return HkpResponse::error(ERR_NO_KEY);
        }

        let term = escape_html(search);
        let prefix = format!(
            "<title>Public Key Server -- Get ``{term}''</title><p>\r\n\
             <h1>Public Key Server -- Get ``{term}''</h1><p>\r\n\
             <pre>\r\n"
        );

        let mut body = Vec::with_capacity(prefix.len() + armored.len() + HKP_GET_SUFFIX.len());
        body.extend_from_slice(prefix.as_bytes());
        body.extend_from_slice(&armored);
        body.extend_from_slice(HKP_GET_SUFFIX.as_bytes());

        HkpResponse::new(StatusCode::OK, body)
    }
}

fn search_term(query: &HashMap<String, String>) -> Option<&str> {
    query
        .get("search")
        .map(String::as_str)
        .filter(|s| !s.is_empty())
}

/// Render a user id as PKS does: `name <email>` with the email linked to the
/// key, just the name, or nothing.
fn format_uid(name: Option<&str>, key_id: &str, email: Option<&str>) -> String {
    let name = name.filter(|n| !n.is_empty());
    let email = email.filter(|e| !e.is_empty());

    match (name, email) {
        (Some(name), Some(email)) => format!(
            "{name} &lt;<a href=\"/pks/lookup?op=get&search=0x{}\">{email}</a>&gt;",
            last_chars(key_id, 8)
        ),
        (Some(name), None) => format!("{name} "),
        _ => String::new(),
    }
}

fn format_date(created: i64) -> String {
    chrono::DateTime::from_timestamp(created, 0)
        .unwrap_or_default()
        .format("%Y/%m/%d")
        .to_string()
}

fn append_key_info(page: &mut String, key: &KeyRecord, verbose: bool, fingerprints: bool) {
    let primary = key.primary();
    let key_id = last_chars(&key.fingerprint, 8);

    let first_uid = match key.uids.first() {
        _ if key.revoked => HKP_INDEX_REVOKED.to_string(),
        Some(uid) => format_uid(uid.name.as_deref(), &key.fingerprint, uid.email.as_deref()),
        None => String::new(),
    };

    // printf's "% 5d": a sign slot, then padded to five columns.
    let bits = format!("{:>5}", format!(" {}", primary.bits));
    let _ = write!(
        page,
        "pub {bits}{}/<a href=\"/pks/lookup?op=get&search=0x{key_id}\">{key_id}</a> {} {first_uid}\r\n",
        primary.algorithm.letter(),
        format_date(primary.created),
    );

    if fingerprints {
        let _ = write!(
            page,
            "     Key fingerprint = {}\r\n",
            format_fingerprint(&key.fingerprint)
        );
    }

    // The revoked marker stands in for the whole uid list.
    if key.revoked {
        return;
    }

    for (i, uid) in key.uids.iter().enumerate() {
        if i > 0 {
            let text = format_uid(uid.name.as_deref(), &key.fingerprint, uid.email.as_deref());
            let _ = write!(page, "{HKP_INDEX_UID_INDENT}{text}\r\n");
        }

        if verbose {
            for sig in &uid.signatures {
                let signer = format_uid(sig.name.as_deref(), &sig.key_id, sig.email.as_deref());
                let sig_id = last_chars(&sig.key_id, 8);
                let _ = write!(
                    page,
                    "sig        <a href=\"/pks/lookup?op=get&search=0x{sig_id}\">{sig_id}</a>             {signer}\r\n"
                );
            }
        }
    }
}
