/// Identifier syntax checks
///
/// Concrnt identifiers are opaque 42-character strings with a fixed prefix:
/// `con1` for an account root (CCID), `ccs1` for a domain identity (CSID),
/// `cck1` for a sub-key (CKID). Anything containing a `.` is a DNS name,
/// never an identifier.

const IDENTIFIER_LEN: usize = 42;

fn has_prefix_shape(id: &str, prefix: &str) -> bool {
    id.starts_with(prefix) && id.len() == IDENTIFIER_LEN && !id.contains('.')
}

/// Whether `id` is syntactically a CCID (account root)
pub fn is_ccid(id: &str) -> bool {
    has_prefix_shape(id, "con1")
}

/// Whether `id` is syntactically a CSID (domain identity)
pub fn is_csid(id: &str) -> bool {
    has_prefix_shape(id, "ccs1")
}

/// Whether `id` is syntactically a CKID (sub-key)
pub fn is_ckid(id: &str) -> bool {
    has_prefix_shape(id, "cck1")
}

/// Split a resource identifier into its bare id and optional home suffix
///
/// `"t1@example.com"` → `("t1", Some("example.com"))`; the suffix may also
/// be a CCID or CSID that still needs resolution to an FQDN.
pub fn split_resource_host(id: &str) -> (&str, Option<&str>) {
    match id.split_once('@') {
        Some((bare, host)) if !host.is_empty() => (bare, Some(host)),
        _ => (id, None),
    }
}
