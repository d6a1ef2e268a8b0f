use sha2::{Digest, Sha256};

/// Identity key used for visitor find-or-create.
///
/// Authenticated traffic is keyed by the user id so the same person is one
/// visitor across devices; anonymous traffic is keyed by `(ip, user_agent)`.
/// The ip is length-prefixed so a `|` inside either component cannot make
/// two different pairs collide.
pub fn identity_key(ip: &str, user_agent: &str, authenticated_user_id: Option<&str>) -> String {
    match authenticated_user_id.filter(|id| !id.is_empty()) {
        Some(user_id) => format!("user:{user_id}"),
        None => format!("anon:{}:{ip}|{user_agent}", ip.len()),
    }
}

/// Compute the visitor id for an identity key within a site.
///
/// Formula: sha256(len(site_id) + ":" + site_id + "|" + identity_key)[0..8]
/// encoded as 16 hex chars.
/// The id is a pure function of the identity, so two concurrent tracking
/// calls for the same identity always target the same primary key.
pub fn compute_visitor_id(site_id: &str, identity_key: &str) -> String {
    let input = format!("{}:{site_id}|{identity_key}", site_id.len());
    let hash = Sha256::digest(input.as_bytes());
    hex::encode(&hash[..8])
}

/// Extract the domain from a full referrer URL.
///
/// Returns `None` if referrer is empty or cannot be parsed to a non-empty host.
pub fn extract_referrer_domain(referrer: &str) -> Option<String> {
    if referrer.is_empty() {
        return None;
    }
    let stripped = referrer
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let domain = stripped.split('/').next()?;
    if domain.is_empty() {
        None
    } else {
        Some(domain.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visitor_id_is_16_hex_chars() {
        let id = compute_visitor_id("site_1", &identity_key("1.2.3.4", "Mozilla/5.0", None));
        assert_eq!(id.len(), 16, "visitor ID must be exactly 16 hex characters");
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn same_identity_same_id() {
        let key = identity_key("1.2.3.4", "Mozilla/5.0 Chrome/120", None);
        assert_eq!(
            compute_visitor_id("site_1", &key),
            compute_visitor_id("site_1", &key)
        );
    }

    #[test]
    fn sites_do_not_share_visitors() {
        let key = identity_key("1.2.3.4", "Mozilla/5.0", None);
        assert_ne!(
            compute_visitor_id("site_1", &key),
            compute_visitor_id("site_2", &key)
        );
    }

    #[test]
    fn authenticated_identity_ignores_network_fingerprint() {
        assert_eq!(
            identity_key("1.2.3.4", "UA-1", Some("u42")),
            identity_key("5.6.7.8", "UA-2", Some("u42"))
        );
        assert_eq!(identity_key("1.2.3.4", "UA", Some("")), "anon:7:1.2.3.4|UA");
    }

    #[test]
    fn pipe_inside_a_component_does_not_collide() {
        let split_in_ip = identity_key("a|b", "c", None);
        let split_in_ua = identity_key("a", "b|c", None);
        assert_ne!(split_in_ip, split_in_ua);
        assert_ne!(
            compute_visitor_id("site_1", &split_in_ip),
            compute_visitor_id("site_1", &split_in_ua)
        );
        assert_ne!(
            compute_visitor_id("s|anon:1:a", "c"),
            compute_visitor_id("s", "anon:1:a|c")
        );
    }

    #[test]
    fn extract_referrer_domain_variants() {
        assert_eq!(
            extract_referrer_domain("https://News.ycombinator.com/item?id=1").as_deref(),
            Some("news.ycombinator.com")
        );
        assert_eq!(extract_referrer_domain(""), None);
    }
}
