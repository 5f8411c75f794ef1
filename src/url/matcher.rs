/// Checks if a host matches a domain pattern
///
/// Two pattern forms are accepted:
/// 1. Exact: "iitd.ac.in" matches only "iitd.ac.in"
/// 2. Wildcard: "*.iitd.ac.in" matches the bare domain and every subdomain
///    ("home.iitd.ac.in", "tnp.home.iitd.ac.in")
///
/// Matching is case-sensitive; hosts are expected to be normalized first.
///
/// # Examples
///
/// ```
/// use college_harvest::url::matches_wildcard;
///
/// assert!(matches_wildcard("*.iitb.ac.in", "www.iitb.ac.in"));
/// assert!(!matches_wildcard("*.iitb.ac.in", "notiitb.ac.in"));
/// ```
pub fn matches_wildcard(pattern: &str, candidate: &str) -> bool {
    if let Some(base) = pattern.strip_prefix("*.") {
        candidate == base || candidate.ends_with(&format!(".{}", base))
    } else {
        candidate == pattern
    }
}

/// Returns true if `host` belongs to a target whose root domain is `root_domain`
///
/// # Arguments
///
/// * `root_domain` - The target's registered domain, e.g. "bits-pilani.ac.in"
/// * `host` - Lowercased host of a discovered link
pub fn in_scope(root_domain: &str, host: &str) -> bool {
    if root_domain.is_empty() {
        return false;
    }
    let pattern = format!("*.{}", root_domain.trim_start_matches("*."));
    matches_wildcard(&pattern, host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(matches_wildcard("vit.ac.in", "vit.ac.in"));
        assert!(!matches_wildcard("vit.ac.in", "chennai.vit.ac.in"));
    }

    #[test]
    fn test_wildcard_matches_bare_and_nested() {
        assert!(matches_wildcard("*.iitd.ac.in", "iitd.ac.in"));
        assert!(matches_wildcard("*.iitd.ac.in", "home.iitd.ac.in"));
        assert!(matches_wildcard("*.iitd.ac.in", "tnp.home.iitd.ac.in"));
    }

    #[test]
    fn test_wildcard_rejects_lookalikes() {
        assert!(!matches_wildcard("*.du.ac.in", "edu.ac.in"));
        assert!(!matches_wildcard("*.du.ac.in", "du.ac.in.evil.com"));
        assert!(!matches_wildcard("*.du.ac.in", ""));
    }

    #[test]
    fn test_in_scope() {
        assert!(in_scope("iitb.ac.in", "www.iitb.ac.in"));
        assert!(in_scope("iitb.ac.in", "iitb.ac.in"));
        assert!(in_scope("*.iitb.ac.in", "placements.iitb.ac.in"));
        assert!(!in_scope("iitb.ac.in", "iitd.ac.in"));
        assert!(!in_scope("", "iitb.ac.in"));
    }

    #[test]
    fn test_in_scope_with_port_free_localhost() {
        assert!(in_scope("127.0.0.1", "127.0.0.1"));
    }
}
