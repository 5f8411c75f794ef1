use crate::UrlError;
use sha2::{Digest, Sha256};
use url::{form_urlencoded, Url};

/// List of tracking query parameters to remove during normalization
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
    "mc_eid",
    "ref",
    "source",
    "_ga",
    "_gl",
    "msclkid",
];

/// Normalizes a URL before it is deduplicated or fetched
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject if malformed or not HTTP(S)
/// 2. Lowercase the host
/// 3. Normalize path:
///    - Remove dot segments (. and ..) and empty segments
///    - Remove trailing slash (except for root /)
///    - Empty path becomes /
/// 4. Remove fragment (everything after #)
/// 5. Remove tracking query parameters
/// 6. Sort remaining query parameters alphabetically
/// 7. Remove empty query string (trailing ?)
///
/// The scheme and any `www.` prefix are preserved: several target sites only
/// answer on one of the variants.
///
/// # Arguments
///
/// * `url_str` - The URL string to normalize
///
/// # Returns
///
/// * `Ok(Url)` - Normalized URL
/// * `Err(UrlError)` - Failed to parse or normalize the URL
///
/// # Examples
///
/// ```
/// use college_harvest::url::normalize_url;
///
/// let url = normalize_url("https://WWW.IITB.AC.IN/placement/?utm_source=x#top").unwrap();
/// assert_eq!(url.as_str(), "https://www.iitb.ac.in/placement");
/// ```
pub fn normalize_url(url_str: &str) -> Result<Url, UrlError> {
    let url = Url::parse(url_str).map_err(|e| UrlError::Parse(e.to_string()))?;
    normalize_parsed(url)
}

/// Resolves a (possibly relative) link against the page it was found on
/// and normalizes the result
///
/// # Arguments
///
/// * `base` - URL of the page containing the link
/// * `href` - Raw link target as written in the document
///
/// # Returns
///
/// * `Ok(Url)` - Absolute, normalized URL
/// * `Err(UrlError)` - The link cannot be resolved to an HTTP(S) URL
pub fn resolve_url(base: &Url, href: &str) -> Result<Url, UrlError> {
    let joined = base
        .join(href.trim())
        .map_err(|e| UrlError::Parse(e.to_string()))?;
    normalize_parsed(joined)
}

fn normalize_parsed(mut url: Url) -> Result<Url, UrlError> {
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    let host = url
        .host_str()
        .map(|h| h.to_lowercase())
        .ok_or(UrlError::MissingDomain)?;
    url.set_host(Some(&host))
        .map_err(|e| UrlError::Malformed(format!("Failed to set host: {}", e)))?;

    let normalized_path = normalize_path(url.path());
    url.set_path(&normalized_path);

    url.set_fragment(None);

    if url.query().is_some() {
        let filtered_params = filter_and_sort_query_params(&url);

        if filtered_params.is_empty() {
            url.set_query(None);
        } else {
            let query_string = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(filtered_params.iter())
                .finish();
            url.set_query(Some(&query_string));
        }
    }

    Ok(url)
}

/// Computes the dedup key of an already normalized URL
///
/// Hex-encoded SHA-256 of the serialized URL.
pub fn url_hash(url: &Url) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_str().as_bytes());
    hex::encode(hasher.finalize())
}

/// Resolves dot segments, collapses repeated slashes and drops a trailing slash
fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }
    format!("/{}", segments.join("/"))
}

/// Query pairs without tracking parameters, sorted by key
fn filter_and_sort_query_params(url: &Url) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    params.sort_by(|a, b| a.0.cmp(&b.0));
    params
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_scheme_and_www() {
        let result = normalize_url("http://www.du.ac.in/admissions").unwrap();
        assert_eq!(result.as_str(), "http://www.du.ac.in/admissions");
    }

    #[test]
    fn test_remove_trailing_slash() {
        let result = normalize_url("https://vit.ac.in/admissions/").unwrap();
        assert_eq!(result.as_str(), "https://vit.ac.in/admissions");
    }

    #[test]
    fn test_keep_root_slash() {
        let result = normalize_url("https://vit.ac.in/").unwrap();
        assert_eq!(result.as_str(), "https://vit.ac.in/");
    }

    #[test]
    fn test_remove_fragment() {
        let result = normalize_url("https://vit.ac.in/placement#stats").unwrap();
        assert_eq!(result.as_str(), "https://vit.ac.in/placement");
    }

    #[test]
    fn test_remove_tracking_params() {
        let result = normalize_url("https://vit.ac.in/placement?utm_source=twitter").unwrap();
        assert_eq!(result.as_str(), "https://vit.ac.in/placement");
    }

    #[test]
    fn test_sort_query_params() {
        let result = normalize_url("https://vit.ac.in/page?b=2&a=1").unwrap();
        assert_eq!(result.as_str(), "https://vit.ac.in/page?a=1&b=2");
    }

    #[test]
    fn test_normalize_path_with_dots() {
        let result = normalize_url("https://vit.ac.in/a/../b/./c").unwrap();
        assert_eq!(result.as_str(), "https://vit.ac.in/b/c");
    }

    #[test]
    fn test_lowercase_host_keeps_path_case() {
        let result = normalize_url("https://HOME.IITD.AC.IN/Placement").unwrap();
        assert_eq!(result.as_str(), "https://home.iitd.ac.in/Placement");
    }

    #[test]
    fn test_mixed_query_params() {
        let result = normalize_url(
            "https://vit.ac.in/page?keep=yes&utm_medium=email&another=value&fbclid=123",
        )
        .unwrap();
        assert_eq!(result.as_str(), "https://vit.ac.in/page?another=value&keep=yes");
    }

    #[test]
    fn test_all_tracking_params() {
        for param in TRACKING_PARAMS {
            let url = format!("https://vit.ac.in/page?{}=value", param);
            let result = normalize_url(&url).unwrap();
            assert_eq!(
                result.as_str(),
                "https://vit.ac.in/page",
                "Failed to remove {}",
                param
            );
        }
    }

    #[test]
    fn test_custom_utm_param() {
        let result = normalize_url("https://vit.ac.in/page?utm_custom=value").unwrap();
        assert_eq!(result.as_str(), "https://vit.ac.in/page");
    }

    #[test]
    fn test_invalid_scheme() {
        let result = normalize_url("ftp://vit.ac.in/brochure.pdf");
        assert!(matches!(result.unwrap_err(), UrlError::InvalidScheme(_)));
    }

    #[test]
    fn test_malformed_url() {
        assert!(normalize_url("not a url").is_err());
    }

    #[test]
    fn test_multiple_slashes() {
        let result = normalize_url("https://vit.ac.in///path//to///page").unwrap();
        assert_eq!(result.as_str(), "https://vit.ac.in/path/to/page");
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let inputs = [
            "HTTPS://Home.IITD.ac.in/a/./b/../c/?z=1&utm_term=x&a=hello world#frag",
            "https://vit.ac.in/search?q=fees%26hostel&page=2",
            "https://vit.ac.in/search?q=a+b&q=c",
            "http://www.du.ac.in",
            "https://bits-pilani.ac.in/placement/%7Euser/",
            "https://vit.ac.in/?",
        ];

        for input in inputs {
            let once = normalize_url(input).unwrap();
            let twice = normalize_url(once.as_str()).unwrap();
            assert_eq!(once, twice, "not idempotent for {}", input);
        }
    }

    #[test]
    fn test_resolve_relative_link() {
        let base = Url::parse("https://vit.ac.in/admissions/ug/").unwrap();
        let resolved = resolve_url(&base, "../fees.pdf#page=2").unwrap();
        assert_eq!(resolved.as_str(), "https://vit.ac.in/admissions/fees.pdf");
    }

    #[test]
    fn test_resolve_rejects_mailto() {
        let base = Url::parse("https://vit.ac.in/").unwrap();
        assert!(resolve_url(&base, "mailto:admissions@vit.ac.in").is_err());
    }

    #[test]
    fn test_url_hash_is_stable_across_spellings() {
        let a = normalize_url("https://VIT.ac.in/placement/?utm_source=x").unwrap();
        let b = normalize_url("https://vit.ac.in/placement#top").unwrap();
        assert_eq!(url_hash(&a), url_hash(&b));
        assert_eq!(url_hash(&a).len(), 64);
    }
}
