use url::Url;

/// Extracts the lowercase host of a URL
///
/// Ports are not part of the result, so politeness state is shared between
/// `http://host` and `https://host:8443`.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use college_harvest::url::extract_domain;
///
/// let url = Url::parse("https://Home.IITD.ac.in/admissions").unwrap();
/// assert_eq!(extract_domain(&url), Some("home.iitd.ac.in".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}
