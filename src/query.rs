/// Query string parameter extraction for redirect URLs
use url::Url;

/// Extract the first value of the query parameter `name` from `url`.
///
/// Returns `None` if `url` does not parse as an absolute URL, has no query, or
/// has no parameter with exactly that (case-sensitive) name. Values are
/// percent-decoded using `application/x-www-form-urlencoded` rules.
///
/// # Examples
///
/// ```
/// use pinauth::query::extract_parameter;
///
/// let url = "https://example.com/oauth/?code=abc%20123&state=s1";
/// assert_eq!(extract_parameter(url, "code").as_deref(), Some("abc 123"));
/// assert_eq!(extract_parameter(url, "missing"), None);
/// assert_eq!(extract_parameter("not a url", "code"), None);
/// ```
pub fn extract_parameter(url: &str, name: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    parsed
        .query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// All decoded query pairs of `url`, in order. Empty for unparsable input.
pub fn query_pairs(url: &str) -> Vec<(String, String)> {
    match Url::parse(url) {
        Ok(parsed) => parsed
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect(),
        Err(_) => Vec::new(),
    }
}
