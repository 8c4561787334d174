//! Request shaping for web form relays.
//!
//! Form endpoints reject requests that do not look like they come from a
//! browser. A request opts in with the `Is-Web3-Form: true` header; the marker
//! is consumed here and never forwarded.

use std::collections::BTreeMap;

use url::Url;

pub const WEB3_FORM_MARKER: &str = "Is-Web3-Form";
const WEB3_FORMS_HOST: &str = "web3forms.com";

const BROWSER_HEADERS: &[(&str, &str)] = &[
    (
        "User-Agent",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    ),
    (
        "Accept",
        "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7",
    ),
    ("Accept-Language", "en-US,en;q=0.9"),
    ("DNT", "1"),
    ("Upgrade-Insecure-Requests", "1"),
    ("Sec-Fetch-Dest", "document"),
    ("Sec-Fetch-Mode", "navigate"),
    ("Sec-Fetch-Site", "none"),
    ("Sec-Fetch-User", "?1"),
    ("Cache-Control", "max-age=0"),
    ("Origin", "https://web3forms.com"),
    ("Referer", "https://web3forms.com/"),
    ("X-Requested-With", "XMLHttpRequest"),
];

/// Apply form shaping in place. Returns whether the request was a form relay.
pub fn shape_form_request(url: &mut String, headers: &mut BTreeMap<String, String>) -> bool {
    let marker = headers
        .keys()
        .find(|k| k.eq_ignore_ascii_case(WEB3_FORM_MARKER))
        .cloned();
    let Some(marker) = marker else {
        return false;
    };

    let enabled = headers
        .remove(&marker)
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"));
    if !enabled {
        return false;
    }

    for (name, value) in BROWSER_HEADERS {
        headers.retain(|k, _| !k.eq_ignore_ascii_case(name));
        headers.insert((*name).to_string(), (*value).to_string());
    }

    if is_web3_forms(url) && !url.trim_end_matches('/').ends_with("/submit") {
        let trimmed = url.trim_end_matches('/').to_string();
        *url = format!("{trimmed}/submit");
    }

    true
}

fn is_web3_forms(url: &str) -> bool {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
        .is_some_and(|host| {
            host == WEB3_FORMS_HOST || host.ends_with(&format!(".{WEB3_FORMS_HOST}"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_adds_browser_headers_and_submit_path() {
        let mut url = "https://api.web3forms.com/".to_string();
        let mut headers = BTreeMap::from([
            ("is-web3-form".to_string(), "true".to_string()),
            ("user-agent".to_string(), "curl".to_string()),
            ("Content-Type".to_string(), "application/json".to_string()),
        ]);

        assert!(shape_form_request(&mut url, &mut headers));
        assert_eq!(url, "https://api.web3forms.com/submit");
        assert!(!headers.keys().any(|k| k.eq_ignore_ascii_case(WEB3_FORM_MARKER)));
        assert!(headers["User-Agent"].starts_with("Mozilla/5.0"));
        assert!(!headers.contains_key("user-agent"));
        assert_eq!(headers["Content-Type"], "application/json");
    }

    #[test]
    fn test_existing_submit_path_is_kept() {
        let mut url = "https://api.web3forms.com/submit".to_string();
        let mut headers = BTreeMap::from([(WEB3_FORM_MARKER.to_string(), "true".to_string())]);
        shape_form_request(&mut url, &mut headers);
        assert_eq!(url, "https://api.web3forms.com/submit");
    }

    #[test]
    fn test_without_marker_nothing_changes() {
        let mut url = "https://api.web3forms.com".to_string();
        let mut headers = BTreeMap::new();
        assert!(!shape_form_request(&mut url, &mut headers));
        assert_eq!(url, "https://api.web3forms.com");
        assert!(headers.is_empty());
    }

    #[test]
    fn test_other_hosts_keep_their_path() {
        let mut url = "https://example.com/web3forms.com".to_string();
        let mut headers = BTreeMap::from([(WEB3_FORM_MARKER.to_string(), "true".to_string())]);
        assert!(shape_form_request(&mut url, &mut headers));
        assert_eq!(url, "https://example.com/web3forms.com");
    }

    #[test]
    fn test_false_marker_is_dropped() {
        let mut url = "https://example.com".to_string();
        let mut headers = BTreeMap::from([(WEB3_FORM_MARKER.to_string(), "false".to_string())]);
        assert!(!shape_form_request(&mut url, &mut headers));
        assert!(headers.is_empty());
    }
}
