use std::sync::LazyLock;

use regex::Regex;
use reqwest::Url;
use scraper::{Html, Selector};

static IMAGE_PATH_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/images/(\d+)").unwrap());
static CANONICAL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"link[rel="canonical"]"#).unwrap());
static OG_URL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"meta[property="og:url"]"#).unwrap());

/// Numeric image id from the path of a page address.
///
/// Only the path is searched when the address parses as a URL, so query
/// strings such as `?from=/images/1` never match.
pub fn image_id(address: &str) -> Option<String> {
    let path = match Url::parse(address) {
        Ok(url) => url.path().to_string(),
        Err(_) => address.to_string(),
    };
    IMAGE_PATH_RE
        .captures(&path)
        .map(|caps| caps[1].to_string())
}

/// Address a saved page declares for itself, if any. An empty canonical
/// link does not hide a usable `og:url`.
pub fn canonical_address(document: &Html) -> Option<String> {
    let declared = |selector: &Selector, attr: &str| {
        document
            .select(selector)
            .filter_map(|el| el.value().attr(attr))
            .map(str::trim)
            .find(|s| !s.is_empty())
            .map(str::to_string)
    };
    declared(&CANONICAL, "href").or_else(|| declared(&OG_URL, "content"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_from_full_url() {
        assert_eq!(
            image_id("https://civitai.com/images/12345678").as_deref(),
            Some("12345678")
        );
        assert_eq!(
            image_id("https://civitai.com/images/42?postId=7&period=AllTime").as_deref(),
            Some("42")
        );
    }

    #[test]
    fn id_from_bare_path() {
        assert_eq!(image_id("/images/9/edit").as_deref(), Some("9"));
        assert_eq!(image_id("saved/images/31.html").as_deref(), Some("31"));
    }

    #[test]
    fn no_id_outside_images_path() {
        assert_eq!(image_id("https://civitai.com/models/257749"), None);
        assert_eq!(image_id("https://civitai.com/images/"), None);
        assert_eq!(image_id("https://civitai.com/images/abc"), None);
        assert_eq!(image_id("https://civitai.com/?next=/images/1"), None);
    }

    #[test]
    fn canonical_falls_back_to_og_url() {
        let doc = Html::parse_document(
            r#"<html><head><meta property="og:url" content=" https://civitai.com/images/3 "></head></html>"#,
        );
        assert_eq!(
            canonical_address(&doc).as_deref(),
            Some("https://civitai.com/images/3")
        );

        let empty = Html::parse_document("<html><head></head><body></body></html>");
        assert_eq!(canonical_address(&empty), None);
    }

    #[test]
    fn blank_canonical_defers_to_og_url() {
        let doc = Html::parse_document(
            r#"<html><head>
                <link rel="canonical" href="  ">
                <meta property="og:url" content="https://civitai.com/images/77">
            </head></html>"#,
        );
        assert_eq!(
            canonical_address(&doc).as_deref(),
            Some("https://civitai.com/images/77")
        );
    }
}
