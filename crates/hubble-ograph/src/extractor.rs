//! Fetch a page and pick its OpenGraph preview fields.

use std::time::Instant;

use reqwest::{redirect, Client};
use scraper::{Html, Selector};
use tracing::{debug, warn};
use url::Url;

use hubble_core::defaults::{BROWSER_USER_AGENT, OGRAPH_MAX_REDIRECTS, OGRAPH_TIMEOUT};
use hubble_core::{Error, LinkMetadata, Result};

/// Favicon `link[rel]` values, most specific first.
const FAVICON_RELS: [&str; 5] = [
    "icon",
    "mask-icon",
    "shortcut icon",
    "apple-touch-icon",
    "apple-touch-icon-precomposed",
];

/// Thumbnail meta names, tried before `link[rel=image_src]`.
const THUMBNAIL_METAS: [&str; 5] = [
    "og:image",
    "twitter:image",
    "image",
    "msapplication-TileImage",
    "thumbnail",
];

const DEFAULT_SITE_TYPE: &str = "website";

/// Check that `raw` is an http(s) URL with a dotted hostname.
pub fn validate_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|e| Error::InvalidInput(format!("invalid URL {raw:?}: {e}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::InvalidInput(format!(
            "unsupported URL scheme: {}",
            url.scheme()
        )));
    }

    match url.host_str() {
        Some(host) if host.contains('.') => Ok(url),
        _ => Err(Error::InvalidInput(format!("invalid hostname in URL {raw:?}"))),
    }
}

/// Scheme and host (with any non-default port) of `url`.
fn origin_of(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
        None => format!("{}://{}", url.scheme(), host),
    }
}

/// Make `href` absolute against the page it came from.
///
/// `//cdn/x` takes the page scheme, `/x` takes the page origin and absolute
/// URLs pass through. Other relative forms are joined onto the page URL.
pub fn resolve_url(page: &Url, href: &str) -> String {
    let href = href.trim();
    if href.is_empty() {
        return String::new();
    }
    if href.starts_with("//") {
        return format!("{}:{}", page.scheme(), href);
    }
    if href.starts_with('/') {
        return format!("{}{}", origin_of(page), href);
    }
    if Url::parse(href).is_ok() {
        return href.to_string();
    }
    page.join(href).map(String::from).unwrap_or_default()
}

/// A parsed page and the URL it was served from.
struct Document<'a> {
    page: &'a Url,
    html: Html,
}

impl<'a> Document<'a> {
    fn parse(page: &'a Url, body: &str) -> Self {
        Self {
            page,
            html: Html::parse_document(body),
        }
    }

    fn first_attr(&self, selector: &str, attr: &str) -> Option<String> {
        let selector = Selector::parse(selector).ok()?;
        self.html
            .select(&selector)
            .next()
            .and_then(|el| el.value().attr(attr))
            .map(str::to_string)
    }

    /// `content` of `meta[property=..]`, falling back to `meta[name=..]`.
    fn meta(&self, name: &str) -> String {
        self.first_attr(&format!("meta[property='{name}']"), "content")
            .or_else(|| self.first_attr(&format!("meta[name='{name}']"), "content"))
            .map(|v| v.trim().to_string())
            .unwrap_or_default()
    }

    fn title(&self) -> String {
        let title = self.meta("og:title");
        if !title.is_empty() {
            return title;
        }
        Selector::parse("title")
            .ok()
            .and_then(|sel| {
                self.html
                    .select(&sel)
                    .next()
                    .map(|el| el.text().collect::<String>().trim().to_string())
            })
            .unwrap_or_default()
    }

    fn description(&self) -> String {
        let description = self.meta("og:description");
        if !description.is_empty() {
            return description;
        }
        self.meta("description")
    }

    fn favicon(&self) -> String {
        let href = FAVICON_RELS
            .iter()
            .filter_map(|rel| {
                let selector = Selector::parse(&format!("link[rel='{rel}']")).ok()?;
                self.html
                    .select(&selector)
                    .filter_map(|el| el.value().attr("href"))
                    .map(str::trim)
                    .find(|href| !href.is_empty())
                    .map(str::to_string)
            })
            .next()
            .unwrap_or_default();
        resolve_url(self.page, &href)
    }

    fn thumbnail(&self) -> String {
        let href = THUMBNAIL_METAS
            .iter()
            .map(|name| self.meta(name))
            .find(|v| !v.is_empty())
            .or_else(|| self.first_attr("link[rel='image_src']", "href"))
            .unwrap_or_default();
        resolve_url(self.page, &href)
    }

    fn site_type(&self) -> String {
        let site_type = self.meta("og:type");
        if site_type.is_empty() {
            DEFAULT_SITE_TYPE.to_string()
        } else {
            site_type
        }
    }

    fn metadata(&self) -> LinkMetadata {
        LinkMetadata {
            title: self.title(),
            description: self.description(),
            favicon: self.favicon(),
            author: self.meta("author"),
            thumbnail: self.thumbnail(),
            site_type: self.site_type(),
            domain: origin_of(self.page),
            link: self.page.to_string(),
        }
    }
}

/// Pick preview metadata out of an already fetched HTML body.
pub fn extract_from_html(page: &Url, body: &str) -> LinkMetadata {
    Document::parse(page, body).metadata()
}

/// Fetches pages and extracts their link preview metadata.
#[derive(Clone)]
pub struct MetadataExtractor {
    client: Client,
}

impl MetadataExtractor {
    /// Extractor with the default timeout, redirect limit and browser user agent.
    pub fn new() -> Result<Self> {
        Self::with_user_agent(BROWSER_USER_AGENT)
    }

    pub fn with_user_agent(user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(OGRAPH_TIMEOUT)
            .redirect(redirect::Policy::limited(OGRAPH_MAX_REDIRECTS))
            .user_agent(user_agent)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Use a preconfigured client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Validate, fetch and extract.
    pub async fn extract(&self, raw_url: &str) -> Result<LinkMetadata> {
        let start = Instant::now();
        let url = validate_url(raw_url)?;

        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            warn!(
                subsystem = "ograph",
                component = "extractor",
                op = "extract",
                url = %url,
                status = status.as_u16(),
                "Link fetch returned a non-success status"
            );
            return Err(Error::Request(format!(
                "failed to fetch {url}: status {}",
                status.as_u16()
            )));
        }

        // Links are resolved against where the redirects ended up.
        let final_url = response.url().clone();
        let body = response.text().await?;
        let metadata = extract_from_html(&final_url, &body);

        debug!(
            subsystem = "ograph",
            component = "extractor",
            op = "extract",
            url = %final_url,
            duration_ms = start.elapsed().as_millis() as u64,
            "Extracted link metadata"
        );
        Ok(metadata)
    }
}
