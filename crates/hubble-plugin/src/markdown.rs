//! HTML to Markdown conversion for the transform imports.

use reqwest::Client;
use scraper::{ElementRef, Html, Node, Selector};
use tracing::debug;
use url::Url;

use hubble_core::defaults::BROWSER_USER_AGENT;
use hubble_core::{Error, Result};
use hubble_ograph::{resolve_url, validate_url};

/// Elements whose content never reaches the output.
const SKIPPED: [&str; 8] = [
    "head", "script", "style", "noscript", "template", "iframe", "svg", "form",
];

/// Extra chrome dropped when converting a whole fetched page.
const PAGE_CHROME: [&str; 4] = ["nav", "header", "footer", "aside"];

/// Containers tried, in order, for a page's main content.
const CONTENT_ROOTS: [&str; 4] = ["article", "main", "[role='main']", "body"];

#[derive(Clone, Copy)]
enum ListKind {
    Unordered,
    Ordered(usize),
}

struct Renderer<'a> {
    out: String,
    base: Option<&'a Url>,
    lists: Vec<ListKind>,
    skip_chrome: bool,
}

impl<'a> Renderer<'a> {
    fn new(base: Option<&'a Url>, skip_chrome: bool) -> Self {
        Self {
            out: String::new(),
            base,
            lists: Vec::new(),
            skip_chrome,
        }
    }

    fn link(&self, href: &str) -> String {
        match self.base {
            Some(base) => resolve_url(base, href),
            None => href.trim().to_string(),
        }
    }

    fn trim_trailing_spaces(&mut self) {
        let trimmed = self.out.trim_end_matches(|c| c == ' ' || c == '\t').len();
        self.out.truncate(trimmed);
    }

    /// End the current block with a blank line.
    fn block(&mut self) {
        self.trim_trailing_spaces();
        if self.out.is_empty() {
            return;
        }
        while !self.out.ends_with("\n\n") {
            self.out.push('\n');
        }
    }

    fn newline(&mut self) {
        self.trim_trailing_spaces();
        if !self.out.is_empty() && !self.out.ends_with('\n') {
            self.out.push('\n');
        }
    }

    fn text(&mut self, text: &str) {
        let at_line_start = self.out.is_empty() || self.out.ends_with('\n');
        if text.starts_with(char::is_whitespace) && !at_line_start && !self.out.ends_with(' ') {
            self.out.push(' ');
        }
        let mut wrote = false;
        for word in text.split_whitespace() {
            if wrote {
                self.out.push(' ');
            }
            self.out.push_str(word);
            wrote = true;
        }
        if wrote && text.ends_with(char::is_whitespace) {
            self.out.push(' ');
        }
    }

    fn children(&mut self, element: ElementRef<'_>) {
        for child in element.children() {
            match child.value() {
                Node::Text(text) => self.text(text),
                Node::Element(_) => {
                    if let Some(el) = ElementRef::wrap(child) {
                        self.element(el);
                    }
                }
                _ => {}
            }
        }
    }

    /// Render `element`'s children into a detached buffer.
    fn inline(&mut self, element: ElementRef<'_>) -> String {
        let mut nested = Renderer::new(self.base, self.skip_chrome);
        nested.lists = self.lists.clone();
        nested.children(element);
        nested.out.trim().to_string()
    }

    fn element(&mut self, el: ElementRef<'_>) {
        let name = el.value().name();
        if SKIPPED.contains(&name) || (self.skip_chrome && PAGE_CHROME.contains(&name)) {
            return;
        }

        match name {
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let level = name[1..].parse::<usize>().unwrap_or(1);
                let content = self.inline(el);
                if content.is_empty() {
                    return;
                }
                self.block();
                self.out.push_str(&"#".repeat(level));
                self.out.push(' ');
                self.out.push_str(&content);
                self.block();
            }
            "p" | "div" | "section" | "article" | "main" | "header" | "footer" | "figure"
            | "figcaption" | "table" | "dl" => {
                self.block();
                self.children(el);
                self.block();
            }
            "tr" => {
                self.newline();
                let cells: Vec<String> = el
                    .children()
                    .filter_map(ElementRef::wrap)
                    .filter(|c| matches!(c.value().name(), "td" | "th"))
                    .map(|c| self.inline(c))
                    .collect();
                self.out.push_str("| ");
                self.out.push_str(&cells.join(" | "));
                self.out.push_str(" |");
                self.newline();
            }
            "br" => self.newline(),
            "hr" => {
                self.block();
                self.out.push_str("---");
                self.block();
            }
            "strong" | "b" => self.wrap_inline(el, "**"),
            "em" | "i" => self.wrap_inline(el, "_"),
            "del" | "s" => self.wrap_inline(el, "~~"),
            "code" => {
                let code: String = el.text().collect();
                if !code.is_empty() {
                    self.out.push('`');
                    self.out.push_str(&code);
                    self.out.push('`');
                }
            }
            "pre" => {
                let code: String = el.text().collect();
                self.block();
                self.out.push_str("```\n");
                self.out.push_str(code.trim_end_matches('\n'));
                self.out.push_str("\n```");
                self.block();
            }
            "a" => {
                let label = self.inline(el);
                let href = el.value().attr("href").map(|h| self.link(h)).unwrap_or_default();
                match (label.is_empty(), href.is_empty()) {
                    (true, _) => {}
                    (false, true) => self.out.push_str(&label),
                    (false, false) => {
                        self.out.push('[');
                        self.out.push_str(&label);
                        self.out.push_str("](");
                        self.out.push_str(&href);
                        self.out.push(')');
                    }
                }
            }
            "img" => {
                let src = el.value().attr("src").map(|s| self.link(s)).unwrap_or_default();
                if !src.is_empty() {
                    let alt = el.value().attr("alt").unwrap_or_default().trim();
                    self.out.push_str(&format!("![{alt}]({src})"));
                }
            }
            "ul" | "ol" => {
                if self.lists.is_empty() {
                    self.block();
                }
                self.lists.push(if name == "ol" {
                    ListKind::Ordered(1)
                } else {
                    ListKind::Unordered
                });
                self.children(el);
                self.lists.pop();
                if self.lists.is_empty() {
                    self.block();
                }
            }
            "li" => {
                self.newline();
                let depth = self.lists.len().saturating_sub(1);
                let marker = match self.lists.last_mut() {
                    Some(ListKind::Ordered(n)) => {
                        let marker = format!("{n}. ");
                        *n += 1;
                        marker
                    }
                    _ => "- ".to_string(),
                };
                self.out.push_str(&"  ".repeat(depth));
                self.out.push_str(&marker);
                self.children(el);
                self.newline();
            }
            "blockquote" => {
                let quoted = self.inline(el);
                self.block();
                for line in quoted.lines() {
                    self.out.push('>');
                    if !line.is_empty() {
                        self.out.push(' ');
                        self.out.push_str(line);
                    }
                    self.out.push('\n');
                }
                self.block();
            }
            _ => self.children(el),
        }
    }

    fn wrap_inline(&mut self, el: ElementRef<'_>, marker: &str) {
        let content = self.inline(el);
        if content.is_empty() {
            return;
        }
        self.out.push_str(marker);
        self.out.push_str(&content);
        self.out.push_str(marker);
    }

    fn finish(self) -> String {
        let mut out = String::with_capacity(self.out.len());
        let mut blank_run = 0;
        for line in self.out.lines() {
            let line = line.trim_end();
            if line.is_empty() {
                blank_run += 1;
                if blank_run > 1 {
                    continue;
                }
            } else {
                blank_run = 0;
            }
            out.push_str(line);
            out.push('\n');
        }
        out.trim().to_string()
    }
}

/// Convert an HTML document or fragment to Markdown.
///
/// Relative links and images are resolved against `base` when given.
pub fn html_to_markdown(html: &str, base: Option<&Url>) -> String {
    let document = Html::parse_document(html);
    let mut renderer = Renderer::new(base, false);
    renderer.children(document.root_element());
    renderer.finish()
}

/// Convert the main content of a fetched page, dropping navigation chrome.
pub fn page_to_markdown(html: &str, page: &Url) -> String {
    let document = Html::parse_document(html);
    let root = CONTENT_ROOTS
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .find_map(|selector| document.select(&selector).next())
        .unwrap_or_else(|| document.root_element());

    let mut renderer = Renderer::new(Some(page), true);
    renderer.element(root);
    renderer.finish()
}

/// Fetch `raw_url` with a browser user agent and convert its main content.
pub async fn url_to_markdown(client: &Client, raw_url: &str) -> Result<String> {
    let url = validate_url(raw_url)?;
    let response = client
        .get(url.clone())
        .header(reqwest::header::USER_AGENT, BROWSER_USER_AGENT)
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        return Err(Error::Request(format!(
            "failed to fetch {url}: status {}",
            status.as_u16()
        )));
    }
    let page = response.url().clone();
    let body = response.text().await?;
    let markdown = page_to_markdown(&body, &page);
    debug!(
        subsystem = "plugin",
        component = "markdown",
        url = %page,
        chars = markdown.len(),
        "Converted page to markdown"
    );
    Ok(markdown)
}
