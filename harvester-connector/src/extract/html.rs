use std::{collections::BTreeMap, sync::LazyLock};

use harvester_common::{datasource::LIST_SELECTOR_KEY, error::Error, record::Record};
use scraper::{ElementRef, Html, Node, Selector};
use serde_json::Value;

/// Elements that never carry readable content.
const NOISE_SELECTORS: &[&str] = &[
    "script",
    "style",
    "nav",
    "header",
    "footer",
    "iframe",
    "noscript",
    ".nav",
    ".header",
    ".footer",
    ".sidebar",
    ".advertisement",
    ".ads",
    ".menu",
];

/// Candidate content containers, most specific first.
const MAIN_CONTENT_SELECTORS: &[&str] = &[
    "article",
    "[role=main]",
    "main",
    ".rich_media_content",
    "#js_content",
    ".article-content",
    ".post-content",
    ".entry-content",
    ".content",
    "#content",
    ".main-content",
    "#main",
];

/// Minimum text length for a priority container to win.
const MIN_MAIN_CONTENT_CHARS: usize = 100;

static NOISE: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    NOISE_SELECTORS
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .collect()
});

static MAIN_CONTENT: LazyLock<Vec<(&'static str, Selector)>> = LazyLock::new(|| {
    MAIN_CONTENT_SELECTORS
        .iter()
        .filter_map(|s| Selector::parse(s).ok().map(|sel| (*s, sel)))
        .collect()
});

pub(crate) fn parse_selector(selector: &str) -> Result<Selector, Error> {
    Selector::parse(selector)
        .map_err(|e| Error::CollectionFailure(format!("invalid CSS selector '{selector}': {e}")))
}

pub(crate) fn is_noise(element: &ElementRef<'_>) -> bool {
    NOISE.iter().any(|sel| sel.matches(element))
}

fn inside_noise(element: &ElementRef<'_>) -> bool {
    is_noise(element)
        || element
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(|ancestor| is_noise(&ancestor))
}

/// Whether `selector` matches anything in `html`.
pub fn selector_present(html: &str, selector: &str) -> Result<bool, Error> {
    let selector = parse_selector(selector)?;
    Ok(Html::parse_document(html).select(&selector).next().is_some())
}

/// Turns a rendered page into records.
/// ---
/// - No selectors: one `{title, content, url}` record with the page's
///   primary readable content.
/// - `_list` present: one record per container match, fields resolved
///   inside the container.
/// - Otherwise: a single record resolved against the whole document.
///
/// Fields named `url`, `link` or `href` read the `href` attribute when
/// present. Every record carries the page URL under `url` unless a field
/// overrides it.
pub fn extract_records(
    html: &str,
    selectors: &BTreeMap<String, String>,
    page_url: &str,
) -> Result<Vec<Record>, Error> {
    let document = Html::parse_document(html);

    if selectors.is_empty() {
        let title = select_first(&document, "title")
            .map(|el| normalize(&el.text().collect::<String>()))
            .unwrap_or_default();
        let content = main_content(&document).text;

        let mut record = Record::new();
        record.insert("title".to_string(), Value::String(title));
        record.insert("content".to_string(), Value::String(content));
        record.insert("url".to_string(), Value::String(page_url.to_string()));
        return Ok(vec![record]);
    }

    let mut fields = Vec::with_capacity(selectors.len());
    for (field, selector) in selectors {
        if field != LIST_SELECTOR_KEY {
            fields.push((field.as_str(), parse_selector(selector)?));
        }
    }

    match selectors.get(LIST_SELECTOR_KEY) {
        Some(list) => {
            let list = parse_selector(list)?;
            Ok(document
                .select(&list)
                .map(|container| record_from(container, &fields, page_url, false))
                .collect())
        }
        None => Ok(vec![record_from(
            document.root_element(),
            &fields,
            page_url,
            true,
        )]),
    }
}

fn record_from(
    scope: ElementRef<'_>,
    fields: &[(&str, Selector)],
    page_url: &str,
    first_only: bool,
) -> Record {
    let mut record = Record::new();
    record.insert("url".to_string(), Value::String(page_url.to_string()));

    for (field, selector) in fields {
        let mut matches = scope.select(selector).peekable();

        let href = matches!(*field, "url" | "link" | "href")
            .then(|| matches.peek().and_then(|el| el.value().attr("href")))
            .flatten()
            .map(str::to_string);

        let value = match href {
            Some(href) => href,
            None if first_only => matches
                .next()
                .map(|el| normalize(&el.text().collect::<String>()))
                .unwrap_or_default(),
            None => normalize(
                &matches
                    .map(|el| el.text().collect::<String>())
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
        };

        record.insert(field.to_string(), Value::String(value));
    }

    record
}

fn select_first<'a>(document: &'a Html, selector: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(selector).ok()?;
    document.select(&selector).next()
}

/// Primary readable block of a page.
#[derive(Clone, Debug, PartialEq)]
pub struct MainContent {
    /// The container that won, when one did
    pub selector: Option<String>,
    pub text: String,
}

/// Locates the page's primary readable content.
/// ---
/// Noise (scripts, navigation, headers, footers, ads) is ignored. The first
/// priority container with more than 100 characters of text wins; otherwise
/// the longest `p`/`div` block; otherwise the whole body.
pub fn main_content(document: &Html) -> MainContent {
    for (name, selector) in MAIN_CONTENT.iter() {
        let text = document
            .select(selector)
            .filter(|el| !inside_noise(el))
            .map(|el| readable_text(el))
            .collect::<Vec<_>>()
            .join("");
        let text = text.trim();
        if text.chars().count() > MIN_MAIN_CONTENT_CHARS {
            return MainContent {
                selector: Some(name.to_string()),
                text: clean_text(text),
            };
        }
    }

    let mut longest: Option<(ElementRef<'_>, String)> = None;
    if let Ok(blocks) = Selector::parse("p, div") {
        for el in document.select(&blocks).filter(|el| !inside_noise(el)) {
            let text = readable_text(el).trim().to_string();
            let longer = longest
                .as_ref()
                .is_none_or(|(_, best)| text.chars().count() > best.chars().count());
            if !text.is_empty() && longer {
                longest = Some((el, text));
            }
        }
    }
    if let Some((el, text)) = longest {
        return MainContent {
            selector: describe(&el),
            text: clean_text(&text),
        };
    }

    let body = select_first(document, "body")
        .map(readable_text)
        .unwrap_or_default();
    MainContent {
        selector: Some("body".to_string()),
        text: clean_text(&body),
    }
}

fn describe(el: &ElementRef<'_>) -> Option<String> {
    let tag = el.value().name();
    if let Some(id) = el.value().id().filter(|id| !id.is_empty()) {
        return Some(format!("#{id}"));
    }
    match el.value().classes().next() {
        Some(class) => Some(format!("{tag}.{class}")),
        None => Some(tag.to_string()),
    }
}

/// Text of `el` and its descendants, skipping noise subtrees.
fn readable_text(el: ElementRef<'_>) -> String {
    let mut out = String::new();
    push_text(el, &mut out);
    out
}

fn push_text(el: ElementRef<'_>, out: &mut String) {
    for child in el.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    if !is_noise(&child) {
                        push_text(child, out);
                    }
                }
            }
            _ => {}
        }
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Trims and collapses runs of blank lines and doubled spaces.
pub(crate) fn clean_text(text: &str) -> String {
    let mut text = text.trim().to_string();
    while text.contains("\n\n\n") {
        text = text.replace("\n\n\n", "\n\n");
    }
    while text.contains("  ") {
        text = text.replace("  ", " ");
    }
    text
}
