use std::{collections::HashSet, sync::LazyLock, time::Duration};

use harvester_common::error::Error;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use serde_json::Value;

use crate::extract::main_content;

pub(crate) const PREVIEW_TIMEOUT: Duration = Duration::from_secs(30);
pub(crate) const MAX_PREVIEW_BYTES: usize = 2 * 1024 * 1024;

const MAX_ELEMENTS: usize = 80;
const MAX_JSON_DEPTH: usize = 3;
const TEXT_PREVIEW_CHARS: usize = 150;

/// Elements worth offering as selector candidates, in document order.
const CANDIDATE_SELECTOR: &str = "h1,h2,h3,h4,h5,h6,title,p,article,section,main,\
    div[id],div[class],span[id],span[class],a[href],img[src],ul,ol,table,[id],[class]";

const SEMANTIC_TAGS: &[&str] = &[
    "h1", "h2", "h3", "h4", "h5", "h6", "article", "main", "section", "p",
];

static CANDIDATES: LazyLock<Option<Selector>> =
    LazyLock::new(|| Selector::parse(CANDIDATE_SELECTOR).ok());

static SKIPPED: LazyLock<Option<Selector>> =
    LazyLock::new(|| Selector::parse("script, style, noscript").ok());

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    Html,
    Json,
}

/// One selector or field-path candidate.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PageElement {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,

    /// HTML tag, or the JSON type name
    pub tag: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StructurePreview {
    pub url: String,
    pub title: String,
    pub response_type: ResponseType,
    pub elements: Vec<PageElement>,
}

/// Why a preview could not produce candidates.
#[derive(thiserror::Error, Debug)]
pub enum PreviewError {
    #[error("{0}")]
    Unreachable(String),

    #[error("{0}")]
    NeedsLoginOrRendering(String),

    #[error("{0}")]
    MalformedResponse(String),

    #[error("{0}")]
    Unsupported(String),
}

impl PreviewError {
    pub fn reason(&self) -> &'static str {
        match self {
            PreviewError::Unreachable(_) => "unreachable",
            PreviewError::NeedsLoginOrRendering(_) => "needs_login_or_rendering",
            PreviewError::MalformedResponse(_) => "malformed_response",
            PreviewError::Unsupported(_) => "unsupported",
        }
    }
}

impl From<Error> for PreviewError {
    fn from(err: Error) -> Self {
        match err {
            Error::ConnectivityFailure(msg) => PreviewError::Unreachable(msg),
            Error::Timeout(_) | Error::Cancelled(_) => PreviewError::Unreachable(err.to_string()),
            Error::StaleCookie(_) | Error::LoginFailed(_) => PreviewError::NeedsLoginOrRendering(
                format!("the page requires a valid session: {err}"),
            ),
            Error::InvalidInput(msg) | Error::Config(msg) => PreviewError::Unsupported(msg),
            other => PreviewError::MalformedResponse(other.to_string()),
        }
    }
}

/// Whether a body should be treated as JSON.
pub(crate) fn looks_like_json(content_type: Option<&str>, body: &[u8]) -> bool {
    if content_type.is_some_and(|ct| ct.contains("application/json")) {
        return true;
    }
    let text = String::from_utf8_lossy(body);
    let trimmed = text.trim_start();
    trimmed.starts_with('{') || trimmed.starts_with('[')
}

pub(crate) fn preview_json(url: &str, body: &[u8]) -> Result<StructurePreview, PreviewError> {
    let root: Value = serde_json::from_slice(body).map_err(|e| {
        PreviewError::MalformedResponse(format!(
            "the response looks like JSON but does not parse: {e}"
        ))
    })?;

    let mut elements = Vec::new();
    json_fields("", &root, &mut elements, 0);

    Ok(StructurePreview {
        url: url.to_string(),
        title: "API response fields".to_string(),
        response_type: ResponseType::Json,
        elements,
    })
}

fn json_fields(prefix: &str, node: &Value, out: &mut Vec<PageElement>, depth: usize) {
    if out.len() >= MAX_ELEMENTS || depth > MAX_JSON_DEPTH {
        return;
    }

    match node {
        Value::Object(map) => {
            for (key, value) in map {
                if out.len() >= MAX_ELEMENTS {
                    return;
                }
                let path = match prefix {
                    "" => key.clone(),
                    _ => format!("{prefix}.{key}"),
                };
                out.push(PageElement {
                    selector: None,
                    field: Some(path.clone()),
                    tag: json_type(value).to_string(),
                    text: json_preview(value),
                    id: None,
                    class: None,
                });
                if depth < 2 {
                    json_fields(&path, value, out, depth + 1);
                }
            }
        }
        Value::Array(items) => {
            if let Some(first) = items.first() {
                json_fields(&format!("{prefix}[0]"), first, out, depth + 1);
            }
        }
        _ => {}
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::String(_) => "string",
        Value::Number(_) => "number",
        Value::Bool(_) => "bool",
        Value::Null => "null",
        Value::Object(_) => "object",
        Value::Array(_) => "array",
    }
}

fn json_preview(value: &Value) -> String {
    match value {
        Value::String(s) => truncate(s),
        Value::Array(items) => format!("[{} items]", items.len()),
        other => truncate(&other.to_string()),
    }
}

fn truncate(text: &str) -> String {
    match text.char_indices().nth(TEXT_PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Selector candidates of an HTML page.
/// ---
/// The main-content block comes first, followed by distinct candidates in
/// document order. A page yielding nothing usable is reported as needing
/// login or script rendering.
pub(crate) fn preview_html(url: &str, html: &str) -> Result<StructurePreview, PreviewError> {
    let document = Html::parse_document(html);

    let title = Selector::parse("title")
        .ok()
        .and_then(|sel| document.select(&sel).next())
        .map(|el| el.text().collect::<String>().trim().to_string())
        .unwrap_or_default();

    let mut elements = Vec::new();
    let mut seen = HashSet::new();

    let main = main_content(&document);
    if !main.text.is_empty() {
        if let Some(selector) = main.selector {
            seen.insert(selector.clone());
            elements.push(PageElement {
                tag: selector
                    .split(['.', '#'])
                    .next()
                    .filter(|tag| !tag.is_empty())
                    .unwrap_or("div")
                    .to_string(),
                selector: Some(selector),
                field: None,
                text: truncate(&main.text),
                id: None,
                class: None,
            });
        }
    }

    if let Some(candidates) = CANDIDATES.as_ref() {
        for el in document.select(candidates) {
            if elements.len() >= MAX_ELEMENTS {
                break;
            }
            if skipped(&el) {
                continue;
            }
            let text = el.text().collect::<String>();
            let text = text.trim();
            if text.chars().count() < 2 {
                continue;
            }

            let tag = el.value().name();
            let id = el.value().attr("id").unwrap_or_default();
            let class = el.value().attr("class").unwrap_or_default();

            let selector = css_selector(tag, id, class);
            if selector.is_empty() || selector == "div" || selector == "span" {
                continue;
            }
            if !seen.insert(selector.clone()) {
                continue;
            }

            elements.push(PageElement {
                selector: Some(selector),
                field: None,
                tag: tag.to_string(),
                text: truncate(text),
                id: (!id.is_empty()).then(|| id.to_string()),
                class: display_class(class),
            });
        }
    }

    if elements.is_empty() {
        return Err(PreviewError::NeedsLoginOrRendering(
            "the page has no extractable content; it likely requires login or JavaScript \
             rendering, configure rpa_config"
                .to_string(),
        ));
    }

    Ok(StructurePreview {
        url: url.to_string(),
        title,
        response_type: ResponseType::Html,
        elements,
    })
}

fn skipped(el: &ElementRef<'_>) -> bool {
    let Some(skip) = SKIPPED.as_ref() else {
        return false;
    };
    skip.matches(el)
        || el
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(|a| skip.matches(&a))
}

/// Most specific selector for an element: `#id`, then `tag.class`, then
/// the bare tag for semantic elements.
pub(crate) fn css_selector(tag: &str, id: &str, class: &str) -> String {
    if !id.is_empty() && !id.contains([' ', '\t', '\n', '.', ':']) {
        return format!("#{id}");
    }

    if let Some(class) = class
        .split_whitespace()
        .find(|c| !c.contains(['.', ':', '[', ']', '{', '}', '(', ')']))
    {
        return format!("{tag}.{class}");
    }

    if SEMANTIC_TAGS.contains(&tag) {
        return tag.to_string();
    }

    String::new()
}

fn display_class(class: &str) -> Option<String> {
    let parts: Vec<&str> = class.split_whitespace().collect();
    match parts.len() {
        0 => None,
        1 | 2 => Some(parts.join(" ")),
        _ => Some(format!("{}...", parts[..2].join(" "))),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("div", "main", "", "#main")]
    #[case("div", "a.b", "card featured", "div.card")]
    #[case("li", "", "x:y item", "li.item")]
    #[case("h2", "", "", "h2")]
    #[case("span", "", "", "")]
    fn builds_selectors(
        #[case] tag: &str,
        #[case] id: &str,
        #[case] class: &str,
        #[case] expected: &str,
    ) {
        assert_eq!(css_selector(tag, id, class), expected);
    }

    #[test]
    fn html_preview_leads_with_main_content() {
        let body = "Long enough article body for the main content heuristic. ".repeat(3);
        let html = format!(
            "<html><head><title>Blog</title><script>var a = 'ignored text';</script></head>\
             <body><article class=\"post entry wide\"><h1>Headline</h1><p>{body}</p></article>\
             <footer id=\"foot\">fine print</footer></body></html>"
        );

        let preview = preview_html("https://blog.example.com", &html).unwrap();

        assert_eq!(preview.response_type, ResponseType::Html);
        assert_eq!(preview.title, "Blog");
        assert_eq!(preview.elements[0].selector.as_deref(), Some("article"));
        let article = preview
            .elements
            .iter()
            .find(|e| e.selector.as_deref() == Some("article.post"))
            .unwrap();
        assert_eq!(article.class.as_deref(), Some("post entry..."));
        assert!(preview.elements.iter().any(|e| e.selector.as_deref() == Some("h1")));
    }

    #[test]
    fn empty_shell_page_needs_rendering() {
        let err = preview_html("https://spa.example.com", "<html><body><div id=\"app\"></div></body></html>")
            .unwrap_err();

        assert_eq!(err.reason(), "needs_login_or_rendering");
    }

    #[test]
    fn json_preview_walks_fields() {
        let body = br#"{"data": {"items": [{"id": 1, "name": "kettle"}], "total": 1}, "ok": true}"#;

        let preview = preview_json("https://api.example.com", body).unwrap();
        let fields: Vec<&str> = preview
            .elements
            .iter()
            .filter_map(|e| e.field.as_deref())
            .collect();

        assert_eq!(preview.response_type, ResponseType::Json);
        assert!(fields.contains(&"data.items"));
        assert!(fields.contains(&"data.items[0].name"));
        assert!(fields.contains(&"ok"));
        let items = preview
            .elements
            .iter()
            .find(|e| e.field.as_deref() == Some("data.items"))
            .unwrap();
        assert_eq!(items.tag, "array");
        assert_eq!(items.text, "[1 items]");
    }

    #[test]
    fn broken_json_is_malformed() {
        assert!(looks_like_json(None, b"  {\"a\": "));
        let err = preview_json("u", b"{\"a\": ").unwrap_err();
        assert_eq!(err.reason(), "malformed_response");
    }

    #[test]
    fn truncates_on_char_boundaries() {
        let long = "é".repeat(200);
        let cut = truncate(&long);
        assert!(cut.ends_with("..."));
        assert_eq!(cut.chars().count(), TEXT_PREVIEW_CHARS + 3);
    }
}
