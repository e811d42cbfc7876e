use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use harvester_common::error::Error;
use reqwest::{Client, header};
use tracing::debug;
use url::Url;

use super::driver::{BrowserDriver, BrowserPage, SessionCookie};
use crate::{
    extract::selector_present,
    http::{build_client, read_body_capped},
};

const MAX_PAGE_BYTES: usize = 8 * 1024 * 1024;
const PAGE_LOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Driver that fetches pages over plain HTTP.
/// ---
/// Serves static pages and cookie sessions. Form interaction needs a
/// scripting browser and is reported as a collection failure.
#[derive(Debug, Clone)]
pub struct HttpDriver {
    client: Client,
}

impl HttpDriver {
    pub fn new() -> Result<Self, Error> {
        Ok(Self {
            client: build_client(Some(PAGE_LOAD_TIMEOUT))?,
        })
    }
}

#[async_trait]
impl BrowserDriver for HttpDriver {
    async fn open_page(
        &self,
        headers: &BTreeMap<String, String>,
    ) -> Result<Box<dyn BrowserPage>, Error> {
        Ok(Box::new(HttpPage {
            client: self.client.clone(),
            headers: headers.clone(),
            jar: Vec::new(),
            body: String::new(),
        }))
    }
}

struct HttpPage {
    client: Client,
    headers: BTreeMap<String, String>,
    jar: Vec<SessionCookie>,
    body: String,
}

impl HttpPage {
    fn cookie_header(&self, url: &Url) -> Option<String> {
        let host = url.host_str()?;
        let path = url.path();

        let pairs: Vec<String> = self
            .jar
            .iter()
            .filter(|c| domain_matches(&c.domain, host) && path.starts_with(c.path.as_str()))
            .map(|c| format!("{}={}", c.name, c.value))
            .collect();

        (!pairs.is_empty()).then(|| pairs.join("; "))
    }

    fn store(&mut self, cookie: SessionCookie) {
        self.jar
            .retain(|c| !(c.name == cookie.name && c.domain == cookie.domain && c.path == cookie.path));
        self.jar.push(cookie);
    }

    fn unsupported(action: &str, selector: &str) -> Error {
        Error::CollectionFailure(format!(
            "'{action}' on '{selector}' requires a JavaScript-capable browser, \
             set browser.driver to 'chromium'"
        ))
    }
}

#[async_trait]
impl BrowserPage for HttpPage {
    async fn set_cookies(&mut self, cookies: &[SessionCookie]) -> Result<(), Error> {
        for cookie in cookies {
            self.store(cookie.clone());
        }
        Ok(())
    }

    async fn cookies(&mut self) -> Result<Vec<SessionCookie>, Error> {
        Ok(self.jar.clone())
    }

    async fn navigate(&mut self, url: &str) -> Result<(), Error> {
        let parsed = Url::parse(url)
            .map_err(|e| Error::InvalidInput(format!("invalid page URL '{url}': {e}")))?;

        let mut request = self.client.get(parsed.clone());
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }
        if let Some(cookies) = self.cookie_header(&parsed) {
            request = request.header(header::COOKIE, cookies);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::ConnectivityFailure(format!("failed to load {url}: {e}")))?;

        let host = response
            .url()
            .host_str()
            .unwrap_or_default()
            .to_string();
        for value in response.headers().get_all(header::SET_COOKIE) {
            if let Some(cookie) = value.to_str().ok().and_then(|v| parse_set_cookie(v, &host)) {
                self.store(cookie);
            }
        }

        let status = response.status();
        if !status.is_success() {
            return Err(Error::CollectionFailure(format!(
                "{url} answered HTTP {status}"
            )));
        }

        let bytes = read_body_capped(response, MAX_PAGE_BYTES)
            .await
            .map_err(|e| Error::ConnectivityFailure(format!("failed to read {url}: {e}")))?;
        self.body = String::from_utf8_lossy(&bytes).into_owned();

        debug!("HttpDriver: loaded {} ({} bytes)", url, self.body.len());
        Ok(())
    }

    async fn html(&mut self) -> Result<String, Error> {
        Ok(self.body.clone())
    }

    async fn fill(&mut self, selector: &str, _value: &str) -> Result<(), Error> {
        Err(Self::unsupported("input", selector))
    }

    async fn click(&mut self, selector: &str) -> Result<(), Error> {
        Err(Self::unsupported("click", selector))
    }

    async fn select_option(&mut self, selector: &str, _value: &str) -> Result<(), Error> {
        Err(Self::unsupported("select", selector))
    }

    /// A static document never changes, so one check decides.
    async fn wait_for(&mut self, selector: &str, _timeout: Duration) -> Result<(), Error> {
        if selector_present(&self.body, selector)? {
            Ok(())
        } else {
            Err(Error::CollectionFailure(format!(
                "selector '{selector}' not found in page"
            )))
        }
    }

    async fn close(&mut self) -> Result<(), Error> {
        self.jar.clear();
        self.body.clear();
        Ok(())
    }
}

fn domain_matches(cookie_domain: &str, host: &str) -> bool {
    let domain = cookie_domain.trim_start_matches('.');
    host == domain || host.ends_with(&format!(".{domain}"))
}

fn parse_set_cookie(header: &str, host: &str) -> Option<SessionCookie> {
    let mut parts = header.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let mut cookie = SessionCookie {
        name: name.to_string(),
        value: value.trim().to_string(),
        domain: host.to_string(),
        path: "/".to_string(),
    };
    for attr in parts {
        match attr.split_once('=') {
            Some((k, v)) if k.trim().eq_ignore_ascii_case("domain") => {
                cookie.domain = v.trim().to_string()
            }
            Some((k, v)) if k.trim().eq_ignore_ascii_case("path") => {
                cookie.path = v.trim().to_string()
            }
            _ => {}
        }
    }

    Some(cookie)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_cookie_attributes_are_honoured() {
        let cookie =
            parse_set_cookie("sid=abc=123; Path=/app; Domain=.example.com; HttpOnly", "www.example.com")
                .unwrap();

        assert_eq!(cookie.name, "sid");
        assert_eq!(cookie.value, "abc=123");
        assert_eq!(cookie.domain, ".example.com");
        assert_eq!(cookie.path, "/app");
    }

    #[test]
    fn cookie_domains_match_subdomains() {
        assert!(domain_matches(".example.com", "www.example.com"));
        assert!(domain_matches("example.com", "example.com"));
        assert!(!domain_matches(".example.com", "badexample.com"));
    }

    #[tokio::test]
    async fn form_interaction_is_unsupported() {
        let driver = HttpDriver::new().unwrap();
        let mut page = driver.open_page(&BTreeMap::new()).await.unwrap();

        let err = page.fill("#user", "bot").await.unwrap_err();
        assert!(matches!(err, Error::CollectionFailure(msg) if msg.contains("chromium")));
    }

    #[tokio::test]
    async fn injected_cookies_are_scoped_by_host() {
        let driver = HttpDriver::new().unwrap();
        let mut page = driver.open_page(&BTreeMap::new()).await.unwrap();
        page.set_cookies(&[SessionCookie {
            name: "sid".into(),
            value: "1".into(),
            domain: ".example.com".into(),
            path: "/".into(),
        }])
        .await
        .unwrap();

        assert_eq!(page.cookies().await.unwrap().len(), 1);
    }
}
