use std::{collections::BTreeMap, fmt, sync::Arc};

use async_trait::async_trait;
use chromiumoxide::{
    Page,
    browser::{Browser, BrowserConfig},
    cdp::browser_protocol::network::{CookieParam, Headers, SetExtraHttpHeadersParams},
};
use futures::StreamExt;
use harvester_common::error::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::driver::{BrowserDriver, BrowserPage, SessionCookie};

/// Driver backed by a Chromium instance over the DevTools protocol.
pub struct ChromiumDriver {
    browser: Arc<Browser>,
    handler: JoinHandle<()>,
}

impl fmt::Debug for ChromiumDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChromiumDriver").finish_non_exhaustive()
    }
}

impl ChromiumDriver {
    /// Attaches to a running browser at `cdp_url`.
    /// ---
    /// An `http://` endpoint is resolved to its websocket via `/json/version`.
    pub async fn connect(cdp_url: &str) -> Result<Self, Error> {
        let (browser, mut handler) = Browser::connect(cdp_url).await.map_err(|e| {
            Error::Config(format!("failed to connect to browser at {cdp_url}: {e}"))
        })?;

        info!("ChromiumDriver: connected to {}", cdp_url);

        let handler = tokio::spawn(async move { while handler.next().await.is_some() {} });

        Ok(Self {
            browser: Arc::new(browser),
            handler,
        })
    }

    /// Launches a local headless Chromium.
    pub async fn launch() -> Result<Self, Error> {
        let config = BrowserConfig::builder()
            .no_sandbox()
            .build()
            .map_err(|e| Error::Config(format!("invalid browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| Error::Config(format!("failed to launch browser: {e}")))?;

        info!("ChromiumDriver: launched local headless browser");

        let handler = tokio::spawn(async move { while handler.next().await.is_some() {} });

        Ok(Self {
            browser: Arc::new(browser),
            handler,
        })
    }
}

impl Drop for ChromiumDriver {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

#[async_trait]
impl BrowserDriver for ChromiumDriver {
    async fn open_page(
        &self,
        headers: &BTreeMap<String, String>,
    ) -> Result<Box<dyn BrowserPage>, Error> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| Error::ConnectivityFailure(format!("failed to open browser page: {e}")))?;

        if !headers.is_empty() {
            let headers = Headers::new(serde_json::to_value(headers)?);
            page.execute(SetExtraHttpHeadersParams::new(headers))
                .await
                .map_err(|e| Error::CollectionFailure(format!("failed to set headers: {e}")))?;
        }

        Ok(Box::new(ChromiumPage { page }))
    }
}

struct ChromiumPage {
    page: Page,
}

impl ChromiumPage {
    async fn eval(&self, script: String) -> Result<(), Error> {
        self.page
            .evaluate(script)
            .await
            .map(|_| ())
            .map_err(|e| Error::CollectionFailure(format!("script evaluation failed: {e}")))
    }
}

fn js_string(value: &str) -> Result<String, Error> {
    Ok(serde_json::to_string(value)?)
}

fn element_error(selector: &str, e: impl fmt::Display) -> Error {
    Error::CollectionFailure(format!("element '{selector}': {e}"))
}

#[async_trait]
impl BrowserPage for ChromiumPage {
    async fn set_cookies(&mut self, cookies: &[SessionCookie]) -> Result<(), Error> {
        let mut params = Vec::with_capacity(cookies.len());
        for cookie in cookies {
            let param = CookieParam::builder()
                .name(cookie.name.clone())
                .value(cookie.value.clone())
                .domain(cookie.domain.clone())
                .path(cookie.path.clone())
                .build()
                .map_err(|e| Error::InvalidInput(format!("invalid cookie '{}': {e}", cookie.name)))?;
            params.push(param);
        }

        self.page
            .set_cookies(params)
            .await
            .map(|_| ())
            .map_err(|e| Error::CollectionFailure(format!("failed to set cookies: {e}")))
    }

    async fn cookies(&mut self) -> Result<Vec<SessionCookie>, Error> {
        let cookies = self
            .page
            .get_cookies()
            .await
            .map_err(|e| Error::CollectionFailure(format!("failed to read cookies: {e}")))?;

        Ok(cookies
            .into_iter()
            .map(|c| SessionCookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
            })
            .collect())
    }

    async fn navigate(&mut self, url: &str) -> Result<(), Error> {
        self.page
            .goto(url)
            .await
            .map_err(|e| Error::ConnectivityFailure(format!("failed to load {url}: {e}")))?;
        debug!("ChromiumDriver: navigated to {}", url);
        Ok(())
    }

    async fn html(&mut self) -> Result<String, Error> {
        self.page
            .content()
            .await
            .map_err(|e| Error::CollectionFailure(format!("failed to read page content: {e}")))
    }

    async fn fill(&mut self, selector: &str, value: &str) -> Result<(), Error> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|e| element_error(selector, e))?;

        self.eval(format!(
            "document.querySelector({}).value = ''",
            js_string(selector)?
        ))
        .await?;

        element
            .click()
            .await
            .map_err(|e| element_error(selector, e))?
            .type_str(value)
            .await
            .map_err(|e| element_error(selector, e))?;
        Ok(())
    }

    async fn click(&mut self, selector: &str) -> Result<(), Error> {
        self.page
            .find_element(selector)
            .await
            .map_err(|e| element_error(selector, e))?
            .click()
            .await
            .map_err(|e| element_error(selector, e))?;
        Ok(())
    }

    async fn select_option(&mut self, selector: &str, value: &str) -> Result<(), Error> {
        self.page
            .find_element(selector)
            .await
            .map_err(|e| element_error(selector, e))?;

        self.eval(format!(
            "(function() {{ const el = document.querySelector({sel}); el.value = {val}; \
             el.dispatchEvent(new Event('change', {{ bubbles: true }})); }})()",
            sel = js_string(selector)?,
            val = js_string(value)?,
        ))
        .await
    }

    async fn close(&mut self) -> Result<(), Error> {
        self.page
            .clone()
            .close()
            .await
            .map_err(|e| {
                warn!("ChromiumDriver: close failed: {}", e);
                Error::Internal(format!("failed to close page: {e}"))
            })
    }
}
