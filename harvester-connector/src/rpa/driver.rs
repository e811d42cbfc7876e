use std::{collections::BTreeMap, fmt::Debug, time::Duration};

use async_trait::async_trait;
use harvester_common::error::Error;
use tracing::warn;

use crate::extract::selector_present;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
}

/// Source of browser pages.
/// ---
/// A driver hands out isolated pages; each page carries its own cookie jar.
#[async_trait]
pub trait BrowserDriver: Send + Sync + Debug + 'static {
    async fn open_page(
        &self,
        headers: &BTreeMap<String, String>,
    ) -> Result<Box<dyn BrowserPage>, Error>;
}

/// One open page (tab) driven by the web connector.
#[async_trait]
pub trait BrowserPage: Send {
    async fn set_cookies(&mut self, cookies: &[SessionCookie]) -> Result<(), Error>;

    async fn cookies(&mut self) -> Result<Vec<SessionCookie>, Error>;

    /// Loads `url`. Unreachable hosts are a `ConnectivityFailure`.
    async fn navigate(&mut self, url: &str) -> Result<(), Error>;

    /// Serialized DOM of the current document
    async fn html(&mut self) -> Result<String, Error>;

    async fn fill(&mut self, selector: &str, value: &str) -> Result<(), Error>;

    async fn click(&mut self, selector: &str) -> Result<(), Error>;

    async fn select_option(&mut self, selector: &str, value: &str) -> Result<(), Error>;

    /// Waits until `selector` is present in the DOM.
    /// ---
    /// Polls the serialized document. A selector still absent after
    /// `timeout` is a `CollectionFailure`.
    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<(), Error> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let html = self.html().await?;
            if selector_present(&html, selector)? {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::CollectionFailure(format!(
                    "selector '{selector}' did not appear within {}s",
                    timeout.as_secs()
                )));
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    async fn close(&mut self) -> Result<(), Error>;
}

/// Closes the wrapped page when dropped without an explicit close.
/// ---
/// A cancelled or timed-out collection drops its future mid-flight; the
/// page is then closed on a detached task.
pub(crate) struct PageGuard {
    page: Option<Box<dyn BrowserPage>>,
}

impl PageGuard {
    pub(crate) fn new(page: Box<dyn BrowserPage>) -> Self {
        Self { page: Some(page) }
    }

    pub(crate) fn page(&mut self) -> Result<&mut (dyn BrowserPage + 'static), Error> {
        self.page
            .as_deref_mut()
            .ok_or_else(|| Error::Internal("browser page already closed".to_string()))
    }

    pub(crate) async fn close(mut self) {
        if let Some(mut page) = self.page.take() {
            if let Err(e) = page.close().await {
                warn!("Browser: failed to close page: {}", e);
            }
        }
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        let Some(mut page) = self.page.take() else {
            return;
        };
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = page.close().await {
                    warn!("Browser: failed to close abandoned page: {}", e);
                }
            });
        }
    }
}
