use std::{sync::Arc, time::Duration};

use harvester_common::{
    datasource::WebConfig,
    error::Error,
    record::Record,
};
use tracing::{debug, info};

use crate::{
    extract::extract_records,
    rpa::{
        BrowserDriver, BrowserPage, DEFAULT_MAX_LOGIN_ATTEMPTS, PageGuard, SessionManager,
        SessionRequest, apply_actions,
    },
};

/// Collects rendered pages through a browser driver.
#[derive(Debug, Clone)]
pub struct WebConnector {
    driver: Arc<dyn BrowserDriver>,
    sessions: Arc<SessionManager>,
}

impl WebConnector {
    pub fn new(driver: Arc<dyn BrowserDriver>, sessions: Arc<SessionManager>) -> Self {
        Self { driver, sessions }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub async fn collect(&self, datasource_id: i64, web: &WebConfig) -> Result<Vec<Record>, Error> {
        let html = self.fetch_html(datasource_id, web).await?;

        let records = extract_records(&html, &web.selectors, &web.url)?;
        info!(
            "WebConnector: extracted {} records from {}",
            records.len(),
            web.url
        );
        Ok(records)
    }

    /// Final DOM of the configured page, session and actions applied.
    pub(crate) async fn fetch_html(
        &self,
        datasource_id: i64,
        web: &WebConfig,
    ) -> Result<String, Error> {
        let mut guard = PageGuard::new(self.driver.open_page(&web.headers).await?);

        let html = self.render(datasource_id, web, guard.page()?).await;
        guard.close().await;
        html
    }

    async fn render(
        &self,
        datasource_id: i64,
        web: &WebConfig,
        page: &mut dyn BrowserPage,
    ) -> Result<String, Error> {
        let Some(rpa) = &web.rpa_config else {
            page.navigate(&web.url).await?;
            return page.html().await;
        };

        let wait = Duration::from_secs(rpa.wait_timeout_secs());
        match rpa.auth()? {
            Some(auth) => {
                self.sessions
                    .establish(
                        SessionRequest {
                            datasource_id,
                            auth: &auth,
                            target_url: &web.url,
                            wait,
                            max_login_attempts: rpa
                                .max_login_attempts
                                .unwrap_or(DEFAULT_MAX_LOGIN_ATTEMPTS),
                        },
                        page,
                    )
                    .await?
            }
            None => page.navigate(&web.url).await?,
        }

        if !rpa.actions.is_empty() {
            debug!(
                "WebConnector: running {} page actions on {}",
                rpa.actions.len(),
                web.url
            );
            apply_actions(page, &rpa.actions, wait).await?;
        }

        page.html().await
    }
}
