use std::{fmt::Debug, sync::Arc, time::Instant};

use async_trait::async_trait;
use harvester_common::{
    datasource::{ApiConfig, DataSourceConfig, WebConfig},
    error::Error,
    record::Record,
};
use reqwest::{Client, header};
use tracing::{debug, info};

use crate::{
    api::ApiConnector,
    database::DatabaseConnector,
    http::{api_request, build_client, read_body_capped},
    preview::{
        MAX_PREVIEW_BYTES, PREVIEW_TIMEOUT, PreviewError, StructurePreview, looks_like_json,
        preview_html, preview_json,
    },
    probe::ConnectionProbe,
    rpa::{BrowserDriver, SessionManager},
    web::WebConnector,
};

/// One collection pass against a data source.
#[async_trait]
pub trait Collector: Send + Sync + Debug + 'static {
    async fn collect(
        &self,
        datasource_id: i64,
        config: &DataSourceConfig,
    ) -> Result<Vec<Record>, Error>;
}

pub struct ConnectorSettings {
    pub driver: Arc<dyn BrowserDriver>,

    /// How long an established browser session is reused
    pub session_reuse: chrono::Duration,
}

/// Connector set covering every data source type.
#[derive(Debug, Clone)]
pub struct Connectors {
    web: WebConnector,
    api: ApiConnector,
    database: DatabaseConnector,
    probe_client: Client,
}

impl Connectors {
    pub fn new(settings: ConnectorSettings) -> Result<Self, Error> {
        let sessions = Arc::new(SessionManager::new(settings.session_reuse));
        Ok(Self {
            web: WebConnector::new(settings.driver, sessions),
            api: ApiConnector::new()?,
            database: DatabaseConnector,
            probe_client: build_client(Some(PREVIEW_TIMEOUT))?,
        })
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        self.web.sessions()
    }

    /// Probes reachability of a data source without collecting.
    pub async fn test_connection(&self, config: &DataSourceConfig) -> ConnectionProbe {
        let started = Instant::now();

        match config {
            DataSourceConfig::Web(web) => {
                let mut request = self.probe_client.get(&web.url);
                for (name, value) in &web.headers {
                    request = request.header(name, value);
                }
                match request.send().await {
                    Ok(response) => ConnectionProbe::from_status(started, &web.url, response.status()),
                    Err(e) => ConnectionProbe::network_failure(started, &web.url, e),
                }
            }
            DataSourceConfig::Api(api) => {
                let request = match api_request(&self.probe_client, api) {
                    Ok(request) => request,
                    Err(e) => return ConnectionProbe::failed(started, e.to_string()),
                };
                match request.send().await {
                    Ok(response) => ConnectionProbe::from_status(started, &api.url, response.status()),
                    Err(e) => ConnectionProbe::network_failure(started, &api.url, e),
                }
            }
            DataSourceConfig::Database(db) => match self.database.ping(db).await {
                Ok(()) => ConnectionProbe::success(
                    started,
                    format!("connected to {}:{}/{}", db.host, db.port, db.database),
                ),
                Err(Error::ConnectivityFailure(msg)) => {
                    ConnectionProbe::failed(started, format!("network failure: {msg}"))
                }
                Err(e) => ConnectionProbe::failed(started, e.to_string()),
            },
        }
    }

    /// Discovers selector or field candidates of a data source.
    /// ---
    /// Web sources with a session configuration are rendered through the
    /// browser session; everything else is fetched once over HTTP.
    /// Nothing is persisted.
    pub async fn preview(
        &self,
        datasource_id: i64,
        config: &DataSourceConfig,
    ) -> Result<StructurePreview, PreviewError> {
        match config {
            DataSourceConfig::Web(web) if needs_session(web) => {
                let html = self.web.fetch_html(datasource_id, web).await?;
                preview_html(&web.url, &html)
            }
            DataSourceConfig::Web(web) => {
                let mut request = self.probe_client.get(&web.url).header(
                    header::ACCEPT,
                    "application/json, text/html, */*;q=0.8",
                );
                for (name, value) in &web.headers {
                    request = request.header(name, value);
                }
                self.preview_response(&web.url, request).await
            }
            DataSourceConfig::Api(api) => self.preview_api(api).await,
            DataSourceConfig::Database(_) => Err(PreviewError::Unsupported(
                "structure preview is available for web and api sources only".to_string(),
            )),
        }
    }

    async fn preview_api(&self, api: &ApiConfig) -> Result<StructurePreview, PreviewError> {
        let request = api_request(&self.probe_client, api)?;
        self.preview_response(&api.url, request).await
    }

    async fn preview_response(
        &self,
        url: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<StructurePreview, PreviewError> {
        let response = request
            .send()
            .await
            .map_err(|e| PreviewError::Unreachable(format!("cannot reach {url}: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(PreviewError::NeedsLoginOrRendering(format!(
                "{url} answered HTTP {status}; the page requires login, configure rpa_config"
            )));
        }
        if !status.is_success() {
            return Err(PreviewError::Unreachable(format!("{url} answered HTTP {status}")));
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = read_body_capped(response, MAX_PREVIEW_BYTES)
            .await
            .map_err(|e| PreviewError::Unreachable(format!("failed to read {url}: {e}")))?;

        debug!("Preview: {} bytes from {}", body.len(), url);

        if looks_like_json(content_type.as_deref(), &body) {
            preview_json(url, &body)
        } else {
            preview_html(url, &String::from_utf8_lossy(&body))
        }
    }
}

/// Sources that only render correctly inside a browser session.
fn needs_session(web: &WebConfig) -> bool {
    web.rpa_config.as_ref().is_some_and(|rpa| {
        !rpa.actions.is_empty() || !matches!(rpa.auth(), Ok(None))
    })
}

#[async_trait]
impl Collector for Connectors {
    async fn collect(
        &self,
        datasource_id: i64,
        config: &DataSourceConfig,
    ) -> Result<Vec<Record>, Error> {
        info!(
            "Connectors: collecting {} source {}",
            config.kind(),
            datasource_id
        );

        match config {
            DataSourceConfig::Web(web) => self.web.collect(datasource_id, web).await,
            DataSourceConfig::Api(api) => self.api.collect(api).await,
            DataSourceConfig::Database(db) => self.database.collect(db).await,
        }
    }
}
