use harvester_common::{datasource::ApiConfig, error::Error, record::Record};
use reqwest::Client;
use tracing::info;

use crate::{
    extract::records_from_json,
    http::{api_request, build_client},
};

/// Collects JSON documents from HTTP APIs.
#[derive(Debug, Clone)]
pub struct ApiConnector {
    client: Client,
}

impl ApiConnector {
    pub fn new() -> Result<Self, Error> {
        Ok(Self {
            client: build_client(None)?,
        })
    }

    /// Fetches the endpoint and maps the JSON payload onto records.
    /// ---
    /// Transport errors are connectivity failures; a non-2xx status or an
    /// unparseable body is a collection failure.
    pub async fn collect(&self, api: &ApiConfig) -> Result<Vec<Record>, Error> {
        let response = api_request(&self.client, api)?
            .send()
            .await
            .map_err(|e| Error::ConnectivityFailure(format!("request to {} failed: {e}", api.url)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::CollectionFailure(format!(
                "{} answered HTTP {status}",
                api.url
            )));
        }

        let body = response.bytes().await.map_err(|e| {
            Error::ConnectivityFailure(format!("failed to read response of {}: {e}", api.url))
        })?;
        let document: serde_json::Value = serde_json::from_slice(&body).map_err(|e| {
            Error::CollectionFailure(format!("response of {} is not valid JSON: {e}", api.url))
        })?;

        let records = records_from_json(&document, &api.selectors)?;
        info!(
            "ApiConnector: mapped {} records from {}",
            records.len(),
            api.url
        );
        Ok(records)
    }
}
