mod config;

pub use config::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::error::Error;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DataSource {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub source_type: DataSourceType,
    pub status: DataSourceStatus,

    /// Raw payload, interpreted according to `source_type`
    pub config: serde_json::Value,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DataSource {
    pub fn typed_config(&self) -> Result<DataSourceConfig, Error> {
        DataSourceConfig::from_value(self.source_type, self.config.clone())
    }
}

#[derive(Clone, Debug, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DataSourceType {
    Web,
    Api,
    Database,
}

#[derive(Clone, Debug, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DataSourceStatus {
    Active,
    Inactive,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DataSourceDraft {
    pub name: String,
    pub source_type: DataSourceType,
    pub status: DataSourceStatus,
    pub config: serde_json::Value,
    pub description: Option<String>,
}

impl DataSourceDraft {
    /// Checks that the payload honours the schema of its type tag.
    pub fn validate(self) -> Result<Self, Error> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidInput(
                "data source name must not be empty".to_string(),
            ));
        }

        DataSourceConfig::from_value(self.source_type, self.config.clone())?;

        Ok(self)
    }
}
