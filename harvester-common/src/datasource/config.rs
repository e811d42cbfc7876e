use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::error::Error;

use super::DataSourceType;

/// Selector key naming the container element of a repeated item (web)
pub const LIST_SELECTOR_KEY: &str = "_list";

/// Selector key naming the record root inside a JSON document (api)
pub const DATA_PATH_SELECTOR_KEY: &str = "_data_path";

pub const DEFAULT_RPA_WAIT_SECS: u64 = 30;

/// Resolved connector configuration.
/// ---
/// One arm per data source type. Connector dispatch matches on this
/// exhaustively, so adding a type is a compile-time checked change.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DataSourceConfig {
    Web(WebConfig),
    Api(ApiConfig),
    Database(DatabaseConfig),
}

impl DataSourceConfig {
    pub fn from_value(kind: DataSourceType, value: serde_json::Value) -> Result<Self, Error> {
        let parsed = match kind {
            DataSourceType::Web => serde_json::from_value(value).map(DataSourceConfig::Web),
            DataSourceType::Api => serde_json::from_value(value).map(DataSourceConfig::Api),
            DataSourceType::Database => {
                serde_json::from_value(value).map(DataSourceConfig::Database)
            }
        }
        .map_err(|e| Error::InvalidInput(format!("invalid {kind} config: {e}")))?;

        parsed.validate()?;

        Ok(parsed)
    }

    pub fn kind(&self) -> DataSourceType {
        match self {
            DataSourceConfig::Web(_) => DataSourceType::Web,
            DataSourceConfig::Api(_) => DataSourceType::Api,
            DataSourceConfig::Database(_) => DataSourceType::Database,
        }
    }

    fn validate(&self) -> Result<(), Error> {
        match self {
            DataSourceConfig::Web(web) => {
                require_non_empty("url", &web.url)?;
                if let Some(rpa) = &web.rpa_config {
                    rpa.auth()?;
                }
                Ok(())
            }
            DataSourceConfig::Api(api) => require_non_empty("url", &api.url),
            DataSourceConfig::Database(db) => {
                require_non_empty("host", &db.host)?;
                require_non_empty("database", &db.database)?;
                db.resolved_dialect().map(|_| ())
            }
        }
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<(), Error> {
    if value.trim().is_empty() {
        return Err(Error::InvalidInput(format!("'{field}' is required")));
    }
    Ok(())
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WebConfig {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Output field name -> CSS selector.
    /// Empty means "extract the page's primary readable content".
    #[serde(default)]
    pub selectors: BTreeMap<String, String>,
    #[serde(default)]
    pub rpa_config: Option<RpaConfig>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RpaConfig {
    #[serde(default)]
    pub login: Option<LoginConfig>,

    /// Pre-captured `Cookie` header, `name=value; name2=value2`
    #[serde(default)]
    pub cookie_string: Option<String>,
    #[serde(default)]
    pub initial_cookies: Vec<CookieParam>,

    /// Session marker used with `cookie_string` / `initial_cookies`
    #[serde(default)]
    pub check_selector: Option<String>,
    #[serde(default)]
    pub check_stale_on: StaleMarker,
    #[serde(default)]
    pub actions: Vec<PageAction>,

    /// Seconds to wait for any awaited selector
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub max_login_attempts: Option<u32>,
}

impl RpaConfig {
    /// Resolves which session strategy this config declares.
    /// ---
    /// At most one of `login` and cookie injection may be configured.
    pub fn auth(&self) -> Result<Option<SessionAuth>, Error> {
        let cookie_string = self
            .cookie_string
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let has_cookies = cookie_string.is_some() || !self.initial_cookies.is_empty();

        match (&self.login, has_cookies) {
            (Some(_), true) => Err(Error::InvalidInput(
                "rpa_config must declare either 'login' or 'cookie_string', not both".to_string(),
            )),
            (Some(login), false) => {
                for (field, value) in [
                    ("username_selector", &login.username_selector),
                    ("password_selector", &login.password_selector),
                    ("submit_selector", &login.submit_selector),
                ] {
                    require_non_empty(field, value)?;
                }
                Ok(Some(SessionAuth::Login(login.clone())))
            }
            (None, true) => Ok(Some(SessionAuth::CookieString(CookieSession {
                cookie_string: cookie_string.map(str::to_string),
                initial_cookies: self.initial_cookies.clone(),
                check_selector: self
                    .check_selector
                    .clone()
                    .filter(|s| !s.trim().is_empty()),
                stale_on: self.check_stale_on,
            }))),
            (None, false) => Ok(None),
        }
    }

    pub fn wait_timeout_secs(&self) -> u64 {
        self.timeout.filter(|t| *t > 0).unwrap_or(DEFAULT_RPA_WAIT_SECS)
    }
}

/// Session strategy of a `web` data source.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionAuth {
    Login(LoginConfig),
    CookieString(CookieSession),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoginConfig {
    /// Defaults to the data source URL
    #[serde(default)]
    pub url: Option<String>,
    pub username_selector: String,
    pub password_selector: String,
    pub submit_selector: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub wait_after: Option<String>,

    /// Present only when the session is logged in
    #[serde(default)]
    pub check_selector: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CookieSession {
    pub cookie_string: Option<String>,
    pub initial_cookies: Vec<CookieParam>,
    pub check_selector: Option<String>,
    pub stale_on: StaleMarker,
}

/// How the `check_selector` of an injected cookie reports staleness.
#[derive(
    Clone, Debug, Copy, Default, PartialEq, Eq, Serialize, Deserialize, EnumString, Display,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum StaleMarker {
    /// The selector marks a logged-in page, its absence means stale
    #[default]
    Absent,
    /// The selector marks the logged-out page, its presence means stale
    Present,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CookieParam {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PageAction {
    Input {
        selector: String,
        #[serde(default)]
        value: String,
        #[serde(default)]
        wait_for: Option<String>,
        #[serde(default)]
        wait_ms: Option<u64>,
    },
    Click {
        selector: String,
        #[serde(default)]
        wait_for: Option<String>,
        #[serde(default)]
        wait_ms: Option<u64>,
    },
    Select {
        selector: String,
        #[serde(default)]
        value: String,
        #[serde(default)]
        wait_for: Option<String>,
        #[serde(default)]
        wait_ms: Option<u64>,
    },
    Wait {
        #[serde(default)]
        selector: Option<String>,
        #[serde(default)]
        wait_for: Option<String>,
        #[serde(default)]
        wait_ms: Option<u64>,
    },
}

impl PageAction {
    /// The post-action condition: awaited selector and fixed delay.
    pub fn settle(&self) -> (Option<&str>, Option<u64>) {
        match self {
            PageAction::Input {
                wait_for, wait_ms, ..
            }
            | PageAction::Click {
                wait_for, wait_ms, ..
            }
            | PageAction::Select {
                wait_for, wait_ms, ..
            } => (wait_for.as_deref(), *wait_ms),
            PageAction::Wait {
                selector,
                wait_for,
                wait_ms,
            } => (wait_for.as_deref().or(selector.as_deref()), *wait_ms),
        }
    }
}

#[derive(Clone, Debug, Copy, Default, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ApiAuthType {
    #[default]
    None,
    Bearer,
    Basic,
    ApiKey,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub auth_type: ApiAuthType,

    /// `token` (bearer), `username`/`password` (basic),
    /// `header`/`key` (api_key)
    #[serde(default)]
    pub auth_data: BTreeMap<String, String>,

    /// Seconds
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,

    /// Output field name -> JSON path; `_data_path` selects the record root
    #[serde(default)]
    pub selectors: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DbDialect {
    Postgres,
    Mysql,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub dialect: Option<DbDialect>,
    pub host: String,
    pub port: u16,
    #[serde(default, alias = "username")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub database: String,
    #[serde(default)]
    pub query: Option<String>,
}

impl DatabaseConfig {
    /// Explicit dialect, or inferred from the well-known port.
    pub fn resolved_dialect(&self) -> Result<DbDialect, Error> {
        match (self.dialect, self.port) {
            (Some(dialect), _) => Ok(dialect),
            (None, 5432) => Ok(DbDialect::Postgres),
            (None, 3306) => Ok(DbDialect::Mysql),
            (None, port) => Err(Error::InvalidInput(format!(
                "cannot infer database dialect from port {port}, set 'dialect'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn web_config_with_login_resolves_login_session() {
        let cfg = DataSourceConfig::from_value(
            DataSourceType::Web,
            json!({
                "url": "https://example.com/list",
                "selectors": {"_list": ".item", "title": "h2"},
                "rpa_config": {
                    "login": {
                        "username_selector": "#user",
                        "password_selector": "#pass",
                        "submit_selector": "button[type=submit]",
                        "username": "bot",
                        "password": "secret",
                        "check_selector": ".avatar"
                    },
                    "actions": [
                        {"type": "input", "selector": "#q", "value": "rust", "wait_for": ".results"},
                        {"type": "wait", "wait_ms": 500}
                    ]
                }
            }),
        )
        .expect("valid web config");

        let DataSourceConfig::Web(web) = cfg else {
            panic!("expected web config");
        };
        let rpa = web.rpa_config.expect("rpa config");
        assert!(matches!(rpa.auth(), Ok(Some(SessionAuth::Login(_)))));
        assert_eq!(rpa.actions.len(), 2);
        assert_eq!(rpa.actions[0].settle(), (Some(".results"), None));
        assert_eq!(rpa.actions[1].settle(), (None, Some(500)));
    }

    #[test]
    fn login_and_cookie_string_are_mutually_exclusive() {
        let err = DataSourceConfig::from_value(
            DataSourceType::Web,
            json!({
                "url": "https://example.com",
                "rpa_config": {
                    "cookie_string": "sid=abc",
                    "login": {
                        "username_selector": "#u",
                        "password_selector": "#p",
                        "submit_selector": "#s"
                    }
                }
            }),
        )
        .expect_err("should be rejected");
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn cookie_session_defaults_to_absent_marker() {
        let rpa: RpaConfig = serde_json::from_value(json!({
            "cookie_string": "sid=abc; theme=dark",
            "check_selector": ".user-name"
        }))
        .expect("parse");

        let Ok(Some(SessionAuth::CookieString(session))) = rpa.auth() else {
            panic!("expected cookie session");
        };
        assert_eq!(session.stale_on, StaleMarker::Absent);
        assert_eq!(session.check_selector.as_deref(), Some(".user-name"));
    }

    #[test]
    fn database_dialect_inferred_from_port() {
        let cfg: DatabaseConfig = serde_json::from_value(json!({
            "host": "db", "port": 3306, "username": "ro", "database": "shop"
        }))
        .expect("parse");
        assert_eq!(cfg.resolved_dialect().ok(), Some(DbDialect::Mysql));
        assert_eq!(cfg.user, "ro");

        let odd = DatabaseConfig { port: 6000, ..cfg };
        assert!(odd.resolved_dialect().is_err());
    }

    #[test]
    fn api_config_rejects_missing_url() {
        let err = DataSourceConfig::from_value(DataSourceType::Api, json!({"url": " "}));
        assert!(err.is_err());
    }
}
