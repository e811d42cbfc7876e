use std::time::Duration;

use harvester_common::{
    datasource::{ApiAuthType, ApiConfig},
    error::Error,
};
use reqwest::{Client, Method, RequestBuilder, Response, redirect};

pub(crate) const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

pub(crate) const MAX_REDIRECTS: usize = 5;

/// Client shared by the web, api and preview paths.
pub(crate) fn build_client(timeout: Option<Duration>) -> Result<Client, Error> {
    let mut builder = Client::builder()
        .user_agent(BROWSER_USER_AGENT)
        .redirect(redirect::Policy::limited(MAX_REDIRECTS));

    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }

    builder
        .build()
        .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))
}

pub(crate) fn parse_method(method: &str) -> Result<Method, Error> {
    let method = method.trim();
    if method.is_empty() {
        return Ok(Method::GET);
    }

    Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|_| Error::InvalidInput(format!("unsupported HTTP method '{method}'")))
}

/// Builds the outgoing request of an `api` source, credentials included.
pub(crate) fn api_request(client: &Client, api: &ApiConfig) -> Result<RequestBuilder, Error> {
    let method = parse_method(&api.method)?;
    let has_body = method != Method::GET && method != Method::HEAD;

    let mut request = client.request(method, &api.url);
    for (name, value) in &api.headers {
        request = request.header(name, value);
    }

    let auth = |key: &str| api.auth_data.get(key).map(String::as_str).unwrap_or("");
    request = match api.auth_type {
        ApiAuthType::None => request,
        ApiAuthType::Bearer => request.bearer_auth(auth("token")),
        ApiAuthType::Basic => request.basic_auth(auth("username"), Some(auth("password"))),
        ApiAuthType::ApiKey => {
            let header = match auth("header") {
                "" => "X-API-Key",
                name => name,
            };
            request.header(header, auth("key"))
        }
    };

    if let Some(timeout) = api.timeout.filter(|t| *t > 0) {
        request = request.timeout(Duration::from_secs(timeout));
    }

    if has_body {
        if let Some(body) = &api.body {
            request = request.json(body);
        }
    }

    Ok(request)
}

/// Reads at most `cap` bytes of the body, dropping the remainder.
pub(crate) async fn read_body_capped(
    mut response: Response,
    cap: usize,
) -> Result<Vec<u8>, reqwest::Error> {
    let mut buf = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        let room = cap.saturating_sub(buf.len());
        buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
        if buf.len() >= cap {
            break;
        }
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn api(auth_type: ApiAuthType, auth_data: &[(&str, &str)]) -> ApiConfig {
        ApiConfig {
            url: "https://api.example.com/items".to_string(),
            method: "post".to_string(),
            headers: BTreeMap::from([("Accept".to_string(), "application/json".to_string())]),
            auth_type,
            auth_data: auth_data
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            timeout: None,
            body: Some(serde_json::json!({"page": 1})),
            selectors: BTreeMap::new(),
        }
    }

    #[test]
    fn api_key_defaults_to_x_api_key_header() {
        let client = build_client(None).unwrap();
        let request = api_request(&client, &api(ApiAuthType::ApiKey, &[("key", "k-123")]))
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.headers()["X-API-Key"], "k-123");
        assert_eq!(request.headers()["Accept"], "application/json");
        assert!(request.body().is_some());
    }

    #[test]
    fn bearer_token_is_sent_as_authorization() {
        let client = build_client(None).unwrap();
        let request = api_request(&client, &api(ApiAuthType::Bearer, &[("token", "t0k")]))
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(request.headers()["Authorization"], "Bearer t0k");
    }

    #[test]
    fn unknown_method_is_rejected() {
        assert!(matches!(parse_method("FETCH ME"), Err(Error::InvalidInput(_))));
        assert_eq!(parse_method("").unwrap(), Method::GET);
    }
}
