use std::time::Instant;

use reqwest::StatusCode;
use serde::Serialize;

#[derive(Clone, Debug, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Success,
    Failed,
}

/// Outcome of a connectivity test.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConnectionProbe {
    pub status: ProbeStatus,
    pub message: String,
    pub latency_ms: u64,
}

impl ConnectionProbe {
    pub(crate) fn success(started: Instant, message: impl Into<String>) -> Self {
        Self {
            status: ProbeStatus::Success,
            message: message.into(),
            latency_ms: elapsed_ms(started),
        }
    }

    pub(crate) fn failed(started: Instant, message: impl Into<String>) -> Self {
        Self {
            status: ProbeStatus::Failed,
            message: message.into(),
            latency_ms: elapsed_ms(started),
        }
    }

    /// Classifies an HTTP answer.
    /// ---
    /// 401 and 403 are reported as rejected credentials, distinct from
    /// transport failures and from other error statuses.
    pub(crate) fn from_status(started: Instant, url: &str, status: StatusCode) -> Self {
        match status {
            s if s.is_success() => Self::success(started, format!("connected to {url} (HTTP {s})")),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Self::failed(
                started,
                format!(
                    "authentication failed: {url} rejected the credentials (HTTP {status}), \
                     check the auth settings"
                ),
            ),
            s => Self::failed(started, format!("{url} answered HTTP {s}")),
        }
    }

    pub(crate) fn network_failure(started: Instant, url: &str, err: impl std::fmt::Display) -> Self {
        Self::failed(
            started,
            format!("network failure: could not reach {url}: {err}"),
        )
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_rejection_differs_from_network_failure() {
        let started = Instant::now();
        let auth = ConnectionProbe::from_status(started, "https://api.example.com", StatusCode::UNAUTHORIZED);
        let net = ConnectionProbe::network_failure(started, "https://api.example.com", "connection refused");

        assert_eq!(auth.status, ProbeStatus::Failed);
        assert_eq!(net.status, ProbeStatus::Failed);
        assert!(auth.message.starts_with("authentication failed"));
        assert!(net.message.starts_with("network failure"));
    }

    #[test]
    fn success_status_serializes_lowercase() {
        let probe = ConnectionProbe::from_status(Instant::now(), "u", StatusCode::OK);
        let json = serde_json::to_value(&probe).unwrap();
        assert_eq!(json["status"], "success");
    }
}
