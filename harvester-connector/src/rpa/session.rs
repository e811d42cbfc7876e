use std::{
    collections::{HashMap, hash_map::DefaultHasher},
    hash::{Hash, Hasher},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use harvester_common::{
    datasource::{CookieSession, LoginConfig, SessionAuth, StaleMarker},
    error::Error,
};
use tracing::{debug, info, warn};
use url::Url;

use super::driver::{BrowserPage, SessionCookie};
use crate::extract::selector_present;

pub const DEFAULT_MAX_LOGIN_ATTEMPTS: u32 = 1;
const POST_LOGIN_SETTLE: Duration = Duration::from_secs(3);

#[derive(Clone, Debug)]
struct CachedSession {
    cookies: Vec<SessionCookie>,
    established_at: DateTime<Utc>,

    /// Credentials the session was built from
    fingerprint: u64,

    /// Slot generation the establishment started under
    generation: u64,
}

#[derive(Debug, Default)]
struct SessionSlot {
    cached: tokio::sync::Mutex<Option<CachedSession>>,

    /// Bumped by `invalidate`; sessions of an older generation are stale
    generation: AtomicU64,
}

/// Parameters of one session establishment.
pub struct SessionRequest<'a> {
    pub datasource_id: i64,
    pub auth: &'a SessionAuth,
    pub target_url: &'a str,
    pub wait: Duration,
    pub max_login_attempts: u32,
}

/// Authenticated browser sessions, one per data source.
/// ---
/// A session is reused for `reuse_window` after it was established.
/// Establishment for one data source is single-flight: concurrent
/// collections wait on the same slot, so at most one login runs at a time
/// and the later callers reuse its cookies. Slots live as long as the
/// manager; invalidation only ages what they hold.
#[derive(Debug)]
pub struct SessionManager {
    reuse_window: chrono::Duration,
    slots: Mutex<HashMap<i64, Arc<SessionSlot>>>,
}

impl SessionManager {
    pub fn new(reuse_window: chrono::Duration) -> Self {
        Self {
            reuse_window,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, datasource_id: i64) -> Arc<SessionSlot> {
        let mut slots = match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        slots.entry(datasource_id).or_default().clone()
    }

    /// Marks the cached session of a data source stale.
    /// ---
    /// A login in flight on the slot finishes, but what it caches is
    /// already outdated, so the next collection logs in again.
    pub fn invalidate(&self, datasource_id: i64) {
        let slots = match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(slot) = slots.get(&datasource_id) {
            slot.generation.fetch_add(1, Ordering::SeqCst);
            debug!("SessionManager: invalidated session of data source {}", datasource_id);
        }
    }

    /// Leaves `page` on the target URL with a valid session.
    pub async fn establish(
        &self,
        request: SessionRequest<'_>,
        page: &mut dyn BrowserPage,
    ) -> Result<(), Error> {
        match request.auth {
            SessionAuth::Login(login) => self.with_login(&request, login, page).await,
            SessionAuth::CookieString(cookies) => self.with_cookies(&request, cookies, page).await,
        }
    }

    fn fresh<'s>(
        &self,
        cached: &'s Option<CachedSession>,
        fingerprint: u64,
        generation: u64,
    ) -> Option<&'s CachedSession> {
        cached.as_ref().filter(|session| {
            session.fingerprint == fingerprint
                && session.generation == generation
                && Utc::now() - session.established_at < self.reuse_window
        })
    }

    async fn with_login(
        &self,
        request: &SessionRequest<'_>,
        login: &LoginConfig,
        page: &mut dyn BrowserPage,
    ) -> Result<(), Error> {
        let id = request.datasource_id;
        let fingerprint = login_fingerprint(login);
        let slot = self.slot(id);
        let mut cached = slot.cached.lock().await;
        let generation = slot.generation.load(Ordering::SeqCst);

        if let Some(session) = self.fresh(&cached, fingerprint, generation) {
            page.set_cookies(&session.cookies).await?;
            page.navigate(request.target_url).await?;

            let logged_in = match &login.check_selector {
                Some(marker) => selector_present(&page.html().await?, marker)?,
                None => true,
            };
            if logged_in {
                debug!("SessionManager: reusing session of data source {}", id);
                return Ok(());
            }
            info!(
                "SessionManager: session of data source {} expired, logging in again",
                id
            );
        } else if cached.is_some() {
            debug!("SessionManager: cached session of data source {} is outdated", id);
        }
        *cached = None;

        let attempts = request.max_login_attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            match self.login(request, login, page).await {
                Ok(cookies) => {
                    info!(
                        "SessionManager: logged in data source {} (attempt {}/{}, {} cookies)",
                        id,
                        attempt,
                        attempts,
                        cookies.len()
                    );
                    *cached = Some(CachedSession {
                        cookies,
                        established_at: Utc::now(),
                        fingerprint,
                        generation,
                    });
                    return page.navigate(request.target_url).await;
                }
                Err(e @ Error::ConnectivityFailure(_)) => return Err(e),
                Err(e) => {
                    warn!(
                        "SessionManager: login attempt {}/{} for data source {} failed: {}",
                        attempt, attempts, id, e
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(Error::LoginFailed(format!(
            "gave up after {attempts} attempt(s): {}",
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempt made".to_string())
        )))
    }

    async fn login(
        &self,
        request: &SessionRequest<'_>,
        login: &LoginConfig,
        page: &mut dyn BrowserPage,
    ) -> Result<Vec<SessionCookie>, Error> {
        let login_url = login
            .url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or(request.target_url);

        page.navigate(login_url).await?;

        page.wait_for(&login.username_selector, request.wait).await?;
        page.fill(&login.username_selector, &login.username).await?;
        page.wait_for(&login.password_selector, request.wait).await?;
        page.fill(&login.password_selector, &login.password).await?;
        page.click(&login.submit_selector).await?;

        match login.wait_after.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(selector) => page.wait_for(selector, request.wait).await?,
            None => tokio::time::sleep(POST_LOGIN_SETTLE).await,
        }

        if let Some(marker) = &login.check_selector {
            if !selector_present(&page.html().await?, marker)? {
                return Err(Error::LoginFailed(format!(
                    "marker '{marker}' absent after submitting the login form"
                )));
            }
        }

        page.cookies().await
    }

    async fn with_cookies(
        &self,
        request: &SessionRequest<'_>,
        session: &CookieSession,
        page: &mut dyn BrowserPage,
    ) -> Result<(), Error> {
        let id = request.datasource_id;
        let fingerprint = cookie_fingerprint(session);
        let slot = self.slot(id);
        let mut cached = slot.cached.lock().await;
        let generation = slot.generation.load(Ordering::SeqCst);

        let (cookies, reused) = match self.fresh(&cached, fingerprint, generation) {
            Some(session) => (session.cookies.clone(), true),
            None => (parse_cookies(session, request.target_url)?, false),
        };

        page.set_cookies(&cookies).await?;
        page.navigate(request.target_url).await?;

        if let Some(marker) = &session.check_selector {
            let present = selector_present(&page.html().await?, marker)?;
            let stale = match session.stale_on {
                StaleMarker::Absent => !present,
                StaleMarker::Present => present,
            };
            if stale {
                *cached = None;
                return Err(Error::StaleCookie(format!(
                    "session check '{marker}' failed for data source {id}"
                )));
            }
        }

        if !reused {
            *cached = Some(CachedSession {
                cookies: page.cookies().await.unwrap_or(cookies),
                established_at: Utc::now(),
                fingerprint,
                generation,
            });
            debug!("SessionManager: cached injected cookies of data source {}", id);
        }

        Ok(())
    }
}

/// Expands configured cookies for the target's host.
/// ---
/// Structured cookies keep their domain and path when given; pairs of the
/// `name=value; name2=value2` string default to `.host` and `/`.
pub fn parse_cookies(session: &CookieSession, target_url: &str) -> Result<Vec<SessionCookie>, Error> {
    let url = Url::parse(target_url)
        .map_err(|e| Error::InvalidInput(format!("invalid page URL '{target_url}': {e}")))?;
    let domain = format!(".{}", url.host_str().unwrap_or_default());

    let mut cookies: Vec<SessionCookie> = session
        .initial_cookies
        .iter()
        .map(|c| SessionCookie {
            name: c.name.clone(),
            value: c.value.clone(),
            domain: c
                .domain
                .clone()
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| domain.clone()),
            path: c
                .path
                .clone()
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| "/".to_string()),
        })
        .collect();

    if let Some(raw) = &session.cookie_string {
        for pair in raw.split(';') {
            if let Some((name, value)) = pair.trim().split_once('=') {
                cookies.push(SessionCookie {
                    name: name.trim().to_string(),
                    value: value.trim().to_string(),
                    domain: domain.clone(),
                    path: "/".to_string(),
                });
            }
        }
    }

    Ok(cookies)
}

fn login_fingerprint(login: &LoginConfig) -> u64 {
    let mut hasher = DefaultHasher::new();
    login.url.hash(&mut hasher);
    login.username.hash(&mut hasher);
    login.password.hash(&mut hasher);
    hasher.finish()
}

fn cookie_fingerprint(session: &CookieSession) -> u64 {
    let mut hasher = DefaultHasher::new();
    session.cookie_string.hash(&mut hasher);
    for cookie in &session.initial_cookies {
        (&cookie.name, &cookie.value, &cookie.domain, &cookie.path).hash(&mut hasher);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use tokio::sync::Notify;
    use harvester_common::datasource::CookieParam;

    use super::*;

    /// Scripted page: serves `logged_in` html once cookies named `sid` are set.
    struct FakePage {
        logged_in: &'static str,
        logged_out: &'static str,
        jar: Vec<SessionCookie>,
        fills: Arc<AtomicUsize>,
        accept_login: bool,

        /// Holds the login form submission until notified
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl BrowserPage for FakePage {
        async fn set_cookies(&mut self, cookies: &[SessionCookie]) -> Result<(), Error> {
            self.jar.extend_from_slice(cookies);
            Ok(())
        }

        async fn cookies(&mut self) -> Result<Vec<SessionCookie>, Error> {
            Ok(self.jar.clone())
        }

        async fn navigate(&mut self, _url: &str) -> Result<(), Error> {
            Ok(())
        }

        async fn html(&mut self) -> Result<String, Error> {
            let authed = self.jar.iter().any(|c| c.name == "sid" && c.value != "expired");
            Ok(if authed { self.logged_in } else { self.logged_out }.to_string())
        }

        async fn fill(&mut self, _selector: &str, _value: &str) -> Result<(), Error> {
            self.fills.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn click(&mut self, _selector: &str) -> Result<(), Error> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.accept_login {
                self.jar.push(SessionCookie {
                    name: "sid".into(),
                    value: "fresh".into(),
                    domain: ".example.com".into(),
                    path: "/".into(),
                });
            }
            Ok(())
        }

        async fn select_option(&mut self, _selector: &str, _value: &str) -> Result<(), Error> {
            Ok(())
        }

        async fn wait_for(&mut self, _selector: &str, _timeout: Duration) -> Result<(), Error> {
            Ok(())
        }

        async fn close(&mut self) -> Result<(), Error> {
            Ok(())
        }
    }

    fn page(fills: &Arc<AtomicUsize>, accept_login: bool) -> FakePage {
        FakePage {
            logged_in: r#"<div class="avatar">me</div>"#,
            logged_out: r#"<form id="login"></form>"#,
            jar: Vec::new(),
            fills: fills.clone(),
            accept_login,
            gate: None,
        }
    }

    fn login_auth() -> SessionAuth {
        SessionAuth::Login(LoginConfig {
            url: Some("https://example.com/login".into()),
            username_selector: "#user".into(),
            password_selector: "#pass".into(),
            submit_selector: "#go".into(),
            username: "bot".into(),
            password: "secret".into(),
            wait_after: Some(".avatar".into()),
            check_selector: Some(".avatar".into()),
        })
    }

    fn request(auth: &SessionAuth) -> SessionRequest<'_> {
        SessionRequest {
            datasource_id: 7,
            auth,
            target_url: "https://example.com/feed",
            wait: Duration::from_secs(1),
            max_login_attempts: 2,
        }
    }

    #[tokio::test]
    async fn login_session_is_reused_within_window() {
        let manager = SessionManager::new(chrono::Duration::hours(24));
        let fills = Arc::new(AtomicUsize::new(0));
        let auth = login_auth();

        manager.establish(request(&auth), &mut page(&fills, true)).await.unwrap();
        manager.establish(request(&auth), &mut page(&fills, true)).await.unwrap();

        assert_eq!(fills.load(Ordering::SeqCst), 2, "one login fills two fields");
    }

    #[tokio::test]
    async fn outdated_session_logs_in_again() {
        let manager = SessionManager::new(chrono::Duration::zero());
        let fills = Arc::new(AtomicUsize::new(0));
        let auth = login_auth();

        manager.establish(request(&auth), &mut page(&fills, true)).await.unwrap();
        manager.establish(request(&auth), &mut page(&fills, true)).await.unwrap();

        assert_eq!(fills.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn rejected_login_exhausts_attempts() {
        let manager = SessionManager::new(chrono::Duration::hours(24));
        let fills = Arc::new(AtomicUsize::new(0));
        let auth = login_auth();

        let err = manager
            .establish(request(&auth), &mut page(&fills, false))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::LoginFailed(_)));
        assert_eq!(fills.load(Ordering::SeqCst), 4, "two attempts of two fields");
    }

    #[tokio::test(start_paused = true)]
    async fn invalidation_during_login_keeps_logins_single_flight() {
        let manager = Arc::new(SessionManager::new(chrono::Duration::hours(24)));
        let fills = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let first = {
            let manager = Arc::clone(&manager);
            let mut page = page(&fills, true);
            page.gate = Some(Arc::clone(&gate));
            tokio::spawn(async move {
                let auth = login_auth();
                manager.establish(request(&auth), &mut page).await
            })
        };
        while fills.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        manager.invalidate(7);
        let second = {
            let manager = Arc::clone(&manager);
            let mut page = page(&fills, true);
            tokio::spawn(async move {
                let auth = login_auth();
                manager.establish(request(&auth), &mut page).await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fills.load(Ordering::SeqCst), 2, "second login waits for the slot");

        gate.notify_one();
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();
        assert_eq!(
            fills.load(Ordering::SeqCst),
            4,
            "the session cached by the invalidated login is not reused"
        );
    }

    fn cookie_auth(value: &str, stale_on: StaleMarker, marker: &str) -> SessionAuth {
        SessionAuth::CookieString(CookieSession {
            cookie_string: Some(format!("sid={value}; theme=dark")),
            initial_cookies: vec![CookieParam {
                name: "lang".into(),
                value: "en".into(),
                domain: None,
                path: None,
            }],
            check_selector: Some(marker.into()),
            stale_on,
        })
    }

    #[tokio::test]
    async fn stale_cookie_never_attempts_login() {
        let manager = SessionManager::new(chrono::Duration::hours(24));
        let fills = Arc::new(AtomicUsize::new(0));
        let auth = cookie_auth("expired", StaleMarker::Absent, ".avatar");

        let err = manager
            .establish(request(&auth), &mut page(&fills, true))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::StaleCookie(_)));
        assert!(!err.is_retriable());
        assert_eq!(fills.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn logged_out_marker_polarity() {
        let manager = SessionManager::new(chrono::Duration::hours(24));
        let fills = Arc::new(AtomicUsize::new(0));

        let valid = cookie_auth("ok", StaleMarker::Present, "#login");
        manager.establish(request(&valid), &mut page(&fills, true)).await.unwrap();

        manager.invalidate(7);
        let stale = cookie_auth("expired", StaleMarker::Present, "#login");
        let err = manager
            .establish(request(&stale), &mut page(&fills, true))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StaleCookie(_)));
    }

    #[test]
    fn cookie_string_defaults_to_host_domain() {
        let SessionAuth::CookieString(session) = cookie_auth("abc", StaleMarker::Absent, ".x")
        else {
            unreachable!()
        };
        let cookies = parse_cookies(&session, "https://shop.example.com:8443/orders").unwrap();

        assert_eq!(cookies.len(), 3);
        assert!(cookies.iter().all(|c| c.domain == ".shop.example.com" && c.path == "/"));
        assert_eq!(cookies[1].name, "sid");
        assert_eq!(cookies[1].value, "abc");
    }
}
