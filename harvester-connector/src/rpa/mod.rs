mod actions;
mod chromium;
mod driver;
mod http_driver;
mod session;

pub use actions::apply_actions;
pub use chromium::ChromiumDriver;
pub(crate) use driver::PageGuard;
pub use driver::{BrowserDriver, BrowserPage, SessionCookie};
pub use http_driver::HttpDriver;
pub use session::{DEFAULT_MAX_LOGIN_ATTEMPTS, SessionManager, SessionRequest, parse_cookies};
