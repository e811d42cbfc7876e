use std::time::Duration;

use harvester_common::{datasource::PageAction, error::Error};
use tracing::debug;

use super::driver::BrowserPage;

/// Replays the configured page actions in order.
/// ---
/// Each action waits for its target element first, then settles on its
/// own `wait_for` selector and `wait_ms` delay before the next one runs.
pub async fn apply_actions(
    page: &mut dyn BrowserPage,
    actions: &[PageAction],
    wait: Duration,
) -> Result<(), Error> {
    for (index, action) in actions.iter().enumerate() {
        debug!("Actions: running #{} {:?}", index, action);

        match action {
            PageAction::Input {
                selector, value, ..
            } => {
                page.wait_for(selector, wait).await?;
                page.fill(selector, value).await?;
            }
            PageAction::Click { selector, .. } => {
                page.wait_for(selector, wait).await?;
                page.click(selector).await?;
            }
            PageAction::Select {
                selector, value, ..
            } => {
                page.wait_for(selector, wait).await?;
                page.select_option(selector, value).await?;
            }
            PageAction::Wait { .. } => {}
        }

        let (wait_for, wait_ms) = action.settle();
        if let Some(selector) = wait_for.filter(|s| !s.trim().is_empty()) {
            page.wait_for(selector, wait).await?;
        }
        if let Some(ms) = wait_ms.filter(|ms| *ms > 0) {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    Ok(())
}
