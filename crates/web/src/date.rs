//! The `Date` header value, formatted once per tick instead of once per response.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use bytes::Bytes;
use http::HeaderValue;
use tokio::task::JoinHandle;
use tracing::warn;

const UPDATE_INTERVAL: Duration = Duration::from_millis(800);

/// Keeps the current HTTP date fresh from a background task.
///
/// Owned by the running server; dropping it stops the refresh task.
#[derive(Debug)]
pub struct DateService {
    current: Arc<ArcSwap<HeaderValue>>,
    handle: JoinHandle<()>,
}

impl DateService {
    /// Must be called from within a tokio runtime.
    pub fn new() -> Self {
        Self::with_update_interval(UPDATE_INTERVAL)
    }

    fn with_update_interval(update_interval: Duration) -> Self {
        let initial = now().unwrap_or_else(|| HeaderValue::from_static("Thu, 01 Jan 1970 00:00:00 GMT"));
        let current = Arc::new(ArcSwap::from_pointee(initial));
        let current_arc = Arc::clone(&current);

        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(update_interval).await;
                match now() {
                    Some(value) => current_arc.store(Arc::new(value)),
                    None => warn!("formatted http date is not a valid header value"),
                }
            }
        });

        Self { current, handle }
    }

    pub fn http_date(&self) -> HeaderValue {
        self.current.load().as_ref().clone()
    }
}

impl Default for DateService {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DateService {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn now() -> Option<HeaderValue> {
    let mut buf = faf_http_date::get_date_buff_no_key();
    faf_http_date::get_date_no_key(&mut buf);
    HeaderValue::from_maybe_shared(Bytes::from_owner(buf)).ok()
}
