pub mod fake_client;

use std::time::Duration;

use tubedl_core::event::{EventReceiver, SchedulerEvent};

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Next event, failing the test if none arrives in time.
pub async fn next_event(rx: &mut EventReceiver) -> SchedulerEvent {
    tokio::time::timeout(EVENT_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for a scheduler event")
        .expect("event channel closed")
}

/// Collects events up to and including the first one matching `stop`.
pub async fn collect_until<F>(rx: &mut EventReceiver, mut stop: F) -> Vec<SchedulerEvent>
where
    F: FnMut(&SchedulerEvent) -> bool,
{
    let mut seen = Vec::new();
    loop {
        let ev = next_event(rx).await;
        let done = stop(&ev);
        seen.push(ev);
        if done {
            return seen;
        }
    }
}

/// Drains whatever is already buffered without waiting.
pub fn drain(rx: &mut EventReceiver) -> Vec<SchedulerEvent> {
    let mut seen = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        seen.push(ev);
    }
    seen
}
