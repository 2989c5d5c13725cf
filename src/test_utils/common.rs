use std::time::Duration;

use tokio::time::timeout;

static LOGGER_INIT: once_cell::sync::Lazy<()> = once_cell::sync::Lazy::new(|| {
    env_logger::init();
});

pub fn enable_logger() {
    *LOGGER_INIT;
    println!("setup logger for unit test.");
}

/// Polls `condition` until it holds; panics after one second
pub async fn wait_until<F>(condition: F)
where
    F: Fn() -> bool,
{
    let reached = timeout(Duration::from_secs(1), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "condition not reached in time");
}
