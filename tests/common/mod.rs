#![allow(dead_code)]

use std::sync::Once;
use std::time::{Duration, Instant};

use brrtmediator::logging::{init_logging, LogConfig, LogFormat};
use brrtmediator::MediatorConfig;

/// Bounded wait window used by the asynchronous scenarios
pub const WAIT_WINDOW: Duration = Duration::from_secs(2);

static LOGGING: Once = Once::new();

/// Install a quiet subscriber once per test binary. `RUST_LOG` still overrides.
pub fn init_test_logging() {
    LOGGING.call_once(|| {
        let config = LogConfig {
            log_level: "warn".to_string(),
            format: LogFormat::Pretty,
            async_logging: false,
            target_filter: None,
            include_location: false,
        };
        let _ = init_logging(&config);
    });
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}

/// Small channels and a short timeout so failures show up quickly
pub fn test_config() -> MediatorConfig {
    MediatorConfig {
        request_capacity: 64,
        event_capacity: 64,
        dispatch_timeout_ms: 1000,
        thread_name_prefix: "brrtm-test".to_string(),
        ..MediatorConfig::default()
    }
}

/// Ensures May coroutines are configured only once
static MAY_INIT: Once = Once::new();

pub fn setup_may_runtime() {
    MAY_INIT.call_once(|| {
        may::config().set_stack_size(0x8000);
    });
}
