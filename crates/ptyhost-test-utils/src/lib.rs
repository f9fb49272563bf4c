pub mod capture;
pub mod fixtures;

pub use capture::{collect_output, OutputCollector};
pub use fixtures::{sh, TestFixtures};

use std::sync::Once;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new("ptyhost=debug,ptyhost_pty=debug")),
            )
            .with_test_writer()
            .init();
    });
}
