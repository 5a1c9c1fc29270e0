pub mod models;
pub mod stack;

pub use models::{BLOG, Post, User, blog_schema};
pub use stack::TestStack;

use tracing_subscriber::EnvFilter;

/// Installs a test-friendly subscriber once per process. `RUST_LOG` overrides
/// the default `warn` filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
