//! One-time tracing setup shared by every test binary of the workspace.

use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

static INITIALIZED: OnceCell<()> = OnceCell::new();

/// Install the test subscriber; later calls are no-ops.
///
/// `TEST_LOG` wins over `RUST_LOG`; without either only warnings show.
/// sqlx statement logging stays at `warn` unless a directive names it.
pub fn init() {
    INITIALIZED.get_or_init(|| {
        fmt()
            .with_env_filter(filter())
            .with_test_writer() // captured per test by cargo/nextest
            .without_time()
            .with_target(true)
            .try_init()
            .ok();
    });
}

fn filter() -> EnvFilter {
    let directives = std::env::var("TEST_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "warn".to_string());

    if directives.contains("sqlx") {
        EnvFilter::new(directives)
    } else {
        EnvFilter::new(format!("{directives},sqlx=warn"))
    }
}
