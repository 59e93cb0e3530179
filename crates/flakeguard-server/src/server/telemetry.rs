//! Console logging.
//!
//! Events are written through `tracing_subscriber::fmt` with local RFC 3339
//! timestamps. The level comes from `RUST_LOG` and defaults to `info`, for
//! example:
//!
//! ```bash
//! RUST_LOG=flakeguard=debug,flakeguard_server=debug flakeguard-server
//! ```
//!
//! Set `LOG_FORMAT=json` for one JSON object per line.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub fn init_telemetry() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    let fmt = tracing_subscriber::fmt::layer()
        .with_thread_ids(true)
        .with_line_number(true)
        .with_target(false)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_file(true);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt.json()).try_init()?;
    } else {
        registry.with(fmt).try_init()?;
    }

    Ok(())
}
