use std::backtrace::{Backtrace, BacktraceStatus};
use std::panic::PanicHookInfo;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, filter::EnvFilter, fmt};

const ENV_DEBUG: &str = "TOPOFLOW_DEBUG";

/// Panic hook that reports panics through `tracing`, so they land in the same JSON stream as the
/// rest of the logs. Without it a failed `state clean` would end with:
/// ```text
/// {"timestamp":"...","level":"INFO","message":"Cleaning local state","topology":"orders"}
///
/// thread 'main' panicked at topoflow/src/main.rs:61:13:
/// called `Result::unwrap()` on an `Err` value: Os { code: 13, kind: PermissionDenied, .. }
/// ```
///
/// With the hook the panic becomes one more event:
/// ```text
/// {"timestamp":"...","level":"INFO","message":"Cleaning local state","topology":"orders"}
/// {"timestamp":"...","level":"ERROR","message":"topoflow/src/main.rs:61:13: called `Result::unwrap()` ..."}
/// ```
fn report_panic(panic_info: &PanicHookInfo<'_>) {
    // only captured when RUST_BACKTRACE or RUST_LIB_BACKTRACE is set
    let backtrace = Backtrace::capture();
    let backtrace_captured = backtrace.status() == BacktraceStatus::Captured;
    let payload = panic_info
        .payload()
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| {
            panic_info
                .payload()
                .downcast_ref::<String>()
                .map(String::as_str)
        });

    // location() always returns Some for now, but is documented as possibly None in the future
    match (panic_info.location(), payload, backtrace_captured) {
        (Some(location), Some(payload), false) => {
            // the same text as the default hook prints, on a single line
            tracing::error!(
                "{}:{}:{}: {}",
                location.file(),
                location.line(),
                location.column(),
                payload,
            );
        }
        _ => {
            // keep the multi-line output when there is a backtrace to show
            tracing::error!("{}\n{}", panic_info, backtrace);
        }
    };
}

fn debug_mode() -> bool {
    std::env::var(ENV_DEBUG).is_ok_and(|v| v.eq_ignore_ascii_case("true"))
}

/// Installs the global subscriber. `RUST_LOG` overrides the default `info` level; with
/// `TOPOFLOW_DEBUG=true` the default becomes `debug` and logs are plain text instead of
/// flattened JSON.
pub(crate) fn register() {
    let debug_mode = debug_mode();
    let default_log_level = if debug_mode { Level::DEBUG } else { Level::INFO };

    let filter = EnvFilter::builder()
        .with_default_directive(default_log_level.into())
        .from_env_lossy(); // RUST_LOG wins over the default level

    let layer = if debug_mode {
        // human readable, for running the tool by hand
        fmt::layer().boxed()
    } else {
        // flattened JSON, picked up by the log shipper alongside the node's logs
        fmt::layer()
            .with_ansi(false)
            .json()
            .flatten_event(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .init();

    std::panic::set_hook(Box::new(report_panic));
}
