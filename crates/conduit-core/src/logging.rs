//! `tracing` subscriber setup.
//!
//! Settings decide the final log format, but loading them can already log.
//! [`bootstrap_dispatch`] covers that window: run the loading code under
//! `tracing::dispatcher::with_default`, then call [`init_subscriber`].

use tracing::Dispatch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;

/// Initialize the global tracing subscriber on stderr.
///
/// `RUST_LOG` takes precedence over `level`. With `json` set, each event is
/// written as one JSON object per line; otherwise the compact human format
/// is used. Subsequent calls are no-ops.
pub fn init_subscriber(level: &str, json: bool) {
    // set_global_default is a no-op if already set
    let _ = tracing::dispatcher::set_global_default(dispatch(level, json, std::io::stderr));
}

/// A compact stderr dispatch for use before settings are loaded.
///
/// `RUST_LOG` takes precedence over `level`, as for [`init_subscriber`].
pub fn bootstrap_dispatch(level: &str) -> Dispatch {
    dispatch(level, false, std::io::stderr)
}

fn dispatch<W>(level: &str, json: bool, writer: W) -> Dispatch
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(writer);

    if json {
        Dispatch::new(builder.json().finish())
    } else {
        Dispatch::new(builder.compact().finish())
    }
}
