//! Stderr logging for the sidecar. Stdout carries the protocol, so nothing
//! else may write there.

use std::io::Write;

use time::OffsetDateTime;
use time::macros::format_description;

const DEFAULT_FILTER: &str = "info";

fn short_target(target: &str) -> &str {
    target.strip_prefix("video_minifier::").unwrap_or(target)
}

/// Install the global logger. `RUST_LOG` overrides the default `info` filter.
/// Safe to call more than once; later calls are ignored.
pub fn init() {
    let time_fmt = format_description!("[hour]:[minute]:[second]");
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(DEFAULT_FILTER),
    )
    .target(env_logger::Target::Stderr)
    .format(move |buf, record| {
        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        let ts = now.format(&time_fmt).unwrap_or_else(|_| "??:??:??".into());
        writeln!(
            buf,
            "{ts}  {level:5}  {target:5}  {message}",
            ts = ts,
            level = record.level(),
            target = short_target(record.target()),
            message = record.args()
        )
    })
    .try_init();
}
