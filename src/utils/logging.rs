use env_logger::Builder;
use log::LevelFilter;
use std::io::Write;

/// Initialize the logger with custom formatting.
///
/// `--debug` raises the default level to debug; `RUST_LOG` still wins
/// when set.
pub fn init_logger(debug: bool) {
    let level = if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter(None, level)
        .parse_default_env()
        .init();
}
