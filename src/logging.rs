//! ログ初期化
//!
//! `log` ファサード + `env_logger`。レベルは `RUST_LOG` で変更できる。

use env_logger::Env;

/// 既定レベル warn で初期化
pub fn init_logging() {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn"))
        .format_timestamp_millis()
        .init();
}

/// 指定レベルで初期化 (`RUST_LOG` より優先)
pub fn init_logging_with_level(level: log::LevelFilter) {
    env_logger::Builder::from_env(Env::default())
        .filter_level(level)
        .format_timestamp_millis()
        .init();
}

/// `-v` の回数からレベルを決めて初期化する。0 なら `RUST_LOG` に従う
pub fn init_from_verbosity(verbose: u8) {
    match verbose {
        0 => init_logging(),
        1 => init_logging_with_level(log::LevelFilter::Info),
        2 => init_logging_with_level(log::LevelFilter::Debug),
        _ => init_logging_with_level(log::LevelFilter::Trace),
    }
}
