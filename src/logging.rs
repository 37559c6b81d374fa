//! Tracing initialization
//!
//! Console logging with an EnvFilter, plus an optional daily rotating file
//! layer when a writable log directory is configured.

use tracing_subscriber::EnvFilter;

/// Initialize logging for a long-running engine process.
pub fn init_logging() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,myshop_core=debug,sqlx=warn"));

    let log_dir = std::env::var("MYSHOP_LOG_DIR").ok();

    // `tracing_appender::rolling::daily` panics if it can't create the
    // initial log file, so writability is preflighted first.
    let file_layer = log_dir.and_then(|dir| {
        if std::fs::create_dir_all(&dir).is_err() {
            eprintln!("Warning: could not create log directory {dir}, file logging disabled");
            return None;
        }
        let test_path = std::path::Path::new(&dir).join(".myshop_write_test");
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&test_path)
        {
            Ok(_) => {
                let _ = std::fs::remove_file(&test_path);

                let file_appender = tracing_appender::rolling::daily(&dir, "myshop-core.log");
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

                // Keep the writer guard alive for the lifetime of the process
                Box::leak(Box::new(guard));

                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true),
                )
            }
            Err(e) => {
                eprintln!("Warning: could not write to log directory {dir} ({e}), file logging disabled");
                None
            }
        }
    });

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();
}

/// Minimal logging for tests and one-shot tools.
pub fn init_logging_simple() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .try_init();
}
