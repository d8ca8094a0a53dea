use clap::ValueEnum;

#[derive(Copy, Clone, ValueEnum, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Quiet,
}

impl LogLevel {
    fn directive(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Quiet => "off",
        }
    }
}

/// Env filter enabling `level` for the library and the given binary targets.
pub fn env_filter(targets: &[&str], level: LogLevel) -> String {
    std::iter::once("encephalon_rs")
        .chain(targets.iter().copied())
        .map(|target| format!("{}={}", target, level.directive()))
        .collect::<Vec<_>>()
        .join(",")
}

/// Installs the global tracing subscriber of a binary.
pub fn init_tracing(targets: &[&str], level: LogLevel, timestamp: bool) {
    let env_filter = env_filter(targets, level);

    // "if" because the subscriber doesn't yield the same type with or without time which prevents
    // using a match statement.
    let result = if timestamp {
        let sub = tracing_subscriber::fmt::Subscriber::builder()
            .with_env_filter(env_filter)
            .finish();
        tracing::subscriber::set_global_default(sub)
    } else {
        let sub = tracing_subscriber::fmt::Subscriber::builder()
            .with_env_filter(env_filter)
            .without_time()
            .finish();
        tracing::subscriber::set_global_default(sub)
    };

    if let Err(e) = result {
        eprintln!("Error while setting subscriber for tracing: {}", e);
    }
}
