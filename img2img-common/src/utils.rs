use {
    std::env::var,
    tracing::Level,
    tracing_subscriber::{
        prelude::*,
        filter::filter_fn,
    },
    config::{Config, ConfigError},
};

pub fn init_logging() {
    let json = var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false);

    if json {
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(Level::INFO)
            .json()
            .finish()
            .with(filter_fn(quiet_dependencies))
            .init();
    } else {
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(Level::INFO)
            .finish()
            .with(filter_fn(quiet_dependencies))
            .init();
    }
}

fn quiet_dependencies(metadata: &tracing::Metadata<'_>) -> bool {
    if metadata.target().starts_with("hyper") || metadata.target().starts_with("tokenizers") {
        metadata.level() <= &Level::WARN
    } else {
        true
    }
}

/// Loads the config file at `path` (if present) layered with `IMG2IMG_*` environment variables.
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    Config::builder()
        .add_source(config::File::with_name(path).required(false))
        .add_source(config::Environment::with_prefix("IMG2IMG").separator("__"))
        .build()
}
