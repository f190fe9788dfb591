//! Tracing subscriber setup from the `logging` config section.

use tracing_subscriber::EnvFilter;

use zara_core::config::LoggingConfig;

/// `RUST_LOG` wins over the config; `--verbose` wins over both.
fn filter(config: &LoggingConfig, verbose: bool) -> EnvFilter {
    if verbose {
        return EnvFilter::new("debug");
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives(config)))
}

fn directives(config: &LoggingConfig) -> String {
    // The talk prompt shares the terminal, so stay quiet unless asked.
    let mut directives = config.level.clone().unwrap_or_else(|| "warn".into());
    for extra in &config.filters {
        directives.push(',');
        directives.push_str(extra);
    }
    directives
}

pub fn init(config: &LoggingConfig, verbose: bool) {
    let builder = tracing_subscriber::fmt().with_env_filter(filter(config, verbose));
    let to_stdout = config.output == "stdout";
    match (config.format.as_str(), to_stdout) {
        ("json", true) => builder.json().with_writer(std::io::stdout).init(),
        ("json", false) => builder.json().with_writer(std::io::stderr).init(),
        (_, true) => builder.with_writer(std::io::stdout).init(),
        (_, false) => builder.with_writer(std::io::stderr).init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directives() {
        let config = LoggingConfig {
            level: Some("info".into()),
            filters: vec!["zara_media=debug".into(), "reqwest=warn".into()],
            ..Default::default()
        };
        assert_eq!(directives(&config), "info,zara_media=debug,reqwest=warn");
        assert_eq!(directives(&LoggingConfig::default()), "warn");
    }
}
