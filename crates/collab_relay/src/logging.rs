use anyhow::Result;
use colored::Colorize;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::config::{Config, LogFormat};

/// Initialize logging and tracing subsystem
pub fn init(config: &Config) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let registry = Registry::default().with(env_filter);

    match config.log_format {
        LogFormat::Json => {
            // JSON formatting for structured logs
            let json_layer = fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_thread_ids(true)
                .with_target(true)
                .with_file(true)
                .with_line_number(true);
            registry.with(json_layer).try_init()?;
        }
        LogFormat::Pretty => {
            let pretty_layer = fmt::layer().with_target(false).compact();
            registry.with(pretty_layer).try_init()?;
        }
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Collab relay starting");

    Ok(())
}

/// Operator-facing startup banner on stdout
pub fn print_banner(config: &Config) {
    let rule = "━".repeat(60);
    println!("\n{}", rule.bright_black());
    println!(
        "  {} {}",
        "📝 Collab Relay".bright_cyan().bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).bright_black()
    );
    println!(
        "  {} {}",
        "ws://".bright_black(),
        format!("{}/<document>", config.bind).bright_white()
    );
    println!("{}\n", rule.bright_black());
}

/// One aligned status line for a service component
pub fn log_status(icon: &str, component: &str, status: &str, ok: bool) {
    let status = if ok {
        status.bright_green().bold()
    } else {
        status.bright_red().bold()
    };
    println!("  {} {:<20} {}", icon, component, status);
}

/// Log configuration (nothing in it is sensitive)
pub fn log_config(config: &Config) {
    tracing::info!(
        bind = %config.bind,
        default_room = %config.default_room,
        outbound_queue_capacity = config.outbound_queue_capacity,
        max_frame_size = config.max_frame_size,
        "Service configuration loaded"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_lines_do_not_panic() {
        // Subscriber init can only happen once per process, so only the
        // plain stdout helpers are exercised here
        let config = Config::default();
        print_banner(&config);
        log_status("🌐", "Relay", "LISTENING", true);
        log_status("🌐", "Relay", "FAILED", false);
        log_config(&config);
    }
}
