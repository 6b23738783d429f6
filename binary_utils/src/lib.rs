use anyhow::Result;
use chrono::{Local, SecondsFormat};
use tracing_log::LogTracer;
use tracing_subscriber::{
    filter::LevelFilter,
    fmt::{self, format::Writer, time::FormatTime},
    EnvFilter,
};

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, writer: &mut Writer) -> core::fmt::Result {
        write!(
            writer,
            "[{}]",
            Local::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        )
    }
}

/// Installs the global logger.
///
/// Library crates log through the `log` facade; `LogTracer` bridges their
/// records into the tracing subscriber installed here. `MERIDIAN_LOG` takes
/// the usual `EnvFilter` directives.
pub fn initialize_logger() -> Result<()> {
    LogTracer::init()?;

    let filter = EnvFilter::try_from_env("MERIDIAN_LOG")
        .unwrap_or_else(|_| EnvFilter::default().add_directive(LevelFilter::INFO.into()));

    let subscriber = fmt()
        .compact()
        .with_env_filter(filter)
        .with_timer(LocalTimer)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}
