use flexi_logger::{Logger, LoggerHandle};

/// Starts the stderr logger. stdout carries the protocol, so nothing else may write there.
/// The returned handle must stay alive for the life of the process.
pub fn init_logging(spec: &str) -> anyhow::Result<LoggerHandle> {
    let handle = Logger::try_with_str(spec)?
        .log_to_stderr()
        .format(flexi_logger::detailed_format)
        .start()?;
    log::info!(
        "event=start version={} platform={}",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS
    );
    Ok(handle)
}
