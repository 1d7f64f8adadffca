use anyhow::Result;
use tracing_subscriber::fmt;

/// Installs a stderr subscriber when `verbose`; quiet runs only print the summary.
pub fn init(verbose: bool) -> Result<()> {
    if !verbose {
        return Ok(());
    }
    let _ = fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .with_thread_names(true)
        .try_init();
    Ok(())
}
