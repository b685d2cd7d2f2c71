mod cli;
mod log;

use clap::Parser;
use cli::Cli;
use espterm_core::{Shutdown, TerminalConfig, TerminalSession, default_connector};
use espterm_tui::{TuiApp, restore_terminal};
use miette::{IntoDiagnostic, Result, WrapErr};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    log::init_tracing(cli.level(), cli.log_format, cli.log_file.as_deref())?;

    let mut config = TerminalConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    config.validate()?;
    info!(device = %config.device.name, monitor = config.monitor.enabled, "Starting espterm");

    let shutdown = Shutdown::new();
    shutdown.set_pre_exit_hook(restore_terminal);
    shutdown
        .install_signals()
        .into_diagnostic()
        .wrap_err("Failed to install signal handlers")?;

    let session = TerminalSession::new(config, default_connector(), shutdown.clone());
    let app = TuiApp::new(session.clone());

    let scheduler = tokio::spawn(
        session
            .scheduler()
            .run(app.display(), shutdown.cancellation_token()),
    );
    tokio::spawn({
        let session = session.clone();
        async move { session.start().await }
    });

    let result = app.run().await;
    // The UI may have exited on its own, e.g. after a render error.
    shutdown.shutdown();
    session.shutdown().await;
    if let Err(err) = scheduler.await {
        error!("Render scheduler failed: {err}");
    }
    restore_terminal();

    result
        .into_diagnostic()
        .wrap_err("Terminal UI failed")?;
    info!("espterm exited");
    Ok(())
}
