use nix::sys::signal::{self as nix_signal, SaFlags, SigAction, SigHandler, SigSet};
use nix::unistd;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use nix::sys::signal::Signal;

type ExitHook = Box<dyn Fn() + Send + Sync>;

/// Session-wide running flag.
///
/// Cancelling the token is the one and only stop signal: async tasks await
/// [`Shutdown::wait_for_shutdown`], the monitor's reader threads poll
/// [`Shutdown::is_cancelled`].
pub struct Shutdown {
    token: CancellationToken,
    last_signal: AtomicI32,
    /// Runs before a forced exit, e.g. to restore the terminal.
    pre_exit_hook: Mutex<Option<ExitHook>>,
}

impl std::fmt::Debug for Shutdown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shutdown")
            .field("token", &self.token)
            .field("last_signal", &self.last_signal())
            .finish()
    }
}

impl Shutdown {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            token: CancellationToken::new(),
            last_signal: AtomicI32::new(0),
            pre_exit_hook: Mutex::new(None),
        })
    }

    pub fn set_pre_exit_hook<F: Fn() + Send + Sync + 'static>(&self, hook: F) {
        *self
            .pre_exit_hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Box::new(hook));
    }

    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }

    pub fn last_signal(&self) -> Option<Signal> {
        match self.last_signal.load(Ordering::Relaxed) {
            0 => None,
            i => Signal::try_from(i).ok(),
        }
    }

    /// Record a signal that arrived as a key press rather than a real signal
    /// (Ctrl+C in raw mode).
    pub fn set_last_signal(&self, signal: Signal) {
        self.last_signal.store(signal as i32, Ordering::Relaxed);
    }

    /// Trigger shutdown on SIGINT, SIGTERM or SIGHUP. A second signal
    /// force-exits.
    pub fn install_signals(self: &Arc<Self>) -> std::io::Result<()> {
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sighup = signal(SignalKind::hangup())?;
        let shutdown = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    _ = sigint.recv() => Signal::SIGINT,
                    _ = sigterm.recv() => Signal::SIGTERM,
                    _ = sighup.recv() => Signal::SIGHUP,
                };

                if shutdown.last_signal().is_some() {
                    info!("Received second signal, forcing exit");
                    shutdown.exit_process();
                }

                info!("Received {received:?}, shutting down");
                shutdown.set_last_signal(received);
                shutdown.shutdown();
            }
        });
        Ok(())
    }

    /// Run the pre-exit hook, then re-raise the last signal with its default
    /// disposition so the exit status reflects it.
    pub fn exit_process(&self) -> ! {
        if let Ok(guard) = self.pre_exit_hook.lock()
            && let Some(hook) = guard.as_ref()
        {
            hook();
        }

        let signal = self.last_signal().unwrap_or(Signal::SIGTERM);
        let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
        // SAFETY: restoring the default disposition installs no handler code.
        if let Err(err) = unsafe { nix_signal::sigaction(signal, &action) } {
            warn!("Failed to restore default handler for {signal:?}: {err}");
        }
        if let Err(err) = nix_signal::kill(unistd::getpid(), signal) {
            warn!("Failed to re-raise {signal:?}: {err}");
        }
        std::process::exit(1);
    }
}
