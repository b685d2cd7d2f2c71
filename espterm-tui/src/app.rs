use crate::model::{ScreenModel, TuiDisplay, UiState};
use crate::view::{SessionSnapshot, view};
use crossterm::{cursor, execute, terminal};
use espterm_core::{Signal, TerminalSession};
use iocraft::prelude::*;
use std::io::{self, Write};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

/// Header refresh for state that changes without new lines (channel states,
/// pending command).
const HEADER_REFRESH: Duration = Duration::from_millis(250);

/// The full-screen terminal UI for one session.
pub struct TuiApp {
    session: Arc<TerminalSession>,
    model: Arc<RwLock<ScreenModel>>,
    notify: Arc<Notify>,
}

impl TuiApp {
    pub fn new(session: Arc<TerminalSession>) -> Self {
        let scrollback = session.config().render.scrollback_lines;
        Self {
            session,
            model: Arc::new(RwLock::new(ScreenModel::new(scrollback))),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Render target for the session's scheduler.
    pub fn display(&self) -> TuiDisplay {
        TuiDisplay::new(self.model.clone(), self.notify.clone())
    }

    /// Run until the session's shutdown is triggered, by the operator or by a
    /// signal.
    pub async fn run(self) -> io::Result<()> {
        let ui_state = Arc::new(RwLock::new(UiState::default()));

        let mut element = element! {
            ContextProvider(value: Context::owned(self.session.clone())) {
                ContextProvider(value: Context::owned(self.notify.clone())) {
                    ContextProvider(value: Context::owned(self.model.clone())) {
                        ContextProvider(value: Context::owned(ui_state.clone())) {
                            MainView
                        }
                    }
                }
            }
        };

        element.fullscreen().ignore_ctrl_c().await
    }
}

/// Restore terminal to normal state.
/// Call this after the TUI has exited to ensure the terminal is usable.
pub fn restore_terminal() {
    let mut stdout = io::stdout();
    let _ = terminal::disable_raw_mode();
    let _ = execute!(stdout, terminal::LeaveAlternateScreen, cursor::Show);
    let _ = stdout.flush();
}

fn snapshot(session: &TerminalSession) -> SessionSnapshot {
    SessionSnapshot {
        device: session.device_name().to_string(),
        push: session.push_state(),
        pull: session.pull_state(),
        pending: session.pending_command().map(|p| p.text),
    }
}

#[component]
fn MainView(mut hooks: Hooks) -> impl Into<AnyElement<'static>> {
    let session = hooks.use_context::<Arc<TerminalSession>>().clone();
    let notify = hooks.use_context::<Arc<Notify>>().clone();
    let model = hooks.use_context::<Arc<RwLock<ScreenModel>>>().clone();
    let ui_state = hooks.use_context::<Arc<RwLock<UiState>>>().clone();
    let (width, height) = hooks.use_terminal_size();
    let mut should_exit = hooks.use_state(|| false);

    // Redraw on new lines, and periodically for the header.
    let mut redraw = hooks.use_state(|| 0u64);
    hooks.use_future({
        let notify = notify.clone();
        async move {
            let mut refresh = tokio::time::interval(HEADER_REFRESH);
            loop {
                tokio::select! {
                    _ = notify.notified() => {}
                    _ = refresh.tick() => {}
                }
                redraw.set(redraw.get().wrapping_add(1));
            }
        }
    });

    hooks.use_future({
        let shutdown = session.shutdown_handle().clone();
        async move {
            shutdown.wait_for_shutdown().await;
            should_exit.set(true);
        }
    });

    hooks.use_terminal_events({
        let session = session.clone();
        let ui_state = ui_state.clone();
        let notify = notify.clone();

        move |event| {
            if let TerminalEvent::Key(key_event) = event
                && key_event.kind != KeyEventKind::Release
            {
                debug!("Key event: {:?}", key_event);
                let mut ui = ui_state.write().unwrap_or_else(PoisonError::into_inner);
                match key_event.code {
                    KeyCode::Char('c') if key_event.modifiers.contains(KeyModifiers::CONTROL) => {
                        let shutdown = session.shutdown_handle();
                        shutdown.set_last_signal(Signal::SIGINT);
                        shutdown.shutdown();
                    }
                    KeyCode::Char(c) => ui.input.push(c),
                    KeyCode::Backspace => {
                        ui.input.pop();
                    }
                    KeyCode::Esc => ui.input.clear(),
                    KeyCode::Up => ui.history_prev(),
                    KeyCode::Down => ui.history_next(),
                    KeyCode::Enter => {
                        let line = ui.submit();
                        drop(ui);
                        session.handle_input(&line);
                    }
                    _ => {}
                }
                notify.notify_one();
            }
        }
    });

    if should_exit.get() {
        hooks.use_context_mut::<SystemContext>().exit();
    }

    let snapshot = snapshot(&session);
    let ui = ui_state.read().unwrap_or_else(PoisonError::into_inner);
    let model = model.read().unwrap_or_else(PoisonError::into_inner);
    element! {
        View(width: width as u32, height: height as u32) {
            #(vec![view(&model, &ui, &snapshot, width, height).into()])
        }
    }
}
