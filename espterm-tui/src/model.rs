use espterm_core::{Channel, LogLine, RenderTarget};
use std::collections::VecDeque;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Notify;

/// Scrollback for both panes. Written by the render scheduler, read by the
/// view.
#[derive(Debug)]
pub struct ScreenModel {
    push: VecDeque<LogLine>,
    pull: VecDeque<LogLine>,
    scrollback: usize,
}

impl ScreenModel {
    pub fn new(scrollback: usize) -> Self {
        let scrollback = scrollback.max(1);
        Self {
            push: VecDeque::new(),
            pull: VecDeque::new(),
            scrollback,
        }
    }

    pub fn append(&mut self, channel: Channel, lines: impl IntoIterator<Item = LogLine>) {
        let scrollback = self.scrollback;
        let pane = self.pane_mut(channel);
        pane.extend(lines);
        let excess = pane.len().saturating_sub(scrollback);
        pane.drain(..excess);
    }

    pub fn lines(&self, channel: Channel) -> &VecDeque<LogLine> {
        match channel {
            Channel::Push => &self.push,
            Channel::Pull => &self.pull,
        }
    }

    fn pane_mut(&mut self, channel: Channel) -> &mut VecDeque<LogLine> {
        match channel {
            Channel::Push => &mut self.push,
            Channel::Pull => &mut self.pull,
        }
    }
}

/// State owned by the UI thread only.
#[derive(Debug, Default)]
pub struct UiState {
    pub input: String,
    /// Submitted lines, oldest first.
    pub history: Vec<String>,
    history_pos: Option<usize>,
}

const MAX_HISTORY: usize = 100;

impl UiState {
    /// Take the input line for submission, recording it in history.
    pub fn submit(&mut self) -> String {
        let line = std::mem::take(&mut self.input);
        self.history_pos = None;
        let trimmed = line.trim();
        if !trimmed.is_empty() && self.history.last().map(String::as_str) != Some(trimmed) {
            self.history.push(trimmed.to_string());
            if self.history.len() > MAX_HISTORY {
                self.history.remove(0);
            }
        }
        line
    }

    pub fn history_prev(&mut self) {
        if self.history.is_empty() {
            return;
        }
        let pos = match self.history_pos {
            Some(pos) => pos.saturating_sub(1),
            None => self.history.len() - 1,
        };
        self.history_pos = Some(pos);
        self.input = self.history[pos].clone();
    }

    pub fn history_next(&mut self) {
        match self.history_pos {
            Some(pos) if pos + 1 < self.history.len() => {
                self.history_pos = Some(pos + 1);
                self.input = self.history[pos + 1].clone();
            }
            Some(_) => {
                self.history_pos = None;
                self.input.clear();
            }
            None => {}
        }
    }
}

/// Render target handed to the scheduler: applies each batch under one write
/// lock and wakes the view once.
#[derive(Debug, Clone)]
pub struct TuiDisplay {
    model: Arc<RwLock<ScreenModel>>,
    notify: Arc<Notify>,
}

impl TuiDisplay {
    pub fn new(model: Arc<RwLock<ScreenModel>>, notify: Arc<Notify>) -> Self {
        Self { model, notify }
    }
}

impl RenderTarget for TuiDisplay {
    fn write_batch(&mut self, channel: Channel, lines: Vec<LogLine>) {
        self.model
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .append(channel, lines);
        self.notify.notify_one();
    }
}
