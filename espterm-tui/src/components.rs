//! Reusable UI components and the colour palette.

use espterm_core::{ConnectionState, LineKind, LogLine};
use iocraft::prelude::*;
use std::time::Duration;

/// Spinner animation frames (braille dots pattern)
const SPINNER_FRAMES: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const SPINNER_INTERVAL_MS: u64 = 80;

pub const COLOR_PUSH_BORDER: Color = Color::Cyan;
pub const COLOR_PULL_BORDER: Color = Color::Magenta;
pub const COLOR_OUTPUT: Color = Color::AnsiValue(250);
pub const COLOR_ECHO: Color = Color::Green;
pub const COLOR_STATUS: Color = Color::Yellow;
pub const COLOR_ERROR: Color = Color::AnsiValue(160);
pub const COLOR_SECONDARY: Color = Color::AnsiValue(242);
pub const COLOR_CONNECTED: Color = Color::Rgb {
    r: 112,
    g: 138,
    b: 88,
}; // #708A58

pub fn line_color(line: &LogLine) -> Color {
    if line.is_binary {
        return COLOR_STATUS;
    }
    match line.kind {
        LineKind::Output => COLOR_OUTPUT,
        LineKind::Echo => COLOR_ECHO,
        LineKind::Status => COLOR_STATUS,
        LineKind::Error => COLOR_ERROR,
    }
}

pub fn state_color(state: ConnectionState) -> Color {
    match state {
        ConnectionState::Connected => COLOR_CONNECTED,
        ConnectionState::Connecting => COLOR_STATUS,
        ConnectionState::Failed => COLOR_ERROR,
        ConnectionState::Disconnected | ConnectionState::Closed => COLOR_SECONDARY,
    }
}

#[derive(Default, Props)]
pub struct SpinnerProps {
    pub color: Option<Color>,
}

/// Self-animating spinner; only re-renders itself.
#[component]
pub fn Spinner(mut hooks: Hooks, props: &SpinnerProps) -> impl Into<AnyElement<'static>> {
    let mut frame = hooks.use_state(|| 0usize);
    let color = props.color.unwrap_or(COLOR_STATUS);

    hooks.use_future(async move {
        loop {
            tokio::time::sleep(Duration::from_millis(SPINNER_INTERVAL_MS)).await;
            frame.set((frame.get() + 1) % SPINNER_FRAMES.len());
        }
    });

    element! {
        Text(content: SPINNER_FRAMES[frame.get()], color: color)
    }
}

#[derive(Default, Props)]
pub struct ChannelBadgeProps {
    pub label: String,
    pub state: ConnectionState,
}

/// `label: State`, with a spinner while connecting.
#[component]
pub fn ChannelBadge(_hooks: Hooks, props: &ChannelBadgeProps) -> impl Into<AnyElement<'static>> {
    let color = state_color(props.state);
    let indicator = match props.state {
        ConnectionState::Connecting => element!(Spinner(color: color)).into_any(),
        ConnectionState::Connected => element!(Text(content: "●", color: color)).into_any(),
        ConnectionState::Failed => element!(Text(content: "✗", color: color)).into_any(),
        _ => element!(Text(content: "○", color: color)).into_any(),
    };

    element! {
        View(flex_direction: FlexDirection::Row, margin_left: 2) {
            #(vec![indicator])
            Text(content: format!(" {}: ", props.label), color: COLOR_SECONDARY)
            Text(content: props.state.to_string(), color: color)
        }
    }
}
