use crate::components::*;
use crate::model::{ScreenModel, UiState};
use espterm_core::{Channel, ConnectionState, LogLine};
use iocraft::prelude::*;
use std::collections::VecDeque;

/// `HH:MM:SS ` prefix.
const CLOCK_WIDTH: usize = 9;
/// Header, input box and footer.
const CHROME_HEIGHT: u16 = 5;
/// Pane border plus title row.
const PANE_CHROME_HEIGHT: u16 = 3;

/// What the header and input line show about the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub device: String,
    pub push: ConnectionState,
    pub pull: ConnectionState,
    pub pending: Option<String>,
}

/// One display row of a pane.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub text: String,
    pub color: Color,
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    if width == 0 {
        return String::new();
    }
    let mut out: String = text.chars().take(width - 1).collect();
    out.push('…');
    out
}

/// Rows for one line. Batched text is split on newlines; continuation rows are
/// indented under the timestamp.
pub fn line_rows(line: &LogLine, width: usize) -> Vec<Row> {
    let color = line_color(line);
    let body = if line.is_binary {
        format!("[binary] {}", line.text)
    } else {
        line.text.clone()
    };

    body.split('\n')
        .enumerate()
        .map(|(i, part)| {
            let prefix = if i == 0 {
                format!("{} ", line.clock())
            } else {
                " ".repeat(CLOCK_WIDTH)
            };
            Row {
                text: truncate(&format!("{prefix}{part}"), width),
                color,
            }
        })
        .collect()
}

/// The last `height` rows of a pane.
pub fn pane_rows(lines: &VecDeque<LogLine>, height: usize, width: usize) -> Vec<Row> {
    let mut rows = Vec::with_capacity(height);
    for line in lines.iter().rev() {
        if rows.len() >= height {
            break;
        }
        rows.extend(line_rows(line, width).into_iter().rev());
    }
    rows.truncate(height);
    rows.reverse();
    rows
}

fn pane(
    title: &str,
    border: Color,
    rows: Vec<Row>,
    height: usize,
) -> AnyElement<'static> {
    let mut elements: Vec<AnyElement<'static>> = rows
        .into_iter()
        .map(|row| {
            element! {
                View(height: 1) {
                    Text(content: row.text, color: row.color)
                }
            }
            .into_any()
        })
        .collect();
    let filled = elements.len();
    elements.extend((filled..height).map(|_| element!(View(height: 1)).into_any()));

    element! {
        View(
            width: 50pct,
            flex_direction: FlexDirection::Column,
            border_style: BorderStyle::Round,
            border_color: border,
            padding_left: 1,
            overflow: Overflow::Hidden,
        ) {
            View(height: 1) {
                Text(content: title.to_string(), color: border, weight: Weight::Bold)
            }
            #(elements)
        }
    }
    .into_any()
}

/// Full screen: header, the two panes side by side, input line and footer.
pub fn view(
    model: &ScreenModel,
    ui: &UiState,
    session: &SessionSnapshot,
    width: u16,
    height: u16,
) -> impl Into<AnyElement<'static>> {
    let pane_height = height.saturating_sub(CHROME_HEIGHT + PANE_CHROME_HEIGHT) as usize;
    // Half the width minus border and padding.
    let pane_width = (width / 2).saturating_sub(3) as usize;

    let push = pane(
        "Bluetooth",
        COLOR_PUSH_BORDER,
        pane_rows(model.lines(Channel::Push), pane_height, pane_width),
        pane_height,
    );
    let pull = pane(
        "Serial Monitor",
        COLOR_PULL_BORDER,
        pane_rows(model.lines(Channel::Pull), pane_height, pane_width),
        pane_height,
    );

    let pending = match &session.pending {
        Some(command) => element! {
            View(margin_left: 2) {
                Text(content: format!("waiting on {command}"), color: COLOR_SECONDARY)
            }
        }
        .into_any(),
        None => element!(View).into_any(),
    };

    element! {
        View(
            width: width as u32,
            height: height as u32,
            flex_direction: FlexDirection::Column,
        ) {
            View(height: 1, flex_direction: FlexDirection::Row) {
                Text(content: format!("espterm · {}", session.device), weight: Weight::Bold)
                ChannelBadge(label: "Bluetooth".to_string(), state: session.push)
                ChannelBadge(label: "Serial".to_string(), state: session.pull)
            }
            View(flex_grow: 1.0, flex_direction: FlexDirection::Row) {
                #(vec![push, pull])
            }
            View(
                height: 3,
                flex_direction: FlexDirection::Row,
                border_style: BorderStyle::Round,
                border_color: COLOR_SECONDARY,
                padding_left: 1,
            ) {
                Text(content: format!("> {}▏", ui.input), color: COLOR_ECHO)
                #(vec![pending])
            }
            View(height: 1, padding_left: 1) {
                Text(
                    content: "Enter: send  ↑/↓: history  Esc: clear  quit / Ctrl+C: exit",
                    color: COLOR_SECONDARY,
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};
    use espterm_core::LineKind;

    fn at(text: &str, kind: LineKind) -> LogLine {
        LogLine {
            timestamp: Local.with_ymd_and_hms(2024, 5, 1, 12, 0, 5).unwrap(),
            ..LogLine::new(Channel::Pull, kind, text)
        }
    }

    fn texts(rows: &[Row]) -> String {
        rows.iter()
            .map(|r| r.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn batched_text_splits_into_indented_rows() {
        let rows = line_rows(&at("rst:0x1\nboot:0x13\nets Jun  8 2016", LineKind::Output), 80);
        insta::assert_snapshot!(texts(&rows), @r"
        12:00:05 rst:0x1
                 boot:0x13
                 ets Jun  8 2016
        ");
        assert!(rows.iter().all(|r| r.color == COLOR_OUTPUT));
    }

    #[test]
    fn long_rows_are_truncated() {
        let rows = line_rows(&at("abcdefghijklmnopqrstuvwxyz", LineKind::Output), 16);
        assert_eq!(rows[0].text, "12:00:05 abcdef…");
        assert_eq!(rows[0].text.chars().count(), 16);
    }

    #[test]
    fn binary_and_kinds_are_coloured() {
        let mut binary = at("deadbeef", LineKind::Output);
        binary.is_binary = true;
        let rows = line_rows(&binary, 80);
        assert_eq!(rows[0].text, "12:00:05 [binary] deadbeef");
        assert_eq!(rows[0].color, COLOR_STATUS);

        assert_eq!(line_rows(&at("> HELP", LineKind::Echo), 80)[0].color, COLOR_ECHO);
        assert_eq!(line_rows(&at("Not connected!", LineKind::Error), 80)[0].color, COLOR_ERROR);
    }

    #[test]
    fn pane_shows_newest_rows() {
        let lines: VecDeque<_> = ["one", "two\nthree", "four"]
            .into_iter()
            .map(|t| at(t, LineKind::Output))
            .collect();

        insta::assert_snapshot!(texts(&pane_rows(&lines, 3, 80)), @r"
        12:00:05 two
                 three
        12:00:05 four
        ");
        assert!(pane_rows(&lines, 0, 80).is_empty());
        assert_eq!(pane_rows(&lines, 10, 80).len(), 4);
    }
}
