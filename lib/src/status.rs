//! Operator-facing status lines.
//!
//! Progress, warnings and errors each get a distinct style; colors are
//! stripped automatically when stdout/stderr is not a terminal.

use std::fmt::Display;

use anstyle::{AnsiColor, Style};

/// Special Unicode characters used for display.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Glyph {
    BlackCircle,
    Warning,
    Cross,
}

impl Glyph {
    pub(crate) fn as_utf8(&self) -> &'static str {
        match self {
            Glyph::BlackCircle => "●",
            Glyph::Warning => "⚠",
            Glyph::Cross => "✗",
        }
    }
}

impl Display for Glyph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_utf8())
    }
}

const PROGRESS: Style = Style::new()
    .bold()
    .fg_color(Some(anstyle::Color::Ansi(AnsiColor::Cyan)));
const WARNING: Style = Style::new().fg_color(Some(anstyle::Color::Ansi(AnsiColor::Yellow)));
const ERROR: Style = Style::new()
    .bold()
    .fg_color(Some(anstyle::Color::Ansi(AnsiColor::Red)));

fn render(glyph: Glyph, style: Style, msg: &dyn Display) -> String {
    format!("{style}{glyph} {msg}{style:#}")
}

/// A top-level step is starting.
pub(crate) fn progress(msg: impl Display) {
    tracing::debug!(target: "status", "{msg}");
    anstream::println!("{}", render(Glyph::BlackCircle, PROGRESS, &msg));
}

/// Something went wrong, but we are continuing.
pub(crate) fn warning(msg: impl Display) {
    tracing::debug!(target: "status", "warning: {msg}");
    anstream::eprintln!("{}", render(Glyph::Warning, WARNING, &msg));
}

pub(crate) fn error(msg: impl Display) {
    tracing::debug!(target: "status", "error: {msg}");
    anstream::eprintln!("{}", render(Glyph::Cross, ERROR, &msg));
}
