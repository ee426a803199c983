//! Stderr status colors. Respect `NO_COLOR`, `FORCE_COLOR` and TTY detection
//! through `owo-colors`, plus the `--no-color` flag.

use std::sync::atomic::{AtomicBool, Ordering};

use owo_colors::OwoColorize;
use owo_colors::Stream::Stderr;

static NO_COLOR_FLAG: AtomicBool = AtomicBool::new(false);

pub fn set_no_color() {
    NO_COLOR_FLAG.store(true, Ordering::Relaxed);
}

fn no_color() -> bool {
    NO_COLOR_FLAG.load(Ordering::Relaxed)
}

pub fn success(text: &str) -> String {
    if no_color() {
        return text.to_string();
    }
    text.if_supports_color(Stderr, |t| t.green()).to_string()
}

pub fn warning(text: &str) -> String {
    if no_color() {
        return text.to_string();
    }
    text.if_supports_color(Stderr, |t| t.yellow()).to_string()
}

pub fn error(text: &str) -> String {
    if no_color() {
        return text.to_string();
    }
    text.if_supports_color(Stderr, |t| t.red()).to_string()
}

pub fn muted(text: &str) -> String {
    if no_color() {
        return text.to_string();
    }
    text.if_supports_color(Stderr, |t| t.dimmed()).to_string()
}
