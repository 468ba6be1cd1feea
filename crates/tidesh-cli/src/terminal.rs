//! Local terminal helpers: no-echo password entry and window size.

use std::io::Write;

use crossterm::event::{Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal;

use tidesh::Result;

/// Read a password from the terminal without echoing it.
pub fn prompt_password(user: &str) -> Result<String> {
    let mut stdout = std::io::stdout();
    write!(stdout, "Password for '{user}': ")?;
    stdout.flush()?;

    terminal::enable_raw_mode()?;
    let password = read_password_raw();
    terminal::disable_raw_mode()?;
    println!();
    password
}

/// Collect key presses until Enter while the terminal is in raw mode.
fn read_password_raw() -> Result<String> {
    let mut password = String::new();
    loop {
        match crossterm::event::read()? {
            Event::Key(key) if key.kind == KeyEventKind::Press => match key.code {
                KeyCode::Enter => return Ok(password),
                KeyCode::Backspace => {
                    password.pop();
                }
                KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::Interrupted,
                        "password entry interrupted",
                    )
                    .into());
                }
                KeyCode::Char(c) => password.push(c),
                _ => {}
            },
            _ => {}
        }
    }
}

/// Current terminal dimensions as `(cols, rows)`, with a conventional
/// fallback when stdout is not a terminal.
pub fn window_size() -> (u16, u16) {
    terminal::size().unwrap_or((80, 24))
}
