//! Interactive confirmation

use std::io::{self, BufRead, IsTerminal, Write};

/// Ask a yes/no question on the terminal
///
/// Declines without asking when stdin is not a terminal; pass `--quiet`
/// or `--json` to skip the question in scripts.
pub fn confirm(prompt: &str) -> io::Result<bool> {
    if !io::stdin().is_terminal() {
        return Ok(false);
    }

    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(is_yes(&answer))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
