use std::io::IsTerminal;

/// Check if stderr is connected to a TTY
pub fn is_stderr_tty() -> bool {
    std::io::stderr().is_terminal()
}

/// Decide whether diagnostics get emoji markers
pub fn should_use_emoji(no_emoji: bool) -> bool {
    if no_emoji {
        return false;
    }

    // Respect NO_EMOJI like NO_COLOR
    if std::env::var("NO_EMOJI").is_ok() {
        return false;
    }

    // Plain prefixes when diagnostics are captured by another program
    is_stderr_tty()
}
