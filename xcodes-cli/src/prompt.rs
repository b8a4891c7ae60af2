//! Superuser password prompt.

use dialoguer::Password;
use tracing::debug;
use xcodes::pipeline::PasswordPrompt;

/// Reads the password from the terminal without echoing it.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalPrompt;

impl PasswordPrompt for TerminalPrompt {
    fn read_password(&self, prompt: &str) -> Option<String> {
        let answer = Password::new()
            .with_prompt(prompt_text(prompt))
            .allow_empty_password(true)
            .interact();
        match answer {
            Ok(password) if !password.is_empty() => Some(password),
            Ok(_) => None,
            Err(e) => {
                debug!(error = %e, "Password prompt failed");
                None
            }
        }
    }
}

/// dialoguer appends its own `: `.
fn prompt_text(prompt: &str) -> &str {
    prompt.trim_end().trim_end_matches(':')
}
