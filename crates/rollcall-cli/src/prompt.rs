use dialoguer::{Confirm, Input};

/// Ask a yes/no question; `assume_yes` skips the prompt.
pub fn confirm(prompt: &str, assume_yes: bool) -> anyhow::Result<bool> {
    if assume_yes {
        return Ok(true);
    }
    Ok(Confirm::new().with_prompt(prompt).default(false).interact()?)
}

/// Read one line of text; empty input is allowed.
pub fn ask(prompt: &str) -> anyhow::Result<String> {
    let line: String = Input::new()
        .with_prompt(prompt)
        .allow_empty(true)
        .interact_text()?;
    Ok(line.trim().to_string())
}
