pub mod add;
pub mod rollback;
pub mod set;
pub mod show;
pub mod verify;

use std::path::Path;

use anyhow::bail;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing::debug;

use warden_core::WardenConfig;
use warden_mutate::{ConfigEditor, MutateError, MutateResult};

/// What every command needs: configuration, the editor over the live
/// document, and whether reloads are pre-approved.
pub struct Context {
    pub config: WardenConfig,
    pub editor: ConfigEditor,
    pub yes: bool,
}

impl Context {
    pub fn load(path: &Path, yes: bool) -> anyhow::Result<Self> {
        let config = WardenConfig::load(path)?;
        let editor = ConfigEditor::from_config(&config)?;
        debug!(live = %editor.live_path().display(), "editor ready");
        Ok(Self { config, editor, yes })
    }

    pub fn group(&self) -> &str {
        &self.config.proxy.aggregation_group
    }
}

/// Line-oriented prompt on the terminal.
pub struct Prompt {
    editor: DefaultEditor,
}

impl Prompt {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            editor: DefaultEditor::new()?,
        })
    }

    /// Trimmed answer; `None` on Ctrl-C or Ctrl-D.
    pub fn line(&mut self, prompt: &str) -> anyhow::Result<Option<String>> {
        match self.editor.readline(prompt) {
            Ok(line) => Ok(Some(line.trim().to_string())),
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Like [`Prompt::line`], but an interrupt aborts the command.
    pub fn answer(&mut self, prompt: &str) -> anyhow::Result<String> {
        match self.line(prompt)? {
            Some(line) => Ok(line),
            None => bail!("aborted"),
        }
    }

    pub fn confirm(&mut self, question: &str) -> anyhow::Result<bool> {
        let answer = self.line(&format!("{question} [y/N] "))?.unwrap_or_default();
        Ok(is_yes(&answer))
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Unwrap a mutation result, turning a failed validation into recovery
/// instructions for the operator.
pub fn committed<T>(result: MutateResult<T>) -> anyhow::Result<T> {
    match result {
        Err(MutateError::ValidationFailed { backup, output }) => {
            eprintln!("✗ the changed document failed validation:");
            for line in output.lines() {
                eprintln!("    {line}");
            }
            eprintln!("  The live document was left as changed and has NOT been reloaded.");
            eprintln!("  The previous version is saved at {}", backup.display());
            eprintln!("  Restore it with `warden rollback` and pick the newest backup.");
            bail!("validation failed")
        }
        other => Ok(other?),
    }
}

/// Reload after a validated change: immediately with `--yes`, otherwise
/// only if the operator agrees.
pub async fn offer_reload(ctx: &Context) -> anyhow::Result<()> {
    let unit = &ctx.config.proxy.unit;
    let reload = ctx.yes || Prompt::new()?.confirm(&format!("Reload {unit} now?"))?;
    if !reload {
        println!("  not reloaded; run `warden verify-and-reload` when ready");
        return Ok(());
    }
    ctx.editor.reload().await?;
    println!("✓ {unit} reloaded");
    Ok(())
}

/// Compact single-line rendering of a JSON value for prompts and tables.
pub fn compact(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use serde_json::json;

    use super::*;

    #[test]
    fn yes_answers() {
        assert!(is_yes("y"));
        assert!(is_yes("YES"));
        assert!(!is_yes(""));
        assert!(!is_yes("no"));
    }

    #[test]
    fn validation_failure_becomes_an_error() {
        let result: MutateResult<()> = Err(MutateError::ValidationFailed {
            backup: PathBuf::from("/var/lib/warden/backups/config.x.json"),
            output: "FATAL bad peer".to_string(),
        });
        assert_eq!(committed(result).unwrap_err().to_string(), "validation failed");
        assert_eq!(committed(Ok(7)).unwrap(), 7);
    }

    #[test]
    fn compact_strips_string_quotes_only() {
        assert_eq!(compact(&json!("10.0.0.1")), "10.0.0.1");
        assert_eq!(compact(&json!(51820)), "51820");
        assert_eq!(compact(&json!(["a", "b"])), r#"["a","b"]"#);
    }
}
