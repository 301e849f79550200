use std::{path::Path, process::ExitCode};

use anyhow::{Context, Result};
use csd_core::{CommandSpec, OutputMode, ProcessHandle, paths};

use super::exit_code;
use crate::config::Config;

const DEFAULT_EDITOR: &str = "vim";

pub async fn run(edit: bool, init: bool) -> Result<ExitCode> {
    let path = paths::config_path()?;

    if init {
        Config::init_at(&path)?;
        println!("Created config at {}", path.display());
        return Ok(ExitCode::SUCCESS);
    }

    if edit {
        if !path.exists() {
            Config::init_at(&path)?;
        }
        let editor = std::env::var("EDITOR").unwrap_or_default();
        let spec = editor_command(&editor, &path)?;
        let status = ProcessHandle::start(&spec, OutputMode::Passthrough)?
            .wait()
            .await?;
        return Ok(exit_code(csd_core::exit_code(status)));
    }

    let config = Config::load_from(&path)?;
    println!("# Config file: {}\n", path.display());
    print!("{}", config.to_toml()?);
    Ok(ExitCode::SUCCESS)
}

/// `$EDITOR` may carry arguments, e.g. `code --wait`.
fn editor_command(editor: &str, path: &Path) -> Result<CommandSpec> {
    let editor = editor.trim();
    let mut argv = if editor.is_empty() {
        vec![DEFAULT_EDITOR.to_string()]
    } else {
        shlex::split(editor).with_context(|| format!("cannot parse EDITOR {editor:?}"))?
    };
    argv.push(path.display().to_string());
    CommandSpec::from_argv(&argv).context("EDITOR is empty")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_editor_command() {
        let path = Path::new("/tmp/csd/config.toml");
        assert_eq!(
            editor_command("code --wait", path).unwrap().display(),
            "code --wait /tmp/csd/config.toml"
        );
        assert_eq!(
            editor_command("  ", path).unwrap().display(),
            "vim /tmp/csd/config.toml"
        );
        assert!(editor_command("vim 'unterminated", path).is_err());
    }
}
