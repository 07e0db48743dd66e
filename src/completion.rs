//! Shell completion script generation.

use crate::error::{ConductError, Result};
use clap::Command;
use clap_complete::{generate, Shell};
use std::io;

pub const SUPPORTED_SHELLS: [&str; 3] = ["bash", "zsh", "fish"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellType {
    Bash,
    Zsh,
    Fish,
}

impl ShellType {
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "bash" => Ok(ShellType::Bash),
            "zsh" => Ok(ShellType::Zsh),
            "fish" => Ok(ShellType::Fish),
            other => Err(ConductError::Config(format!(
                "unsupported shell: {}",
                other
            ))),
        }
    }

    fn to_clap_shell(self) -> Shell {
        match self {
            ShellType::Bash => Shell::Bash,
            ShellType::Zsh => Shell::Zsh,
            ShellType::Fish => Shell::Fish,
        }
    }
}

/// Write the completion script for `cmd` to stdout.
pub fn print_completion_script(cmd: &mut Command, shell: ShellType) {
    let name = cmd.get_name().to_string();
    generate(shell.to_clap_shell(), cmd, name, &mut io::stdout());
}
