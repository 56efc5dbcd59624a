//! Shell completion generation.

use clap::CommandFactory;
use clap_complete::{Shell, generate};
use std::io;

use crate::Cli;

/// Generate shell completions to stdout.
pub(crate) fn cmd_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd
        .get_name()
        .to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completions_cover_subcommands() {
        let mut cmd = Cli::command();
        let mut out = Vec::new();
        generate(Shell::Bash, &mut cmd, "we2flash", &mut out);

        let script = String::from_utf8(out).unwrap();
        assert!(script.contains("_we2flash()"));
        assert!(script.contains("list-ports"));
        assert!(script.contains("preamble"));
    }
}
