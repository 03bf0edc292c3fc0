//! Remote execution for the rbak tools: connection shells, the process group every
//! child runs in, line-oriented log pipes and the `rbakd` worker protocol.

pub mod error;
pub mod group;
pub mod logpipe;
pub mod protocol;
pub mod resolve;
pub mod shell;
pub mod streams;
pub mod tracelog;
pub mod worker;

pub use error::{CommandFailure, ConnectionError, ExitStatus};
pub use group::{Process, ProcessGroup};
pub use logpipe::LogPipe;
pub use resolve::{Resolver, StaticResolver, SystemResolver};
pub use shell::{Shell, SshOptions};
pub use worker::Worker;

fn is_shell_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || "_-./=:,+@%".contains(c)
}

/// Quote `arg` so a POSIX shell reads it back as a single word.
///
/// Words made only of safe characters are returned unchanged.
#[must_use]
pub fn shell_escape(arg: &str) -> String {
    if !arg.is_empty() && arg.chars().all(is_shell_safe) {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// Escape every word and join them with spaces.
#[must_use]
pub fn shell_join<S: AsRef<str>>(args: &[S]) -> String {
    args.iter()
        .map(|arg| shell_escape(arg.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_words_are_untouched() {
        assert_eq!(shell_escape("rsync"), "rsync");
        assert_eq!(shell_escape("/srv/backup/latest.snapshot/"), "/srv/backup/latest.snapshot/");
        assert_eq!(shell_escape("user@host:/path"), "user@host:/path");
    }

    #[test]
    fn unsafe_words_are_single_quoted() {
        assert_eq!(shell_escape(""), "''");
        assert_eq!(shell_escape("my files"), "'my files'");
        assert_eq!(shell_escape("it's"), r"'it'\''s'");
        assert_eq!(shell_escape("$HOME"), "'$HOME'");
    }

    #[test]
    fn join_escapes_each_word() {
        assert_eq!(shell_join(&["ls", "-l", "a b"]), "ls -l 'a b'");
    }
}
