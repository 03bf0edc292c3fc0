use serde::Deserialize;

/// Directory a command runs in.
///
/// Written as `root` or `{path: DIR}` in scripts.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(from = "ChdirConfig")]
pub enum Chdir {
    /// The server root
    Root,
    /// A path, relative paths are taken relative to the server root
    Path(String),
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum RootKeyword {
    Root,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ChdirConfig {
    Keyword(RootKeyword),
    Path { path: String },
}

impl From<ChdirConfig> for Chdir {
    fn from(config: ChdirConfig) -> Self {
        match config {
            ChdirConfig::Keyword(RootKeyword::Root) => Chdir::Root,
            ChdirConfig::Path { path } => Chdir::Path(path),
        }
    }
}

/// A command to run on some server.
#[derive(Debug, Default)]
pub struct Command {
    pub argv: Vec<String>,
    pub chdir: Option<Chdir>,
    /// Replaces the default of an empty stdin
    pub stdin: Option<std::process::Stdio>,
    /// Hand stdout to the caller instead of logging it
    pub capture_stdout: bool,
}

impl Command {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn chdir(mut self, chdir: Chdir) -> Self {
        self.chdir = Some(chdir);
        self
    }

    #[must_use]
    pub fn stdin(mut self, stdin: std::process::Stdio) -> Self {
        self.stdin = Some(stdin);
        self
    }

    #[must_use]
    pub fn capture_stdout(mut self) -> Self {
        self.capture_stdout = true;
        self
    }

    /// Commands wired to other processes cannot go through a worker.
    #[must_use]
    pub fn needs_pipes(&self) -> bool {
        self.stdin.is_some() || self.capture_stdout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_fields() {
        let command = Command::new(["rbak", "rotate"]).chdir(Chdir::Root);
        assert_eq!(command.argv, vec!["rbak", "rotate"]);
        assert_eq!(command.chdir, Some(Chdir::Root));
        assert!(!command.needs_pipes());
        assert!(Command::new(["zfs"]).capture_stdout().needs_pipes());
    }

    #[test]
    fn chdir_reads_from_yaml() -> anyhow::Result<()> {
        assert_eq!(serde_yaml::from_str::<Chdir>("root")?, Chdir::Root);
        assert_eq!(
            serde_yaml::from_str::<Chdir>("path: /mnt/backup")?,
            Chdir::Path("/mnt/backup".to_string())
        );
        assert!(serde_yaml::from_str::<Chdir>("home").is_err());
        Ok(())
    }
}
