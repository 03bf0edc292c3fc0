use crate::Hooks;
use crate::error::AbsolutePathError;

/// Append exactly one trailing `/`; the empty path becomes `./`.
#[must_use]
pub fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "./".to_string()
    } else {
        format!("{trimmed}/")
    }
}

/// Number of path segments, not counting `.` segments.
#[must_use]
pub fn depth(path: &str) -> usize {
    path.split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .count()
}

/// A directory to back up, relative to each server's root.
#[derive(Debug)]
pub struct Directory {
    path: String,
    /// Extra method arguments for this directory, e.g. `--exclude` patterns
    pub arguments: Vec<String>,
    pub hooks: Hooks,
}

impl Directory {
    pub fn new(path: &str) -> Result<Self, AbsolutePathError> {
        if path.starts_with('/') {
            return Err(AbsolutePathError(path.to_string()));
        }
        Ok(Self {
            path: normalize(path),
            arguments: vec![],
            hooks: Hooks::new(),
        })
    }

    #[must_use]
    pub fn with_arguments(mut self, arguments: Vec<String>) -> Self {
        self.arguments = arguments;
        self
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        depth(&self.path)
    }
}

impl std::fmt::Display for Directory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn absolute_paths_are_rejected() {
        let error = Directory::new("/var").unwrap_err();
        assert_eq!(error.to_string(), r#"directory "/var" must be relative to the server root"#);
    }

    #[test]
    fn paths_get_one_trailing_slash() -> anyhow::Result<()> {
        assert_eq!(Directory::new("home")?.path(), "home/");
        assert_eq!(Directory::new("home//")?.path(), "home/");
        assert_eq!(Directory::new("")?.path(), "./");
        assert_eq!(Directory::new(".")?.path(), "./");
        Ok(())
    }

    #[test]
    fn depth_counts_real_segments() -> anyhow::Result<()> {
        assert_eq!(depth("a/b/c/"), 3);
        assert_eq!(depth(""), 0);
        assert_eq!(Directory::new("")?.depth(), 0);
        assert_eq!(depth("latest.snapshot/./"), 1);
        assert_eq!(Directory::new("var/www")?.depth(), 2);
        Ok(())
    }

    #[test]
    fn arguments_are_kept() -> anyhow::Result<()> {
        let directory = Directory::new(".")?.with_arguments(vec!["--exclude=cache".to_string()]);
        assert_eq!(directory.arguments, vec!["--exclude=cache"]);
        Ok(())
    }

    proptest! {
        #[test]
        fn relative_paths_normalize_to_single_slash(
            segments in proptest::collection::vec("[a-z0-9._-]{1,8}", 0..5),
            slashes in 0usize..3,
        ) {
            let path = format!("{}{}", segments.join("/"), "/".repeat(slashes));
            prop_assume!(!path.starts_with('/'));
            let directory = Directory::new(&path).unwrap();
            prop_assert!(directory.path().ends_with('/'));
            prop_assert!(!directory.path().ends_with("//"));
            prop_assert_eq!(normalize(directory.path()), directory.path());
        }

        #[test]
        fn depth_ignores_dot_segments(
            segments in proptest::collection::vec("[a-z]{1,6}", 0..6),
            dots in 0usize..3,
        ) {
            let mut path = segments.join("/");
            for _ in 0..dots {
                path = if path.is_empty() { ".".to_string() } else { format!("./{path}") };
            }
            prop_assert_eq!(Directory::new(&path).unwrap().depth(), segments.len());
        }

        #[test]
        fn leading_slash_always_rejected(rest in "[a-z/]{0,12}") {
            let path = format!("/{rest}");
            prop_assert!(Directory::new(&path).is_err());
        }
    }
}
