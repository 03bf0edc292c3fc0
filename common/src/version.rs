// version information exchanged in the worker handshake

use serde::{Deserialize, Serialize};

/// Revision of the worker message set, bumped whenever a request or response changes shape.
pub const WORKER_PROTOCOL: u32 = 1;

/// Version a worker announces in its `ready` message.
///
/// The client and worker are compatible when they speak the same protocol revision
/// and come from the same `major.minor` release.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProtocolVersion {
    /// Package version of the binary (e.g. "0.4.0")
    pub semantic: String,
    /// Worker message set revision, see [`WORKER_PROTOCOL`]
    pub protocol: u32,
    /// Git describe output, absent when built outside a git checkout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_describe: Option<String>,
}

impl ProtocolVersion {
    #[must_use]
    pub fn current() -> Self {
        Self {
            semantic: env!("CARGO_PKG_VERSION").to_string(),
            protocol: WORKER_PROTOCOL,
            git_describe: option_env!("RBAK_GIT_DESCRIBE").map(String::from),
        }
    }

    fn release(&self) -> Option<(&str, &str)> {
        let mut parts = self.semantic.split('.');
        Some((parts.next()?, parts.next()?))
    }

    /// # Examples
    ///
    /// ```
    /// use common::version::ProtocolVersion;
    ///
    /// let client = ProtocolVersion {
    ///     semantic: "0.4.0".to_string(),
    ///     protocol: 1,
    ///     git_describe: None,
    /// };
    /// let worker = ProtocolVersion {
    ///     semantic: "0.4.3".to_string(),
    ///     protocol: 1,
    ///     git_describe: Some("v0.4.3-2-g1a2b3c4".to_string()),
    /// };
    /// assert!(client.is_compatible_with(&worker));
    /// ```
    #[must_use]
    pub fn is_compatible_with(&self, other: &Self) -> bool {
        self.protocol == other.protocol
            && self.release().is_some()
            && self.release() == other.release()
    }

    /// Semantic version followed by git describe output when known.
    #[must_use]
    pub fn display(&self) -> String {
        match &self.git_describe {
            Some(describe) => format!("{} ({describe})", self.semantic),
            None => self.semantic.clone(),
        }
    }

    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn to_json(&self) -> anyhow::Result<String> {
        serde_json::to_string(self)
            .map_err(|e| anyhow::anyhow!("failed to serialize version: {:#}", e))
    }

    /// # Errors
    ///
    /// Returns an error if the text is not a version record.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).map_err(|e| anyhow::anyhow!("failed to parse version: {:#}", e))
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (protocol {})", self.display(), self.protocol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(semantic: &str, protocol: u32) -> ProtocolVersion {
        ProtocolVersion {
            semantic: semantic.to_string(),
            protocol,
            git_describe: None,
        }
    }

    #[test]
    fn current_version_uses_package_version() {
        let current = ProtocolVersion::current();
        assert_eq!(current.semantic, env!("CARGO_PKG_VERSION"));
        assert_eq!(current.protocol, WORKER_PROTOCOL);
        assert!(current.is_compatible_with(&ProtocolVersion::current()));
    }

    #[test]
    fn patch_releases_are_compatible() {
        assert!(version("0.4.0", 1).is_compatible_with(&version("0.4.9", 1)));
    }

    #[test]
    fn minor_release_or_protocol_change_is_incompatible() {
        assert!(!version("0.4.0", 1).is_compatible_with(&version("0.5.0", 1)));
        assert!(!version("0.4.0", 1).is_compatible_with(&version("0.4.0", 2)));
        assert!(!version("garbage", 1).is_compatible_with(&version("garbage", 1)));
    }

    #[test]
    fn json_keeps_optional_describe_out() -> anyhow::Result<()> {
        let plain = version("0.4.0", 1);
        let json = plain.to_json()?;
        assert!(!json.contains("git_describe"));
        assert_eq!(ProtocolVersion::from_json(&json)?, plain);
        assert!(ProtocolVersion::from_json("not json").is_err());
        Ok(())
    }

    #[test]
    fn display_includes_describe() {
        let mut v = version("0.4.0", 1);
        v.git_describe = Some("v0.4.0-1-gabcdef0".to_string());
        assert_eq!(v.display(), "0.4.0 (v0.4.0-1-gabcdef0)");
        assert_eq!(v.to_string(), "0.4.0 (v0.4.0-1-gabcdef0) (protocol 1)");
    }
}
