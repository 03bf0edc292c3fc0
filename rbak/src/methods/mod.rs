//! Backup methods: how one directory gets from the master to a target.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;

use crate::Hooks;
use crate::error::ConfigurationError;
use crate::scope::DirectoryScope;

pub mod rsync;
pub mod scp;
pub mod snapshot;
pub mod zfs;

#[async_trait]
pub trait Method: std::fmt::Debug + Send + Sync {
    /// Registry name, e.g. `rsync-snapshot`.
    fn name(&self) -> &'static str;
    fn hooks(&self) -> &Hooks;
    fn hooks_mut(&mut self) -> &mut Hooks;

    /// Back up `scope.backup_directory()` from the master to `scope.target_scope()`.
    async fn call(&self, scope: &DirectoryScope) -> anyhow::Result<()>;
}

/// Settings shared by all methods.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MethodConfig {
    /// Replaces the method's default command, e.g. `["sudo", "rsync"]`
    #[serde(default)]
    pub command: Option<Vec<String>>,
    #[serde(default)]
    pub arguments: Vec<String>,
    /// Method specific settings
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl MethodConfig {
    /// Fail if `options` holds anything not in `known`.
    pub fn check_options(&self, method: &str, known: &[&str]) -> Result<(), ConfigurationError> {
        match self.options.keys().find(|key| !known.contains(&key.as_str())) {
            Some(key) => Err(ConfigurationError::new(format!(
                "unknown option {key:?} for method {method}"
            ))),
            None => Ok(()),
        }
    }
}

pub type MethodFactory = fn(MethodConfig) -> anyhow::Result<Box<dyn Method>>;

/// Maps method names used in configuration to constructors.
#[derive(Clone, Debug)]
pub struct MethodRegistry {
    factories: BTreeMap<String, MethodFactory>,
}

impl Default for MethodRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(rsync::NAME, |config| Ok(Box::new(rsync::RSync::new(config)?)));
        registry.register(snapshot::NAME, |config| {
            Ok(Box::new(snapshot::RSyncSnapshot::new(config)?))
        });
        registry.register(scp::NAME, |config| Ok(Box::new(scp::Scp::new(config)?)));
        registry.register(zfs::NAME, |config| Ok(Box::new(zfs::Zfs::new(config)?)));
        registry
    }
}

impl MethodRegistry {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, name: &str, factory: MethodFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn create(&self, name: &str, config: MethodConfig) -> anyhow::Result<Box<dyn Method>> {
        let factory = self.factories.get(name).ok_or_else(|| {
            ConfigurationError::new(format!(
                "unknown backup method {name:?} (known: {})",
                self.names().collect::<Vec<_>>().join(", ")
            ))
        })?;
        factory(config)
    }
}
