//! Controller states and the registry creating them by name.

use std::collections::BTreeMap;

use super::machine::ApproachVisualServoing;
use super::state::{RunStatus, ServoCommand};
use crate::error::{Result, VisionError};
use crate::host::Controller;

/// Registry name of the approach + visual servoing state
pub const APPROACH_VISUAL_SERVOING: &str = "VisionPlugin::ApproachVisualServoing";

/// One state of the host's finite state machine.
///
/// Lifecycle: `start` once, `run` every control tick until it reports
/// completion, then `teardown`.
pub trait State {
    fn name(&self) -> &str;

    /// Enter the state. An error aborts state entry.
    fn start(&mut self, ctl: &mut dyn Controller) -> Result<()>;

    fn run(&mut self, ctl: &mut dyn Controller) -> Result<RunStatus>;

    /// Remove every task the state added. Must be safe to call at any point.
    fn teardown(&mut self, ctl: &mut dyn Controller);

    /// One-line status for periodic logging.
    fn status_line(&self) -> Option<String> {
        None
    }

    /// Apply an operator command between ticks.
    fn handle_command(&mut self, command: ServoCommand, _ctl: &mut dyn Controller) -> Result<()> {
        Err(VisionError::Config(format!(
            "state {} does not accept command {:?}",
            self.name(),
            command
        )))
    }
}

/// Constructor from the state's configuration table
pub type StateFactory = fn(&toml::Value) -> Result<Box<dyn State>>;

/// Named state constructors.
#[derive(Default)]
pub struct StateRegistry {
    factories: BTreeMap<String, StateFactory>,
}

impl StateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the states provided by this crate.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.factories.insert(
            APPROACH_VISUAL_SERVOING.to_string(),
            ApproachVisualServoing::factory,
        );
        registry
    }

    /// Add a state kind. Fails if the name is taken.
    pub fn register(&mut self, name: &str, factory: StateFactory) -> Result<()> {
        if self.factories.contains_key(name) {
            return Err(VisionError::Config(format!(
                "state \"{}\" already registered",
                name
            )));
        }
        self.factories.insert(name.to_string(), factory);
        Ok(())
    }

    pub fn create(&self, name: &str, config: &toml::Value) -> Result<Box<dyn State>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| VisionError::NotFound(format!("state \"{}\"", name)))?;
        factory(config)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
[robot]
marker = "gripper"
frame = "tool"

[target]
marker = "target"
frame = "slot"
"#;

    #[test]
    fn test_builtin_creates_servo_state() {
        let registry = StateRegistry::with_builtin();
        let value: toml::Value = toml::from_str(CONFIG).unwrap();
        let state = registry.create(APPROACH_VISUAL_SERVOING, &value).unwrap();
        assert_eq!(state.name(), APPROACH_VISUAL_SERVOING);
        assert_eq!(registry.names().collect::<Vec<_>>(), vec![APPROACH_VISUAL_SERVOING]);
    }

    #[test]
    fn test_unknown_state() {
        let registry = StateRegistry::with_builtin();
        let value: toml::Value = toml::from_str(CONFIG).unwrap();
        assert!(matches!(
            registry.create("Nope", &value),
            Err(VisionError::NotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_registration() {
        let mut registry = StateRegistry::with_builtin();
        let err = registry
            .register(APPROACH_VISUAL_SERVOING, ApproachVisualServoing::factory)
            .unwrap_err();
        assert!(matches!(err, VisionError::Config(_)));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let registry = StateRegistry::with_builtin();
        let value: toml::Value = toml::from_str("[robot]\nmarker = \"gripper\"\n").unwrap();
        assert!(registry.create(APPROACH_VISUAL_SERVOING, &value).is_err());
    }
}
