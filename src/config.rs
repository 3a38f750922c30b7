use rustc_hash::FxHashMap;

/// Per-rule settings, looked up by rule label when a table is built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSettings {
    /// Comma-separated tag list; split and trimmed at table build.
    pub classes: Option<String>,
    /// Fire the watch hook whenever this rule derives a novel fact.
    pub watch: bool,
}

/// Build-time configuration for a rule table: settings per rule label.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    rules: FxHashMap<String, RuleSettings>,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the settings for a rule label.
    pub fn set_rule(&mut self, label: &str, settings: RuleSettings) {
        self.rules.insert(label.to_string(), settings);
    }

    /// Set the classes string for a rule label, keeping other settings.
    pub fn set_classes(&mut self, label: &str, classes: &str) {
        self.rules.entry(label.to_string()).or_default().classes = Some(classes.to_string());
    }

    /// Mark a rule label as watched, keeping other settings.
    pub fn set_watch(&mut self, label: &str) {
        self.rules.entry(label.to_string()).or_default().watch = true;
    }

    /// Look up the settings for a rule label.
    pub fn rule(&self, label: &str) -> Option<&RuleSettings> {
        self.rules.get(label)
    }

    /// Split a classes string into trimmed, non-empty tags.
    pub fn parse_classes(raw: &str) -> Vec<String> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_returns_configured_settings() {
        let mut config = EngineConfig::new();
        config.set_rule(
            "closure",
            RuleSettings {
                classes: Some("core,derived".to_string()),
                watch: true,
            },
        );
        let s = config.rule("closure").expect("settings should exist");
        assert_eq!(s.classes.as_deref(), Some("core,derived"));
        assert!(s.watch);
        assert_eq!(config.rule("absent"), None);
    }

    #[test]
    fn set_classes_and_watch_compose() {
        let mut config = EngineConfig::new();
        config.set_classes("r", "a, b");
        config.set_watch("r");
        let s = config.rule("r").expect("settings should exist");
        assert_eq!(s.classes.as_deref(), Some("a, b"));
        assert!(s.watch);
    }

    #[test]
    fn parse_classes_trims_and_drops_empties() {
        assert_eq!(
            EngineConfig::parse_classes(" a , b,, c "),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
        assert!(EngineConfig::parse_classes("  ").is_empty());
    }
}
