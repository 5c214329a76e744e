use std::collections::HashMap;
use std::sync::Arc;

use crate::effect::Effect;
use crate::effects::{
    CurtainEffect, HandpickEffect, RaceEffect, RouletteEffect, ScannerEffect, SlotEffect,
};

/// Mode name to effect. Built once at startup and shared read-only.
pub struct EffectRegistry {
    effects: HashMap<String, Arc<dyn Effect>>,
}

impl EffectRegistry {
    pub fn new() -> Self {
        Self {
            effects: HashMap::new(),
        }
    }

    /// Registry holding the six built-in effects with their default pacing.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(SlotEffect::default()));
        registry.register(Arc::new(RouletteEffect::default()));
        registry.register(Arc::new(RaceEffect::default()));
        registry.register(Arc::new(CurtainEffect::default()));
        registry.register(Arc::new(ScannerEffect::default()));
        registry.register(Arc::new(HandpickEffect::default()));
        registry
    }

    /// Register an effect under its own mode name, replacing any previous one.
    pub fn register(&mut self, effect: Arc<dyn Effect>) {
        let mode = effect.mode().to_string();
        self.effects.insert(mode, effect);
    }

    pub fn get(&self, mode: &str) -> Option<Arc<dyn Effect>> {
        self.effects.get(mode).map(Arc::clone)
    }

    pub fn contains(&self, mode: &str) -> bool {
        self.effects.contains_key(mode)
    }

    /// All mode names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.effects.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn count(&self) -> usize {
        self.effects.len()
    }
}

impl Default for EffectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use spotlight_core::{FaceBox, ModeCatalog};

    use crate::context::EffectContext;
    use crate::error::EffectError;

    struct Instant(&'static str);

    #[async_trait]
    impl Effect for Instant {
        fn mode(&self) -> &str {
            self.0
        }

        async fn run(&self, _ctx: &EffectContext) -> Result<Option<FaceBox>, EffectError> {
            Ok(None)
        }
    }

    #[test]
    fn register_and_get() {
        let mut registry = EffectRegistry::new();
        registry.register(Arc::new(Instant("confetti")));
        assert!(registry.contains("confetti"));
        assert!(registry.get("confetti").is_some());
        assert!(registry.get("slot").is_none());
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn later_registration_replaces() {
        let mut registry = EffectRegistry::builtin();
        registry.register(Arc::new(Instant("slot")));
        assert_eq!(registry.count(), 6);
    }

    #[test]
    fn builtin_covers_default_catalog() {
        let registry = EffectRegistry::builtin();
        assert_eq!(registry.names(), ModeCatalog::default().names());
    }
}
