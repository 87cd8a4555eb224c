//! The five built-in observers and the bundle that registers them together.

pub mod competence;
pub mod gradient;
pub mod memory;
pub mod pattern;
pub mod scar;

use std::sync::Arc;

pub use competence::{CompetenceObserver, DomainSignals};
pub use gradient::{GradientDataPoint, GradientObserver};
pub use memory::{MemoryObserver, MemoryStats, PressureCounts};
pub use pattern::{PatternEntry, PatternMetrics, PatternObserver};
pub use scar::{ScarEntry, ScarObserver};

use crate::config::StreakMode;
use crate::registry::ObserverRegistry;

/// Typed handles to the built-in observers, kept alongside the registry so
/// callers can read model state without downcasting.
#[derive(Debug, Clone)]
pub struct BuiltinObservers {
    pub pattern: Arc<PatternObserver>,
    pub scar: Arc<ScarObserver>,
    pub competence: Arc<CompetenceObserver>,
    pub gradient: Arc<GradientObserver>,
    pub memory: Arc<MemoryObserver>,
}

impl BuiltinObservers {
    pub fn new(streak_mode: StreakMode) -> Self {
        Self {
            pattern: Arc::new(PatternObserver::new(streak_mode)),
            scar: Arc::new(ScarObserver::new()),
            competence: Arc::new(CompetenceObserver::new()),
            gradient: Arc::new(GradientObserver::new()),
            memory: Arc::new(MemoryObserver::new()),
        }
    }

    /// Register all five, in the order pattern, scar, competence, gradient,
    /// memory.
    pub fn register_into(&self, registry: &mut ObserverRegistry) {
        registry.register(self.pattern.clone());
        registry.register(self.scar.clone());
        registry.register(self.competence.clone());
        registry.register(self.gradient.clone());
        registry.register(self.memory.clone());
    }
}
