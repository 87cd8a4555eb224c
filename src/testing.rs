//! Test helpers: an [`Observation`] builder and scripted observers.
//!
//! Public so that integration tests and downstream hosts can drive the
//! registry without writing a parser payload for every case.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ObserverError;
use crate::observation::{
    CompetenceObservation, ContextPressure, GradientObservation, Initiative, InteractionType,
    MemoryRelevanceObservation, Observation, PatternObservation, ScarCategory, ScarKind,
    ScarObservation, SessionContinuity, UserSignal,
};
use crate::observer::Observer;

// ---------------------------------------------------------------------------
// ObservationBuilder
// ---------------------------------------------------------------------------

/// Builds an [`Observation`] with parser defaults for every unset field.
#[derive(Debug, Clone)]
pub struct ObservationBuilder {
    obs: Observation,
}

impl Default for ObservationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ObservationBuilder {
    pub fn new() -> Self {
        Self {
            obs: Observation {
                timestamp: Utc::now(),
                session_id: "test-session".to_string(),
                turn_number: 1,
                pattern: PatternObservation {
                    matched: false,
                    pattern_id: None,
                    tool_used: None,
                    parameters: BTreeMap::new(),
                    intent: "unknown".to_string(),
                    similarity: 0.0,
                },
                scar: ScarObservation {
                    triggered: false,
                    kind: None,
                    description: None,
                    category: None,
                },
                competence: CompetenceObservation {
                    domain: "general".to_string(),
                    signal: None,
                    initiative: Initiative::User,
                    complexity: 1.0,
                },
                gradient: GradientObservation {
                    person: None,
                    user_message_length: 0,
                    session_continuity: SessionContinuity::Continuation,
                    sentiment: 0.0,
                    interaction_type: InteractionType::Routine,
                },
                memory: MemoryRelevanceObservation {
                    chunks_in_context: 0,
                    chunks_referenced: 0,
                    skills_used: Vec::new(),
                    context_pressure: ContextPressure::Low,
                },
            },
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.obs.timestamp = timestamp;
        self
    }

    pub fn turn(mut self, session_id: &str, turn_number: u64) -> Self {
        self.obs.session_id = session_id.to_string();
        self.obs.turn_number = turn_number;
        self
    }

    /// Tool-bearing turn with the given intent.
    pub fn tool(mut self, intent: &str, tool: &str) -> Self {
        self.obs.pattern.intent = intent.to_string();
        self.obs.pattern.tool_used = Some(tool.to_string());
        self
    }

    pub fn param(mut self, key: &str, value: &str) -> Self {
        self.obs.pattern.parameters.insert(key.to_string(), value.to_string());
        self
    }

    pub fn scar(
        mut self,
        kind: Option<ScarKind>,
        category: Option<ScarCategory>,
        description: &str,
    ) -> Self {
        self.obs.scar = ScarObservation {
            triggered: true,
            kind,
            description: Some(description.to_string()),
            category,
        };
        self
    }

    pub fn competence(mut self, domain: &str, signal: UserSignal, complexity: f64) -> Self {
        self.obs.competence.domain = domain.to_string();
        self.obs.competence.signal = Some(signal);
        self.obs.competence.complexity = complexity;
        self
    }

    pub fn gradient(mut self, person: Option<&str>, words: usize, sentiment: f64) -> Self {
        self.obs.gradient.person = person.map(str::to_string);
        self.obs.gradient.user_message_length = words;
        self.obs.gradient.sentiment = sentiment;
        self
    }

    pub fn memory(mut self, in_context: u64, referenced: u64) -> Self {
        self.obs.memory.chunks_in_context = in_context;
        self.obs.memory.chunks_referenced = referenced;
        self
    }

    pub fn skills(mut self, skills: &[&str]) -> Self {
        self.obs.memory.skills_used = skills.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn pressure(mut self, pressure: ContextPressure) -> Self {
        self.obs.memory.context_pressure = pressure;
        self
    }

    pub fn build(self) -> Observation {
        self.obs
    }
}

// ---------------------------------------------------------------------------
// Scripted observers
// ---------------------------------------------------------------------------

/// Counts lifecycle calls; never fails.
#[derive(Debug)]
pub struct CountingObserver {
    id: &'static str,
    pub initialized: AtomicUsize,
    pub observed: AtomicUsize,
    pub shut_down: AtomicUsize,
}

impl CountingObserver {
    pub fn new(id: &'static str) -> Self {
        Self {
            id,
            initialized: AtomicUsize::new(0),
            observed: AtomicUsize::new(0),
            shut_down: AtomicUsize::new(0),
        }
    }

    pub fn observed(&self) -> usize {
        self.observed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Observer for CountingObserver {
    fn id(&self) -> &'static str {
        self.id
    }

    fn name(&self) -> &'static str {
        "Counting Observer"
    }

    async fn initialize(&self, _workspace: &std::path::Path) -> Result<(), ObserverError> {
        self.initialized.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn observe(&self, _observation: &Observation) -> Result<(), ObserverError> {
        self.observed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ObserverError> {
        self.shut_down.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// How a [`FailingObserver`] misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Return an error from every lifecycle call.
    Error,
    /// Panic inside `observe`.
    Panic,
}

/// Fails every call it receives, by error or by panic.
#[derive(Debug)]
pub struct FailingObserver {
    id: &'static str,
    mode: FailureMode,
}

impl FailingObserver {
    pub fn new(id: &'static str, mode: FailureMode) -> Self {
        Self { id, mode }
    }
}

#[async_trait]
impl Observer for FailingObserver {
    fn id(&self) -> &'static str {
        self.id
    }

    fn name(&self) -> &'static str {
        "Failing Observer"
    }

    async fn initialize(&self, _workspace: &std::path::Path) -> Result<(), ObserverError> {
        Err(ObserverError::NotInitialized(self.id))
    }

    async fn observe(&self, _observation: &Observation) -> Result<(), ObserverError> {
        match self.mode {
            FailureMode::Error => Err(ObserverError::NotInitialized(self.id)),
            FailureMode::Panic => panic!("observer '{}' exploded", self.id),
        }
    }

    async fn shutdown(&self) -> Result<(), ObserverError> {
        Err(ObserverError::NotInitialized(self.id))
    }
}
