//! # Stage: Observation Parser
//!
//! ## Responsibility
//! Recover a typed [`Observation`] from a raw assistant response that may
//! contain a well-formed, truncated, or malformed `<obs>` block, and enrich it
//! with the turn metadata the generator is never trusted to report.
//!
//! ## Guarantees
//! - Total: every input yields `Some(Observation)` or `None`; never panics
//! - Ranged fields are clamped: similarity [0,1], sentiment [-1,1],
//!   complexity [1,5], chunks referenced [0, `MAX_CHUNKS_REFERENCED`]
//! - Derived fields (word count, chunks in context) come from [`TurnContext`]
//!
//! ## NOT Responsible For
//! - Checking that the self-report is true
//! - Emitting the observation (that is the registry)

mod extract;
mod fields;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::observation::{
    CompetenceObservation, ContextPressure, GradientObservation, Initiative, InteractionType,
    MemoryRelevanceObservation, Observation, PatternObservation, ScarCategory, ScarKind,
    ScarObservation, SessionContinuity, UserSignal,
};

pub use extract::{decode_payload, extract_block, strip_observation_block, strip_trailing_commas, CLOSE_TAG, OPEN_TAG};
pub use fields::Fields;

/// Ceiling for the self-reported `chunks_referenced`. Keeps the memory
/// accumulators far from `u64` overflow whatever the generator claims.
pub const MAX_CHUNKS_REFERENCED: u64 = u32::MAX as u64;

/// Metadata about the turn, supplied by the pipeline driver.
#[derive(Debug, Clone, Default)]
pub struct TurnContext {
    pub session_id: String,
    pub turn_number: u64,
    pub user_message: String,
    pub assistant_response: String,
    pub chunks_in_context: u64,
}

/// Number of whitespace-separated words in `text`.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Parse the observation block in `ctx.assistant_response`, stamped now.
pub fn parse_observation(ctx: &TurnContext) -> Option<Observation> {
    parse_observation_at(ctx, Utc::now())
}

/// Parse with an explicit timestamp.
pub fn parse_observation_at(ctx: &TurnContext, timestamp: DateTime<Utc>) -> Option<Observation> {
    let Some(raw) = extract_block(&ctx.assistant_response) else {
        tracing::debug!(
            target: "multicomp::parser",
            session = %ctx.session_id,
            turn = ctx.turn_number,
            "no observation block in response"
        );
        return None;
    };

    let Some(root) = decode_payload(raw) else {
        tracing::debug!(
            target: "multicomp::parser",
            session = %ctx.session_id,
            turn = ctx.turn_number,
            payload_len = raw.len(),
            "observation block could not be decoded"
        );
        return None;
    };

    Some(build_observation(&root, ctx, timestamp))
}

fn build_observation(root: &Map<String, Value>, ctx: &TurnContext, timestamp: DateTime<Utc>) -> Observation {
    let p = Fields::section(root, "p", "pattern");
    let s = Fields::section(root, "s", "scar");
    let co = Fields::section(root, "co", "competence");
    let g = Fields::section(root, "g", "gradient");
    let me = Fields::section(root, "me", "memory");

    let pattern = PatternObservation {
        matched: p.flag("m", "matched"),
        pattern_id: p.str("pid", "pattern_id"),
        tool_used: p.str("t", "tool_used"),
        parameters: p.string_map("pa", "parameters"),
        intent: p.str("i", "intent").unwrap_or_else(|| "unknown".to_string()),
        similarity: p.num("s", "similarity").unwrap_or(0.0).clamp(0.0, 1.0),
    };

    let scar = ScarObservation {
        triggered: s.flag("t", "triggered"),
        kind: s.str("ty", "type").and_then(|v| ScarKind::from_token(&v)),
        description: s.str("d", "description"),
        category: s.str("c", "category").and_then(|v| ScarCategory::from_token(&v)),
    };

    let complexity = co
        .num("cx", "complexity")
        .filter(|n| *n != 0.0)
        .unwrap_or(1.0)
        .clamp(1.0, 5.0);
    let competence = CompetenceObservation {
        domain: co.str("d", "domain").unwrap_or_else(|| "general".to_string()),
        signal: co.str("si", "signal").and_then(|v| UserSignal::from_token(&v)),
        initiative: co
            .str("in", "initiative")
            .and_then(|v| Initiative::from_token(&v))
            .unwrap_or_default(),
        complexity,
    };

    let gradient = GradientObservation {
        person: g.str("pe", "person"),
        user_message_length: word_count(&ctx.user_message),
        session_continuity: g
            .str("sc", "session_continuity")
            .and_then(|v| SessionContinuity::from_token(&v))
            .unwrap_or_default(),
        sentiment: g.num("se", "sentiment").unwrap_or(0.0).clamp(-1.0, 1.0),
        interaction_type: g
            .str("it", "interaction_type")
            .and_then(|v| InteractionType::from_token(&v))
            .unwrap_or_default(),
    };

    let memory = MemoryRelevanceObservation {
        chunks_in_context: ctx.chunks_in_context,
        chunks_referenced: me
            .num("cr", "chunks_referenced")
            .map(|n| n.clamp(0.0, MAX_CHUNKS_REFERENCED as f64).round() as u64)
            .unwrap_or(0),
        skills_used: me.strings("su", "skills_used"),
        context_pressure: me
            .str("cp", "context_pressure")
            .and_then(|v| ContextPressure::from_token(&v))
            .unwrap_or_default(),
    };

    Observation {
        timestamp,
        session_id: ctx.session_id.clone(),
        turn_number: ctx.turn_number,
        pattern,
        scar,
        competence,
        gradient,
        memory,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ctx(response: &str) -> TurnContext {
        TurnContext {
            session_id: "sess-1".to_string(),
            turn_number: 7,
            user_message: "please book the usual room for friday".to_string(),
            assistant_response: response.to_string(),
            chunks_in_context: 3,
        }
    }

    const FULL: &str = r#"Booked it.
<obs>
{
  "p": {"m":true,"t":"calendar.create","pa":{"room":"4B","day":"fri"},"i":"create_event","s":0.8},
  "s": {"t":true,"ty":"user_correction","d":"picked the wrong room first","c":"assumption"},
  "co": {"d":"scheduling","si":"modify","in":"agent","cx":3},
  "g": {"pe":"dana","sc":"new_topic","se":0.4,"it":"problem_solving"},
  "me": {"cr":2,"su":["calendar"],"cp":"medium"}
}
</obs>"#;

    #[test]
    fn test_parse_full_short_key_payload() {
        let obs = parse_observation(&ctx(FULL)).expect("observation");
        assert_eq!(obs.session_id, "sess-1");
        assert_eq!(obs.turn_number, 7);

        assert!(obs.pattern.matched);
        assert_eq!(obs.pattern.tool_used.as_deref(), Some("calendar.create"));
        assert_eq!(obs.pattern.intent, "create_event");
        assert_eq!(obs.pattern.parameters["room"], "4B");
        assert!((obs.pattern.similarity - 0.8).abs() < 1e-9);

        assert!(obs.scar.triggered);
        assert_eq!(obs.scar.kind, Some(ScarKind::UserCorrection));
        assert_eq!(obs.scar.category, Some(ScarCategory::Assumption));

        assert_eq!(obs.competence.domain, "scheduling");
        assert_eq!(obs.competence.signal, Some(UserSignal::Modify));
        assert_eq!(obs.competence.initiative, Initiative::Agent);
        assert_eq!(obs.competence.complexity, 3.0);

        assert_eq!(obs.gradient.person.as_deref(), Some("dana"));
        assert_eq!(obs.gradient.user_message_length, 7);
        assert_eq!(obs.gradient.session_continuity, SessionContinuity::NewTopic);
        assert_eq!(obs.gradient.interaction_type, InteractionType::ProblemSolving);

        assert_eq!(obs.memory.chunks_in_context, 3);
        assert_eq!(obs.memory.chunks_referenced, 2);
        assert_eq!(obs.memory.skills_used, vec!["calendar".to_string()]);
        assert_eq!(obs.memory.context_pressure, ContextPressure::Medium);
    }

    #[test]
    fn test_parse_long_key_payload() {
        let text = r#"ok <obs>{"pattern":{"tool_used":"search","intent":"lookup"},
            "competence":{"domain":"research","signal":"accept","complexity":2}}</obs>"#;
        let obs = parse_observation(&ctx(text)).expect("observation");
        assert_eq!(obs.pattern.tool_used.as_deref(), Some("search"));
        assert_eq!(obs.pattern.intent, "lookup");
        assert_eq!(obs.competence.domain, "research");
        assert_eq!(obs.competence.signal, Some(UserSignal::Accept));
        assert_eq!(obs.competence.complexity, 2.0);
    }

    #[test]
    fn test_parse_defaults_for_empty_object() {
        let obs = parse_observation(&ctx("<obs>{}</obs>")).expect("observation");
        assert!(!obs.pattern.matched);
        assert_eq!(obs.pattern.tool_used, None);
        assert_eq!(obs.pattern.intent, "unknown");
        assert_eq!(obs.pattern.similarity, 0.0);
        assert!(!obs.scar.triggered);
        assert_eq!(obs.competence.domain, "general");
        assert_eq!(obs.competence.signal, None);
        assert_eq!(obs.competence.initiative, Initiative::User);
        assert_eq!(obs.competence.complexity, 1.0);
        assert_eq!(obs.gradient.session_continuity, SessionContinuity::Continuation);
        assert_eq!(obs.gradient.interaction_type, InteractionType::Routine);
        assert_eq!(obs.memory.context_pressure, ContextPressure::Low);
        assert_eq!(obs.memory.chunks_referenced, 0);
    }

    #[test]
    fn test_parse_clamps_out_of_range_values() {
        let text = r#"<obs>{"p":{"s":7},"co":{"cx":99},"g":{"se":-5}}</obs>"#;
        let obs = parse_observation(&ctx(text)).expect("observation");
        assert_eq!(obs.pattern.similarity, 1.0);
        assert_eq!(obs.competence.complexity, 5.0);
        assert_eq!(obs.gradient.sentiment, -1.0);
    }

    #[test]
    fn test_parse_caps_huge_chunks_referenced() {
        let huge = parse_observation(&ctx(r#"<obs>{"me":{"cr":1e30}}</obs>"#)).expect("observation");
        assert_eq!(huge.memory.chunks_referenced, MAX_CHUNKS_REFERENCED);

        let negative = parse_observation(&ctx(r#"<obs>{"me":{"cr":-4}}</obs>"#)).expect("observation");
        assert_eq!(negative.memory.chunks_referenced, 0);
    }

    #[test]
    fn test_parse_non_numeric_complexity_defaults_to_one() {
        let text = r#"<obs>{"co":{"cx":"hard"}}</obs>"#;
        let obs = parse_observation(&ctx(text)).expect("observation");
        assert_eq!(obs.competence.complexity, 1.0);
    }

    #[test]
    fn test_parse_unclosed_block_with_trailing_comma() {
        let text = "Sure.\n<obs>{\"p\":{\"t\":\"shell\",\"i\":\"run\",},}";
        let obs = parse_observation(&ctx(text)).expect("observation");
        assert_eq!(obs.pattern.tool_used.as_deref(), Some("shell"));
    }

    #[test]
    fn test_parse_without_block_is_none() {
        assert!(parse_observation(&ctx("Just a normal answer.")).is_none());
    }

    #[test]
    fn test_parse_garbage_block_is_none() {
        assert!(parse_observation(&ctx("<obs>p: m=true; t=search</obs>")).is_none());
    }

    #[test]
    fn test_parse_unknown_tokens_fall_back() {
        let text = r#"<obs>{"co":{"si":"approve","in":"robot"},"me":{"cp":"extreme"},"s":{"ty":"meltdown"}}</obs>"#;
        let obs = parse_observation(&ctx(text)).expect("observation");
        assert_eq!(obs.competence.signal, None);
        assert_eq!(obs.competence.initiative, Initiative::User);
        assert_eq!(obs.memory.context_pressure, ContextPressure::Low);
        assert_eq!(obs.scar.kind, None);
    }

    #[test]
    fn test_parse_uses_given_timestamp() {
        let ts = DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z").unwrap().with_timezone(&Utc);
        let obs = parse_observation_at(&ctx("<obs>{}</obs>"), ts).unwrap();
        assert_eq!(obs.timestamp, ts);
    }

    #[test]
    fn test_word_count() {
        assert_eq!(word_count(""), 0);
        assert_eq!(word_count("  two   words \n"), 2);
    }

    proptest! {
        #[test]
        fn prop_clamped_fields_stay_in_range(sim in -1e6f64..1e6, se in -1e6f64..1e6, cx in -1e6f64..1e6) {
            let text = format!(
                r#"<obs>{{"p":{{"s":{sim}}},"g":{{"se":{se}}},"co":{{"cx":{cx}}}}}</obs>"#
            );
            let obs = parse_observation(&ctx(&text)).expect("valid payload");
            prop_assert!((0.0..=1.0).contains(&obs.pattern.similarity));
            prop_assert!((-1.0..=1.0).contains(&obs.gradient.sentiment));
            prop_assert!((1.0..=5.0).contains(&obs.competence.complexity));
        }

        #[test]
        fn prop_text_without_open_tag_is_untouched(text in "[^<]*") {
            prop_assert!(parse_observation(&ctx(&text)).is_none());
            prop_assert_eq!(strip_observation_block(&text), text);
        }

        #[test]
        fn prop_arbitrary_block_content_never_panics(body in "[^<]*") {
            let text = format!("answer <obs>{body}");
            let _ = parse_observation(&ctx(&text));
            let stripped = strip_observation_block(&text);
            prop_assert_eq!(stripped, "answer");
        }
    }
}
