//! Protocol text appended to the system prompt at turn start.
//!
//! The enumerated token lists are rendered from the observation enums, so the
//! prompt and the parser cannot drift apart.

use once_cell::sync::Lazy;

use crate::observation::{
    ContextPressure, Initiative, InteractionType, ScarCategory, ScarKind, SessionContinuity,
    UserSignal,
};
use crate::parser::{CLOSE_TAG, OPEN_TAG};

/// Payload skeleton with every field at its default, short keys only.
pub const PAYLOAD_TEMPLATE: &str = r#"{"p":{"m":false,"t":null,"pa":{},"i":"","s":0.0},"s":{"t":false,"ty":null,"d":null,"c":null},"co":{"d":"","si":null,"in":"user","cx":1},"g":{"pe":null,"sc":"continuation","se":0.0,"it":"routine"},"me":{"cr":0,"su":[],"cp":"low"}}"#;

const PROTOCOL_OPEN: &str = "<cognitive_observation_protocol>";
const PROTOCOL_CLOSE: &str = "</cognitive_observation_protocol>";

fn choices<T: std::fmt::Display>(all: &[T]) -> String {
    all.iter().map(|v| v.to_string()).collect::<Vec<_>>().join("|")
}

static FULL: Lazy<String> = Lazy::new(|| {
    format!(
        "{PROTOCOL_OPEN}
At the end of EVERY response, append a hidden observation block. It costs a
few dozen tokens and is the system's only learning signal. Never skip it and
never mention it to the user.

Emit exactly one block, after all user-facing text:

{OPEN_TAG}
{PAYLOAD_TEMPLATE}
{CLOSE_TAG}

Field guide (short keys save tokens):
p  = pattern: m=matches a pattern you have seen before, t=tool used, pa=key parameters, i=intent category, s=similarity to the closest known pattern 0-1
s  = scar: t=something went wrong, ty=type({scar_kinds}), d=what went wrong, c=category({scar_categories})
co = competence: d=domain, si=signal({signals}), in=initiative({initiatives}), cx=complexity 1-5
g  = gradient: pe=person involved, sc=session_continuity({continuity}), se=sentiment -1 to 1, it=interaction_type({interactions})
me = memory: cr=context chunks actually referenced, su=skills used, cp=context_pressure({pressures})

Rules:
- p.m=true only for a trigger and action you have already seen in this session or in memory
- s.t=true only on a real failure or correction, never for normal interaction
- co.si=null on the first turn; otherwise infer it from how the user reacted to your previous turn
- g.se: -1 frustrated, 0 neutral, 1 enthusiastic
- me.cr counts chunks you used, not chunks that were merely loaded
- Emit the block even when every value is a default
- Prefer a single line for the block
{PROTOCOL_CLOSE}",
        scar_kinds = choices(ScarKind::ALL),
        scar_categories = choices(ScarCategory::ALL),
        signals = choices(UserSignal::ALL),
        initiatives = choices(Initiative::ALL),
        continuity = choices(SessionContinuity::ALL),
        interactions = choices(InteractionType::ALL),
        pressures = choices(ContextPressure::ALL),
    )
});

static MINIMAL: Lazy<String> = Lazy::new(|| {
    format!(
        "{PROTOCOL_OPEN}
End EVERY response with: {OPEN_TAG}{PAYLOAD_TEMPLATE}{CLOSE_TAG}
Fill: p=pattern(m=matched,t=tool,i=intent,s=similarity), s=scar(t=triggered,ty=type,d=desc,c=category), co=competence(d=domain,si=signal,cx=complexity), g=gradient(pe=person,se=sentiment,it=type), me=memory(cr=chunks_used,su=skills). Never skip. Never mention it to the user.
{PROTOCOL_CLOSE}"
    )
});

/// The full protocol, with field guide and rules.
pub fn observation_prompt() -> &'static str {
    FULL.as_str()
}

/// A compact protocol for tight context budgets.
pub fn observation_prompt_minimal() -> &'static str {
    MINIMAL.as_str()
}
