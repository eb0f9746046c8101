use serde::Serialize;

use crate::persona::Persona;

pub const EXPERTISE_POINTS: u32 = 10;
pub const DESCRIPTION_POINTS: u32 = 5;
pub const STYLE_POINTS: u32 = 3;
pub const TRAIT_POINTS: u32 = 2;
pub const MAX_SUGGESTIONS: usize = 3;

/// Communication-style category name and the query words that call for it.
pub const STYLE_CATEGORIES: &[(&str, &[&str])] = &[
    ("technical", &["code", "debug", "programming", "software", "api", "bug", "error", "technical"]),
    ("creative", &["write", "story", "creative", "design", "content", "art"]),
    ("educational", &["learn", "explain", "teach", "understand", "tutorial", "lesson"]),
    ("business", &["business", "strategy", "market", "analysis", "plan", "revenue"]),
    ("concise", &["quick", "brief", "short", "summary", "tldr"]),
];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub persona_id: String,
    pub persona_name: String,
    pub raw_score: u32,
    /// In (0, 1]; the top entry is exactly 1.0.
    pub confidence: f64,
    pub reasoning: String,
}

pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace().map(|w| w.to_lowercase()).collect()
}

fn overlaps(a: &str, b: &str) -> bool {
    !a.is_empty() && !b.is_empty() && (a.contains(b) || b.contains(a))
}

fn matches_any(value: &str, tokens: &[String]) -> bool {
    let value = value.to_lowercase();
    tokens.iter().any(|t| overlaps(&value, t))
}

/// Raw score and the reasoning fragments for one persona.
pub fn score_persona(persona: &Persona, tokens: &[String]) -> (u32, Vec<String>) {
    let mut score = 0;
    let mut reasons = Vec::new();

    let expertise: Vec<&str> = persona.expertise.iter().filter(|e| matches_any(e, tokens)).map(String::as_str).collect();
    if !expertise.is_empty() {
        score += EXPERTISE_POINTS * expertise.len() as u32;
        reasons.push(format!("expertise match: {}", expertise.join(", ")));
    }

    if persona.description.split_whitespace().any(|w| matches_any(w, tokens)) {
        score += DESCRIPTION_POINTS;
        reasons.push("description relevance".to_string());
    }

    let style = persona.communication_style.to_lowercase();
    for (category, triggers) in STYLE_CATEGORIES {
        if style.contains(category) && triggers.iter().any(|t| tokens.iter().any(|tok| tok == t)) {
            score += STYLE_POINTS;
            reasons.push(format!("{} communication style", category));
        }
    }

    let traits: Vec<&str> = persona.traits.iter().filter(|t| matches_any(t, tokens)).map(String::as_str).collect();
    if !traits.is_empty() {
        score += TRAIT_POINTS * traits.len() as u32;
        reasons.push(format!("trait match: {}", traits.join(", ")));
    }

    (score, reasons)
}

/// Ranks `personas` against `query`, best first, at most [`MAX_SUGGESTIONS`].
pub fn rank<'a>(personas: impl IntoIterator<Item = &'a Persona>, query: &str) -> Vec<Suggestion> {
    let tokens = tokenize(query);
    if tokens.is_empty() {
        return Vec::new();
    }
    let mut scored: Vec<(&Persona, u32, Vec<String>)> = personas
        .into_iter()
        .filter_map(|p| {
            let (score, reasons) = score_persona(p, &tokens);
            (score > 0).then_some((p, score, reasons))
        })
        .collect();
    // sort_by is stable: equal scores keep iteration order.
    scored.sort_by(|a, b| b.1.cmp(&a.1));
    scored.truncate(MAX_SUGGESTIONS);

    let top = scored.first().map(|s| s.1).unwrap_or(1) as f64;
    scored
        .into_iter()
        .map(|(p, score, reasons)| Suggestion {
            persona_id: p.id.clone(),
            persona_name: p.name.clone(),
            raw_score: score,
            confidence: score as f64 / top,
            reasoning: reasons.join("; "),
        })
        .collect()
}
