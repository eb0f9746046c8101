use std::sync::OnceLock;

use regex::Regex;

use crate::persona::Persona;

pub const FORMAL_STYLE: &str = "formal and professional";
pub const CASUAL_STYLE: &str = "casual and friendly";
const FORMAL_MARKER: &str = "professional and formal";
const CASUAL_MARKER: &str = "friendly and casual";
const CONCISE_SENTENCE: &str = " Keep your responses concise and to the point.";

struct Domain {
    triggers: &'static [&'static str],
    canonical: &'static str,
    tags: &'static [&'static str],
    sentence: &'static str,
}

const DOMAINS: &[Domain] = &[
    Domain {
        triggers: &["react"],
        canonical: "React",
        tags: &["React", "JSX", "React Hooks", "Component Design"],
        sentence: " You have deep expertise in React, including hooks, component design and state management.",
    },
    Domain {
        triggers: &["python"],
        canonical: "Python",
        tags: &["Python", "Django", "FastAPI", "Data Analysis"],
        sentence: " You are highly skilled in Python and its ecosystem, writing idiomatic, well-tested code.",
    },
    Domain {
        triggers: &["security", "secure"],
        canonical: "Security",
        tags: &["Security", "OWASP", "Threat Modeling", "Secure Coding"],
        sentence: " You always consider security implications and recommend secure coding practices.",
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Name,
    Description,
}

fn field_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?i)\b(?:change|update|set)\s+(?:the\s+)?(name|description)\s+(?:from\s+(?:"[^"]*"|'[^']*')\s+)?(?:to\s+|as\s+)?(?:"([^"]*)"|'([^']*)')"#,
        )
        .expect("static field pattern")
    })
}

/// A quote inside a captured value that is not flanked by word characters on
/// both sides closed the value with the wrong kind of quote. Apostrophes in
/// words like `Bob's` are fine.
fn has_stray_quote(value: &str) -> bool {
    let chars: Vec<char> = value.chars().collect();
    chars.iter().enumerate().any(|(i, c)| {
        if *c != '"' && *c != '\'' {
            return false;
        }
        let before = i.checked_sub(1).and_then(|j| chars.get(j)).map_or(false, |c| c.is_alphanumeric());
        let after = chars.get(i + 1).map_or(false, |c| c.is_alphanumeric());
        !(before && after)
    })
}

/// Result of applying one instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Modification {
    pub persona: Persona,
    /// Human-readable list of rules that fired, in table order.
    pub applied: Vec<String>,
}

impl Modification {
    pub fn changed(&self) -> bool {
        !self.applied.is_empty()
    }
}

/// Applies `instruction` to a copy of `persona`. A missing instruction or one
/// that matches nothing returns the persona unchanged.
pub fn apply(persona: &Persona, instruction: Option<&str>) -> Modification {
    let mut out = persona.clone();
    let mut applied = Vec::new();
    let Some(instruction) = instruction else {
        return Modification { persona: out, applied };
    };
    let lower = instruction.to_lowercase();

    for caps in field_pattern().captures_iter(instruction) {
        let field = match caps.get(1).map(|m| m.as_str().to_lowercase()) {
            Some(f) if f == "name" => Field::Name,
            Some(_) => Field::Description,
            None => continue,
        };
        let value = caps.get(2).or_else(|| caps.get(3)).map(|m| m.as_str()).unwrap_or("");
        if value.trim().is_empty() || has_stray_quote(value) {
            continue;
        }
        match field {
            Field::Name => {
                out.name = value.trim().to_string();
                applied.push(format!("name set to '{}'", out.name));
            }
            Field::Description => {
                out.description = value.trim().to_string();
                applied.push("description updated".to_string());
            }
        }
    }

    if lower.contains("formal") {
        out.communication_style = FORMAL_STYLE.to_string();
        if !out.system_prompt.contains(FORMAL_MARKER) {
            out.system_prompt = out.system_prompt.replacen("You are", &format!("You are a {}", FORMAL_MARKER), 1);
        }
        applied.push("formal tone".to_string());
    }
    if lower.contains("casual") {
        out.communication_style = CASUAL_STYLE.to_string();
        out.system_prompt = out.system_prompt.replace(FORMAL_MARKER, CASUAL_MARKER);
        applied.push("casual tone".to_string());
    }
    if lower.contains("concise") {
        if !out.communication_style.contains("concise") {
            out.communication_style = if out.communication_style.is_empty() {
                "concise".to_string()
            } else {
                format!("{}, concise", out.communication_style)
            };
        }
        if !out.system_prompt.contains(CONCISE_SENTENCE.trim()) {
            out.system_prompt.push_str(CONCISE_SENTENCE);
        }
        applied.push("concise responses".to_string());
    }

    for domain in DOMAINS {
        if !domain.triggers.iter().any(|t| lower.contains(t)) {
            continue;
        }
        if out.expertise.iter().any(|e| e.eq_ignore_ascii_case(domain.canonical)) {
            continue;
        }
        for tag in domain.tags {
            if !out.expertise.iter().any(|e| e == tag) {
                out.expertise.push(tag.to_string());
            }
        }
        out.system_prompt.push_str(domain.sentence);
        applied.push(format!("{} expertise added", domain.canonical));
    }

    Modification { persona: out, applied }
}
