use serde_json::Value as JsonValue;

use crate::error::{PersonaError, Result};
use crate::persona::{union_into, Persona};

struct Archetype {
    triggers: &'static [&'static str],
    title: &'static str,
    style: &'static str,
    traits: &'static [&'static str],
    expertise: &'static [&'static str],
    focus: &'static str,
}

const ARCHETYPES: &[Archetype] = &[
    Archetype {
        triggers: &["code", "program", "develop", "software", "engineer"],
        title: "Technical Specialist",
        style: "technical",
        traits: &["analytical", "precise"],
        expertise: &["programming", "debugging", "software design"],
        focus: "Give precise, working technical solutions and explain trade-offs.",
    },
    Archetype {
        triggers: &["writ", "story", "creative", "poet", "novel"],
        title: "Creative Writer",
        style: "creative",
        traits: &["imaginative", "expressive"],
        expertise: &["creative writing", "storytelling"],
        focus: "Use vivid language and offer original ideas.",
    },
    Archetype {
        triggers: &["teach", "tutor", "explain", "learn", "mentor"],
        title: "Patient Educator",
        style: "educational",
        traits: &["patient", "encouraging"],
        expertise: &["teaching", "explanations"],
        focus: "Explain step by step and check understanding.",
    },
    Archetype {
        triggers: &["business", "market", "strategy", "startup", "sales"],
        title: "Business Advisor",
        style: "business",
        traits: &["strategic", "pragmatic"],
        expertise: &["business strategy", "market analysis"],
        focus: "Frame advice around goals, metrics and risks.",
    },
    Archetype {
        triggers: &["data", "analy", "statistic", "research"],
        title: "Data Analyst",
        style: "analytical",
        traits: &["methodical", "evidence-driven"],
        expertise: &["data analysis", "statistics", "research"],
        focus: "Ground conclusions in evidence and state uncertainty.",
    },
];

/// Lowercase kebab-case slug.
pub fn slugify(text: &str) -> String {
    let mut out = String::new();
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_end_matches('-').to_string()
}

/// Builds a persona from `description`. The id is `id` when given, otherwise
/// a slug of the derived name (uniqueness is the caller's concern).
pub fn generate(description: &str, id: Option<&str>) -> Result<Persona> {
    let description = description.trim();
    if description.is_empty() {
        return Err(PersonaError::invalid("description must not be empty"));
    }
    let lower = description.to_lowercase();
    let matched: Vec<&Archetype> = ARCHETYPES.iter().filter(|a| a.triggers.iter().any(|t| lower.contains(t))).collect();

    let name = matched.first().map(|a| a.title).unwrap_or("Custom Assistant").to_string();
    let mut traits = Vec::new();
    let mut expertise = Vec::new();
    let mut styles: Vec<&str> = Vec::new();
    for a in &matched {
        union_into(&mut traits, &a.traits.iter().map(|s| s.to_string()).collect::<Vec<_>>());
        union_into(&mut expertise, &a.expertise.iter().map(|s| s.to_string()).collect::<Vec<_>>());
        styles.push(a.style);
    }
    if traits.is_empty() {
        traits = vec!["helpful".to_string(), "adaptable".to_string()];
    }
    if lower.contains("formal") || lower.contains("professional") {
        styles.push("formal");
    } else if lower.contains("casual") || lower.contains("friendly") {
        styles.push("casual");
    }
    let communication_style = if styles.is_empty() { "balanced".to_string() } else { styles.join(" and ") };

    let mut system_prompt = format!("You are {}. {}", name, description);
    if !system_prompt.ends_with('.') {
        system_prompt.push('.');
    }
    for a in &matched {
        system_prompt.push(' ');
        system_prompt.push_str(a.focus);
    }

    let id = match id {
        Some(id) if !id.trim().is_empty() => id.trim().to_string(),
        _ => slugify(&name),
    };
    Ok(Persona { id, name, description: description.to_string(), system_prompt, traits, communication_style, expertise })
}

fn required_str(obj: &serde_json::Map<String, JsonValue>, key: &str) -> Result<String> {
    match obj.get(key).and_then(|v| v.as_str()) {
        Some(s) if !s.trim().is_empty() => Ok(s.to_string()),
        _ => Err(PersonaError::invalid(format!("persona JSON is missing required field '{}'", key))),
    }
}

fn string_list(obj: &serde_json::Map<String, JsonValue>, key: &str) -> Vec<String> {
    obj.get(key)
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|x| x.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

/// Parses persona JSON produced by an assistant. Accepts camelCase or
/// snake_case for the prompt and style fields.
pub fn parse_ai_persona(text: &str) -> Result<Persona> {
    let value: JsonValue = serde_json::from_str(text.trim()).map_err(|e| PersonaError::invalid(format!("malformed persona JSON: {}", e)))?;
    let obj = value.as_object().ok_or_else(|| PersonaError::invalid("persona JSON must be an object"))?;
    let system_prompt = required_str(obj, "systemPrompt").or_else(|_| required_str(obj, "system_prompt"))?;
    let communication_style = obj
        .get("communicationStyle")
        .or_else(|| obj.get("communication_style"))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    Ok(Persona {
        id: required_str(obj, "id")?,
        name: required_str(obj, "name")?,
        description: required_str(obj, "description")?,
        system_prompt,
        traits: string_list(obj, "traits"),
        communication_style,
        expertise: string_list(obj, "expertise"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("Technical Specialist"), "technical-specialist");
        assert_eq!(slugify("  A -- B!! "), "a-b");
    }

    #[test]
    fn generates_from_matching_archetypes() {
        let p = generate("A formal mentor who can teach software engineering", None).unwrap();
        assert_eq!(p.name, "Technical Specialist");
        assert_eq!(p.id, "technical-specialist");
        assert!(p.expertise.contains(&"programming".to_string()));
        assert!(p.expertise.contains(&"teaching".to_string()));
        assert_eq!(p.communication_style, "technical and educational and formal");
        assert!(p.system_prompt.starts_with("You are Technical Specialist. A formal mentor"));
    }

    #[test]
    fn falls_back_to_custom_assistant() {
        let p = generate("someone to chat with about gardening", Some("gardener")).unwrap();
        assert_eq!(p.id, "gardener");
        assert_eq!(p.name, "Custom Assistant");
        assert_eq!(p.communication_style, "balanced");
        assert_eq!(p.traits, vec!["helpful", "adaptable"]);
    }

    #[test]
    fn empty_description_is_invalid() {
        assert!(matches!(generate("  ", None), Err(PersonaError::InvalidRequest(_))));
    }

    #[test]
    fn parses_ai_persona_json() {
        let p = parse_ai_persona(r#"{"id":"sec","name":"Sec","description":"Security reviewer","systemPrompt":"You are Sec.","expertise":["OWASP"],"traits":["careful"]}"#).unwrap();
        assert_eq!(p.expertise, vec!["OWASP"]);
        assert_eq!(p.communication_style, "");
    }

    #[test]
    fn ai_persona_errors_are_invalid_request() {
        for bad in [
            "{not json",
            "[1,2]",
            r#"{"id":"x","name":"X","description":"d"}"#,
            r#"{"id":"","name":"X","description":"d","systemPrompt":"p"}"#,
        ] {
            assert!(matches!(parse_ai_persona(bad), Err(PersonaError::InvalidRequest(_))), "{bad}");
        }
    }
}
