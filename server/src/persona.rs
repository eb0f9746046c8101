use serde::{Deserialize, Serialize};

/// A named behavioral configuration for the assistant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Persona {
    pub id: String,
    pub name: String,
    pub description: String,
    pub system_prompt: String,
    #[serde(default)]
    pub traits: Vec<String>,
    #[serde(default)]
    pub communication_style: String,
    #[serde(default)]
    pub expertise: Vec<String>,
}

impl Persona {
    pub fn new(id: impl Into<String>, name: impl Into<String>, description: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            system_prompt: system_prompt.into(),
            traits: Vec::new(),
            communication_style: String::new(),
            expertise: Vec::new(),
        }
    }

    pub fn with_traits(mut self, traits: &[&str]) -> Self {
        self.traits = traits.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.communication_style = style.into();
        self
    }

    pub fn with_expertise(mut self, expertise: &[&str]) -> Self {
        self.expertise = expertise.iter().map(|s| s.to_string()).collect();
        self
    }
}

/// Appends `items` to `out`, skipping entries already present.
pub(crate) fn union_into(out: &mut Vec<String>, items: &[String]) {
    for item in items {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
}

/// Personas written on first start or when the stored state cannot be read.
pub fn builtin_personas() -> Vec<Persona> {
    vec![
        Persona::new(
            "default",
            "General Assistant",
            "A helpful, balanced assistant for everyday questions and tasks",
            "You are a helpful assistant. Answer clearly and accurately, ask for clarification when a request is ambiguous, and adapt the level of detail to the question.",
        )
        .with_traits(&["helpful", "balanced", "clear"])
        .with_style("friendly and clear")
        .with_expertise(&["general knowledge", "problem solving"]),
        Persona::new(
            "technical-expert",
            "Technical Expert",
            "Senior software engineer focused on code quality, debugging and system design",
            "You are a senior software engineer. Give precise technical answers, show working code, explain trade-offs and point out bugs, edge cases and security issues.",
        )
        .with_traits(&["analytical", "precise", "thorough"])
        .with_style("technical and detailed")
        .with_expertise(&["programming", "debugging", "software architecture", "code review", "devops"]),
        Persona::new(
            "creative-writer",
            "Creative Writer",
            "Imaginative writer for stories, copy and brainstorming",
            "You are a creative writer. Use vivid language, offer several original ideas, and shape tone and structure to the audience.",
        )
        .with_traits(&["imaginative", "expressive", "playful"])
        .with_style("creative and engaging")
        .with_expertise(&["storytelling", "copywriting", "content creation", "brainstorming"]),
        Persona::new(
            "educator",
            "Patient Educator",
            "Teacher who explains concepts step by step for learners of any level",
            "You are a patient teacher. Break concepts into small steps, use examples and analogies, and check understanding before moving on.",
        )
        .with_traits(&["patient", "encouraging", "structured"])
        .with_style("educational and supportive")
        .with_expertise(&["teaching", "explanations", "curriculum design", "tutoring"]),
        Persona::new(
            "business-analyst",
            "Business Analyst",
            "Strategic analyst for markets, planning and business decisions",
            "You are a business analyst. Frame problems in terms of goals, metrics and risks, and give structured, actionable recommendations.",
        )
        .with_traits(&["strategic", "pragmatic", "data-driven"])
        .with_style("business professional")
        .with_expertise(&["business strategy", "market analysis", "financial planning", "project management"]),
    ]
}
