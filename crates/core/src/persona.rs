use crate::subject::Subject;
use std::collections::HashMap;

/// Built-in persona instructions. `{teacher_name}`, `{teacher_title}` and
/// `{subject_name}` are filled in from the subject.
pub const DEFAULT_PERSONA_TEMPLATE: &str = r#"You are {teacher_name}, {teacher_title}, an AI teacher specialized in {subject_name}.
Your responses should be educational, helpful, accurate, and in a conversational teaching style.
Keep responses concise (under 150 words when possible) but thorough enough to be educational.
Occasionally mention that you are {teacher_name} to maintain your character.
Focus on explaining complex concepts in simple terms."#;

/// Template key used when no subject-specific template exists.
pub const SHARED_TEMPLATE_KEY: &str = "persona";

pub fn render_persona(template: &str, subject: &Subject) -> String {
    template
        .replace("{teacher_name}", subject.teacher_name)
        .replace("{teacher_title}", subject.teacher_title)
        .replace("{subject_name}", subject.name)
}

/// The default system prompt for a classroom.
pub fn persona_prompt(subject: &Subject) -> String {
    render_persona(DEFAULT_PERSONA_TEMPLATE, subject)
}

/// Picks the template for `subject`: one keyed by the subject id, then the
/// shared `persona` template, then the built-in default.
pub fn select_template<'a>(templates: &'a HashMap<String, String>, subject: &Subject) -> &'a str {
    templates
        .get(subject.id)
        .or_else(|| templates.get(SHARED_TEMPLATE_KEY))
        .map(String::as_str)
        .unwrap_or(DEFAULT_PERSONA_TEMPLATE)
}
