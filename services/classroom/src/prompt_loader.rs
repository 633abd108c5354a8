use anyhow::{Context, Result, bail};
use classroom_core::persona::{SHARED_TEMPLATE_KEY, persona_prompt, render_persona, select_template};
use classroom_core::subject::Subject;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// The persona instructions for `subject`.
///
/// With a directory, `<subject id>.md` overrides the built-in template and a
/// shared `persona.md` applies to every subject without its own file. Other
/// files in the directory are never read.
pub fn persona_for(subject: &Subject, dir_path: Option<&Path>) -> Result<String> {
    let Some(dir_path) = dir_path else {
        return Ok(persona_prompt(subject));
    };
    if !dir_path.is_dir() {
        bail!("Persona directory not found: {}", dir_path.display());
    }

    let mut templates = HashMap::new();
    for key in [subject.id, SHARED_TEMPLATE_KEY] {
        let path = dir_path.join(format!("{key}.md"));
        if !path.is_file() {
            continue;
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read persona template: {}", path.display()))?;
        tracing::info!(template = %path.display(), "Using persona template");
        templates.insert(key.to_string(), content);
    }

    Ok(render_persona(select_template(&templates, subject), subject))
}
