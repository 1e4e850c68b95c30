//! Prompt rendering for the primary fan-out.

use std::fmt::Write as _;

use crate::context::GatheredContext;

/// Render the shared prompt: instructions first, then every context file
/// fenced under its path.
pub fn build_prompt(instructions: &str, context: &GatheredContext) -> String {
    let mut prompt = String::with_capacity(instructions.len() + context.stats.chars + 256);
    let _ = writeln!(prompt, "<instructions>\n{}\n</instructions>", instructions.trim());

    if context.files.is_empty() {
        return prompt;
    }

    prompt.push_str("\n<context>\n");
    for file in &context.files {
        let fence = fence_for(&file.content);
        let _ = writeln!(prompt, "<file>\n<path>{}</path>", file.path.display());
        let _ = writeln!(prompt, "{fence}{}", language_hint(&file.path));
        prompt.push_str(&file.content);
        if !file.content.ends_with('\n') {
            prompt.push('\n');
        }
        let _ = writeln!(prompt, "{fence}\n</file>");
    }
    prompt.push_str("</context>\n");
    prompt
}

/// A backtick fence longer than any run inside `content`.
fn fence_for(content: &str) -> String {
    let mut longest = 0;
    let mut run = 0;
    for c in content.chars() {
        if c == '`' {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }
    "`".repeat((longest + 1).max(3))
}

fn language_hint(path: &std::path::Path) -> &str {
    path.extension().and_then(|e| e.to_str()).unwrap_or("")
}
