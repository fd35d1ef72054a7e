//! System prompt assembly.
//!
//! Sections are concatenated in a fixed order with stable delimiters:
//! Identity → Instructions → Safety → Tools → Retrieved Context. Empty
//! sections are omitted. Whitespace is normalised exactly once (trim each
//! section, join with a blank line), so identical inputs always produce
//! byte-identical output.

use crate::memory::MemorySnippet;

/// Inputs to [`build_prompt`].
#[derive(Debug, Clone, Default)]
pub struct PromptParts<'a> {
    pub identity: &'a str,
    pub instructions: &'a str,
    pub safety: &'a str,
    /// Pre-rendered tool docs (see [`tool_docs_section`]).
    pub tool_docs: &'a str,
    /// Pre-rendered retrieved-memory block (see [`retrieved_context_section`]).
    pub retrieved_context: &'a str,
}

/// Build the system prompt. Pure: no clock, no randomness.
pub fn build_prompt(parts: &PromptParts<'_>) -> String {
    let sections: [(&str, &str); 5] = [
        ("Identity", parts.identity),
        ("Instructions", parts.instructions),
        ("Safety", parts.safety),
        ("Tools", parts.tool_docs),
        ("Retrieved Context", parts.retrieved_context),
    ];

    sections
        .iter()
        .filter_map(|(title, content)| {
            let content = content.trim();
            if content.is_empty() {
                None
            } else {
                Some(format!("## {title}\n\n{content}"))
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Render the tool docs section: one `name: description` line per tool,
/// in the order given.
pub fn tool_docs_section(tools: &[(String, String)]) -> String {
    tools
        .iter()
        .map(|(name, description)| format!("{name}: {description}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render retrieved long-term memories, most similar first.
pub fn retrieved_context_section(snippets: &[MemorySnippet]) -> String {
    snippets
        .iter()
        .map(|s| format!("- [{}] {}", s.category, s.content))
        .collect::<Vec<_>>()
        .join("\n")
}

// ─── Tests ───────────────────────────────────────────────────────────────────
