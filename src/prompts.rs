//! Prompts for the two hosted-model calls.
//!
//! Callers can override the identification instruction via
//! [`crate::config::ExtractionConfig::section_prompt`]; the extraction prompt
//! is always derived from the active [`ExtractionSchema`].

use crate::schema::ExtractionSchema;

/// Default instruction for locating the Planned Machinery Survey pages.
pub const DEFAULT_SECTION_PROMPT: &str = r#"You are an intelligent assistant analyzing a maritime survey document. Each page image has a page number clearly marked in the top-right corner.

Your task is to identify ALL pages that are part of the 'Planned Machinery Survey' section, which is related to the Continuous Machinery Survey (CMS).

Look for the following indicators:
- The exact heading: 'NK-SHIPS: Survey Status - Planned Machinery Survey'
- Text that explicitly mentions 'System applied: CMS: Continuous Machinery Survey'
- Tables containing machinery survey data, often with survey codes (e.g., 311001, 313001).
- Pages that are clear continuations of the planned machinery survey tables from a previous page.

The planned machinery survey section can span multiple consecutive pages. Ensure you identify all pages belonging to this section."#;

/// Response contract appended to every identification instruction.
///
/// Kept separate from the section text so a custom `section_prompt` cannot
/// drop the format the parser expects.
pub const IDENTIFY_RESPONSE_FORMAT: &str = r#"Respond with ONLY a JSON object in the following format:
{
  "found": true/false,
  "page_numbers": [list of integer page numbers],
  "description": "A brief summary of your findings."
}

Use the page numbers stamped on the images. If no such pages are found, set "found" to false and provide an empty list for "page_numbers"."#;

/// System prompt for the structured-extraction call.
pub const EXTRACTION_SYSTEM_PROMPT: &str = "You are a meticulous data-extraction engine. \
You read one scanned report page and return its tabular content as a single JSON object. \
Output ONLY the JSON object: no markdown fences, no commentary.";

/// Full identification instruction: section description + response format.
pub fn identification_prompt(section: Option<&str>, total_pages: usize) -> String {
    format!(
        "{}\n\nThe document has {} pages, provided in order.\n\n{}",
        section.unwrap_or(DEFAULT_SECTION_PROMPT).trim_end(),
        total_pages,
        IDENTIFY_RESPONSE_FORMAT
    )
}

/// User-turn text for extracting one page according to `schema`.
pub fn extraction_prompt(schema: &ExtractionSchema, page_num: usize) -> String {
    let mut prompt = String::new();
    if !schema.description.trim().is_empty() {
        prompt.push_str(schema.description.trim());
        prompt.push_str("\n\n");
    }
    prompt.push_str(&format!(
        "This is page {page_num} of the report. Return a JSON object with exactly these \
top-level keys: {}.\n\
Follow this template; strings in the template describe the expected value. \
Every scalar value is a string, a number, or null. Use null (or an empty list) \
when the page has no data for a field; never omit a key.\n\n{}",
        schema
            .top_level_fields()
            .iter()
            .map(|f| format!("\"{f}\""))
            .collect::<Vec<_>>()
            .join(", "),
        schema.json_template()
    ));
    prompt
}
