//! Prompt templates and content budgeting for the model-backed phases.

/// System instruction for categorization requests.
///
/// The contract with the model is strict: a single JSON object with exactly
/// these three keys, nothing else. The parser in `categorize` enforces it.
pub(crate) const CATEGORIZE_SYSTEM: &str = "\
You are a precise librarian for a technical knowledge base. \
Respond with a single JSON object containing exactly three keys: \
\"main_category\", \"sub_category\", and \"item_name\". \
Categories are short topic labels (e.g. \"software engineering\", \"async programming\"). \
The item name is a concise title for this specific post. \
Do not include any text outside the JSON object.";

/// System instruction for kb item generation.
pub(crate) const KB_ITEM_SYSTEM: &str = "\
You are a technical writer. Turn the given social media post into a \
self-contained knowledge base article in Markdown. Start with a level-1 \
heading, explain the core idea, and preserve any code snippets verbatim. \
Do not invent facts that are not in the source material.";

/// System instruction for sub-category synthesis.
pub(crate) const SYNTHESIS_SYSTEM: &str = "\
You are a technical editor. Write a consolidated Markdown overview of the \
given knowledge base articles, which all belong to one sub-category. \
Identify the common themes, contrast differing advice, and link the \
articles by their names. Start with a level-1 heading.";

/// Prompt sent with each image for media interpretation.
pub(crate) const MEDIA_PROMPT: &str = "\
Describe this image from a social media post about technology. Focus on \
text, code, diagrams, and charts; transcribe short text verbatim. \
Answer in one or two sentences.";

/// Build the categorization prompt from post text and media descriptions.
pub(crate) fn categorization_prompt(
    content: &str,
    media_descriptions: &[&str],
    max_chars: usize,
) -> String {
    let mut prompt = String::from("Categorize the following social media post.\n\nPost text:\n");
    prompt.push_str(&truncate_content(content, max_chars));
    if !media_descriptions.is_empty() {
        prompt.push_str("\n\nAttached media:\n");
        for (idx, description) in media_descriptions.iter().enumerate() {
            prompt.push_str(&format!("{}. {description}\n", idx + 1));
        }
    }
    prompt
}

/// Build the kb item generation prompt.
pub(crate) fn kb_item_prompt(
    content: &str,
    media_descriptions: &[&str],
    main_category: &str,
    sub_category: &str,
    max_chars: usize,
) -> String {
    let mut prompt = format!(
        "Write a knowledge base article for the category \"{main_category} / {sub_category}\" \
         from this post.\n\nPost text:\n"
    );
    prompt.push_str(&truncate_content(content, max_chars));
    if !media_descriptions.is_empty() {
        prompt.push_str("\n\nAttached media:\n");
        for (idx, description) in media_descriptions.iter().enumerate() {
            prompt.push_str(&format!("{}. {description}\n", idx + 1));
        }
    }
    prompt
}

/// Build the synthesis prompt from a group's articles.
pub(crate) fn synthesis_prompt(
    main_category: &str,
    sub_category: &str,
    docs: &[(String, String)],
    max_chars_per_doc: usize,
) -> String {
    let mut prompt = format!(
        "Write a consolidated overview of the \"{main_category} / {sub_category}\" \
         sub-category from these {} articles.\n",
        docs.len()
    );
    for (name, content) in docs {
        prompt.push_str(&format!(
            "\n--- Article: {name} ---\n{}\n",
            truncate_content(content, max_chars_per_doc)
        ));
    }
    prompt
}

/// Truncate content to approximately `max_chars` characters.
pub(crate) fn truncate_content(content: &str, max_chars: usize) -> String {
    if content.len() <= max_chars {
        content.to_string()
    } else {
        let truncated: String = content.chars().take(max_chars).collect();
        format!("{truncated}\n\n[... content truncated for model context window ...]")
    }
}
