//! System prompt composition.
//!
//! Pure string assembly: the base persona prompt for the selected model,
//! plus — only on search-triggered turns — a directive block telling the
//! model how to present search results. No state, no I/O.

use crate::config::REASONING_CHAT_MODEL;

const BASE_PROMPT: &str = "You are a friendly assistant! Keep your responses concise and helpful.";

const ARTIFACTS_PROMPT: &str = "When asked to write code or documents, use the document tools \
to create an artifact the user can edit, rather than inlining large blocks into the chat. \
Use createDocument for substantial content and updateDocument to revise an existing artifact.";

/// Appended when the turn was triggered with the `/web ` prefix.
const SEARCH_DIRECTIVES: &str = "\n\nThe user has requested web search information. Use the webSearch tool to find current information on the web. IMPORTANT INSTRUCTIONS:\n\n\
1. ALWAYS begin your response by showing what you searched for: \"I searched the web for: [query]\"\n\
2. If the search returns an error or configuration issue, you MUST display the exact error message to the user. Do not hide errors.\n\
3. Display all search results in a structured format, including titles, snippets, and URLs.\n\
4. Format each result like this:\n\
   ## [Title]\n\
   [Snippet]\n\
   Source: [URL]\n\n\
5. After showing all results, provide a summary of the information found.\n\
6. Always cite your sources by including the URLs from the search results.\n\
7. Do not make up information that is not in the search results.";

/// Prompt for drafting a code artifact.
pub const CODE_PROMPT: &str = "You are a code generator that creates self-contained, executable \
code snippets. Write complete, runnable code with no placeholders. Prefer standard-library \
solutions and include brief comments where the intent is not obvious. Return only the code.";

/// Prompt for drafting a text artifact.
pub const TEXT_PROMPT: &str = "Write about the given topic. Markdown is supported. Use headings \
wherever appropriate.";

/// Prompt for generating a chat title from the first user message.
pub const TITLE_PROMPT: &str = "Generate a short title (at most 80 characters) summarizing the \
user's message. Return the title only: no quotes, no colons, no trailing punctuation.";

/// Prompt for producing writing suggestions for a document.
pub const SUGGESTIONS_PROMPT: &str = "You are a writing assistant. Given a document, suggest \
improvements. Respond with a JSON array of objects with fields originalSentence, \
suggestedSentence, and description. At most five suggestions.";

/// Build the system prompt for a document update against its current content.
pub fn update_document_prompt(current_content: &str, kind: &str) -> String {
    match kind {
        "code" => format!(
            "Improve the following code based on the given description. Return only the code.\n\n{current_content}"
        ),
        _ => format!(
            "Improve the following document based on the given description.\n\n{current_content}"
        ),
    }
}

/// The effective system prompt for a turn.
///
/// The base prompt is returned unchanged when search was not triggered; the
/// reasoning model gets the plain persona (it exposes no tools, so the
/// artifact guidance would be noise).
pub fn compose_prompt(model_id: &str, search_triggered: bool) -> String {
    let base = if model_id == REASONING_CHAT_MODEL {
        BASE_PROMPT.to_string()
    } else {
        format!("{BASE_PROMPT}\n\n{ARTIFACTS_PROMPT}")
    };

    if search_triggered {
        format!("{base}{SEARCH_DIRECTIVES}")
    } else {
        base
    }
}
