//! Markdown code-fence stripping for generated code artifacts.
//!
//! Model output destined for an editable code surface frequently arrives
//! wrapped in markdown fences, and mid-stream chunks may carry only one
//! half of a fence pair. `strip_code_fences` is total and idempotent: it
//! never fails, never returns a fence marker, and calling it on already
//! clean content is a no-op beyond whitespace trimming.

use std::sync::OnceLock;

use regex::Regex;

const FENCE: &str = "```";

fn opening_fence() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // ``` with an optional language tag, consumed together with the
    // whitespace/newline that follows it.
    RE.get_or_init(|| Regex::new(r"^```[\w-]*[\s\n]+").expect("opening fence regex"))
}

fn closing_fence() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\s\n]*```[\s\n]*$").expect("closing fence regex"))
}

/// Strip markdown code-fence delimiters from `fragment`, preserving the
/// interior content (trimmed of incidental surrounding whitespace).
///
/// A complete fenced block loses both delimiters. A partial or malformed
/// fragment (a mid-stream chunk may carry only one half of the pair) loses
/// whatever opening/closing fence patterns match, and any bare markers left
/// after that are scrubbed. Clean content is returned trimmed.
pub fn strip_code_fences(fragment: &str) -> String {
    if fragment.contains(FENCE) {
        let cleaned = opening_fence().replace(fragment, "");
        let cleaned = closing_fence().replace(&cleaned, "");
        // Whatever survives the structured patterns is a malformed block;
        // scrub the bare markers so the editor never sees one.
        return cleaned.replace(FENCE, "").trim().to_string();
    }

    fragment.trim().to_string()
}
