//! Agent response directives
//!
//! The LLM signals call-control intents inline in its response text with
//! self-closing tags. They are stripped before synthesis; the caller never
//! hears them.

use once_cell::sync::Lazy;
use regex::Regex;

static RE_HANGUP: Lazy<Regex> = Lazy::new(|| Regex::new(r"<hangup\s*/>").expect("static regex"));
static RE_FORWARD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<forward\s+to="([^"]+)"\s*/>"#).expect("static regex"));

/// Call-control intent extracted from a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Conversation is over; say goodbye and hang up
    Hangup,
    /// Connect the caller through to the named destination
    Forward(String),
}

/// Strip directive tags from `text`, returning the speakable remainder and
/// the extracted directive. Forward wins if both appear.
pub fn extract_directives(text: &str) -> (String, Option<Directive>) {
    let mut directive = None;

    if let Some(caps) = RE_FORWARD.captures(text) {
        directive = Some(Directive::Forward(caps[1].to_string()));
    } else if RE_HANGUP.is_match(text) {
        directive = Some(Directive::Hangup);
    }

    let stripped = RE_FORWARD.replace_all(text, "");
    let stripped = RE_HANGUP.replace_all(&stripped, "");

    (stripped.into_owned(), directive)
}
