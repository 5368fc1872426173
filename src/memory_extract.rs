use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

/// Memory key under which extracted profile details are stored; the detail
/// kind (`name`, `email`, ...) is the memory type.
pub const PROFILE_MEMORY_KEY: &str = "profile";

fn patterns() -> &'static [(&'static str, Regex)] {
    static PATTERNS: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            ("name", r"(?i)my name is ([A-Za-z\s]+)"),
            (
                "email",
                r"(?i)my email (?:address )?is ([a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,})",
            ),
            ("phone", r"(?i)my (?:phone|mobile) (?:number )?is ([0-9+\s-]{10,15})"),
            (
                "location",
                r"(?i)(?:i live in|i am from|i reside in) ([A-Za-z\s,]+)",
            ),
            (
                "occupation",
                r"(?i)(?:i work as|i am a|my job is) ([A-Za-z\s]+)",
            ),
        ]
        .into_iter()
        .filter_map(|(kind, pattern)| Regex::new(pattern).ok().map(|re| (kind, re)))
        .collect()
    })
}

/// Picks simple self-descriptions ("my name is ...") out of a message.
pub fn extract_personal_details(text: &str) -> BTreeMap<&'static str, String> {
    patterns()
        .iter()
        .filter_map(|(kind, re)| {
            let value = re.captures(text)?.get(1)?.as_str().trim().to_string();
            (!value.is_empty()).then_some((*kind, value))
        })
        .collect()
}
