//! Memory-augmented prompt assembly and rule-based memory capture.

use companion_core::MemoryStore;
use regex::Regex;
use std::sync::OnceLock;

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "was", "you", "your", "with", "that", "this", "have", "has", "had",
    "what", "when", "where", "why", "how", "who", "can", "could", "would", "should", "will", "about",
];

/// Pulls up to `max_items / 2` preference memories plus memories matched by
/// lightweight query-term extraction from `text`, rendered as a flat bullet
/// list and truncated at `max_chars`. Empty string if nothing matched.
pub fn build_memory_context(store: &MemoryStore, text: &str, max_items: usize, max_chars: usize) -> String {
    let mut entries = Vec::new();

    if let Ok(preferences) = store.recall_by_category("preference", max_items / 2) {
        entries.extend(preferences);
    }

    for term in extract_query_terms(text, 4) {
        if let Ok(matches) = store.recall(&term, None, 2) {
            entries.extend(matches);
        }
    }

    entries.sort_by(|a, b| a.key.cmp(&b.key));
    entries.dedup_by(|a, b| a.key == b.key && a.category == b.category);
    entries.truncate(max_items);

    if entries.is_empty() {
        return String::new();
    }

    let mut rendered = String::from("Things I remember:\n");
    for entry in entries {
        rendered.push_str(&format!("- {}: {}\n", entry.key, entry.value));
    }
    rendered.truncate(max_chars.min(rendered.len()));
    rendered
}

/// Extracts up to `limit` unique lowercase query terms matching
/// `[a-z][a-z0-9_'-]{2,}`, skipping a small stop-word list.
fn extract_query_terms(text: &str, limit: usize) -> Vec<String> {
    static WORD_RE: OnceLock<Regex> = OnceLock::new();
    let word_re = WORD_RE.get_or_init(|| Regex::new(r"[a-z][a-z0-9_'-]{2,}").unwrap());

    let lower = text.to_lowercase();
    let mut seen = std::collections::HashSet::new();
    let mut terms = Vec::new();

    for m in word_re.find_iter(&lower) {
        let word = m.as_str();
        if STOP_WORDS.contains(&word) || !seen.insert(word.to_string()) {
            continue;
        }
        terms.push(word.to_string());
        if terms.len() >= limit {
            break;
        }
    }
    terms
}

/// One fixed rule-based memory from a user message, stored at most once per
/// pattern match.
struct Captured {
    category: String,
    key: String,
    value: String,
    importance: f64,
}

fn clean_capture(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches(|c| c == '"' || c == '\'');
    let cut = trimmed.find(['.', ',', '!', '?', ';']).map(|i| &trimmed[..i]).unwrap_or(trimmed);
    cut.trim().to_string()
}

fn slugify(value: &str) -> String {
    value.to_lowercase().chars().map(|c| if c.is_alphanumeric() { c } else { '_' }).collect::<String>()
}

fn title_case(value: &str) -> String {
    value
        .split_whitespace()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Scans `user_text` against a small fixed regex family (name, preference,
/// allergy, workplace, occupation) and returns at most `max_new` captures.
fn extract_memories(user_text: &str, max_new: usize) -> Vec<Captured> {
    static NAME_RE: OnceLock<Regex> = OnceLock::new();
    static PREF_RE: OnceLock<Regex> = OnceLock::new();
    static ALLERGY_RE: OnceLock<Regex> = OnceLock::new();
    static WORKPLACE_RE: OnceLock<Regex> = OnceLock::new();
    static OCCUPATION_RE: OnceLock<Regex> = OnceLock::new();

    let name_re = NAME_RE.get_or_init(|| Regex::new(r"(?i)my name is ([a-z][a-z '-]{1,40})").unwrap());
    let pref_re = PREF_RE.get_or_init(|| Regex::new(r"(?i)i (?:like|love|prefer) ([a-z0-9 '-]{2,40})").unwrap());
    let allergy_re = ALLERGY_RE.get_or_init(|| Regex::new(r"(?i)i(?:'m| am) allergic to ([a-z0-9 '-]{2,40})").unwrap());
    let workplace_re = WORKPLACE_RE.get_or_init(|| Regex::new(r"(?i)i work(?:ed)? at ([a-z0-9 '-]{2,40})").unwrap());
    let occupation_re = OCCUPATION_RE.get_or_init(|| Regex::new(r"(?i)i work as (?:an? )?([a-z0-9 '-]{2,40})").unwrap());

    let mut captured = Vec::new();

    if let Some(c) = name_re.captures(user_text) {
        captured.push(Captured {
            category: "user".to_string(),
            key: "user_name".to_string(),
            value: title_case(&clean_capture(&c[1])),
            importance: 0.95,
        });
    }
    if let Some(c) = pref_re.captures(user_text) {
        let value = clean_capture(&c[1]);
        captured.push(Captured { category: "preference".to_string(), key: format!("pref_{}", slugify(&value)), value, importance: 0.9 });
    }
    if let Some(c) = allergy_re.captures(user_text) {
        let value = clean_capture(&c[1]);
        captured.push(Captured { category: "user".to_string(), key: format!("allergy_{}", slugify(&value)), value, importance: 0.95 });
    }
    if let Some(c) = workplace_re.captures(user_text) {
        captured.push(Captured { category: "user".to_string(), key: "workplace".to_string(), value: clean_capture(&c[1]), importance: 0.85 });
    }
    if let Some(c) = occupation_re.captures(user_text) {
        captured.push(Captured { category: "user".to_string(), key: "occupation".to_string(), value: clean_capture(&c[1]), importance: 0.85 });
    }

    captured.truncate(max_new);
    captured
}

/// Runs [`extract_memories`] and persists each capture via `store.remember`.
/// Failures to persist a single capture are logged and do not abort the scan.
pub fn capture_memories(store: &MemoryStore, user_text: &str, max_new_per_turn: usize) {
    for captured in extract_memories(user_text, max_new_per_turn) {
        if let Err(e) = store.remember(&captured.category, &captured.key, &captured.value, captured.importance) {
            tracing::warn!("failed to persist captured memory {}/{}: {e}", captured.category, captured.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_name_and_preference() {
        let captured = extract_memories("My name is Bob and I like sushi.", 5);
        assert!(captured.iter().any(|c| c.category == "user" && c.key == "user_name" && c.value == "Bob"));
        assert!(captured.iter().any(|c| c.key == "pref_sushi" && c.value == "sushi"));
    }

    #[test]
    fn captures_allergy_and_workplace() {
        let captured = extract_memories("I'm allergic to peanuts and I work at Acme Corp", 5);
        assert!(captured.iter().any(|c| c.key == "allergy_peanuts"));
        assert!(captured.iter().any(|c| c.key == "workplace" && c.value == "Acme Corp"));
    }

    #[test]
    fn caps_at_max_new_per_turn() {
        let captured = extract_memories("My name is Ann. I like tea. I'm allergic to dust. I work at Foo. I work as a baker.", 2);
        assert_eq!(captured.len(), 2);
    }

    #[test]
    fn query_term_extraction_skips_stop_words_and_short_tokens() {
        let terms = extract_query_terms("what is the gmail draft about", 4);
        assert!(terms.contains(&"gmail".to_string()));
        assert!(!terms.contains(&"the".to_string()));
    }

    #[test]
    fn surfaces_memory_matched_by_query_term_not_just_preferences() {
        let store = MemoryStore::open(":memory:").unwrap();
        store.remember("user", "user_name", "Alice", 0.95).unwrap();

        // None of these words is "user", so the old category-based lookup
        // would never find this memory; a substring match on "alice" must.
        let context = build_memory_context(&store, "did alice call while I was out", 6, 600);
        assert!(context.contains("user_name: Alice"));
    }
}
