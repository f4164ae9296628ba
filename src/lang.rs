//! Language detection and language-aware keyword extraction for the lexical
//! search leg.
//!
//! Korean extraction strips trailing particles from whitespace tokens and
//! keeps content words; English extraction drops stopwords and scores the
//! rest by length with a proper-noun bonus. Both cap the keyword count by
//! query length and both are deterministic.

use crate::models::Language;

/// Particles commonly attached to Korean content words, longest first so
/// compound particles strip before their suffixes.
const KOREAN_PARTICLES: &[&str] = &[
    "에서는", "에서", "으로", "이라는", "까지", "부터", "처럼", "보다", "한테", "에게", "과의",
    "와의", "은", "는", "이", "가", "을", "를", "의", "에", "와", "과", "도", "만", "로", "께",
];

const KOREAN_STOP_WORDS: &[&str] = &[
    "및", "또는", "그리고", "그러나", "하지만", "대해", "대한", "관련", "어떤", "무엇", "어떻게",
    "알려줘", "알려주세요", "주세요", "있는", "있나요", "합니까",
];

const ENGLISH_STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "he", "in", "is", "it",
    "its", "of", "on", "or", "that", "the", "to", "was", "will", "with", "this", "these", "they",
    "we", "you", "have", "had", "what", "when", "where", "who", "which", "why", "how", "show",
    "me", "tell", "about", "please", "can", "could", "do", "does",
];

fn is_hangul(c: char) -> bool {
    matches!(c, '\u{AC00}'..='\u{D7A3}' | '\u{1100}'..='\u{11FF}' | '\u{3130}'..='\u{318F}')
}

/// Detect the dominant script of a query. Returns `None` when neither
/// script clearly dominates so the caller can fall back to a model call.
pub fn detect_language(text: &str) -> Option<Language> {
    let hangul = text.chars().filter(|c| is_hangul(*c)).count();
    let latin = text.chars().filter(|c| c.is_ascii_alphabetic()).count();

    if hangul == 0 && latin == 0 {
        return None;
    }
    if hangul == 0 {
        return Some(Language::English);
    }
    if latin == 0 {
        return Some(Language::Korean);
    }
    // Mixed script: Korean particles and verb endings make even a few Hangul
    // tokens decisive, so a modest ratio tips the balance.
    let ratio = hangul as f32 / (hangul + latin) as f32;
    if ratio >= 0.25 {
        Some(Language::Korean)
    } else if ratio <= 0.10 {
        Some(Language::English)
    } else {
        None
    }
}

/// Hard fallback when both the heuristic and the model are unavailable:
/// any Hangul at all means Korean.
pub fn fallback_language(text: &str) -> Language {
    if text.chars().any(is_hangul) {
        Language::Korean
    } else {
        Language::English
    }
}

/// Keyword budget scales with query length: short queries keep the match
/// strict, long queries get more disjuncts.
fn optimal_keyword_count(text: &str) -> usize {
    let words = text.split_whitespace().count();
    if words <= 3 {
        2
    } else if words <= 6 {
        3
    } else {
        4
    }
}

pub fn extract_keywords(text: &str, language: Language) -> Vec<String> {
    match language {
        Language::Korean => extract_korean_keywords(text),
        Language::English => extract_english_keywords(text),
    }
}

fn strip_korean_particle(token: &str) -> &str {
    for particle in KOREAN_PARTICLES {
        if let Some(stem) = token.strip_suffix(particle) {
            // Only strip when a usable stem remains.
            if stem.chars().count() >= 2 {
                return stem;
            }
        }
    }
    token
}

fn extract_korean_keywords(text: &str) -> Vec<String> {
    let max_keywords = optimal_keyword_count(text);
    let mut keywords: Vec<String> = Vec::new();

    for raw in text.split(|c: char| c.is_whitespace() || c.is_ascii_punctuation()) {
        let token: String = raw.chars().filter(|c| c.is_alphanumeric()).collect();
        if token.chars().count() < 2 {
            continue;
        }
        let stem = if token.chars().any(is_hangul) {
            strip_korean_particle(&token).to_string()
        } else {
            token.to_lowercase()
        };
        if stem.chars().count() < 2 || KOREAN_STOP_WORDS.contains(&stem.as_str()) {
            continue;
        }
        if !keywords.contains(&stem) {
            keywords.push(stem);
        }
        if keywords.len() >= max_keywords {
            break;
        }
    }

    keywords
}

fn extract_english_keywords(text: &str) -> Vec<String> {
    let max_keywords = optimal_keyword_count(text);
    let mut candidates: Vec<(String, f32)> = Vec::new();

    for raw in text.split_whitespace() {
        let clean: String = raw.chars().filter(|c| c.is_alphanumeric()).collect();
        if clean.len() < 2 {
            continue;
        }
        let lower = clean.to_lowercase();
        if ENGLISH_STOP_WORDS.contains(&lower.as_str()) {
            continue;
        }
        // Capitalized mid-query words are likely proper nouns.
        let bonus = if raw.chars().next().is_some_and(|c| c.is_uppercase()) {
            1.5
        } else {
            1.0
        };
        let score = clean.len() as f32 * bonus;
        if !candidates.iter().any(|(k, _)| k == &lower) {
            candidates.push((lower, score));
        }
    }

    candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    candidates
        .into_iter()
        .take(max_keywords)
        .map(|(k, _)| k)
        .collect()
}

/// Build the boolean search expression the store's lexical leg evaluates.
/// Two or fewer keywords are all required; with three or more, the first
/// two stay conjoined and the rest widen the match.
pub fn build_search_expression(keywords: &[String]) -> Option<String> {
    match keywords.len() {
        0 => None,
        1 => Some(keywords[0].clone()),
        2 => Some(format!("{} AND {}", keywords[0], keywords[1])),
        _ => {
            let primary = format!("({} AND {})", keywords[0], keywords[1]);
            let optional = keywords[2..].join(" OR ");
            Some(format!("{primary} OR {optional}"))
        }
    }
}
