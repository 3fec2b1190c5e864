//! Lexical helpers shared by the context manager and suggestion service

use std::collections::HashSet;
use std::sync::LazyLock;

static STOPWORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be",
        "because", "been", "before", "between", "both", "but", "by", "can", "could", "did", "do",
        "does", "for", "from", "had", "has", "have", "how", "if", "in", "into", "is", "it", "its",
        "just", "like", "main", "make", "me", "more", "most", "my", "no", "not", "of", "on", "or",
        "our", "out", "over", "please", "show", "so", "some", "such", "tell", "than", "that",
        "the", "their", "them", "then", "there", "these", "they", "this", "those", "to", "under",
        "up", "us", "was", "we", "were", "what", "when", "where", "which", "who", "why", "will",
        "with", "would", "you", "your",
    ]
    .into_iter()
    .collect()
});

/// Whether a lowercased token is a stopword
#[must_use]
pub fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(token)
}

/// Rough token estimate (~4 characters per token)
#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Extract candidate entities from a message: multi-word runs of
/// content words, plus multi-word capitalized runs. Phrases keep their
/// original casing.
#[must_use]
pub fn extract_entities(text: &str) -> Vec<String> {
    fn flush_run(run: &mut Vec<String>, entities: &mut Vec<String>, seen: &mut HashSet<String>) {
        if run.len() >= 2 {
            let phrase = run.join(" ");
            let key = phrase.to_lowercase();
            if seen.insert(key) {
                entities.push(phrase);
            }
        }
        run.clear();
    }

    fn flush_capitalized(run: &mut Vec<String>, entities: &mut Vec<String>, seen: &mut HashSet<String>) {
        // leading stopwords ("The European Central Bank") are not part
        // of the name
        while run
            .first()
            .is_some_and(|t| is_stopword(&t.to_lowercase()))
        {
            run.remove(0);
        }
        flush_run(run, entities, seen);
    }

    let mut entities = Vec::new();
    let mut seen = HashSet::new();

    for sentence in text.split(['.', '!', '?', '\n', ',', ';', ':']) {
        // Proper nouns: consecutive capitalized words
        let mut capitalized: Vec<String> = Vec::new();
        // Noun phrases: consecutive content words
        let mut run: Vec<String> = Vec::new();

        for raw in sentence.split_whitespace() {
            let token: String = raw
                .chars()
                .filter(|c| c.is_alphanumeric() || *c == '-')
                .collect();

            if token.len() >= 2 && token.chars().next().is_some_and(char::is_uppercase) {
                capitalized.push(token.clone());
            } else {
                flush_capitalized(&mut capitalized, &mut entities, &mut seen);
            }

            if token.len() < 3 || is_stopword(&token.to_lowercase()) {
                flush_run(&mut run, &mut entities, &mut seen);
            } else {
                run.push(token);
            }
        }
        flush_capitalized(&mut capitalized, &mut entities, &mut seen);
        flush_run(&mut run, &mut entities, &mut seen);
    }
    entities
}

/// Levenshtein edit distance
#[must_use]
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

/// Normalized edit similarity in 0..=1 (1 = identical)
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn edit_similarity(a: &str, b: &str) -> f32 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f32 / longest as f32
}

/// Cosine similarity between two vectors
#[must_use]
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noun_phrases_are_extracted() {
        let entities = extract_entities("Tell me about convolutional neural networks.");
        assert_eq!(entities, vec!["convolutional neural networks"]);
    }

    #[test]
    fn capitalized_runs_are_extracted() {
        let entities = extract_entities("The European Central Bank raised rates.");
        assert!(entities.contains(&"European Central Bank".to_string()));
    }

    #[test]
    fn stopword_runs_are_ignored(){
        assert!(extract_entities("what is it about then").is_empty());
    }

    #[test]
    fn entities_deduplicate_case_insensitively() {
        let entities =
            extract_entities("Neural networks are neat. NEURAL NETWORKS are everywhere.");
        assert_eq!(entities.len(), 1);
    }

    #[test]
    fn levenshtein_basics() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
    }

    #[test]
    fn edit_similarity_is_normalized() {
        assert!((edit_similarity("same", "same") - 1.0).abs() < f32::EPSILON);
        assert!(edit_similarity("abc", "xyz") < 0.2);
    }

    #[test]
    fn cosine_bounds() {
        assert!((cosine(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine(&[], &[]), 0.0);
    }
}
