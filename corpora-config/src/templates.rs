//! Built-in template texts used to fill empty slots

use corpora_core::types::profile::TemplateKind;

/// Answer-generation template. Placeholders: `{context}`, `{question}`,
/// `{history}`.
pub const RAG_QUERY: &str = "\
You are a careful assistant answering strictly from the provided context.

Context:
{context}

Conversation so far:
{history}

Question: {question}

Answer using only the context above. If the context does not contain \
the information needed, say so plainly instead of guessing.";

/// Follow-up question template. Placeholders: `{context}`, `{count}`.
pub const QUESTION_GENERATION: &str = "\
Given the following material, propose {count} distinct short questions \
it can answer. One question per line, no numbering.

{context}";

/// Podcast script template slot. The core never renders it; the slot
/// exists so the audio frontend finds it filled.
pub const PODCAST_GENERATION: &str = "\
Turn the following material into a two-host podcast script.

{context}";

/// The built-in text for a template slot
#[must_use]
pub const fn default_template(kind: TemplateKind) -> &'static str {
    match kind {
        TemplateKind::RagQuery => RAG_QUERY,
        TemplateKind::QuestionGeneration => QUESTION_GENERATION,
        TemplateKind::PodcastGeneration => PODCAST_GENERATION,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_slot_has_a_default() {
        for kind in TemplateKind::ALL {
            assert!(!default_template(kind).is_empty());
        }
    }

    #[test]
    fn rag_template_carries_required_placeholders() {
        assert!(RAG_QUERY.contains("{context}"));
        assert!(RAG_QUERY.contains("{question}"));
        assert!(RAG_QUERY.contains("{history}"));
    }
}
