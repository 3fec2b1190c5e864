//! Session export: a structured, read-only dump of one session.

use corpora_core::error::{Error, Result};
use corpora_core::types::conversation::{
    ConversationMessage, ConversationSession, ConversationSummary, MessageRole,
};
use serde::{Deserialize, Serialize};

/// Supported export renderings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// Machine-readable JSON
    Json,
    /// Human-readable Markdown
    Markdown,
}

/// Everything a session contains, in one dump
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionExport {
    /// The session row
    pub session: ConversationSession,
    /// All messages in ordinal order
    pub messages: Vec<ConversationMessage>,
    /// All summaries, superseded included
    pub summaries: Vec<ConversationSummary>,
}

impl SessionExport {
    /// Render in the requested format.
    ///
    /// # Errors
    ///
    /// `Error::Internal` when JSON serialization fails.
    pub fn render(&self, format: ExportFormat) -> Result<String> {
        match format {
            ExportFormat::Json => serde_json::to_string_pretty(self)
                .map_err(|e| Error::internal(format!("export serialization failed: {e}"))),
            ExportFormat::Markdown => Ok(self.to_markdown()),
        }
    }

    fn to_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("# {}\n\n", self.session.name));
        out.push_str(&format!(
            "- session: {}\n- collection: {}\n- status: {}\n- messages: {}\n\n",
            self.session.id,
            self.session.collection_id,
            self.session.status,
            self.session.message_count
        ));

        for summary in self.summaries.iter().filter(|s| !s.superseded) {
            out.push_str(&format!(
                "> Summary of messages {}-{}: {}\n\n",
                summary.first_ordinal, summary.last_ordinal, summary.text
            ));
        }

        for message in &self.messages {
            let speaker = match message.role {
                MessageRole::User => "User",
                MessageRole::Assistant => "Assistant",
                MessageRole::System => "System",
            };
            out.push_str(&format!(
                "## {} ({}) \n\n{}\n\n",
                speaker, message.ordinal, message.content
            ));
            if let Some(sources) = message.metadata.get("sources").and_then(|v| v.as_array()) {
                if !sources.is_empty() {
                    out.push_str("Sources:\n");
                    for source in sources {
                        let file = source
                            .get("filename")
                            .and_then(|v| v.as_str())
                            .unwrap_or("unknown");
                        let page = source
                            .get("page")
                            .and_then(serde_json::Value::as_u64)
                            .map(|p| format!(", page {p}"))
                            .unwrap_or_default();
                        out.push_str(&format!("- {file}{page}\n"));
                    }
                    out.push('\n');
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corpora_core::identity::{CollectionId, UserId};
    use corpora_core::types::conversation::{MessageKind, SessionSettings};

    fn export_fixture() -> SessionExport {
        let session = ConversationSession::new(
            UserId::new(),
            CollectionId::new(),
            SessionSettings::default(),
        );
        let user = ConversationMessage::new(
            session.id,
            1,
            MessageRole::User,
            MessageKind::Question,
            "What is a B-tree?",
            5,
        );
        let assistant = ConversationMessage::new(
            session.id,
            2,
            MessageRole::Assistant,
            MessageKind::Answer,
            "A B-tree is a balanced search tree.",
            9,
        )
        .with_metadata(
            "sources",
            serde_json::json!([{ "filename": "trees.txt", "page": 3 }]),
        );
        SessionExport {
            session,
            messages: vec![user, assistant],
            summaries: Vec::new(),
        }
    }

    #[test]
    fn json_round_trips_the_message_sequence() {
        let export = export_fixture();
        let json = export.render(ExportFormat::Json).unwrap();
        let parsed: SessionExport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.messages.len(), export.messages.len());
        assert_eq!(parsed.messages[0].ordinal, 1);
        assert_eq!(parsed.messages[1].ordinal, 2);
        assert_eq!(
            parsed.messages[1].metadata.get("sources"),
            export.messages[1].metadata.get("sources")
        );
    }

    #[test]
    fn markdown_lists_sources() {
        let export = export_fixture();
        let markdown = export.render(ExportFormat::Markdown).unwrap();
        assert!(markdown.contains("## User (1)"));
        assert!(markdown.contains("trees.txt, page 3"));
    }
}
