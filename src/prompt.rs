//! Prompt templates and context injection for chat answers
//!
//! Retrieved chunks are formatted into an attributed context block and framed
//! with the question; sessions with no linked documents fall through to a
//! general-knowledge prompt with no context block at all.

/// Default system prompt for document Q&A
pub const DOCUMENT_ASSISTANT_SYSTEM_PROMPT: &str = r#"You are a careful assistant that answers questions about the user's uploaded documents.

Rules:
- When context is provided, ground every claim in it and cite sources inline as [Source N]
- If the provided context does not contain the answer, respond: "I don't have enough information in the provided context to answer that."
- When no context is provided, answer from general knowledge and say that you are doing so
- Never invent document contents or citations
- Be concise and direct"#;

/// A retrieved chunk paired with the document it came from
#[derive(Debug, Clone)]
pub struct SourcePassage {
    pub filename: String,
    pub text: String,
}

/// Format passages for context injection with `[Source N: filename]` headers
pub fn format_context(passages: &[SourcePassage]) -> String {
    if passages.is_empty() {
        return "No relevant context found.".to_string();
    }

    passages
        .iter()
        .enumerate()
        .map(|(i, p)| format!("[Source {}: {}]\n{}\n", i + 1, p.filename, p.text))
        .collect::<Vec<_>>()
        .join("\n---\n")
}

/// Builder for a single chat-turn prompt
pub struct AnswerPrompt {
    system_prompt: String,
    passages: Option<Vec<SourcePassage>>,
    question: String,
}

impl AnswerPrompt {
    pub fn new() -> Self {
        Self {
            system_prompt: DOCUMENT_ASSISTANT_SYSTEM_PROMPT.to_string(),
            passages: None,
            question: String::new(),
        }
    }

    /// Set a custom system prompt
    pub fn with_system_prompt(mut self, prompt: &str) -> Self {
        self.system_prompt = prompt.to_string();
        self
    }

    /// Set the retrieved passages for context injection. An empty set still
    /// produces the context frame, with its no-results placeholder; skipping
    /// this call entirely sends the question alone.
    pub fn with_passages(mut self, passages: Vec<SourcePassage>) -> Self {
        self.passages = Some(passages);
        self
    }

    /// Set the user's question
    pub fn with_question(mut self, question: &str) -> Self {
        self.question = question.to_string();
        self
    }

    pub fn system(&self) -> &str {
        &self.system_prompt
    }

    /// Build the user message. With passages set the question is framed
    /// against the formatted context; without them the question goes out
    /// alone (general-knowledge mode).
    pub fn build_user_message(&self) -> String {
        match &self.passages {
            None => self.question.clone(),
            Some(passages) => format!(
                "Context:\n{}\n\nQuestion: {}\n\nAnswer:",
                format_context(passages),
                self.question
            ),
        }
    }
}

impl Default for AnswerPrompt {
    fn default() -> Self {
        Self::new()
    }
}
