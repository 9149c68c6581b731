//! Prompt templates for grounded answer generation

use crate::config::AgentProfile;

const SEPARATOR: &str = "\n\n";

/// Prompt builder for agent queries
pub struct PromptBuilder;

impl PromptBuilder {
    /// Join retrieved chunks into one context block
    pub fn build_context(chunks: &[String]) -> String {
        chunks.join(SEPARATOR)
    }

    /// Prompt for a single, non-streamed answer
    ///
    /// The model is told to stay within the passages. With no passages the
    /// question is asked on its own.
    pub fn build_answer_prompt(profile: &AgentProfile, question: &str, chunks: &[String]) -> String {
        if chunks.is_empty() {
            return Self::build_context_free_prompt(&profile.system_prompt, question);
        }

        format!(
            r#"{system}

User question: {question}

Relevant passages:
{context}

Answer from the passages above. Do not invent information and do not use emoji."#,
            system = profile.system_prompt,
            question = question,
            context = Self::build_context(chunks),
        )
    }

    /// Prompt for a streamed answer
    ///
    /// Passages are offered as background knowledge; the model may fall back
    /// to general knowledge when they are unrelated.
    pub fn build_stream_prompt(profile: &AgentProfile, question: &str, chunks: &[String]) -> String {
        if chunks.is_empty() {
            return Self::build_context_free_prompt(&profile.stream_system_prompt, question);
        }

        format!(
            r#"{system}

User question: {question}

Background knowledge:
{context}

If the question is unrelated to the background knowledge, answer from general knowledge. Do not use emoji."#,
            system = profile.stream_system_prompt,
            question = question,
            context = Self::build_context(chunks),
        )
    }

    fn build_context_free_prompt(system: &str, question: &str) -> String {
        format!(
            r#"{system}

User question: {question}

No reference material is available for this question. Answer from general knowledge and say so if you are unsure. Do not use emoji."#,
        )
    }
}
