//! Answer generation on top of retrieved context.
//!
//! The retriever stops at ranked chunks; an [`AnswerGenerator`] (an LLM) turns the
//! question plus those chunks into prose.

use async_trait::async_trait;

use crate::retrieval::{RetrievalError, Retriever};
use crate::store::ScoredChunk;

/// Maps a question and its retrieved context to an answer.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(&self, question: &str, context: &[ScoredChunk]) -> Result<String, GenerationError>;
}

#[derive(Debug, thiserror::Error)]
#[error("answer generation failed: {0}")]
pub struct GenerationError(pub String);

/// Reply the model is told to give when the context doesn't cover the question.
pub const NO_ANSWER_HINT: &str = "The knowledge base may not contain anything relevant to this question.";

/// Prompt that stuffs all retrieved chunks in front of the question.
pub fn build_prompt(question: &str, context: &[ScoredChunk]) -> String {
    let context = context
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "You are a knowledge assistant. Answer the user's question using the context retrieved below.\n\
         \n\
         If the context does not contain the relevant information, politely tell the user: \"{hint}\"\n\
         \n\
         Context:\n\
         {context}\n\
         \n\
         Question: {question}\n\
         \n\
         Answer:",
        hint = NO_ANSWER_HINT,
        context = context,
        question = question.trim(),
    )
}

/// Retrieves `k` chunks for `question` and asks `generator` to answer from them.
pub async fn answer_question(
    retriever: &Retriever,
    generator: &dyn AnswerGenerator,
    question: &str,
    k: usize,
) -> Result<Answer, AnswerError> {
    let context = retriever.answer_context(question, k).await?;
    let text = generator.generate(question, &context).await?;
    Ok(Answer { text, context })
}

/// A generated answer together with the chunks it was conditioned on.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub context: Vec<ScoredChunk>,
}

#[derive(Debug, thiserror::Error)]
pub enum AnswerError {
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::chunks::Chunk;
    use crate::embed::{EmbedSettings, Embedder, HashEmbedding};
    use crate::store::VectorIndex;

    fn hit(text: &str) -> ScoredChunk {
        ScoredChunk {
            id: 0,
            text: text.to_string(),
            source: "s".into(),
            sequence_index: 0,
            score: 1.0,
        }
    }

    /// Records what it was asked and echoes the top chunk.
    #[derive(Default)]
    struct Echo {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AnswerGenerator for Echo {
        async fn generate(&self, question: &str, context: &[ScoredChunk]) -> Result<String, GenerationError> {
            self.seen.lock().unwrap().push(build_prompt(question, context));
            Ok(context.first().map(|c| c.text.clone()).unwrap_or_default())
        }
    }

    #[test]
    fn prompt_contains_context_and_question() {
        let prompt = build_prompt("  What are cats? ", &[hit("Cats are mammals."), hit("Dogs too.")]);
        assert!(prompt.contains("Cats are mammals.\n\nDogs too."));
        assert!(prompt.contains("Question: What are cats?\n"));
        assert!(prompt.contains(NO_ANSWER_HINT));
        assert!(prompt.ends_with("Answer:"));
    }

    #[tokio::test]
    async fn answer_uses_retrieved_context() {
        let provider = HashEmbedding::new(8);
        let index = VectorIndex::build(
            ["cats purr", "dogs bark"]
                .iter()
                .enumerate()
                .map(|(i, t)| {
                    (
                        provider.vector_for(t),
                        Chunk {
                            text: t.to_string(),
                            start_offset: 0,
                            source: "pets.md".into(),
                            sequence_index: i,
                        },
                    )
                })
                .collect(),
        )
        .unwrap();
        let embedder = Embedder::new(Arc::new(provider), EmbedSettings::default());
        let retriever = Retriever::ready(embedder, Arc::new(index)).unwrap();
        let generator = Echo::default();

        let answer = answer_question(&retriever, &generator, "dogs bark", 1).await.unwrap();
        assert_eq!(answer.text, "dogs bark");
        assert_eq!(answer.context.len(), 1);
        assert!(generator.seen.lock().unwrap()[0].contains("Question: dogs bark"));
    }

    #[tokio::test]
    async fn retrieval_errors_skip_generation() {
        let embedder = Embedder::new(Arc::new(HashEmbedding::new(8)), EmbedSettings::default());
        let retriever = Retriever::new(embedder);
        let generator = Echo::default();
        let err = answer_question(&retriever, &generator, "anything", 3).await.unwrap_err();
        assert!(matches!(err, AnswerError::Retrieval(RetrievalError::NotReady)));
        assert!(generator.seen.lock().unwrap().is_empty());
    }
}
