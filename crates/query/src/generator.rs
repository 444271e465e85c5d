use extract::{LanguageModel, RetryPolicy, TimeoutError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::error::{GenerationError, TemplateError};

const QUERY_PLACEHOLDER: &str = "{query_text}";
const CONTEXT_PLACEHOLDER: &str = "{context}";

pub const DEFAULT_ANSWER_TEMPLATE: &str = r#"You are a helpful assistant answering questions based on the provided context.

CONTEXT:
{context}

USER QUESTION: {query_text}

INSTRUCTIONS:
- Answer the question using only information from the context above
- Be specific and cite relevant chunks or relationships
- If the context doesn't contain enough information, say so
- Keep your answer concise and factual

ANSWER:"#;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    QueryText,
    Context,
}

/// Answer prompt with `{query_text}` and `{context}` placeholders.
///
/// Rendering is a single pass over the parsed template, so placeholder-like
/// text inside the question or the context is never substituted again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PromptTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl PromptTemplate {
    pub fn parse(template: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = template;

        while let Some(pos) = rest.find('{') {
            literal.push_str(&rest[..pos]);
            let tail = &rest[pos..];

            let (segment, after) = if let Some(after) = tail.strip_prefix(QUERY_PLACEHOLDER) {
                (Segment::QueryText, after)
            } else if let Some(after) = tail.strip_prefix(CONTEXT_PLACEHOLDER) {
                (Segment::Context, after)
            } else {
                literal.push('{');
                rest = &tail[1..];
                continue;
            };

            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(segment);
            rest = after;
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        if !segments.contains(&Segment::QueryText) {
            return Err(TemplateError::MissingPlaceholder("query_text"));
        }
        if !segments.contains(&Segment::Context) {
            return Err(TemplateError::MissingPlaceholder("context"));
        }

        Ok(Self {
            source: template.to_string(),
            segments,
        })
    }

    pub fn render(&self, query_text: &str, context: &str) -> String {
        let mut out = String::with_capacity(self.source.len() + query_text.len() + context.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::QueryText => out.push_str(query_text),
                Segment::Context => out.push_str(context),
            }
        }
        out
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::parse(DEFAULT_ANSWER_TEMPLATE).expect("default answer template has both placeholders")
    }
}

impl TryFrom<String> for PromptTemplate {
    type Error = TemplateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PromptTemplate> for String {
    fn from(template: PromptTemplate) -> Self {
        template.source
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    /// The context the answer was generated from, when requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

pub struct AnswerGenerator {
    llm: Arc<dyn LanguageModel>,
    template: PromptTemplate,
    retry: RetryPolicy,
    call_timeout: Duration,
    include_context: bool,
}

impl AnswerGenerator {
    pub fn new(llm: Arc<dyn LanguageModel>, template: PromptTemplate) -> Self {
        Self {
            llm,
            template,
            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(60),
            include_context: false,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn with_include_context(mut self, include_context: bool) -> Self {
        self.include_context = include_context;
        self
    }

    pub async fn generate(&self, query_text: &str, context: &str) -> Result<Answer, GenerationError> {
        let prompt = self.template.render(query_text, context);

        let llm = &self.llm;
        let prompt = prompt.as_str();
        let budget = self.call_timeout;

        let text = self
            .retry
            .retry("generate_answer", || async move {
                match tokio::time::timeout(budget, llm.generate(prompt)).await {
                    Ok(result) => result,
                    Err(_) => Err(anyhow::Error::new(TimeoutError {
                        operation: "answer model call",
                        budget,
                    })),
                }
            })
            .await
            .map_err(|e| GenerationError {
                attempts: e.attempts,
                source: e.error,
            })?;

        info!(
            prompt_size = prompt.len(),
            answer_size = text.len(),
            "Generated answer"
        );

        Ok(Answer {
            text: text.trim().to_string(),
            context: self.include_context.then(|| context.to_string()),
        })
    }
}
