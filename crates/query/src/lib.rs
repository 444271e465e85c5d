pub mod error;
pub mod generator;
pub mod retrieval;

pub use error::{GenerationError, QueryError, TemplateError};
pub use generator::{Answer, AnswerGenerator, DEFAULT_ANSWER_TEMPLATE, PromptTemplate};
pub use retrieval::{
    RetrievalResult, RetrievalStrategy, RetrievedChunk, Retriever, VectorSearch,
    dedupe_relationships,
};
