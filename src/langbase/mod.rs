//! Langbase Pipes client and the [`LanguageModel`] abstraction built on it.

mod client;
mod model;
mod types;

pub use client::LangbaseClient;
#[cfg(test)]
pub use model::MockLanguageModel;
pub use model::{LanguageModel, PipeModel};
pub use types::{
    CreatePipeRequest, CreatePipeResponse, Message, MessageRole, PipeRequest, PipeResponse,
    RawResponse, Usage,
};
