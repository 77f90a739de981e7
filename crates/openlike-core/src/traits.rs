use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::error::Result;
use crate::types::*;

/// Chat model: single-shot and streaming completions.
pub trait ChatModel: Send + Sync + 'static {
    /// Send a chat request and receive the parsed result.
    fn generate(
        &self,
        messages: Vec<ChatMessage>,
        options: &CallOptions,
    ) -> BoxFuture<'_, Result<ChatResult>>;

    /// Send a chat request and receive a stream of normalized chunks.
    fn stream(
        &self,
        messages: Vec<ChatMessage>,
        options: &CallOptions,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<GenerationChunk>>>>;
}
