//! Provider collaborators: LLM chat completion and image generation,
//! consumed by the pipeline through the `ChatModel` / `ImageModel` traits.

pub mod chat;
pub mod error;
pub mod image;
pub mod schema;

pub use chat::{ChatMessage, ChatModel, ChatRequest, OpenAiChatClient};
pub use error::ProviderError;
pub use image::{GeminiImageClient, ImageModel, ImageRequest, ImageResponse};
pub use schema::extract_json;
