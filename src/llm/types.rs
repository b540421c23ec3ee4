use std::sync::Arc;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// Per-call model settings resolved from a role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallConfig {
    pub model: String,
    pub temperature: f64,
}

/// Hand-declared JSON schema the answer must follow.
#[derive(Debug, Clone)]
pub struct ResponseSchema {
    pub name: &'static str,
    pub schema: serde_json::Value,
}

/// One structured model call: prompt, optional screenshot, expected answer shape.
///
/// The image is shared between parallel votes, so it is held behind an `Arc`.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub prompt: String,
    /// Base64-encoded PNG, without a data-URI prefix.
    pub image_base64: Option<Arc<str>>,
    pub schema: ResponseSchema,
    pub call: CallConfig,
}

impl GenerateRequest {
    /// Build the chat messages an OpenAI-compatible endpoint expects.
    pub fn to_messages(&self) -> Vec<ChatMessage> {
        let mut parts = Vec::with_capacity(2);
        if let Some(b64) = &self.image_base64 {
            parts.push(ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: format!("data:image/png;base64,{b64}"),
                },
            });
        }
        parts.push(ContentPart::Text {
            text: self.prompt.clone(),
        });
        vec![ChatMessage {
            role: "user".into(),
            content: MessageContent::Parts(parts),
        }]
    }
}
