//! Outbound message assembly.
//!
//! Every invocation is single-turn: one `user` message made of the caller's
//! instruction (verbatim, no templating) followed by the images in call
//! order. The serde shape matches the OpenAI chat `content` array so the
//! HTTP service can embed the message as-is.

use crate::pipeline::encode::EncodedImage;
use serde::{Deserialize, Serialize};

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: Vec<ContentPart>,
}

/// One segment of a multimodal message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

impl Message {
    /// The instruction text (first text part).
    pub fn text(&self) -> &str {
        self.content
            .iter()
            .find_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                ContentPart::ImageUrl { .. } => None,
            })
            .unwrap_or("")
    }

    pub fn image_count(&self) -> usize {
        self.content
            .iter()
            .filter(|p| matches!(p, ContentPart::ImageUrl { .. }))
            .count()
    }
}

/// Builds the outbound [`Message`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptAssembler;

impl PromptAssembler {
    pub fn assemble(instruction: &str, images: &[EncodedImage]) -> Message {
        let mut content = Vec::with_capacity(images.len() + 1);
        content.push(ContentPart::Text {
            text: instruction.to_string(),
        });
        content.extend(images.iter().map(|img| ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: img.data_url(),
            },
        }));

        Message {
            role: "user".to_string(),
            content,
        }
    }
}
