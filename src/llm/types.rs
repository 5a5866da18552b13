//! Chat message types and their chat-completions wire form.
//!
//! Every request is built from these values; there are no ad hoc JSON shapes
//! at call sites.

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::capture::CapturedImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// How much resolution the model should spend on an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageDetail {
    Low,
    #[default]
    High,
    Auto,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text { text: String },
    Image { image: CapturedImage, detail: ImageDetail },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }
}

/// Serializes as `{"type":"text","text":..}` or
/// `{"type":"image_url","image_url":{"url":"data:..","detail":".."}}`.
impl Serialize for ContentPart {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        match self {
            ContentPart::Text { text } => {
                map.serialize_entry("type", "text")?;
                map.serialize_entry("text", text)?;
            }
            ContentPart::Image { image, detail } => {
                map.serialize_entry("type", "image_url")?;
                map.serialize_entry(
                    "image_url",
                    &ImageUrl {
                        url: image.to_data_url(),
                        detail: *detail,
                    },
                )?;
            }
        }
        map.end()
    }
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
    detail: ImageDetail,
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    System {
        content: Vec<ContentPart>,
    },
    User {
        content: Vec<ContentPart>,
    },
    Assistant {
        content: Vec<ContentPart>,
        /// Set on turns that show a failed request instead of a model reply.
        #[serde(skip)]
        failed: bool,
    },
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Message::System {
            content: vec![ContentPart::text(text)],
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Message::User {
            content: vec![ContentPart::text(text)],
        }
    }

    pub fn user_with_image(text: impl Into<String>, image: CapturedImage, detail: ImageDetail) -> Self {
        Message::User {
            content: vec![ContentPart::text(text), ContentPart::Image { image, detail }],
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Message::Assistant {
            content: vec![ContentPart::text(text)],
            failed: false,
        }
    }

    pub fn assistant_error(text: impl Into<String>) -> Self {
        Message::Assistant {
            content: vec![ContentPart::text(text)],
            failed: true,
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Message::System { .. } => Role::System,
            Message::User { .. } => Role::User,
            Message::Assistant { .. } => Role::Assistant,
        }
    }

    pub fn content(&self) -> &[ContentPart] {
        match self {
            Message::System { content }
            | Message::User { content }
            | Message::Assistant { content, .. } => content,
        }
    }

    /// All text parts joined together.
    pub fn text(&self) -> String {
        self.content()
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                ContentPart::Image { .. } => None,
            })
            .collect()
    }

    pub fn image(&self) -> Option<&CapturedImage> {
        self.content().iter().find_map(|part| match part {
            ContentPart::Image { image, .. } => Some(image),
            ContentPart::Text { .. } => None,
        })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Message::Assistant { failed: true, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbaImage};
    use serde_json::json;

    #[test]
    fn text_message_wire_shape() {
        let value = serde_json::to_value(Message::user("hello")).unwrap();
        assert_eq!(
            value,
            json!({"role": "user", "content": [{"type": "text", "text": "hello"}]})
        );
    }

    #[test]
    fn image_part_is_data_url_with_detail() {
        let img = CapturedImage::encode(&DynamicImage::ImageRgba8(RgbaImage::new(2, 2))).unwrap();
        let msg = Message::user_with_image("what is this", img, ImageDetail::High);
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["content"][0]["text"], "what is this");
        assert_eq!(value["content"][1]["type"], "image_url");
        assert_eq!(value["content"][1]["image_url"]["detail"], "high");
        let url = value["content"][1]["image_url"]["url"].as_str().unwrap();
        assert!(url.starts_with("data:image/png;base64,"));
    }

    #[test]
    fn failed_flag_is_not_serialized() {
        let value = serde_json::to_value(Message::assistant_error("Error: boom")).unwrap();
        assert_eq!(
            value,
            json!({"role": "assistant", "content": [{"type": "text", "text": "Error: boom"}]})
        );
    }

    #[test]
    fn accessors() {
        let msg = Message::system("be brief");
        assert_eq!(msg.role(), Role::System);
        assert_eq!(msg.text(), "be brief");
        assert!(msg.image().is_none());
        assert!(!msg.is_failed());
        assert!(Message::assistant_error("x").is_failed());
    }
}
