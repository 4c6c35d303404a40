use derive_new::new;
use derive_setters::Setters;
use serde::{Deserialize, Serialize};

pub const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "models/gemini-1.5-flash-latest";

#[derive(Debug, Clone, Deserialize, Serialize, new)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    /// A single text part with no role, the shape `generateContent` expects for a bare prompt.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(None, vec![Part::new(PartData::Text(text.into()))])
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PartData {
    Text(String),
    FunctionCall(FunctionCall),
}

#[derive(Debug, Clone, Deserialize, Serialize, new, Setters)]
#[serde(rename_all = "camelCase")]
#[setters(prefix = "with_", into, strip_option)]
pub struct Part {
    #[serde(flatten)]
    #[setters(skip)]
    pub data: PartData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[new(default)]
    pub thought: Option<bool>,
}

impl Part {
    pub fn as_text(&self) -> Option<&str> {
        match &self.data {
            PartData::Text(text) => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, new)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[new(into)]
    pub id: Option<String>,
    #[new(into)]
    pub name: String,
    #[serde(default)]
    #[new(into)]
    pub args: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

pub mod request {
    use derive_new::new;
    use derive_setters::Setters;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Deserialize, Serialize, new, Setters)]
    #[setters(prefix = "with_")]
    #[setters(into, strip_option)]
    #[serde(rename_all = "camelCase")]
    pub struct Request {
        #[setters(skip)]
        #[new(into)]
        contents: Vec<super::Content>,
        #[serde(skip_serializing_if = "Option::is_none")]
        #[new(default)]
        generation_config: Option<GenerationConfig>,
    }

    impl Request {
        /// Wraps a bare prompt as a single-content, single-part request.
        pub fn prompt(prompt: impl Into<String>) -> Self {
            Self::new(vec![super::Content::text(prompt)])
        }
    }

    #[derive(Debug, Clone, Deserialize, Serialize, Setters, new, Default)]
    #[setters(prefix = "with_")]
    #[setters(into, strip_option)]
    #[serde(rename_all = "camelCase")]
    pub struct GenerationConfig {
        #[serde(skip_serializing_if = "Option::is_none")]
        #[new(default)]
        temperature: Option<f32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        #[new(default)]
        top_p: Option<f32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        #[new(default)]
        top_k: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        #[new(default)]
        max_output_tokens: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        #[new(default)]
        stop_sequences: Option<Vec<String>>,
    }
}

pub mod response {
    use serde::Deserialize;

    #[derive(Debug, Clone, Deserialize, Default)]
    #[serde(rename_all = "camelCase")]
    pub struct Response {
        #[serde(default)]
        pub candidates: Vec<Candidate>,
        #[serde(default)]
        pub prompt_feedback: Option<PromptFeedback>,
        #[serde(default)]
        pub usage_metadata: Option<UsageMetadata>,
    }

    impl Response {
        /// Text of the first part of the first candidate, if there is one.
        pub fn text(&self) -> Option<&str> {
            self.candidates
                .first()?
                .content
                .as_ref()?
                .parts
                .first()?
                .as_text()
        }
    }

    #[derive(Debug, Clone, Deserialize, Default)]
    #[serde(rename_all = "camelCase")]
    pub struct Candidate {
        #[serde(default)]
        pub content: Option<super::Content>,
        #[serde(default)]
        pub finish_reason: Option<FinishReason>,
        #[serde(default)]
        pub index: Option<i32>,
    }

    #[derive(Debug, Clone, Deserialize, Default)]
    #[serde(rename_all = "camelCase")]
    pub struct UsageMetadata {
        pub prompt_token_count: Option<u32>,
        pub candidates_token_count: Option<u32>,
        pub total_token_count: Option<u32>,
    }

    #[derive(Debug, Clone, Deserialize, Default)]
    #[serde(rename_all = "camelCase")]
    pub struct PromptFeedback {
        #[serde(default)]
        pub block_reason: Option<String>,
    }

    #[derive(Debug, Clone, Deserialize, PartialEq)]
    #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
    pub enum FinishReason {
        FinishReasonUnspecified,
        Stop,
        MaxTokens,
        Safety,
        Recitation,
        Other,
        #[serde(other)]
        Unknown,
    }
}

pub mod models {
    use serde::Deserialize;

    #[derive(Debug, Clone, Deserialize, Default)]
    #[serde(rename_all = "camelCase")]
    pub struct ListModelsResponse {
        #[serde(default)]
        pub models: Vec<Model>,
        #[serde(default)]
        pub next_page_token: Option<String>,
    }

    #[derive(Debug, Clone, Deserialize, Default)]
    #[serde(rename_all = "camelCase")]
    pub struct Model {
        pub name: String,
        #[serde(default)]
        pub display_name: Option<String>,
        #[serde(default)]
        pub description: Option<String>,
        #[serde(default)]
        pub supported_generation_methods: Vec<String>,
    }
}

pub mod rest;
pub mod retry;
pub mod transport;
