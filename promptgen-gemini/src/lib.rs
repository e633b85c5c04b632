use std::time::Duration;

use log::debug;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const JSON_MIME_TYPE: &str = "application/json";
pub const INSTRUCTION_PREFIX: &str =
    "Based on the following request, generate the necessary code files:";

const API_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

#[derive(Debug, Error)]
pub enum GeminiError {
    #[error("Gemini API key is missing")]
    MissingApiKey,
    #[error("failed to create Gemini client: {0}")]
    Client(#[source] reqwest::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("no response received")]
    NoCandidates,
    #[error("response candidate contained no text parts")]
    NoParts,
}

/// Anything able to turn a [`GenerationRequest`] into response text.
///
/// The CLI only talks to this trait so the pipeline can run against a canned
/// response in tests.
pub trait Generator {
    fn generate(&self, request: &GenerationRequest) -> Result<String, GeminiError>;
}

/// Prompt plus response shape for a single `generateContent` call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub instruction: String,
    pub config: GenerationConfig,
}

impl GenerationRequest {
    /// Frames the user prompt and attaches the static file-list schema.
    pub fn for_prompt(prompt: &str) -> Self {
        Self {
            instruction: build_instruction(prompt),
            config: GenerationConfig {
                response_mime_type: JSON_MIME_TYPE.to_string(),
                response_schema: file_list_schema(),
            },
        }
    }
}

pub fn build_instruction(prompt: &str) -> String {
    format!("{INSTRUCTION_PREFIX}\n\n{prompt}")
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationConfig {
    #[serde(rename = "responseMimeType")]
    pub response_mime_type: String,
    #[serde(rename = "responseSchema")]
    pub response_schema: ResponseSchema,
}

/// Subset of the Gemini OpenAPI schema object needed to describe structured
/// output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseSchema {
    #[serde(rename = "type")]
    pub schema_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<ResponseSchema>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(rename = "propertyOrdering", skip_serializing_if = "Option::is_none")]
    pub property_ordering: Option<Vec<String>>,
}

impl ResponseSchema {
    fn of_type(schema_type: &str, description: &str) -> Self {
        Self {
            schema_type: schema_type.to_string(),
            description: Some(description.to_string()),
            items: None,
            properties: None,
            required: Vec::new(),
            property_ordering: None,
        }
    }
}

/// Array of `{file_name, source_code}` objects, both fields required.
pub fn file_list_schema() -> ResponseSchema {
    let mut properties = serde_json::Map::new();
    properties.insert(
        "file_name".to_string(),
        serde_json::json!({
            "type": "STRING",
            "description": "Name of the file: relative_path/file_name.file_extension",
        }),
    );
    properties.insert(
        "source_code".to_string(),
        serde_json::json!({
            "type": "STRING",
            "description": "Source code located in the file.",
        }),
    );

    let field_names = vec!["file_name".to_string(), "source_code".to_string()];
    let item = ResponseSchema {
        properties: Some(properties),
        required: field_names.clone(),
        property_ordering: Some(field_names),
        ..ResponseSchema::of_type("OBJECT", "Object representing file.")
    };

    ResponseSchema {
        items: Some(Box::new(item)),
        ..ResponseSchema::of_type(
            "ARRAY",
            "List of all of the filenames and source code in the files.",
        )
    }
}

#[derive(Debug, Serialize)]
struct TextRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<&'a GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

impl<'a> TextRequest<'a> {
    fn with_schema(prompt: &'a str, generation_config: &'a GenerationConfig) -> Self {
        Self {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
            generation_config: Some(generation_config),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TextResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
pub struct Candidate {
    pub content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
pub struct ResponsePart {
    pub text: Option<String>,
}

impl TextResponse {
    /// Text of the first part of the first candidate.
    pub fn into_first_text(self) -> Result<String, GeminiError> {
        let candidate = self
            .candidates
            .into_iter()
            .next()
            .ok_or(GeminiError::NoCandidates)?;

        candidate
            .content
            .and_then(|content| content.parts.into_iter().next())
            .and_then(|part| part.text)
            .ok_or(GeminiError::NoParts)
    }
}

/// Blocking client for Gemini's `generateContent` endpoint.
#[derive(Debug)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiClient {
    /// Builds a client for `model`. A `timeout` of `None` lets the request
    /// block indefinitely.
    ///
    /// # Errors
    ///
    /// Returns [`GeminiError::MissingApiKey`] when the provided API key is empty
    /// or whitespace only, and [`GeminiError::Client`] if the HTTP client
    /// cannot be constructed.
    pub fn new(
        api_key: &str,
        model: &str,
        timeout: Option<Duration>,
    ) -> Result<Self, GeminiError> {
        if api_key.trim().is_empty() {
            return Err(GeminiError::MissingApiKey);
        }

        // The blocking builder defaults to 30s; `None` must clear it.
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(GeminiError::Client)?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: API_BASE_URL.to_string(),
        })
    }

    #[cfg(test)]
    pub(crate) fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn endpoint_url(&self) -> String {
        format!("{}/{}:generateContent", self.base_url, self.model)
    }
}

impl Generator for GeminiClient {
    fn generate(&self, request: &GenerationRequest) -> Result<String, GeminiError> {
        let url = self.endpoint_url();
        let body = TextRequest::with_schema(&request.instruction, &request.config);
        debug!("POST {url}");

        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()?;

        let response = response.error_for_status()?;
        let parsed = response.json::<TextResponse>()?;
        debug!("received {} candidate(s)", parsed.candidates.len());
        parsed.into_first_text()
    }
}

#[cfg(test)]
mod tests;
