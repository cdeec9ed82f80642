// src/vision_extract.rs

use crate::config::{VisionBackend, VisionSection};
use crate::error::ExtractError;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fs;
use tracing::{info, warn};

/// First pass: read everything printed on the receipt.
const OCR_PROMPT: &str = "Estrai tutto il testo leggibile da questa immagine di uno scontrino. \
Riporta ogni riga così come appare, inclusi prezzi, quantità, sconti e totale. \
Non aggiungere commenti.";

/// Second pass: turn the transcription into the receipt JSON.
const JSON_PROMPT: &str = r#"Dal testo di uno scontrino qui sotto, estrai i dati e restituisci SOLO un oggetto JSON valido con questo schema:
{
  "data": "YYYY-MM-DD o null",
  "ora": "HH:MM o null",
  "negozio": "string o null",
  "indirizzo": "string o null",
  "citta": "string o null",
  "paese": "string o null",
  "prezzo_totale": {"valore": number, "valuta": "codice ISO a 3 lettere, es. EUR"},
  "metodo_pagamento": "string o null",
  "lista_articoli": [
    {
      "nome": "string",
      "quantita": integer,
      "prezzo": number,
      "valuta": "EUR",
      "sconto_percentuale": number o null,
      "sconto_assoluto": number o null,
      "prezzo_scontato": number o null
    }
  ]
}
Usa null per i campi che non riesci a determinare. Niente markdown, niente commenti."#;

/// Longest transcription forwarded to the structuring pass.
const MAX_TRANSCRIPT_CHARS: usize = 12_000;

/// The external extraction call: image bytes in, free-form model text out.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, image: &[u8]) -> Result<String, ExtractError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Resolved endpoint configuration ready to make API calls.
#[derive(Debug, Clone)]
pub struct ResolvedEndpoint {
    pub base_url: String,
    pub model: String,
    api_key: String,
}

/// Resolve the vision config section into a concrete endpoint.
pub fn resolve_endpoint(vision: &VisionSection) -> Result<ResolvedEndpoint, ExtractError> {
    let (endpoint, api_key) = match vision.backend {
        VisionBackend::Groq => (
            &vision.groq,
            std::env::var("GROQ_API_KEY").map_err(|_| ExtractError::MissingApiKey("GROQ_API_KEY"))?,
        ),
        VisionBackend::Ollama => (&vision.ollama, "ollama".to_string()), // required by API but ignored
        VisionBackend::Remote => (
            &vision.remote,
            std::env::var("VISION_API_KEY")
                .map_err(|_| ExtractError::MissingApiKey("VISION_API_KEY"))?,
        ),
    };
    info!(
        backend = ?vision.backend,
        url = %endpoint.base_url,
        model = %endpoint.model,
        "Using vision backend"
    );
    Ok(ResolvedEndpoint {
        base_url: endpoint.base_url.trim_end_matches('/').to_string(),
        model: endpoint.model.clone(),
        api_key,
    })
}

/// Guess the image MIME type from its magic bytes.
pub fn sniff_mime(bytes: &[u8]) -> &'static str {
    match bytes {
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        _ => "image/jpeg",
    }
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

/// OpenAI-compatible vision client: transcribe the image, then structure the
/// transcription into receipt JSON.
pub struct VisionClient {
    client: Client,
    endpoint: ResolvedEndpoint,
    ocr_prompt: String,
    json_prompt: String,
}

impl VisionClient {
    pub fn from_config(vision: &VisionSection) -> Result<Self, ExtractError> {
        let endpoint = resolve_endpoint(vision)?;
        let ocr_prompt = match &vision.ocr_prompt_path {
            Some(p) => fs::read_to_string(p)?.trim().to_string(),
            None => OCR_PROMPT.to_string(),
        };
        let json_prompt = match &vision.json_prompt_path {
            Some(p) => fs::read_to_string(p)?.trim().to_string(),
            None => JSON_PROMPT.to_string(),
        };
        Ok(Self {
            client: Client::new(),
            endpoint,
            ocr_prompt,
            json_prompt,
        })
    }

    /// Client against an explicit endpoint with the built-in prompts.
    pub fn new(base_url: &str, model: &str, api_key: &str) -> Self {
        Self {
            client: Client::new(),
            endpoint: ResolvedEndpoint {
                base_url: base_url.trim_end_matches('/').to_string(),
                model: model.to_string(),
                api_key: api_key.to_string(),
            },
            ocr_prompt: OCR_PROMPT.to_string(),
            json_prompt: JSON_PROMPT.to_string(),
        }
    }

    /// Check if the server is reachable (used for the local Ollama backend).
    pub async fn check_health(&self) -> bool {
        // Ollama's health endpoint is at the root (not under /v1)
        let health_url = self.endpoint.base_url.trim_end_matches("/v1");

        match self
            .client
            .get(health_url)
            .timeout(std::time::Duration::from_secs(3))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                info!("Vision server is reachable");
                true
            }
            Ok(resp) => {
                warn!(status = %resp.status(), "Vision server returned non-OK status");
                false
            }
            Err(e) => {
                warn!(error = %e, "Vision server not reachable");
                false
            }
        }
    }

    pub fn endpoint(&self) -> &ResolvedEndpoint {
        &self.endpoint
    }

    async fn chat(&self, content: Vec<ContentPart>) -> Result<String, ExtractError> {
        let request = ChatRequest {
            model: self.endpoint.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content,
            }],
            temperature: 0.0,
        };

        let url = format!("{}/chat/completions", self.endpoint.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.endpoint.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractError::Api { status, body });
        }

        let chat_response: ChatResponse = response.json().await?;
        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(ExtractError::EmptyResponse)
    }

    /// First pass: image to plain transcription.
    pub async fn transcribe(&self, image: &[u8]) -> Result<String, ExtractError> {
        let data_uri = format!("data:{};base64,{}", sniff_mime(image), STANDARD.encode(image));
        let text = self
            .chat(vec![
                ContentPart::Text {
                    text: self.ocr_prompt.clone(),
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl { url: data_uri },
                },
            ])
            .await?;
        info!(chars = text.len(), "Transcription received");
        Ok(text)
    }

    /// Second pass: transcription to JSON-bearing text.
    pub async fn structure(&self, transcript: &str) -> Result<String, ExtractError> {
        let text = self
            .chat(vec![
                ContentPart::Text {
                    text: self.json_prompt.clone(),
                },
                ContentPart::Text {
                    text: truncate_chars(transcript, MAX_TRANSCRIPT_CHARS).to_string(),
                },
            ])
            .await?;
        info!(chars = text.len(), "Structured output received");
        Ok(text)
    }
}

#[async_trait]
impl Extractor for VisionClient {
    async fn extract(&self, image: &[u8]) -> Result<String, ExtractError> {
        let transcript = self.transcribe(image).await?;
        if transcript.trim().is_empty() {
            warn!("Empty transcription, skipping structuring pass");
            return Ok(String::new());
        }
        self.structure(&transcript).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];

    fn reply(content: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": content}}]
        }))
    }

    #[tokio::test]
    async fn test_two_pass_extraction() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("Authorization", "Bearer test-key"))
            .and(body_string_contains("data:image/png;base64,"))
            .respond_with(reply("PANE 2 x 1,00\nTOTALE 2,00"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_string_contains("TOTALE 2,00"))
            .respond_with(reply(r#"Ecco: {"prezzo_totale": {"valore": 2.0}}"#))
            .expect(1)
            .mount(&server)
            .await;

        let client = VisionClient::new(&format!("{}/v1/", server.uri()), "vision-test", "test-key");
        let out = client.extract(PNG).await.unwrap();
        assert_eq!(out, r#"Ecco: {"prezzo_totale": {"valore": 2.0}}"#);
    }

    #[tokio::test]
    async fn test_api_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let client = VisionClient::new(&server.uri(), "m", "k");
        let err = client.extract(PNG).await.unwrap_err();
        assert!(matches!(err, ExtractError::Api { status: 429, ref body } if body == "rate limited"));
    }

    #[tokio::test]
    async fn test_no_choices_is_empty_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})))
            .mount(&server)
            .await;

        let client = VisionClient::new(&server.uri(), "m", "k");
        assert!(matches!(
            client.transcribe(PNG).await.unwrap_err(),
            ExtractError::EmptyResponse
        ));
    }

    #[tokio::test]
    async fn test_blank_transcript_skips_second_pass() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(reply("   "))
            .expect(1)
            .mount(&server)
            .await;

        let client = VisionClient::new(&server.uri(), "m", "k");
        assert_eq!(client.extract(PNG).await.unwrap(), "");
    }

    #[test]
    fn test_sniff_mime() {
        assert_eq!(sniff_mime(PNG), "image/png");
        assert_eq!(sniff_mime(&[0xFF, 0xD8, 0xFF, 0xE0]), "image/jpeg");
        assert_eq!(sniff_mime(b"RIFF\0\0\0\0WEBPVP8 "), "image/webp");
        assert_eq!(sniff_mime(b"??"), "image/jpeg");
    }

    #[test]
    fn test_truncate_on_char_boundary() {
        assert_eq!(truncate_chars("caffè", 5), "caffè");
        assert_eq!(truncate_chars("caffè latte", 5), "caffè");
        assert_eq!(truncate_chars("ab", 10), "ab");
    }

    #[test]
    fn test_ollama_needs_no_key() {
        let mut vision = VisionSection::default();
        vision.backend = VisionBackend::Ollama;
        let ep = resolve_endpoint(&vision).unwrap();
        assert_eq!(ep.base_url, "http://localhost:11434/v1");
    }
}
