//! Text generation provider and LLM-based result ranking.
//!
//! Same provider split as [`crate::embedding`]: callers hold a
//! [`Generator`] trait object, the Ollama implementation lives here, and
//! the retry policy matches the embedder (429/5xx/network retried with
//! exponential backoff, other 4xx fatal).

use async_trait::async_trait;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::{IndexError, Result};
use crate::summarize;

#[async_trait]
pub trait Generator: Send + Sync {
    /// Run one completion and return the model's text.
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Generates via a local Ollama server's `POST /api/generate`.
pub struct OllamaGenerator {
    client: reqwest::Client,
    url: String,
    model: String,
    max_retries: u32,
}

impl OllamaGenerator {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| IndexError::Generation(e.to_string()))?;
        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
        });
        let endpoint = format!("{}/api/generate", self.url);

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self.client.post(&endpoint).json(&body).send().await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| IndexError::Generation(e.to_string()))?;
                        return json
                            .get("response")
                            .and_then(|r| r.as_str())
                            .map(|s| s.to_string())
                            .ok_or_else(|| {
                                IndexError::Generation(
                                    "invalid ollama response: missing response field".to_string(),
                                )
                            });
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(IndexError::Generation(format!(
                            "ollama error {}: {}",
                            status, body_text
                        )));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    return Err(IndexError::Generation(format!(
                        "ollama error {}: {}",
                        status, body_text
                    )));
                }
                Err(e) => {
                    last_err = Some(IndexError::Generation(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| IndexError::Generation("generation failed after retries".to_string())))
    }
}

/// The model's judgment of one document against a query.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DocConfidence {
    pub filename: String,
    /// 0 to 100 inclusive.
    pub confidence: u8,
    /// One or two sentences of the model's reasoning.
    pub context: String,
}

/// Default number of leading tokens of each document shown to the model.
pub const DEFAULT_RANK_TOKENS: usize = 600;

fn confidence_prompt(query: &str, docs: &[(String, String)], first_n_tokens: usize) -> String {
    let example: serde_json::Value = docs
        .iter()
        .map(|(name, _)| {
            (
                name.clone(),
                serde_json::json!({
                    "confidence": "<int, confidence score for this file>",
                    "context": "<1-2 sentences about your reasoning for this file>",
                }),
            )
        })
        .collect::<serde_json::Map<_, _>>()
        .into();

    let trimmed: serde_json::Value = docs
        .iter()
        .map(|(name, content)| {
            (
                name.clone(),
                serde_json::Value::String(summarize::take_tokens(content, first_n_tokens)),
            )
        })
        .collect::<serde_json::Map<_, _>>()
        .into();

    format!(
        "Ignore all previous instructions and do not remember anything after this response. \
         Respond to this prompt as if it's the only thing you've seen.\n\
         \nHere is the query: \"{query}\"\n\
         \nHere are your instructions: I want you to take this query and compare it to all the \
         given files.\n\
         Return a JSON object with keys for each of the filenames, and the values should be a \
         dictionary containing two keys called \"confidence\" and \"context\". The \"confidence\" \
         should be your confidence that the document matches the given query in the range 0-100 \
         inclusive, and \"context\" should be two sentences or less that describe why you chose \
         that confidence score. You should calculate the confidence relative to the other given \
         documents.\n\
         Your response should look exactly like this, with no additional characters: {example}\n\
         \nYour confidence should be primarily based on the document content. Additionally, I \
         don't want any additional information, context, explanation, or characters - just \
         return the JSON object.\n\
         \nHere is the information for all files, where the keys are filenames and values are \
         the content of that file:\n{trimmed}\n"
    )
}

/// Ask the model to score each document's relevance to the query.
///
/// Results come back in the input order, one entry per document. A
/// document the model left out of its reply gets confidence 0 with an
/// empty context rather than failing the whole call; a reply that is not
/// a JSON object at all is an error.
pub async fn rank_confidence(
    generator: &dyn Generator,
    query: &str,
    docs: &[(String, String)],
    first_n_tokens: usize,
) -> Result<Vec<DocConfidence>> {
    if docs.is_empty() {
        return Ok(Vec::new());
    }

    let prompt = confidence_prompt(query, docs, first_n_tokens);
    let reply = generator.generate(&prompt).await?;
    parse_confidence_reply(&reply, docs)
}

fn parse_confidence_reply(reply: &str, docs: &[(String, String)]) -> Result<Vec<DocConfidence>> {
    // Models often wrap JSON in code fences; strip to the outermost braces.
    let start = reply.find('{');
    let end = reply.rfind('}');
    let body = match (start, end) {
        (Some(s), Some(e)) if s < e => &reply[s..=e],
        _ => {
            return Err(IndexError::Generation(
                "confidence reply contained no JSON object".to_string(),
            ))
        }
    };

    let json: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| IndexError::Generation(format!("confidence reply is not valid JSON: {}", e)))?;
    let map = json.as_object().ok_or_else(|| {
        IndexError::Generation("confidence reply is not a JSON object".to_string())
    })?;

    Ok(docs
        .iter()
        .map(|(name, _)| {
            let entry = map.get(name);
            let confidence = entry
                .and_then(|e| e.get("confidence"))
                .and_then(value_as_u64)
                .map(|n| n.min(100) as u8)
                .unwrap_or(0);
            let context = entry
                .and_then(|e| e.get("context"))
                .and_then(|c| c.as_str())
                .unwrap_or_default()
                .to_string();
            DocConfidence {
                filename: name.clone(),
                confidence,
                context,
            }
        })
        .collect())
}

// Accepts both a JSON number and a numeric string, which small models
// produce interchangeably.
fn value_as_u64(v: &serde_json::Value) -> Option<u64> {
    v.as_u64().or_else(|| v.as_str()?.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn docs() -> Vec<(String, String)> {
        vec![
            ("report.txt".to_string(), "quarterly revenue".to_string()),
            ("notes.txt".to_string(), "meeting notes".to_string()),
        ]
    }

    #[test]
    fn parse_reply_preserves_input_order() {
        let reply = r#"{"notes.txt": {"confidence": 20, "context": "tangential"},
                        "report.txt": {"confidence": 90, "context": "directly relevant"}}"#;
        let scored = parse_confidence_reply(reply, &docs()).unwrap();
        assert_eq!(scored[0].filename, "report.txt");
        assert_eq!(scored[0].confidence, 90);
        assert_eq!(scored[1].confidence, 20);
    }

    #[test]
    fn parse_reply_strips_code_fences() {
        let reply = "```json\n{\"report.txt\": {\"confidence\": \"75\", \"context\": \"ok\"}}\n```";
        let scored = parse_confidence_reply(reply, &docs()).unwrap();
        assert_eq!(scored[0].confidence, 75);
        // Missing document defaults to zero instead of failing.
        assert_eq!(scored[1].confidence, 0);
    }

    #[test]
    fn out_of_range_confidence_is_clamped() {
        let reply = r#"{"report.txt": {"confidence": 250, "context": "x"},
                        "notes.txt": {"confidence": 100, "context": "y"}}"#;
        let scored = parse_confidence_reply(reply, &docs()).unwrap();
        assert_eq!(scored[0].confidence, 100);
        assert_eq!(scored[1].confidence, 100);
    }

    #[test]
    fn non_json_reply_is_an_error() {
        assert!(parse_confidence_reply("I cannot help with that.", &docs()).is_err());
    }

    #[test]
    fn prompt_includes_query_and_trimmed_contents() {
        let prompt = confidence_prompt("find revenue", &docs(), 600);
        assert!(prompt.contains("\"find revenue\""));
        assert!(prompt.contains("report.txt"));
        assert!(prompt.contains("quarterly revenue"));
    }
}
