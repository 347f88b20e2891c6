/// Body of `POST /ask`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AskRequest {
    question: String,
}

impl AskRequest {
    pub fn new(question: &str) -> Self {
        Self {
            question: question.to_string(),
        }
    }

    pub fn question(&self) -> &str {
        &self.question
    }
}

/// JSON carried by a `data: ` line of the answer stream.
///
/// A `token` payload is one increment of the answer, a `text` payload is the
/// final authoritative answer. Any other shape (context snippets, keepalives)
/// fails to decode and is skipped by the reader.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(untagged)]
pub enum AnswerPayload {
    Token { token: String },
    Final { text: String },
}

/// Response of `GET /health`.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct HealthStatus {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    service: Option<String>,
    #[serde(default)]
    openai_configured: Option<serde_json::Value>,
}

impl HealthStatus {
    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn service(&self) -> Option<&str> {
        self.service.as_deref()
    }

    /// Whether the backend reports a configured language model. Accepts
    /// booleans, `"true"`/`"false"` strings and `0`/`1` numbers.
    pub fn model_configured(&self) -> Option<bool> {
        match self.openai_configured.as_ref()? {
            serde_json::Value::Bool(value) => Some(*value),
            serde_json::Value::String(value) => match value.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Some(true),
                "false" | "no" | "0" => Some(false),
                _ => None,
            },
            serde_json::Value::Number(value) => value.as_i64().map(|n| n != 0),
            _ => None,
        }
    }
}
