//! Provider-specific configuration and detection.
//!
//! This module handles differences between LLM API providers, including
//! default endpoints, URL patterns, and attribution headers.

/// Supported LLM providers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provider {
    /// `OpenAI` (api.openai.com)
    OpenAI,
    /// `OpenRouter` (openrouter.ai)
    OpenRouter,
    /// Together AI (together.ai, together.xyz)
    TogetherAI,
    /// Groq (groq.com)
    Groq,
    /// Local Ollama server
    Ollama,
    /// Generic OpenAI-compatible provider
    Generic,
}

impl Provider {
    /// Detect provider from base URL.
    ///
    /// # Example
    ///
    /// ```rust
    /// use llm_mcp_cli::llm::Provider;
    ///
    /// let provider = Provider::detect_from_url("https://api.openai.com");
    /// assert_eq!(provider, Provider::OpenAI);
    /// ```
    #[must_use]
    pub fn detect_from_url(base_url: &str) -> Self {
        let lower = base_url.to_lowercase();

        if lower.contains("openrouter.ai") {
            Self::OpenRouter
        } else if lower.contains("together.ai") || lower.contains("together.xyz") {
            Self::TogetherAI
        } else if lower.contains("groq.com") {
            Self::Groq
        } else if lower.contains(":11434") {
            Self::Ollama
        } else if lower.contains("openai.com") {
            Self::OpenAI
        } else {
            Self::Generic
        }
    }

    /// Resolve a provider from its configured name, falling back to URL
    /// detection for unknown names.
    #[must_use]
    pub fn from_name(name: &str, base_url: Option<&str>) -> Self {
        match name.to_lowercase().as_str() {
            "openai" => Self::OpenAI,
            "openrouter" => Self::OpenRouter,
            "together" | "togetherai" => Self::TogetherAI,
            "groq" => Self::Groq,
            "ollama" => Self::Ollama,
            _ => base_url.map_or(Self::Generic, Self::detect_from_url),
        }
    }

    /// Default API base URL when the config does not set one.
    #[must_use]
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAI | Self::Generic => "https://api.openai.com",
            Self::OpenRouter => "https://openrouter.ai/api",
            Self::TogetherAI => "https://api.together.xyz",
            Self::Groq => "https://api.groq.com/openai",
            Self::Ollama => "http://localhost:11434",
        }
    }

    /// Build the chat completions URL for this provider.
    #[must_use]
    pub fn build_chat_url(&self, base_url: &str) -> String {
        let base = base_url.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{base}/chat/completions")
        } else {
            format!("{base}/v1/chat/completions")
        }
    }

    /// Extra headers sent with every request.
    #[must_use]
    pub fn extra_headers(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::OpenRouter => &[
                ("X-Title", "llm-mcp-cli"),
                ("HTTP-Referer", "https://github.com/adhikasp/mcp-client-cli"),
            ],
            _ => &[],
        }
    }
}
