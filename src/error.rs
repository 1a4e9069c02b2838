#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("unknown skill: {0}")]
    UnknownSkill(String),
    #[error("skill name '{name}' is ambiguous, registered by: {}", origins.join(", "))]
    Ambiguous { name: String, origins: Vec<String> },
    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),
    #[error("skill '{name}' failed: {message}")]
    Skill { name: String, message: String },
    #[error("load error: {0}")]
    Load(String),
}

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("{provider} request failed: {message}")]
    Request { provider: String, message: String },
    #[error("{provider} API returned {status}: {body}")]
    Api {
        provider: String,
        status: u16,
        body: String,
    },
    #[error("failed to parse {provider} response: {message}")]
    Parse { provider: String, message: String },
}

impl AdapterError {
    pub fn request(provider: &str, err: impl std::fmt::Display) -> Self {
        Self::Request {
            provider: provider.into(),
            message: err.to_string(),
        }
    }

    pub fn parse(provider: &str, err: impl std::fmt::Display) -> Self {
        Self::Parse {
            provider: provider.into(),
            message: err.to_string(),
        }
    }
}
