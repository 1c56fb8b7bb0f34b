use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("URL error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("Date parsing error: {0}")]
    DateError(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP status {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Unrecognized response: {0}")]
    Classification(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

pub type Result<T> = std::result::Result<T, HarvestError>;

impl HarvestError {
    /// 是否应触发回退策略（传输、状态码、无法识别的响应）
    pub fn is_fallback_trigger(&self) -> bool {
        matches!(
            self,
            HarvestError::Transport(_)
                | HarvestError::RequestError(_)
                | HarvestError::HttpStatus { .. }
                | HarvestError::Classification(_)
        )
    }
}

// 用于从字符串创建错误
impl From<String> for HarvestError {
    fn from(s: String) -> Self {
        HarvestError::Unknown(s)
    }
}

impl From<&str> for HarvestError {
    fn from(s: &str) -> Self {
        HarvestError::Unknown(s.to_string())
    }
}
