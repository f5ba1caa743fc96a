use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("The selector you are trying to scrape for is invalid. Selector: {0}")]
    InvalidSelector(String),

    #[error("Not authenticated, refusing to issue an API call.")]
    NotAuthenticated,

    #[error("Unsupported thumbnail content type: {0}")]
    UnsupportedContentType(String),

    #[error("Refusing to use {0:?} as a file name")]
    UnsafeKey(String),

    #[error("Io Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Reqwest Error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Invalid header value: {0}")]
    HeaderValue(#[from] reqwest::header::InvalidHeaderValue),

    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Template Error: {0}")]
    Template(#[from] Box<handlebars::TemplateError>),

    #[error("Render Error: {0}")]
    Render(#[from] handlebars::RenderError),
}

impl From<handlebars::TemplateError> for Error {
    fn from(value: handlebars::TemplateError) -> Self {
        Error::Template(Box::new(value))
    }
}
