use std::fmt;

#[derive(Debug)]
pub enum AnchorError {
    InvalidConfiguration(String),
    Css(String),
    Html(String),
    Metadata(String),
    PseudoElementsNotCreated,
    Io(std::io::Error),
}

impl fmt::Display for AnchorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnchorError::InvalidConfiguration(message) => {
                write!(f, "invalid configuration: {}", message)
            }
            AnchorError::Css(message) => write!(f, "css error: {}", message),
            AnchorError::Html(message) => write!(f, "html error: {}", message),
            AnchorError::Metadata(message) => write!(f, "metadata error: {}", message),
            AnchorError::PseudoElementsNotCreated => {
                write!(f, "pseudo-elements queried before they were created")
            }
            AnchorError::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for AnchorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AnchorError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for AnchorError {
    fn from(value: std::io::Error) -> Self {
        AnchorError::Io(value)
    }
}
