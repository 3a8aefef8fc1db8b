mod settings;

pub use settings::{
    Config, ConfigError, ServerSettings, DEFAULT_BASE_URL, DEFAULT_CREDENTIAL_HEADER,
    EXAMPLE_CONFIG,
};
