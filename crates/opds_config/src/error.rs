//! Profile errors.

/// Why an `opds.toml` profile could not be loaded or saved.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The profile file could not be read or written.
    #[error("profile I/O: {0}")]
    IoError(#[from] std::io::Error),

    /// Not valid TOML, or a field has the wrong type.
    #[error("profile is not valid TOML: {0}")]
    ParseError(String),

    /// The profile could not be turned back into TOML.
    #[error("cannot serialize profile: {0}")]
    SerializeError(String),

    /// A required setting is empty or absent. Holds its dotted key.
    #[error("profile setting `{0}` is required")]
    MissingField(String),

    /// A setting is present but unusable, such as a bad ignore-tag pattern.
    #[error("invalid profile setting: {0}")]
    ValidationError(String),
}
