//! Profile file loading, validation and saving.

use crate::error::ConfigError;
use crate::types::Profile;
use std::path::Path;

/// Default profile file name.
pub const PROFILE_FILE_NAME: &str = "opds.toml";

/// Loads and validates a profile from a TOML file.
pub fn load_profile(path: &Path) -> Result<Profile, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    load_profile_from_str(&content)
}

/// Parses and validates a profile from a string.
///
/// Useful for testing without filesystem dependencies.
pub fn load_profile_from_str(content: &str) -> Result<Profile, ConfigError> {
    let profile: Profile =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_profile(&profile)?;
    Ok(profile)
}

/// Writes a profile back to disk, e.g. after a security code was generated.
pub fn save_profile(path: &Path, profile: &Profile) -> Result<(), ConfigError> {
    let content =
        toml::to_string_pretty(profile).map_err(|e| ConfigError::SerializeError(e.to_string()))?;
    std::fs::write(path, content)?;
    tracing::debug!(path = %path.display(), "profile saved");
    Ok(())
}

/// Validates that required fields are present and patterns compile.
fn validate_profile(profile: &Profile) -> Result<(), ConfigError> {
    if profile.library.root.as_os_str().is_empty() {
        return Err(ConfigError::MissingField("library.root".to_string()));
    }
    if profile.output.root.as_os_str().is_empty() {
        return Err(ConfigError::MissingField("output.root".to_string()));
    }
    for pattern in &profile.catalog.tags_to_ignore {
        regex::Regex::new(pattern).map_err(|e| {
            ConfigError::ValidationError(format!("tags_to_ignore pattern '{pattern}': {e}"))
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn parse_minimal_profile() {
        let toml = r#"
[library]
root = "/books"

[output]
root = "/srv/opds"
"#;
        let profile = load_profile_from_str(toml).unwrap();
        assert_eq!(profile.library.root, PathBuf::from("/books"));
        assert_eq!(profile.library.metadata_file, PathBuf::from("metadata.json"));
        assert_eq!(profile.output.catalog_folder, "catalog");
        assert!(!profile.output.crypt_filenames);
        assert!(profile.output.copy_library);
        assert!(profile.output.security_code.is_none());
        assert_eq!(profile.catalog.recent_count, 50);
        assert!(profile.custom_catalogs.is_empty());
    }

    #[test]
    fn parse_full_profile() {
        let toml = r##"
[library]
root = "/books"
metadata_file = "export.json"

[output]
root = "/srv/opds"
catalog_folder = "_catalog"
crypt_filenames = true
security_code = "1f2e3d4c"
copy_library = false

[catalog]
tags_to_ignore = ["TODO", "READ.*"]
forbidden_tags = ["adult"]
featured_tags = ["staff pick"]
book_details_custom_columns = ["#genre", "mood"]
recent_count = 20

[custom_catalogs]
"Short Stories" = ["short story", "anthology"]
"##;
        let profile = load_profile_from_str(toml).unwrap();
        assert_eq!(profile.output.catalog_folder, "_catalog");
        assert!(profile.output.crypt_filenames);
        assert_eq!(profile.output.security_code.as_deref(), Some("1f2e3d4c"));
        assert!(!profile.output.copy_library);
        assert_eq!(profile.catalog.tags_to_ignore.len(), 2);
        assert_eq!(profile.catalog.book_details_custom_columns, vec!["#genre", "mood"]);
        assert_eq!(profile.catalog.recent_count, 20);
        assert_eq!(profile.custom_catalogs["Short Stories"].len(), 2);
    }

    #[test]
    fn missing_library_root_errors() {
        let toml = r#"
[library]
root = ""

[output]
root = "/srv/opds"
"#;
        let err = load_profile_from_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(_)));
    }

    #[test]
    fn missing_output_section_errors() {
        let toml = r#"
[library]
root = "/books"
"#;
        let err = load_profile_from_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn bad_ignore_pattern_errors() {
        let toml = r#"
[library]
root = "/books"

[output]
root = "/srv/opds"

[catalog]
tags_to_ignore = ["(unclosed"]
"#;
        let err = load_profile_from_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn invalid_toml_errors() {
        let err = load_profile_from_str("this is not valid toml {{{}}}").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn save_and_reload_keeps_security_code() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PROFILE_FILE_NAME);
        let mut profile = load_profile_from_str(
            r#"
[library]
root = "/books"

[output]
root = "/srv/opds"
"#,
        )
        .unwrap();
        profile.output.security_code = Some("abcd1234".to_string());
        save_profile(&path, &profile).unwrap();

        let back = load_profile(&path).unwrap();
        assert_eq!(back, profile);
    }

    #[test]
    fn io_error_from_missing_file() {
        let err = load_profile(Path::new("/nonexistent/opds.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }
}
