//! Filename obfuscation.
//!
//! When obfuscation is on, a per-profile random code is mixed into the
//! file name of every generated document and image, so no catalog URL can
//! be guessed without the code.

use opds_config::Profile;

use crate::paths::FOLDER_SEPARATOR;

/// Joins the security code to a document name.
pub const SECURITY_SEPARATOR: char = '_';

/// The catalog's entry document.
pub const INITIAL_URL: &str = "index.json";

/// Generates a fresh random security code.
pub fn generate_security_code() -> String {
    format!("{:x}", rand::random::<u32>())
}

/// Returns the security code for this run.
///
/// The code is empty when obfuscation is disabled. Otherwise the profile's
/// stored code is used, and one is generated and stored into the profile if
/// it has none yet. Callers decide whether to save the profile.
pub fn derive_security_code(profile: &mut Profile) -> String {
    if !profile.output.crypt_filenames {
        return String::new();
    }
    match &profile.output.security_code {
        Some(code) if !code.is_empty() => code.clone(),
        _ => {
            let code = generate_security_code();
            tracing::info!("generated a new security code for the profile");
            profile.output.security_code = Some(code.clone());
            code
        }
    }
}

/// Mixes `security_code` into the file name of `document`, leaving any
/// folder part unchanged. An empty code leaves the name as it is.
pub fn obfuscate(security_code: &str, document: &str) -> String {
    if security_code.is_empty() {
        return document.to_string();
    }
    match document.rsplit_once(FOLDER_SEPARATOR) {
        Some((folder, leaf)) => {
            format!("{folder}{FOLDER_SEPARATOR}{security_code}{SECURITY_SEPARATOR}{leaf}")
        }
        None => format!("{security_code}{SECURITY_SEPARATOR}{document}"),
    }
}

/// The entry document name for a security code.
pub fn initial_url(security_code: &str) -> String {
    obfuscate(security_code, INITIAL_URL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_obfuscation_forces_empty_code() {
        let mut profile = Profile::default();
        profile.output.security_code = Some("cafe".to_string());
        assert_eq!(derive_security_code(&mut profile), "");
        assert_eq!(profile.output.security_code.as_deref(), Some("cafe"));
    }

    #[test]
    fn stored_code_is_reused() {
        let mut profile = Profile::default();
        profile.output.crypt_filenames = true;
        profile.output.security_code = Some("1f2e3d4c".to_string());
        assert_eq!(derive_security_code(&mut profile), "1f2e3d4c");
    }

    #[test]
    fn missing_code_is_generated_once() {
        let mut profile = Profile::default();
        profile.output.crypt_filenames = true;
        let first = derive_security_code(&mut profile);
        assert!(!first.is_empty());
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(profile.output.security_code.as_deref(), Some(first.as_str()));
        assert_eq!(derive_security_code(&mut profile), first);
    }

    #[test]
    fn initial_url_with_and_without_code() {
        assert_eq!(initial_url(""), "index.json");
        assert_eq!(initial_url("beef"), "beef_index.json");
    }

    #[test]
    fn code_goes_into_the_leaf_only() {
        assert_eq!(obfuscate("beef", "Tags/Fantasy.json"), "Tags/beef_Fantasy.json");
        assert_eq!(obfuscate("beef", "images/7/cover.jpg"), "images/7/beef_cover.jpg");
        assert_eq!(obfuscate("beef", "all.json"), "beef_all.json");
        assert_eq!(obfuscate("", "Tags/Fantasy.json"), "Tags/Fantasy.json");
    }
}
