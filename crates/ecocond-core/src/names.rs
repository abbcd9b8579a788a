//! Layer and output name rules.

use std::path::Path;

use crate::error::{Error, Result};

pub const MAX_LAYER_NAME: usize = 20;
pub const MAX_SHORT_NAME: usize = 15;

const FORBIDDEN: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// Validate a new layer name used as an output file stem.
pub fn validate_layer_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::Validation("layer name cannot be empty".into()));
    }
    if name.chars().count() > MAX_LAYER_NAME {
        return Err(Error::Validation(format!(
            "layer name '{name}' exceeds {MAX_LAYER_NAME} characters"
        )));
    }
    if name.contains(FORBIDDEN) {
        return Err(Error::Validation(format!(
            "layer name '{name}' contains invalid characters (\\ / : * ? \" < > |)"
        )));
    }
    Ok(name)
}

/// Validate a bare output file name: no separators, nothing that would
/// leave the output folder.
pub fn validate_file_name(name: &str) -> Result<&str> {
    if name.is_empty() || name == "." || name == ".." || name.contains(FORBIDDEN) {
        return Err(Error::Validation(format!(
            "'{name}' is not a valid output file name"
        )));
    }
    Ok(name)
}

/// Validate a short label used in weight tables.
pub fn validate_short_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > MAX_SHORT_NAME {
        return Err(Error::Validation(format!(
            "short name '{name}' must be 1 to {MAX_SHORT_NAME} characters"
        )));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(Error::Validation(format!(
            "short name '{name}' may only contain letters, digits, '_' and '-'"
        )));
    }
    Ok(name)
}

/// Short label derived from a layer name: disallowed characters become
/// `_` and the result is cut to [`MAX_SHORT_NAME`].
pub fn default_short_name(layer_name: &str) -> String {
    layer_name
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .take(MAX_SHORT_NAME)
        .collect()
}

/// File stem of a path, used as the default layer name.
pub fn layer_name_from_path(path: &Path) -> Option<String> {
    path.file_stem().and_then(|s| s.to_str()).map(str::to_string)
}

/// `<prefix><name><suffix>.tif` with stray dots collapsed and a leading `_`
/// trimmed.
pub fn output_file_name(prefix: &str, name: &str, suffix: &str) -> String {
    let raw = format!("{prefix}{name}{suffix}.tif");
    let mut out = raw.trim_matches('.').to_string();
    while out.contains("..") {
        out = out.replace("..", ".");
    }
    out.trim_start_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_name_rules() {
        assert_eq!(validate_layer_name(" ndvi_2020 ").unwrap(), "ndvi_2020");
        assert!(validate_layer_name("").is_err());
        assert!(validate_layer_name("a".repeat(21).as_str()).is_err());
        assert!(validate_layer_name("a".repeat(20).as_str()).is_ok());
        for bad in ["a/b", "a\\b", "a:b", "a*b", "a?b", "a\"b", "a<b", "a>b", "a|b"] {
            assert!(validate_layer_name(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn short_name_rules() {
        assert!(validate_short_name("soil_ph").is_ok());
        assert!(validate_short_name("sixteen_chars_xx").is_err());
        assert!(validate_short_name("with space").is_err());
        assert_eq!(default_short_name("Soil organic carbon"), "Soil_organic_ca");
    }

    #[test]
    fn file_names_must_stay_in_the_output_folder() {
        assert!(validate_file_name("norm_ndvi.tif").is_ok());
        assert!(validate_file_name("sub/ndvi.tif").is_err());
        assert!(validate_file_name(&output_file_name("a\\", "ndvi", "")).is_err());
        assert!(validate_file_name("..").is_err());
        assert!(validate_file_name("").is_err());
    }

    #[test]
    fn output_names_are_cleaned() {
        assert_eq!(output_file_name("", "ndvi", "_fix"), "ndvi_fix.tif");
        assert_eq!(output_file_name("_", "ndvi", ""), "ndvi.tif");
        assert_eq!(output_file_name("", "ndvi.", ".x"), "ndvi.x.tif");
        assert_eq!(output_file_name("norm_", "ndvi", ""), "norm_ndvi.tif");
    }
}
