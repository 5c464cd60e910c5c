//! Local `.app` bundle validation
//!
//! Runs before anything touches the device capability, so a bad path never
//! triggers a capability load.

use std::path::{Path, PathBuf};

use idevhub_core::prelude::*;

use crate::config::BundleSettings;

const MISSING_PATH: &str = "Specified .app path does not exist";
const NOT_AN_APP: &str = "Specified .app path is not a valid app";

/// Checks that a path looks like an installable app bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleValidator {
    markers: Vec<String>,
}

impl Default for BundleValidator {
    fn default() -> Self {
        Self::from(&BundleSettings::default())
    }
}

impl From<&BundleSettings> for BundleValidator {
    fn from(settings: &BundleSettings) -> Self {
        Self::new(settings.markers.clone())
    }
}

impl BundleValidator {
    pub fn new(markers: Vec<String>) -> Self {
        Self { markers }
    }

    pub fn markers(&self) -> &[String] {
        &self.markers
    }

    /// Resolve `path` and check it is a bundle directory
    ///
    /// Returns the canonical path. Fails with [`Error::InvalidBundle`] when the
    /// path is missing, is not a directory, or contains none of the marker files.
    pub fn validate(&self, path: &Path) -> Result<PathBuf> {
        let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());

        if !absolute.exists() {
            return Err(Error::invalid_bundle(absolute, MISSING_PATH));
        }

        let resolved = dunce::canonicalize(&absolute)
            .map_err(|_| Error::invalid_bundle(&absolute, MISSING_PATH))?;

        if !resolved.is_dir() {
            return Err(Error::invalid_bundle(resolved, NOT_AN_APP));
        }

        if !self.markers.is_empty() && !self.markers.iter().any(|m| resolved.join(m).is_file()) {
            debug!(
                "{:?} has none of the bundle markers {:?}",
                resolved, self.markers
            );
            return Err(Error::invalid_bundle(resolved, NOT_AN_APP));
        }

        trace!("Validated bundle {:?}", resolved);
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_bundle(root: &Path, name: &str, marker: Option<&str>) -> PathBuf {
        let bundle = root.join(name);
        std::fs::create_dir_all(&bundle).unwrap();
        if let Some(marker) = marker {
            std::fs::write(bundle.join(marker), "").unwrap();
        }
        bundle
    }

    #[test]
    fn test_missing_path() {
        let err = BundleValidator::default()
            .validate(Path::new("/missing/path/Foo.app"))
            .unwrap_err();

        assert!(matches!(err, Error::InvalidBundle { .. }));
        assert!(err.to_string().starts_with(MISSING_PATH));
    }

    #[test]
    fn test_file_is_not_an_app() {
        let temp = tempdir().unwrap();
        let file = temp.path().join("Foo.app");
        std::fs::write(&file, "not a directory").unwrap();

        let err = BundleValidator::default().validate(&file).unwrap_err();
        assert!(err.to_string().starts_with(NOT_AN_APP));
    }

    #[test]
    fn test_directory_without_marker() {
        let temp = tempdir().unwrap();
        let bundle = make_bundle(temp.path(), "Foo.app", None);

        let err = BundleValidator::default().validate(&bundle).unwrap_err();
        assert!(err.to_string().starts_with(NOT_AN_APP));
    }

    #[test]
    fn test_either_default_marker_is_enough() {
        let temp = tempdir().unwrap();
        let with_pkginfo = make_bundle(temp.path(), "A.app", Some("PkgInfo"));
        let with_plist = make_bundle(temp.path(), "B.app", Some("Info.plist"));

        let validator = BundleValidator::default();
        assert!(validator.validate(&with_pkginfo).is_ok());
        assert!(validator.validate(&with_plist).is_ok());
    }

    #[test]
    fn test_custom_markers() {
        let temp = tempdir().unwrap();
        let bundle = make_bundle(temp.path(), "Foo.app", Some("Info.plist"));

        let validator = BundleValidator::new(vec!["embedded.mobileprovision".to_string()]);
        assert!(validator.validate(&bundle).is_err());

        let permissive = BundleValidator::new(Vec::new());
        assert!(permissive.validate(&bundle).is_ok());
    }

    #[test]
    fn test_returns_canonical_path() {
        let temp = tempdir().unwrap();
        let bundle = make_bundle(temp.path(), "Foo.app", Some("PkgInfo"));
        let dotted = temp.path().join(".").join("Foo.app");

        let resolved = BundleValidator::default().validate(&dotted).unwrap();
        assert_eq!(resolved, dunce::canonicalize(&bundle).unwrap());
    }
}
