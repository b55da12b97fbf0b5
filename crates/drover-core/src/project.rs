//! Project configuration read from `pubspec.yaml`.
//!
//! ```yaml
//! name: my_app
//! drover:
//!   app_name: My App
//!   test_directory: integration_test
//!   android:
//!     package_name: com.example.my_app
//!   ios:
//!     bundle_id: com.example.MyApp
//!   macos:
//!     bundle_id: com.example.macos.MyApp
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::device::TargetPlatform;
use crate::discovery::{DEFAULT_TEST_DIRECTORY, DEFAULT_TEST_SUFFIX};
use crate::error::DroverError;
use crate::Result;

/// Name of the project manifest.
pub const PUBSPEC_FILE: &str = "pubspec.yaml";

/// Dependency manifest produced by `flutter pub get`.
pub const PACKAGE_CONFIG_PATH: &str = ".dart_tool/package_config.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlatformSection {
    #[serde(default)]
    pub package_name: Option<String>,
    #[serde(default)]
    pub bundle_id: Option<String>,
    #[serde(default)]
    pub app_name: Option<String>,
    #[serde(default)]
    pub flavor: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DroverSection {
    #[serde(default)]
    pub app_name: Option<String>,
    #[serde(default)]
    pub flavor: Option<String>,
    #[serde(default)]
    pub test_directory: Option<String>,
    #[serde(default)]
    pub test_file_suffix: Option<String>,
    #[serde(default)]
    pub android: PlatformSection,
    #[serde(default)]
    pub ios: PlatformSection,
    #[serde(default)]
    pub macos: PlatformSection,
}

#[derive(Debug, Deserialize)]
struct Pubspec {
    name: String,
    #[serde(default)]
    drover: Option<DroverSection>,
}

/// Resolved project configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectConfig {
    pub root: PathBuf,
    /// Host package name (`name:` in the manifest).
    pub package_name: String,
    pub section: DroverSection,
}

impl ProjectConfig {
    /// Load `<root>/pubspec.yaml`.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(PUBSPEC_FILE);
        let content = std::fs::read_to_string(&path).map_err(|e| {
            DroverError::ProjectConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(root, &content)
    }

    pub fn parse(root: &Path, content: &str) -> Result<Self> {
        let pubspec: Pubspec = serde_yaml::from_str(content)?;
        debug!(package = %pubspec.name, "Loaded project configuration");
        Ok(Self {
            root: root.to_path_buf(),
            package_name: pubspec.name,
            section: pubspec.drover.unwrap_or_default(),
        })
    }

    pub fn test_directory(&self) -> &str {
        self.section
            .test_directory
            .as_deref()
            .unwrap_or(DEFAULT_TEST_DIRECTORY)
    }

    pub fn test_file_suffix(&self) -> &str {
        self.section
            .test_file_suffix
            .as_deref()
            .unwrap_or(DEFAULT_TEST_SUFFIX)
    }

    pub fn package_config_path(&self) -> PathBuf {
        self.root.join(PACKAGE_CONFIG_PATH)
    }

    pub fn platform(&self, platform: TargetPlatform) -> &PlatformSection {
        match platform {
            TargetPlatform::Android => &self.section.android,
            TargetPlatform::Ios => &self.section.ios,
            TargetPlatform::Macos => &self.section.macos,
        }
    }

    /// Package name (Android) or bundle identifier (Apple platforms).
    pub fn app_id(&self, platform: TargetPlatform) -> Option<String> {
        let section = self.platform(platform);
        match platform {
            TargetPlatform::Android => section.package_name.clone(),
            TargetPlatform::Ios | TargetPlatform::Macos => section.bundle_id.clone(),
        }
    }

    /// Display name of the app on `platform`, falling back to the shared one.
    pub fn app_name(&self, platform: TargetPlatform) -> Option<String> {
        self.platform(platform)
            .app_name
            .clone()
            .or_else(|| self.section.app_name.clone())
    }

    /// Flavor for `platform`: the explicit one wins over the configured ones.
    pub fn flavor(&self, platform: TargetPlatform, explicit: Option<&str>) -> Option<String> {
        explicit
            .map(str::to_string)
            .or_else(|| self.platform(platform).flavor.clone())
            .or_else(|| self.section.flavor.clone())
    }
}
