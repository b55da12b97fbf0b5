//! Per-platform application options handed to the backends.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::defines::DefineMap;
use crate::device::TargetPlatform;

/// Default port of the test server inside the instrumentation runner.
pub const DEFAULT_TEST_SERVER_PORT: u16 = 8081;

/// Default port of the server inside the application under test.
pub const DEFAULT_APP_SERVER_PORT: u16 = 8082;

/// Flutter build mode.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BuildMode {
    #[default]
    Debug,
    Profile,
    Release,
}

impl BuildMode {
    /// Lowercase name, as in `--debug`.
    pub fn name(&self) -> &'static str {
        match self {
            BuildMode::Debug => "debug",
            BuildMode::Profile => "profile",
            BuildMode::Release => "release",
        }
    }

    /// Capitalized name used by Gradle tasks and Xcode configurations.
    pub fn capitalized(&self) -> &'static str {
        match self {
            BuildMode::Debug => "Debug",
            BuildMode::Profile => "Profile",
            BuildMode::Release => "Release",
        }
    }

    /// Xcode configuration for this mode and an optional flavor.
    pub fn xcode_configuration(&self, flavor: Option<&str>) -> String {
        match flavor {
            Some(flavor) => format!("{}-{}", self.capitalized(), flavor),
            None => self.capitalized().to_string(),
        }
    }
}

/// Options shared by every platform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BaseAppOptions {
    /// Generated test bundle used as the build target.
    pub target: PathBuf,
    pub build_mode: BuildMode,
    pub flavor: Option<String>,
    /// Final define map, passed verbatim to the build.
    pub defines: DefineMap,
    pub test_server_port: u16,
    pub app_server_port: u16,
    /// Host port of the coverage endpoint when coverage is collected.
    #[serde(default)]
    pub coverage_port: Option<u16>,
}

impl BaseAppOptions {
    /// `KEY=VALUE` entries in key order.
    pub fn define_pairs(&self) -> Vec<String> {
        self.defines
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AndroidAppOptions {
    pub base: BaseAppOptions,
    pub package_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IosAppOptions {
    pub base: BaseAppOptions,
    pub bundle_id: Option<String>,
    pub scheme: String,
    pub configuration: String,
    /// Build for the simulator SDK instead of a physical device.
    pub simulator: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MacosAppOptions {
    pub base: BaseAppOptions,
    pub bundle_id: Option<String>,
    pub scheme: String,
    pub configuration: String,
}

/// Application options for exactly one platform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "platform", rename_all = "snake_case")]
pub enum AppOptions {
    Android(AndroidAppOptions),
    Ios(IosAppOptions),
    Macos(MacosAppOptions),
}

impl AppOptions {
    /// Build options for `platform`, deriving Xcode scheme and configuration
    /// from the flavor.
    pub fn for_platform(
        platform: TargetPlatform,
        base: BaseAppOptions,
        app_id: Option<String>,
        simulator: bool,
    ) -> Self {
        let scheme = base.flavor.clone().unwrap_or_else(|| "Runner".to_string());
        let configuration = base.build_mode.xcode_configuration(base.flavor.as_deref());
        match platform {
            TargetPlatform::Android => AppOptions::Android(AndroidAppOptions {
                base,
                package_name: app_id,
            }),
            TargetPlatform::Ios => AppOptions::Ios(IosAppOptions {
                base,
                bundle_id: app_id,
                scheme,
                configuration,
                simulator,
            }),
            TargetPlatform::Macos => AppOptions::Macos(MacosAppOptions {
                base,
                bundle_id: app_id,
                scheme,
                configuration,
            }),
        }
    }

    pub fn platform(&self) -> TargetPlatform {
        match self {
            AppOptions::Android(_) => TargetPlatform::Android,
            AppOptions::Ios(_) => TargetPlatform::Ios,
            AppOptions::Macos(_) => TargetPlatform::Macos,
        }
    }

    pub fn base(&self) -> &BaseAppOptions {
        match self {
            AppOptions::Android(o) => &o.base,
            AppOptions::Ios(o) => &o.base,
            AppOptions::Macos(o) => &o.base,
        }
    }

    /// Package name or bundle identifier of the application under test.
    pub fn app_id(&self) -> Option<&str> {
        match self {
            AppOptions::Android(o) => o.package_name.as_deref(),
            AppOptions::Ios(o) => o.bundle_id.as_deref(),
            AppOptions::Macos(o) => o.bundle_id.as_deref(),
        }
    }

    pub fn as_android(&self) -> Option<&AndroidAppOptions> {
        match self {
            AppOptions::Android(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_ios(&self) -> Option<&IosAppOptions> {
        match self {
            AppOptions::Ios(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_macos(&self) -> Option<&MacosAppOptions> {
        match self {
            AppOptions::Macos(o) => Some(o),
            _ => None,
        }
    }
}
