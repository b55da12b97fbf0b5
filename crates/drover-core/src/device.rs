//! Target devices and device resolution.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::DroverError;
use crate::Result;

/// Platform a device runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TargetPlatform {
    Android,
    Ios,
    Macos,
}

impl TargetPlatform {
    /// Lowercase keyword, also accepted as a device selector.
    pub fn name(&self) -> &'static str {
        match self {
            TargetPlatform::Android => "android",
            TargetPlatform::Ios => "ios",
            TargetPlatform::Macos => "macos",
        }
    }
}

impl fmt::Display for TargetPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TargetPlatform::Android => "Android",
            TargetPlatform::Ios => "iOS",
            TargetPlatform::Macos => "macOS",
        };
        write!(f, "{}", label)
    }
}

impl FromStr for TargetPlatform {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "android" => Ok(TargetPlatform::Android),
            "ios" => Ok(TargetPlatform::Ios),
            "macos" | "darwin" => Ok(TargetPlatform::Macos),
            other => Err(format!("unknown platform: {}", other)),
        }
    }
}

/// A concrete device a run targets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Device {
    /// Toolchain identifier (serial, UDID, or `macos`).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    pub platform: TargetPlatform,
    /// `false` for emulators and simulators.
    pub real: bool,
}

impl Device {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        platform: TargetPlatform,
        real: bool,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            platform,
            real,
        }
    }

    /// Whether `selector` picks this device by id, name or platform keyword.
    pub fn matches(&self, selector: &str) -> bool {
        self.id == selector
            || self.name.eq_ignore_ascii_case(selector)
            || self.platform.name().eq_ignore_ascii_case(selector)
    }

    pub fn description(&self) -> String {
        let kind = if self.real { "device" } else { "emulator" };
        format!("{} ({}, {} {})", self.name, self.id, self.platform, kind)
    }
}

/// Enumerates devices currently available to the toolchain.
#[async_trait]
pub trait DeviceLister: Send + Sync {
    async fn list(&self) -> Result<Vec<Device>>;
}

/// Filters listed devices by user selectors.
pub struct DeviceFinder<'a> {
    lister: &'a dyn DeviceLister,
}

impl<'a> DeviceFinder<'a> {
    pub fn new(lister: &'a dyn DeviceLister) -> Self {
        Self { lister }
    }

    /// Devices matching any selector; every device when `selectors` is empty.
    pub async fn find(&self, selectors: &[String]) -> Result<Vec<Device>> {
        let attached = self.lister.list().await?;
        debug!(count = attached.len(), "Listed attached devices");

        if selectors.is_empty() {
            return Ok(attached);
        }

        Ok(attached
            .into_iter()
            .filter(|device| selectors.iter().any(|s| device.matches(s)))
            .collect())
    }

    /// Exactly one device, or `NoDevice` / `AmbiguousDevice`.
    pub async fn find_one(&self, selectors: &[String]) -> Result<Device> {
        let mut matched = self.find(selectors).await?;
        match matched.len() {
            0 => Err(DroverError::NoDevice {
                selectors: selectors.to_vec(),
            }),
            1 => {
                let device = matched.remove(0);
                info!(device = %device.description(), "Resolved target device");
                Ok(device)
            }
            count => Err(DroverError::AmbiguousDevice {
                selectors: selectors.to_vec(),
                count,
                names: matched
                    .iter()
                    .map(|d| d.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<Device>);

    #[async_trait]
    impl DeviceLister for Fixed {
        async fn list(&self) -> Result<Vec<Device>> {
            Ok(self.0.clone())
        }
    }

    fn attached() -> Fixed {
        Fixed(vec![
            Device::new("emulator-5554", "sdk gphone64", TargetPlatform::Android, false),
            Device::new("00008110-AB", "iPhone 15", TargetPlatform::Ios, true),
            Device::new("macos", "macOS", TargetPlatform::Macos, true),
        ])
    }

    #[tokio::test]
    async fn test_find_by_id() {
        let lister = attached();
        let device = DeviceFinder::new(&lister)
            .find_one(&["emulator-5554".to_string()])
            .await
            .unwrap();
        assert_eq!(device.platform, TargetPlatform::Android);
    }

    #[tokio::test]
    async fn test_find_by_name_case_insensitive() {
        let lister = attached();
        let device = DeviceFinder::new(&lister)
            .find_one(&["iphone 15".to_string()])
            .await
            .unwrap();
        assert_eq!(device.id, "00008110-AB");
    }

    #[tokio::test]
    async fn test_find_by_platform_keyword() {
        let lister = attached();
        let found = DeviceFinder::new(&lister)
            .find(&["android".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn test_no_match_is_no_device() {
        let lister = attached();
        let err = DeviceFinder::new(&lister)
            .find_one(&["pixel 9".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, DroverError::NoDevice { .. }));
    }

    #[tokio::test]
    async fn test_empty_list_is_no_device() {
        let lister = Fixed(vec![]);
        let err = DeviceFinder::new(&lister).find_one(&[]).await.unwrap_err();
        assert!(matches!(err, DroverError::NoDevice { .. }));
    }

    #[tokio::test]
    async fn test_multiple_matches_are_ambiguous() {
        let lister = attached();
        let err = DeviceFinder::new(&lister).find_one(&[]).await.unwrap_err();
        match err {
            DroverError::AmbiguousDevice { count, .. } => assert_eq!(count, 3),
            other => panic!("expected AmbiguousDevice, got {:?}", other),
        }
    }

    #[test]
    fn test_platform_from_str() {
        assert_eq!("Android".parse::<TargetPlatform>(), Ok(TargetPlatform::Android));
        assert_eq!("darwin".parse::<TargetPlatform>(), Ok(TargetPlatform::Macos));
        assert!("linux".parse::<TargetPlatform>().is_err());
    }

    #[test]
    fn test_platform_display() {
        assert_eq!(TargetPlatform::Ios.to_string(), "iOS");
        assert_eq!(TargetPlatform::Macos.to_string(), "macOS");
    }
}
