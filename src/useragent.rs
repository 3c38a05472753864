//! Coarse device, browser and OS detection from a `User-Agent` header.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Mobile,
    Tablet,
    Desktop,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    Chrome,
    Firefox,
    Safari,
    Edge,
    Opera,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingSystem {
    Windows,
    MacOs,
    Linux,
    Android,
    Ios,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device: DeviceType,
    pub browser: Browser,
    pub os: OperatingSystem,
}

/// Classify a user agent by substring matching.
///
/// Tokens that embed others are tested first: Edge and Opera advertise
/// Chrome, Chrome advertises Safari, Android advertises Linux and iOS
/// advertises Mac OS.
pub fn parse_user_agent(user_agent: &str) -> DeviceInfo {
    let ua = user_agent.to_ascii_lowercase();
    if ua.trim().is_empty() {
        return DeviceInfo {
            device: DeviceType::Unknown,
            browser: Browser::Unknown,
            os: OperatingSystem::Unknown,
        };
    }

    let has = |needle: &str| ua.contains(needle);

    let device = if has("tablet") || has("ipad") {
        DeviceType::Tablet
    } else if has("mobile") || has("android") || has("iphone") {
        DeviceType::Mobile
    } else {
        DeviceType::Desktop
    };

    let browser = if has("edg") {
        Browser::Edge
    } else if has("opr/") || has("opera") {
        Browser::Opera
    } else if has("chrome") || has("crios") {
        Browser::Chrome
    } else if has("firefox") || has("fxios") {
        Browser::Firefox
    } else if has("safari") {
        Browser::Safari
    } else {
        Browser::Unknown
    };

    let os = if has("android") {
        OperatingSystem::Android
    } else if has("iphone") || has("ipad") || has("ipod") || has("ios") {
        OperatingSystem::Ios
    } else if has("windows") {
        OperatingSystem::Windows
    } else if has("mac") {
        OperatingSystem::MacOs
    } else if has("linux") {
        OperatingSystem::Linux
    } else {
        OperatingSystem::Unknown
    };

    DeviceInfo {
        device,
        browser,
        os,
    }
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Mobile => "mobile",
            DeviceType::Tablet => "tablet",
            DeviceType::Desktop => "desktop",
            DeviceType::Unknown => "unknown",
        }
    }
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chrome => "chrome",
            Browser::Firefox => "firefox",
            Browser::Safari => "safari",
            Browser::Edge => "edge",
            Browser::Opera => "opera",
            Browser::Unknown => "unknown",
        }
    }
}

impl OperatingSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperatingSystem::Windows => "windows",
            OperatingSystem::MacOs => "macos",
            OperatingSystem::Linux => "linux",
            OperatingSystem::Android => "android",
            OperatingSystem::Ios => "ios",
            OperatingSystem::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Browser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for OperatingSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
