//! Catalogue of concrete device identities
//!
//! Identities are grouped by device type and rendering engine. Browser keys
//! used in distribution specs resolve to an engine (`safari` renders with
//! `webkit`, `chrome` with `chromium`); unknown keys are treated as engine
//! names themselves.

use std::collections::BTreeMap;

use crate::config::CatalogConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceIdentity {
    pub name: String,
    /// Relative popularity; non-positive weights count as 1
    pub weight: f64,
}

impl DeviceIdentity {
    pub fn effective_weight(&self) -> f64 {
        if self.weight.is_finite() && self.weight > 0.0 {
            self.weight
        } else {
            1.0
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeviceCatalog {
    browser_engines: BTreeMap<String, String>,
    identities: BTreeMap<(String, String), Vec<DeviceIdentity>>,
}

const BUILTIN_ENGINES: &[(&str, &str)] = &[("safari", "webkit"), ("chrome", "chromium")];

const BUILTIN_DEVICES: &[(&str, &str, &[(&str, f64)])] = &[
    (
        "mobile",
        "webkit",
        &[
            ("iPhone 15 Pro Max", 5.0),
            ("iPhone 15", 5.0),
            ("iPhone 14 Pro Max", 4.5),
            ("iPhone 14", 4.0),
            ("iPhone 13 Pro Max", 3.5),
            ("iPhone 13", 4.0),
            ("iPhone 12", 3.5),
            ("iPhone 11", 2.5),
            ("iPhone SE 2022", 2.0),
        ],
    ),
    (
        "mobile",
        "chromium",
        &[
            ("Samsung Galaxy S24 Ultra", 3.5),
            ("Samsung Galaxy S24", 3.5),
            ("Samsung Galaxy S23 Ultra", 3.0),
            ("Samsung Galaxy S22 Ultra", 2.5),
            ("Samsung Galaxy S21", 2.5),
            ("Samsung Galaxy A54", 4.0),
            ("Samsung Galaxy A34", 3.5),
            ("Samsung Galaxy A14", 3.0),
            ("Google Pixel 8 Pro", 2.5),
            ("Google Pixel 8", 2.5),
            ("Google Pixel 7 Pro", 2.0),
            ("Google Pixel 7", 2.0),
            ("Google Pixel 6", 1.5),
            ("Xiaomi 13 Pro", 1.5),
            ("Xiaomi Redmi Note 13 Pro", 2.0),
            ("Xiaomi Redmi Note 12 Pro", 1.5),
            ("Xiaomi Poco X5 Pro", 1.5),
            ("OnePlus 11", 2.0),
            ("OnePlus 9 Pro", 1.5),
            ("OnePlus Nord 3", 1.5),
            ("Oppo Find X6 Pro", 1.0),
            ("Oppo Reno 10 Pro", 1.5),
            ("Motorola Edge 40 Pro", 1.0),
            ("Motorola Moto G84", 1.5),
        ],
    ),
    (
        "tablet",
        "webkit",
        &[("iPad Pro 12.9", 1.5), ("iPad Air", 2.0)],
    ),
    ("tablet", "chromium", &[("Samsung Galaxy Tab S9", 1.5)]),
    (
        "desktop",
        "chromium",
        &[
            ("Windows Chrome", 3.0),
            ("Windows Edge", 2.5),
            ("macOS Chrome", 2.5),
        ],
    ),
    ("desktop", "webkit", &[("macOS Safari", 2.5)]),
];

impl DeviceCatalog {
    /// An empty catalogue; every combination is invalid until identities are added
    pub fn new() -> Self {
        Self::default()
    }

    /// Phones, tablets and desktops for the webkit and chromium engines
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        for (browser, engine) in BUILTIN_ENGINES {
            catalog = catalog.with_browser_engine(browser, engine);
        }
        for (device_type, engine, devices) in BUILTIN_DEVICES {
            for (name, weight) in *devices {
                catalog.add_identity(device_type, engine, name, *weight);
            }
        }
        catalog
    }

    pub fn from_config(config: Option<&CatalogConfig>) -> Self {
        let Some(config) = config else {
            return Self::builtin();
        };

        let mut catalog = if config.include_builtin {
            Self::builtin()
        } else {
            Self::new()
        };
        for (browser, engine) in &config.browser_engines {
            catalog = catalog.with_browser_engine(browser, engine);
        }
        for device in &config.devices {
            catalog.add_identity(&device.device_type, &device.engine, &device.name, device.weight);
        }
        catalog
    }

    pub fn with_browser_engine(mut self, browser: &str, engine: &str) -> Self {
        self.browser_engines
            .insert(browser.to_lowercase(), engine.to_lowercase());
        self
    }

    pub fn with_identity(mut self, device_type: &str, engine: &str, name: &str, weight: f64) -> Self {
        self.add_identity(device_type, engine, name, weight);
        self
    }

    pub fn add_identity(&mut self, device_type: &str, engine: &str, name: &str, weight: f64) {
        let bucket = self
            .identities
            .entry((device_type.to_lowercase(), engine.to_lowercase()))
            .or_default();
        match bucket.iter_mut().find(|d| d.name == name) {
            Some(existing) => existing.weight = weight,
            None => bucket.push(DeviceIdentity {
                name: name.to_string(),
                weight,
            }),
        }
    }

    /// Rendering engine a browser key resolves to
    pub fn engine_for(&self, browser: &str) -> String {
        let key = browser.to_lowercase();
        self.browser_engines.get(&key).cloned().unwrap_or(key)
    }

    /// Identities usable for a device type and browser key, in catalogue order
    pub fn identities(&self, device_type: &str, browser: &str) -> &[DeviceIdentity] {
        self.identities
            .get(&(device_type.to_lowercase(), self.engine_for(browser)))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn supports(&self, device_type: &str, browser: &str) -> bool {
        !self.identities(device_type, browser).is_empty()
    }

    /// Heaviest identity for a combination
    pub fn most_popular(&self, device_type: &str, browser: &str) -> Option<&DeviceIdentity> {
        self.identities(device_type, browser)
            .iter()
            .max_by(|a, b| a.effective_weight().total_cmp(&b.effective_weight()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CatalogDeviceConfig;

    #[test]
    fn test_builtin_resolves_browser_aliases() {
        let catalog = DeviceCatalog::builtin();
        assert_eq!(catalog.engine_for("Safari"), "webkit");
        assert_eq!(catalog.engine_for("chrome"), "chromium");
        assert_eq!(catalog.engine_for("firefox"), "firefox");

        assert_eq!(catalog.identities("mobile", "safari").len(), 9);
        assert_eq!(catalog.identities("mobile", "chrome").len(), 24);
        assert_eq!(catalog.identities("desktop", "safari")[0].name, "macOS Safari");
        assert!(!catalog.supports("mobile", "firefox"));
    }

    #[test]
    fn test_most_popular_identity() {
        let catalog = DeviceCatalog::builtin();
        let top = catalog.most_popular("desktop", "chrome").unwrap();
        assert_eq!(top.name, "Windows Chrome");
    }

    #[test]
    fn test_config_extends_builtin() {
        let config = CatalogConfig {
            include_builtin: true,
            browser_engines: [("firefox".to_string(), "gecko".to_string())].into(),
            devices: vec![CatalogDeviceConfig {
                device_type: "desktop".to_string(),
                engine: "gecko".to_string(),
                name: "Windows Firefox".to_string(),
                weight: 1.5,
            }],
        };
        let catalog = DeviceCatalog::from_config(Some(&config));
        assert!(catalog.supports("desktop", "firefox"));
        assert!(catalog.supports("mobile", "safari"));
    }

    #[test]
    fn test_config_can_replace_builtin() {
        let config = CatalogConfig {
            include_builtin: false,
            browser_engines: BTreeMap::new(),
            devices: vec![CatalogDeviceConfig {
                device_type: "tv".to_string(),
                engine: "webos".to_string(),
                name: "LG C3".to_string(),
                weight: 1.0,
            }],
        };
        let catalog = DeviceCatalog::from_config(Some(&config));
        assert!(catalog.supports("tv", "webos"));
        assert!(!catalog.supports("mobile", "safari"));
    }

    #[test]
    fn test_non_positive_weight_counts_as_one() {
        let identity = DeviceIdentity {
            name: "x".to_string(),
            weight: 0.0,
        };
        assert_eq!(identity.effective_weight(), 1.0);
    }
}
