use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::job::DistributionAssignment;
use crate::errors::{ValidationError, ValidationResult};

/// Allowed deviation of a percentage map's total from 100
pub const PERCENT_TOLERANCE: f64 = 0.01;

/// Requested traffic mix for a run
///
/// Each map holds percentages that must sum to 100. Map keys are iterated in
/// sorted order, so the last key of a map absorbs rounding remainders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionSpec {
    pub countries: BTreeMap<String, f64>,
    pub device_types: BTreeMap<String, f64>,
    /// Browser mix applied to every device type without an override
    pub browser_types: BTreeMap<String, f64>,
    /// Per device type browser mixes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub browser_overrides: BTreeMap<String, BTreeMap<String, f64>>,
}

impl DistributionSpec {
    pub fn new(
        countries: BTreeMap<String, f64>,
        device_types: BTreeMap<String, f64>,
        browser_types: BTreeMap<String, f64>,
    ) -> Self {
        Self {
            countries,
            device_types,
            browser_types,
            browser_overrides: BTreeMap::new(),
        }
    }

    /// Build a spec from `(key, percent)` slices
    pub fn from_pairs(
        countries: &[(&str, f64)],
        device_types: &[(&str, f64)],
        browser_types: &[(&str, f64)],
    ) -> Self {
        fn collect(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
            pairs.iter().map(|(k, v)| ((*k).to_string(), *v)).collect()
        }
        Self::new(collect(countries), collect(device_types), collect(browser_types))
    }

    pub fn with_browser_override(mut self, device_type: &str, browsers: &[(&str, f64)]) -> Self {
        self.browser_overrides.insert(
            device_type.to_string(),
            browsers.iter().map(|(k, v)| ((*k).to_string(), *v)).collect(),
        );
        self
    }

    /// Browser mix that applies to `device_type`
    pub fn browsers_for(&self, device_type: &str) -> &BTreeMap<String, f64> {
        self.browser_overrides
            .get(device_type)
            .unwrap_or(&self.browser_types)
    }

    /// Check every percentage map independently
    pub fn validate_percentages(&self) -> ValidationResult<()> {
        validate_map("country", &self.countries)?;
        validate_map("device type", &self.device_types)?;
        validate_map("browser type", &self.browser_types)?;
        for (device_type, browsers) in &self.browser_overrides {
            validate_map(&format!("browser type ({device_type})"), browsers)?;
        }
        Ok(())
    }
}

fn validate_map(dimension: &str, map: &BTreeMap<String, f64>) -> ValidationResult<()> {
    if map.is_empty() {
        return Err(ValidationError::EmptyDimension {
            dimension: dimension.to_string(),
        });
    }
    if let Some((key, value)) = map.iter().find(|(_, v)| !v.is_finite() || **v < 0.0) {
        return Err(ValidationError::InvalidPercentage {
            dimension: dimension.to_string(),
            key: key.clone(),
            value: *value,
        });
    }
    let sum: f64 = map.values().sum();
    if (sum - 100.0).abs() > PERCENT_TOLERANCE {
        return Err(ValidationError::PercentageSum {
            dimension: dimension.to_string(),
            sum,
        });
    }
    Ok(())
}

/// One concrete profile and how many jobs receive it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionMatrixEntry {
    pub country: String,
    pub device_type: String,
    pub device_name: String,
    pub browser_type: String,
    pub count: u64,
}

impl DistributionMatrixEntry {
    pub fn assignment(&self) -> DistributionAssignment {
        DistributionAssignment {
            country: self.country.clone(),
            device_type: self.device_type.clone(),
            device_name: self.device_name.clone(),
            browser_type: self.browser_type.clone(),
        }
    }
}

/// Sum of all entry counts
pub fn matrix_total(entries: &[DistributionMatrixEntry]) -> u64 {
    entries.iter().map(|e| e.count).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_spec_passes() {
        let spec = DistributionSpec::from_pairs(
            &[("us", 33.33), ("uk", 33.33), ("de", 33.34)],
            &[("mobile", 100.0)],
            &[("chrome", 60.0), ("safari", 40.0)],
        );
        assert!(spec.validate_percentages().is_ok());
    }

    #[test]
    fn test_sum_outside_tolerance_fails() {
        let spec = DistributionSpec::from_pairs(
            &[("us", 50.0), ("uk", 49.0)],
            &[("mobile", 100.0)],
            &[("chrome", 100.0)],
        );
        let err = spec.validate_percentages().unwrap_err();
        assert!(matches!(err, ValidationError::PercentageSum { ref dimension, .. } if dimension == "country"));
    }

    #[test]
    fn test_negative_percentage_fails() {
        let spec = DistributionSpec::from_pairs(
            &[("us", 100.0)],
            &[("mobile", 110.0), ("desktop", -10.0)],
            &[("chrome", 100.0)],
        );
        assert!(matches!(
            spec.validate_percentages(),
            Err(ValidationError::InvalidPercentage { .. })
        ));
    }

    #[test]
    fn test_override_is_validated_and_used() {
        let spec = DistributionSpec::from_pairs(
            &[("us", 100.0)],
            &[("mobile", 50.0), ("desktop", 50.0)],
            &[("chrome", 100.0)],
        )
        .with_browser_override("mobile", &[("safari", 70.0), ("chrome", 20.0)]);

        assert!(spec.validate_percentages().is_err());
        assert_eq!(spec.browsers_for("desktop").len(), 1);
        assert_eq!(spec.browsers_for("mobile").len(), 2);
    }

    #[test]
    fn test_empty_map_fails() {
        let spec = DistributionSpec::from_pairs(&[], &[("mobile", 100.0)], &[("chrome", 100.0)]);
        assert!(matches!(
            spec.validate_percentages(),
            Err(ValidationError::EmptyDimension { .. })
        ));
    }
}
