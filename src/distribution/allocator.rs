//! Multi-dimensional proportional allocation
//!
//! Splits a target count by country, then device type, then browser, then
//! concrete device identity. Each level rounds independently, so a final
//! reconciliation pass nudges the largest entries one unit at a time until
//! the matrix sums to the target exactly.

use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use super::catalog::{DeviceCatalog, DeviceIdentity};
use crate::errors::{ValidationError, ValidationResult};
use crate::models::{DistributionMatrixEntry, DistributionSpec, matrix_total};

/// Lower and upper bound of the random factor applied to identity shares
pub const IDENTITY_JITTER_RANGE: (f64, f64) = (0.85, 1.15);

#[derive(Debug, Clone)]
pub struct DistributionAllocator {
    catalog: Arc<DeviceCatalog>,
}

impl DistributionAllocator {
    pub fn new(catalog: Arc<DeviceCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &DeviceCatalog {
        &self.catalog
    }

    /// Check percentages and that every requested device type can be served
    pub fn validate(&self, spec: &DistributionSpec) -> ValidationResult<()> {
        spec.validate_percentages()?;

        for (device_type, pct) in &spec.device_types {
            if *pct > 0.0 && self.valid_browsers(spec, device_type).is_empty() {
                return Err(ValidationError::NoValidBrowser {
                    device_type: device_type.clone(),
                });
            }
        }
        Ok(())
    }

    /// Browsers with a positive share and at least one identity for `device_type`
    fn valid_browsers<'a>(&self, spec: &'a DistributionSpec, device_type: &str) -> Vec<(&'a str, f64)> {
        spec.browsers_for(device_type)
            .iter()
            .filter(|(browser, pct)| **pct > 0.0 && self.catalog.supports(device_type, browser))
            .map(|(browser, pct)| (browser.as_str(), *pct))
            .collect()
    }

    /// Build the distribution matrix for `total` units
    pub fn allocate<R: Rng>(
        &self,
        spec: &DistributionSpec,
        total: u64,
        rng: &mut R,
    ) -> ValidationResult<Vec<DistributionMatrixEntry>> {
        self.validate(spec)?;

        let mut entries = Vec::new();

        for (country, country_pct) in &spec.countries {
            let country_count = round_share(total, *country_pct / 100.0);
            if country_count == 0 {
                continue;
            }

            for (device_type, device_pct) in &spec.device_types {
                let device_count = round_share(country_count, *device_pct / 100.0);
                if device_count == 0 {
                    continue;
                }

                let browsers = self.valid_browsers(spec, device_type);
                let browser_total: f64 = browsers.iter().map(|(_, pct)| pct).sum();
                let mut remaining = device_count;

                for (i, (browser, pct)) in browsers.iter().enumerate() {
                    let browser_count = if i == browsers.len() - 1 {
                        remaining
                    } else {
                        round_share(device_count, pct / browser_total).min(remaining)
                    };
                    remaining -= browser_count;
                    if browser_count == 0 {
                        continue;
                    }

                    let identities = self.catalog.identities(device_type, browser);
                    let counts = split_weighted(browser_count, identities, rng);
                    for (identity, count) in identities.iter().zip(counts) {
                        if count > 0 {
                            entries.push(DistributionMatrixEntry {
                                country: country.clone(),
                                device_type: device_type.clone(),
                                device_name: identity.name.clone(),
                                browser_type: (*browser).to_string(),
                                count,
                            });
                        }
                    }
                }
            }
        }

        if entries.is_empty() && total > 0 {
            if let Some(seed) = self.most_likely_entry(spec) {
                entries.push(seed);
            }
        }

        let before = matrix_total(&entries);
        reconcile(&mut entries, total);
        debug!(
            "Allocated {} units into {} entries (pre-reconciliation total {})",
            total,
            entries.len(),
            before
        );

        Ok(entries)
    }

    /// Zero-count entry for the heaviest country, device, browser and identity
    fn most_likely_entry(&self, spec: &DistributionSpec) -> Option<DistributionMatrixEntry> {
        let country = first_max(&spec.countries)?;
        let servable: BTreeMap<String, f64> = spec
            .device_types
            .iter()
            .filter(|(device, pct)| **pct > 0.0 && !self.valid_browsers(spec, device).is_empty())
            .map(|(device, pct)| (device.clone(), *pct))
            .collect();
        let device_type = first_max(&servable)?;
        let browser = self
            .valid_browsers(spec, device_type)
            .into_iter()
            .fold(None::<(&str, f64)>, |best, (b, pct)| match best {
                Some((_, best_pct)) if best_pct >= pct => best,
                _ => Some((b, pct)),
            })?
            .0;
        let identity = self.catalog.most_popular(device_type, browser)?;

        Some(DistributionMatrixEntry {
            country: country.to_string(),
            device_type: device_type.to_string(),
            device_name: identity.name.clone(),
            browser_type: browser.to_string(),
            count: 0,
        })
    }
}

fn round_share(count: u64, fraction: f64) -> u64 {
    (count as f64 * fraction).round().max(0.0) as u64
}

/// First key holding the largest positive value
fn first_max(map: &BTreeMap<String, f64>) -> Option<&str> {
    map.iter()
        .filter(|(_, v)| **v > 0.0)
        .fold(None::<(&str, f64)>, |best, (k, v)| match best {
            Some((_, best_v)) if best_v >= *v => best,
            _ => Some((k.as_str(), *v)),
        })
        .map(|(k, _)| k)
}

/// Split `count` across identities by weight with a random ±15% factor.
/// The last identity absorbs the remainder; no share is ever negative.
pub fn split_weighted<R: Rng>(count: u64, identities: &[DeviceIdentity], rng: &mut R) -> Vec<u64> {
    if identities.is_empty() {
        return Vec::new();
    }

    let total_weight: f64 = identities.iter().map(DeviceIdentity::effective_weight).sum();
    let (low, high) = IDENTITY_JITTER_RANGE;
    let mut remaining = count;
    let mut counts = Vec::with_capacity(identities.len());

    for (i, identity) in identities.iter().enumerate() {
        if i == identities.len() - 1 {
            counts.push(remaining);
            break;
        }
        let base = (count as f64 * identity.effective_weight() / total_weight).round();
        let jittered = (base * rng.random_range(low..=high)).round().max(0.0) as u64;
        let share = jittered.min(remaining);
        remaining -= share;
        counts.push(share);
    }

    counts
}

/// Adjust counts until they sum to `target`, then drop empty entries.
///
/// Entries are stably sorted by count (largest first) and walked cyclically,
/// adding or removing one unit per step.
pub fn reconcile(entries: &mut Vec<DistributionMatrixEntry>, target: u64) {
    let current = matrix_total(entries);
    if current != target && !entries.is_empty() {
        entries.sort_by(|a, b| b.count.cmp(&a.count));
        let len = entries.len();

        if current < target {
            for step in 0..(target - current) as usize {
                entries[step % len].count += 1;
            }
        } else {
            let mut surplus = current - target;
            let mut cursor = 0;
            while surplus > 0 {
                let entry = &mut entries[cursor % len];
                if entry.count > 0 {
                    entry.count -= 1;
                    surplus -= 1;
                }
                cursor += 1;
            }
        }
    }
    entries.retain(|e| e.count > 0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn entry(name: &str, count: u64) -> DistributionMatrixEntry {
        DistributionMatrixEntry {
            country: "us".to_string(),
            device_type: "mobile".to_string(),
            device_name: name.to_string(),
            browser_type: "chrome".to_string(),
            count,
        }
    }

    fn builtin_allocator() -> DistributionAllocator {
        DistributionAllocator::new(Arc::new(DeviceCatalog::builtin()))
    }

    #[test]
    fn test_reconcile_adds_to_largest_first() {
        let mut entries = vec![entry("a", 1), entry("b", 5), entry("c", 3)];
        reconcile(&mut entries, 11);
        assert_eq!(matrix_total(&entries), 11);
        assert_eq!(entries[0].device_name, "b");
        assert_eq!(entries[0].count, 6);
        assert_eq!(entries[1].count, 4);
    }

    #[test]
    fn test_reconcile_removes_and_drops_empty() {
        let mut entries = vec![entry("a", 1), entry("b", 2)];
        reconcile(&mut entries, 1);
        assert_eq!(matrix_total(&entries), 1);
        assert!(entries.iter().all(|e| e.count > 0));
    }

    #[test]
    fn test_reconcile_to_zero() {
        let mut entries = vec![entry("a", 2), entry("b", 1)];
        reconcile(&mut entries, 0);
        assert!(entries.is_empty());
    }

    #[test]
    fn test_split_weighted_sums_and_is_non_negative() {
        let mut rng = StdRng::seed_from_u64(5);
        let catalog = DeviceCatalog::builtin();
        let identities = catalog.identities("mobile", "chrome");
        for count in [0_u64, 1, 2, 7, 23, 24, 25, 1000] {
            let split = split_weighted(count, identities, &mut rng);
            assert_eq!(split.len(), identities.len());
            assert_eq!(split.iter().sum::<u64>(), count);
        }
    }

    #[test]
    fn test_unsupported_browser_is_renormalized_away() {
        // firefox has no identities; chrome takes the whole device share
        let spec = DistributionSpec::from_pairs(
            &[("us", 100.0)],
            &[("desktop", 100.0)],
            &[("chrome", 50.0), ("firefox", 50.0)],
        );
        let mut rng = StdRng::seed_from_u64(9);
        let entries = builtin_allocator().allocate(&spec, 200, &mut rng).unwrap();

        assert_eq!(matrix_total(&entries), 200);
        assert!(entries.iter().all(|e| e.browser_type == "chrome"));
    }

    #[test]
    fn test_device_without_any_valid_browser_is_rejected() {
        let spec = DistributionSpec::from_pairs(
            &[("us", 100.0)],
            &[("tv", 100.0)],
            &[("chrome", 100.0)],
        );
        let mut rng = StdRng::seed_from_u64(1);
        let err = builtin_allocator().allocate(&spec, 10, &mut rng).unwrap_err();
        assert_eq!(
            err,
            ValidationError::NoValidBrowser {
                device_type: "tv".to_string()
            }
        );
    }

    #[test]
    fn test_tiny_target_is_seeded_with_most_likely_combination() {
        let spec = DistributionSpec::from_pairs(
            &[("de", 33.3), ("fr", 33.4), ("us", 33.3)],
            &[("desktop", 40.0), ("mobile", 60.0)],
            &[("chrome", 70.0), ("safari", 30.0)],
        );
        let mut rng = StdRng::seed_from_u64(2);
        let entries = builtin_allocator().allocate(&spec, 1, &mut rng).unwrap();

        assert_eq!(entries.len(), 1);
        let only = &entries[0];
        assert_eq!(only.count, 1);
        assert_eq!(only.country, "fr");
        assert_eq!(only.device_type, "mobile");
        assert_eq!(only.browser_type, "chrome");
        assert_eq!(only.device_name, "Samsung Galaxy A54");
    }

    #[test]
    fn test_zero_total_yields_no_entries() {
        let spec = DistributionSpec::from_pairs(
            &[("us", 100.0)],
            &[("mobile", 100.0)],
            &[("safari", 100.0)],
        );
        let mut rng = StdRng::seed_from_u64(4);
        let entries = builtin_allocator().allocate(&spec, 0, &mut rng).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_per_device_override() {
        let spec = DistributionSpec::from_pairs(
            &[("us", 100.0)],
            &[("desktop", 50.0), ("mobile", 50.0)],
            &[("chrome", 100.0)],
        )
        .with_browser_override("mobile", &[("safari", 100.0)]);
        let mut rng = StdRng::seed_from_u64(8);
        let entries = builtin_allocator().allocate(&spec, 100, &mut rng).unwrap();

        let mobile_safari: u64 = entries
            .iter()
            .filter(|e| e.device_type == "mobile")
            .inspect(|e| assert_eq!(e.browser_type, "safari"))
            .map(|e| e.count)
            .sum();
        assert_eq!(mobile_safari, 50);
    }
}
