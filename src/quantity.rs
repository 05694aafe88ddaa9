//! Resource quantity arithmetic
//!
//! Parses Kubernetes quantity strings (`250m`, `4Gi`, `1e3`, `1.5G`) into an
//! exact integer representation so that requests and limits can be compared
//! and the Elasticsearch JVM heap can be derived from a memory request.

use crate::error::{OperatorError, Result};
use k8s_openapi::api::core::v1::{ResourceRequirements, VolumeResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::cmp::Ordering;
use std::collections::BTreeMap;

const NANOS_PER_UNIT: i128 = 1_000_000_000;

/// Smallest JVM heap handed to Elasticsearch (2Mi).
pub const MIN_JVM_HEAP_BYTES: i128 = 2_097_152;
/// Largest JVM heap handed to Elasticsearch (26Gi), keeps compressed oops enabled.
pub const MAX_JVM_HEAP_BYTES: i128 = 27_917_287_424;

const BINARY_SUFFIXES: [&str; 7] = ["", "Ki", "Mi", "Gi", "Ti", "Pi", "Ei"];

/// An exact quantity, stored as a count of nano-units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ParsedQuantity(i128);

impl ParsedQuantity {
    /// Parse a quantity string in Kubernetes canonical or non-canonical form.
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = || OperatorError::InvalidQuantity(raw.to_string());
        let s = raw.trim();
        if s.is_empty() {
            return Err(invalid());
        }

        let (negative, unsigned) = match s.as_bytes()[0] {
            b'-' => (true, &s[1..]),
            b'+' => (false, &s[1..]),
            _ => (false, s),
        };

        let split = unsigned
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(unsigned.len());
        let (number, suffix) = unsigned.split_at(split);

        let (int_part, frac_part) = match number.split_once('.') {
            Some((i, f)) => (i, f),
            None => (number, ""),
        };
        if (int_part.is_empty() && frac_part.is_empty()) || frac_part.contains('.') {
            return Err(invalid());
        }

        let digits = format!("{int_part}{frac_part}");
        let mantissa: i128 = digits.parse().map_err(|_| invalid())?;
        let frac_scale = pow10(frac_part.len() as u32).ok_or_else(invalid)?;

        let (mul, div) = suffix_multiplier(suffix).ok_or_else(invalid)?;

        let nanos = mantissa
            .checked_mul(mul)
            .and_then(|v| v.checked_mul(NANOS_PER_UNIT))
            .ok_or_else(invalid)?
            / (frac_scale * div);

        Ok(Self(if negative { -nanos } else { nanos }))
    }

    /// Build a quantity from a whole number of units.
    pub fn from_units(units: i64) -> Self {
        Self(units as i128 * NANOS_PER_UNIT)
    }

    /// Whole units, rounded up.
    pub fn value(&self) -> i64 {
        ceil_div(self.0, NANOS_PER_UNIT) as i64
    }

    fn whole_units_floor(&self) -> i128 {
        self.0.div_euclid(NANOS_PER_UNIT)
    }
}

fn ceil_div(a: i128, b: i128) -> i128 {
    let q = a.div_euclid(b);
    if a.rem_euclid(b) == 0 {
        q
    } else {
        q + 1
    }
}

fn pow10(exp: u32) -> Option<i128> {
    10i128.checked_pow(exp)
}

/// Multiplier for a quantity suffix, as a `(numerator, denominator)` pair.
fn suffix_multiplier(suffix: &str) -> Option<(i128, i128)> {
    let binary = |shift: u32| Some((1i128 << shift, 1));
    match suffix {
        "" => Some((1, 1)),
        "Ki" => binary(10),
        "Mi" => binary(20),
        "Gi" => binary(30),
        "Ti" => binary(40),
        "Pi" => binary(50),
        "Ei" => binary(60),
        "n" => Some((1, 1_000_000_000)),
        "u" => Some((1, 1_000_000)),
        "m" => Some((1, 1_000)),
        "k" => Some((1_000, 1)),
        "M" => Some((1_000_000, 1)),
        "G" => Some((1_000_000_000, 1)),
        "T" => Some((pow10(12)?, 1)),
        "P" => Some((pow10(15)?, 1)),
        "E" => Some((pow10(18)?, 1)),
        s if s.starts_with('e') || s.starts_with('E') => {
            let exp: i32 = s[1..].parse().ok()?;
            if exp >= 0 {
                Some((pow10(exp as u32)?, 1))
            } else {
                Some((1, pow10(exp.unsigned_abs())?))
            }
        }
        _ => None,
    }
}

/// Compare two quantities. `None` when either side fails to parse.
pub fn compare(a: &Quantity, b: &Quantity) -> Option<Ordering> {
    let a = ParsedQuantity::parse(&a.0).ok()?;
    let b = ParsedQuantity::parse(&b.0).ok()?;
    Some(a.cmp(&b))
}

/// Format a byte count using the largest exact binary suffix (`2560Mi`, `976562Ki`).
pub fn format_binary_si(bytes: i128) -> String {
    if bytes == 0 {
        return "0".to_string();
    }
    let mut value = bytes;
    let mut idx = 0;
    while idx < BINARY_SUFFIXES.len() - 1 && value % 1024 == 0 {
        value /= 1024;
        idx += 1;
    }
    format!("{}{}", value, BINARY_SUFFIXES[idx])
}

/// Recommended JVM heap for a memory request, in the unit syntax `-Xms`/`-Xmx` accept.
///
/// Half of the request, floored to a multiple of 1024 and clamped to
/// [`MIN_JVM_HEAP_BYTES`, `MAX_JVM_HEAP_BYTES`]. The binary suffix loses its
/// trailing `i`, so `4Gi` becomes `2G`.
pub fn memory_quantity_to_jvm_heap_size(memory: &Quantity) -> Result<String> {
    let raw = ParsedQuantity::parse(&memory.0)?.whole_units_floor();
    let halved = raw.div_euclid(2);
    let rounded = halved.div_euclid(1024) * 1024;
    let bytes = rounded.clamp(MIN_JVM_HEAP_BYTES, MAX_JVM_HEAP_BYTES);

    let formatted = format_binary_si(bytes);
    Ok(formatted
        .strip_suffix('i')
        .map(str::to_string)
        .unwrap_or(formatted))
}

/// Apply user resource overrides on top of component defaults.
///
/// A user limit without a matching request lowers the default request when
/// the default exceeds the limit. A user request without a matching limit
/// raises the default limit when the default is below the request.
pub fn override_resource_requirements(
    defaults: ResourceRequirements,
    user: &ResourceRequirements,
) -> ResourceRequirements {
    let mut limits = defaults.limits.clone().unwrap_or_default();
    let mut requests = defaults.requests.clone().unwrap_or_default();
    let default_limits = defaults.limits.unwrap_or_default();
    let default_requests = defaults.requests.unwrap_or_default();
    let user_limits = user.limits.clone().unwrap_or_default();
    let user_requests = user.requests.clone().unwrap_or_default();

    for resource in ["cpu", "memory"] {
        let user_limit = user_limits.get(resource);
        let user_request = user_requests.get(resource);

        if let Some(limit) = user_limit {
            limits.insert(resource.to_string(), limit.clone());
            let default_exceeds = default_requests
                .get(resource)
                .and_then(|d| compare(d, limit))
                == Some(Ordering::Greater);
            if user_request.is_none() && default_exceeds {
                requests.insert(resource.to_string(), limit.clone());
            }
        }

        if let Some(request) = user_request {
            requests.insert(resource.to_string(), request.clone());
            let default_below = default_limits
                .get(resource)
                .and_then(|d| compare(d, request))
                == Some(Ordering::Less);
            if user_limit.is_none() && default_below {
                limits.insert(resource.to_string(), request.clone());
            }
        }
    }

    ResourceRequirements {
        limits: non_empty(limits),
        requests: non_empty(requests),
        ..defaults
    }
}

/// Apply user storage overrides on top of the default PVC resources.
///
/// Only the `storage` resource is considered. There is no default storage
/// limit, so a lone user request simply replaces the default request.
pub fn override_pvc_requirements(
    defaults: VolumeResourceRequirements,
    user: &ResourceRequirements,
) -> VolumeResourceRequirements {
    let mut limits = defaults.limits.clone().unwrap_or_default();
    let mut requests = defaults.requests.clone().unwrap_or_default();
    let user_limit = user.limits.as_ref().and_then(|l| l.get("storage"));
    let user_request = user.requests.as_ref().and_then(|r| r.get("storage"));

    if let Some(limit) = user_limit {
        limits = BTreeMap::from([("storage".to_string(), limit.clone())]);
        let default_exceeds = requests
            .get("storage")
            .and_then(|d| compare(d, limit))
            == Some(Ordering::Greater);
        if user_request.is_none() && default_exceeds {
            requests.insert("storage".to_string(), limit.clone());
        }
    }
    if let Some(request) = user_request {
        requests.insert("storage".to_string(), request.clone());
    }

    VolumeResourceRequirements {
        limits: non_empty(limits),
        requests: non_empty(requests),
    }
}

fn non_empty(map: BTreeMap<String, Quantity>) -> Option<BTreeMap<String, Quantity>> {
    if map.is_empty() {
        None
    } else {
        Some(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(s: &str) -> Quantity {
        Quantity(s.to_string())
    }

    fn reqs(limits: &[(&str, &str)], requests: &[(&str, &str)]) -> ResourceRequirements {
        let to_map = |pairs: &[(&str, &str)]| {
            if pairs.is_empty() {
                None
            } else {
                Some(
                    pairs
                        .iter()
                        .map(|(k, v)| (k.to_string(), q(v)))
                        .collect::<BTreeMap<_, _>>(),
                )
            }
        };
        ResourceRequirements {
            limits: to_map(limits),
            requests: to_map(requests),
            ..Default::default()
        }
    }

    fn default_es_resources() -> ResourceRequirements {
        reqs(&[("cpu", "1"), ("memory", "4Gi")], &[("cpu", "250m"), ("memory", "4Gi")])
    }

    #[test]
    fn test_parse_quantities() {
        assert_eq!(ParsedQuantity::parse("4Gi").unwrap().value(), 4 * 1024 * 1024 * 1024);
        assert!(ParsedQuantity::parse("250m").unwrap() < ParsedQuantity::from_units(1));
        assert_eq!(ParsedQuantity::parse("250m").unwrap().value(), 1);
        assert_eq!(ParsedQuantity::parse("1.5Gi").unwrap().value(), 1_610_612_736);
        assert_eq!(ParsedQuantity::parse("1e3").unwrap().value(), 1000);
        assert_eq!(ParsedQuantity::parse("2G").unwrap().value(), 2_000_000_000);
        assert_eq!(ParsedQuantity::parse("100k").unwrap().value(), 100_000);
        assert_eq!(ParsedQuantity::parse(".5").unwrap().value(), 1);
        assert_eq!(
            ParsedQuantity::parse("1Gi").unwrap(),
            ParsedQuantity::from_units(1_073_741_824)
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", "abc", "1.2.3", "4Gb", ".", "1Zi"] {
            assert!(ParsedQuantity::parse(bad).is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn test_compare_across_units() {
        assert_eq!(compare(&q("1"), &q("1000m")), Some(Ordering::Equal));
        assert_eq!(compare(&q("1Gi"), &q("1G")), Some(Ordering::Greater));
        assert_eq!(compare(&q("bogus"), &q("1")), None);
    }

    #[test]
    fn test_format_binary_si() {
        assert_eq!(format_binary_si(2_097_152), "2Mi");
        assert_eq!(format_binary_si(2_684_354_560), "2560Mi");
        assert_eq!(format_binary_si(999_999_488), "976562Ki");
        assert_eq!(format_binary_si(1000), "1000");
    }

    #[test]
    fn test_jvm_heap_halves_request() {
        assert_eq!(memory_quantity_to_jvm_heap_size(&q("4Gi")).unwrap(), "2G");
        assert_eq!(memory_quantity_to_jvm_heap_size(&q("5Gi")).unwrap(), "2560M");
    }

    #[test]
    fn test_jvm_heap_rounds_down_to_1024() {
        assert_eq!(memory_quantity_to_jvm_heap_size(&q("1000000000")).unwrap(), "488281K");
        assert_eq!(memory_quantity_to_jvm_heap_size(&q("5G")).unwrap(), "2441406K");
    }

    #[test]
    fn test_jvm_heap_is_clamped() {
        assert_eq!(memory_quantity_to_jvm_heap_size(&q("1Mi")).unwrap(), "2M");
        assert_eq!(memory_quantity_to_jvm_heap_size(&q("100Gi")).unwrap(), "26G");
        assert!(memory_quantity_to_jvm_heap_size(&q("lots")).is_err());
    }

    #[test]
    fn test_override_limit_lowers_default_request() {
        let user = reqs(&[("memory", "2Gi")], &[]);
        let result = override_resource_requirements(default_es_resources(), &user);
        assert_eq!(result.limits.as_ref().unwrap()["memory"], q("2Gi"));
        assert_eq!(result.requests.as_ref().unwrap()["memory"], q("2Gi"));
        assert_eq!(result.requests.as_ref().unwrap()["cpu"], q("250m"));
    }

    #[test]
    fn test_override_limit_above_default_request_keeps_request() {
        let user = reqs(&[("cpu", "4")], &[]);
        let result = override_resource_requirements(default_es_resources(), &user);
        assert_eq!(result.limits.as_ref().unwrap()["cpu"], q("4"));
        assert_eq!(result.requests.as_ref().unwrap()["cpu"], q("250m"));
    }

    #[test]
    fn test_override_request_raises_default_limit() {
        let user = reqs(&[], &[("cpu", "2"), ("memory", "8Gi")]);
        let result = override_resource_requirements(default_es_resources(), &user);
        assert_eq!(result.limits.as_ref().unwrap()["cpu"], q("2"));
        assert_eq!(result.limits.as_ref().unwrap()["memory"], q("8Gi"));
        assert_eq!(result.requests.as_ref().unwrap()["memory"], q("8Gi"));
    }

    #[test]
    fn test_override_both_taken_verbatim() {
        let user = reqs(&[("memory", "6Gi")], &[("memory", "5Gi")]);
        let result = override_resource_requirements(default_es_resources(), &user);
        assert_eq!(result.limits.as_ref().unwrap()["memory"], q("6Gi"));
        assert_eq!(result.requests.as_ref().unwrap()["memory"], q("5Gi"));
    }

    #[test]
    fn test_override_pvc_requirements() {
        let defaults = || VolumeResourceRequirements {
            limits: None,
            requests: Some(BTreeMap::from([("storage".to_string(), q("10Gi"))])),
        };

        let smaller = override_pvc_requirements(defaults(), &reqs(&[("storage", "5Gi")], &[]));
        assert_eq!(smaller.limits.as_ref().unwrap()["storage"], q("5Gi"));
        assert_eq!(smaller.requests.as_ref().unwrap()["storage"], q("5Gi"));

        let larger = override_pvc_requirements(defaults(), &reqs(&[("storage", "20Gi")], &[]));
        assert_eq!(larger.requests.as_ref().unwrap()["storage"], q("10Gi"));

        let requested = override_pvc_requirements(defaults(), &reqs(&[], &[("storage", "50Gi")]));
        assert!(requested.limits.is_none());
        assert_eq!(requested.requests.as_ref().unwrap()["storage"], q("50Gi"));

        let untouched = override_pvc_requirements(defaults(), &reqs(&[("cpu", "1")], &[]));
        assert_eq!(untouched, defaults());
    }
}
