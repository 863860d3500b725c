//! Dotted numeric versions and requirement matching.
//!
//! A requirement string is a comma-separated list of comparators, each one
//! of `>= <= == != > <` followed by a version, e.g. `">=0.3,<0.7"`. All
//! comparators must hold.

use crate::PackageError;
use std::cmp::Ordering;
use std::fmt;

/// A dotted numeric version such as `1.2.3`. Missing trailing components
/// compare as zero, so `1.2` equals `1.2.0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version(Vec<u64>);

impl Version {
    pub fn parse(text: &str) -> Result<Self, PackageError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(PackageError::InvalidVersion {
                version: text.to_string(),
            });
        }
        let mut parts = Vec::new();
        for part in text.split('.') {
            let number = part
                .parse::<u64>()
                .map_err(|_| PackageError::InvalidVersion {
                    version: text.to_string(),
                })?;
            parts.push(number);
        }
        Ok(Self(parts))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.0.len().max(other.0.len());
        for i in 0..len {
            let a = self.0.get(i).copied().unwrap_or(0);
            let b = other.0.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        Ordering::Equal
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(u64::to_string).collect();
        write!(f, "{}", parts.join("."))
    }
}

/// Checks an installed version against a comma-separated requirement list.
pub fn version_matches(version: &Version, requirements: &str) -> Result<bool, PackageError> {
    for requirement in requirements.split(',') {
        let requirement = requirement.trim();
        if requirement.is_empty() {
            continue;
        }

        let (comparator, rest): (&str, &str) = if let Some(rest) = requirement.strip_prefix(">=") {
            (">=", rest)
        } else if let Some(rest) = requirement.strip_prefix("<=") {
            ("<=", rest)
        } else if let Some(rest) = requirement.strip_prefix("==") {
            ("==", rest)
        } else if let Some(rest) = requirement.strip_prefix("!=") {
            ("!=", rest)
        } else if let Some(rest) = requirement.strip_prefix('>') {
            (">", rest)
        } else if let Some(rest) = requirement.strip_prefix('<') {
            ("<", rest)
        } else {
            return Err(PackageError::InvalidRequirement {
                requirement: requirement.to_string(),
            });
        };

        let required = Version::parse(rest)?;
        let holds = match comparator {
            ">=" => *version >= required,
            "<=" => *version <= required,
            "==" => *version == required,
            "!=" => *version != required,
            ">" => *version > required,
            "<" => *version < required,
            _ => unreachable!(),
        };
        if !holds {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Splits a dependency spec like `pkg==1.2.3` into a name and an optional
/// requirement list.
pub fn split_requirement(spec: &str) -> (&str, Option<&str>) {
    for (i, c) in spec.char_indices() {
        if matches!(c, '>' | '<' | '=' | '!') {
            return (spec[..i].trim(), Some(spec[i..].trim()));
        }
    }
    (spec.trim(), None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_order_numerically() {
        let v1 = Version::parse("1.2").unwrap();
        let v2 = Version::parse("1.10").unwrap();
        assert!(v1 < v2);
        assert_eq!(Version::parse("1.2").unwrap(), Version::parse("1.2.0").unwrap());
    }

    #[test]
    fn requirement_lists_are_conjunctive() {
        let v = Version::parse("0.5.1").unwrap();
        assert!(version_matches(&v, ">=0.3,<0.7").unwrap());
        assert!(!version_matches(&v, ">=0.3,<0.5").unwrap());
        assert!(version_matches(&v, "!=0.5.0").unwrap());
        assert!(!version_matches(&v, "==0.5.0").unwrap());
        assert!(version_matches(&v, "==0.5.1").unwrap());
    }

    #[test]
    fn malformed_requirements_error() {
        let v = Version::parse("1.0").unwrap();
        assert!(version_matches(&v, "~1.0").is_err());
        assert!(version_matches(&v, ">=abc").is_err());
    }

    #[test]
    fn specs_split_into_name_and_requirement() {
        assert_eq!(split_requirement("pkg==1.2.3"), ("pkg", Some("==1.2.3")));
        assert_eq!(split_requirement("pkg"), ("pkg", None));
        assert_eq!(split_requirement("pkg>=1,<2"), ("pkg", Some(">=1,<2")));
    }
}
