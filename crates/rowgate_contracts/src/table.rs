#![forbid(unsafe_code)]

use std::fmt;

use crate::{ContractViolation, Validate};

pub const STATS_FAMILY: &str = "stats";

/// Retention window for every cell in the stats family: 5 days.
pub const STATS_MAX_AGE_SECONDS: i64 = 60 * 60 * 24 * 5;

const NANOS_PER_SECOND: i32 = 1_000_000_000;
const NANOS_PER_MILLI: i32 = 1_000_000;

fn validate_id_chars(
    field: &'static str,
    id: &str,
    allowed: impl Fn(char) -> bool,
) -> Result<(), ContractViolation> {
    if id.chars().all(allowed) {
        Ok(())
    } else {
        Err(ContractViolation::InvalidValue {
            field,
            reason: "contains a disallowed character",
        })
    }
}

fn validate_len(
    field: &'static str,
    id: &str,
    min: usize,
    max: usize,
) -> Result<(), ContractViolation> {
    if id.len() > max {
        return Err(ContractViolation::InvalidLength {
            field,
            max,
            got: id.len(),
        });
    }
    if id.len() < min {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "too short",
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProjectId(String);

impl ProjectId {
    pub fn new(id: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(id.into());
        v.validate()?;
        Ok(v)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for ProjectId {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_len("project_id", &self.0, 1, 128)?;
        validate_id_chars("project_id", &self.0, |c| {
            c != '/' && !c.is_whitespace()
        })
    }
}

/// Bigtable instance id: `[a-z][a-z0-9-]*[a-z0-9]`, 6 to 33 characters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn new(id: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(id.into());
        v.validate()?;
        Ok(v)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for InstanceId {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_len("instance_id", &self.0, 6, 33)?;
        validate_id_chars("instance_id", &self.0, |c| {
            c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'
        })?;
        let first_ok = self.0.starts_with(|c: char| c.is_ascii_lowercase());
        let last_ok = self.0.ends_with(|c: char| c != '-');
        if !first_ok || !last_ok {
            return Err(ContractViolation::InvalidValue {
                field: "instance_id",
                reason: "must start with a letter and must not end with '-'",
            });
        }
        Ok(())
    }
}

/// Table id: `[_a-zA-Z0-9][-_.a-zA-Z0-9]*`, at most 50 characters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableId(String);

impl TableId {
    pub fn new(id: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(id.into());
        v.validate()?;
        Ok(v)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Validate for TableId {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_len("table_id", &self.0, 1, 50)?;
        if self.0.starts_with(['-', '.']) {
            return Err(ContractViolation::InvalidValue {
                field: "table_id",
                reason: "must not start with '-' or '.'",
            });
        }
        validate_id_chars("table_id", &self.0, |c| {
            c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ColumnFamilyName(String);

impl ColumnFamilyName {
    pub fn new(name: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(name.into());
        v.validate()?;
        Ok(v)
    }

    pub fn stats() -> Self {
        Self(STATS_FAMILY.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ColumnFamilyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Validate for ColumnFamilyName {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_len("column_family", &self.0, 1, 64)?;
        validate_id_chars("column_family", &self.0, |c| {
            c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
        })
    }
}

/// Maximum cell age for an age-based GC rule. The store requires at least
/// one millisecond and millisecond granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MaxAge {
    seconds: i64,
    nanos: i32,
}

impl MaxAge {
    pub fn new(seconds: i64, nanos: i32) -> Result<Self, ContractViolation> {
        let v = Self { seconds, nanos };
        v.validate()?;
        Ok(v)
    }

    pub fn seconds(&self) -> i64 {
        self.seconds
    }

    pub fn nanos(&self) -> i32 {
        self.nanos
    }

    pub fn as_micros(&self) -> i64 {
        self.seconds
            .saturating_mul(1_000_000)
            .saturating_add(i64::from(self.nanos / 1_000))
    }

    /// Protobuf JSON duration form, e.g. `432000s` or `0.001s`.
    pub fn to_proto_duration(&self) -> String {
        if self.nanos == 0 {
            format!("{}s", self.seconds)
        } else {
            let frac = format!("{:09}", self.nanos);
            format!("{}.{}s", self.seconds, frac.trim_end_matches('0'))
        }
    }
}

impl Validate for MaxAge {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.seconds < 0 || !(0..NANOS_PER_SECOND).contains(&self.nanos) {
            return Err(ContractViolation::InvalidValue {
                field: "max_age",
                reason: "seconds must be >= 0 and nanos within [0, 1e9)",
            });
        }
        if self.nanos % NANOS_PER_MILLI != 0 {
            return Err(ContractViolation::InvalidValue {
                field: "max_age",
                reason: "must have millisecond granularity",
            });
        }
        if self.seconds == 0 && self.nanos == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "max_age",
                reason: "must be at least 1 millisecond",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcRule {
    MaxAge(MaxAge),
}

impl GcRule {
    pub fn max_age(&self) -> Option<MaxAge> {
        match self {
            GcRule::MaxAge(age) => Some(*age),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnFamilySpec {
    pub name: ColumnFamilyName,
    pub gc_rule: GcRule,
}

impl ColumnFamilySpec {
    pub fn stats() -> Self {
        Self {
            name: ColumnFamilyName::stats(),
            gc_rule: GcRule::MaxAge(MaxAge {
                seconds: STATS_MAX_AGE_SECONDS,
                nanos: 0,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_table_01_stats_family_keeps_five_days() {
        let family = ColumnFamilySpec::stats();
        assert_eq!(family.name.as_str(), "stats");
        let age = family.gc_rule.max_age().unwrap();
        assert_eq!(age.seconds(), 432_000);
        assert_eq!(age.nanos(), 0);
        assert_eq!(age.to_proto_duration(), "432000s");
    }

    #[test]
    fn at_table_02_max_age_rejects_sub_millisecond() {
        assert!(MaxAge::new(0, 0).is_err());
        assert!(MaxAge::new(0, 500_000).is_err());
        assert!(MaxAge::new(0, 1_000_001).is_err());
        assert!(MaxAge::new(-1, 0).is_err());
        let one_ms = MaxAge::new(0, 1_000_000).unwrap();
        assert_eq!(one_ms.to_proto_duration(), "0.001s");
        assert_eq!(one_ms.as_micros(), 1_000);
    }

    #[test]
    fn at_table_03_table_id_rules() {
        assert!(TableId::new("hono").is_ok());
        assert!(TableId::new("_a.b-c").is_ok());
        assert!(TableId::new("").is_err());
        assert!(TableId::new("-leading").is_err());
        assert!(TableId::new("has space").is_err());
        assert!(TableId::new("x".repeat(51)).is_err());
    }

    #[test]
    fn at_table_04_instance_id_rules() {
        assert!(InstanceId::new("hono-bigtable").is_ok());
        assert!(InstanceId::new("short").is_err());
        assert!(InstanceId::new("1starts-with-digit").is_err());
        assert!(InstanceId::new("ends-with-dash-").is_err());
        assert!(InstanceId::new("Upper-case-id").is_err());
    }

    #[test]
    fn at_table_05_project_and_family_rules() {
        assert!(ProjectId::new("my-project-123").is_ok());
        assert!(ProjectId::new("a/b").is_err());
        assert!(ProjectId::new("").is_err());
        assert!(ColumnFamilyName::new("stats").is_ok());
        assert!(ColumnFamilyName::new("st ats").is_err());
    }
}
