use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub bucket: String,
    pub key: String,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Immutable pointer to a stored artifact.
///
/// `size` is signed so that a malformed wire value is caught by
/// [`Reference::validate`] instead of failing deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub location: Location,
    pub size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl Reference {
    pub fn new(bucket: &str, key: &str, size: usize, hash: Option<String>) -> Self {
        Self {
            location: Location {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
            size: i64::try_from(size).unwrap_or(i64::MAX),
            hash,
        }
    }

    /// Structural validity: non-empty bucket and key, non-negative size.
    pub fn validate(&self) -> Result<(), String> {
        if self.location.bucket.trim().is_empty() {
            return Err("empty bucket".to_string());
        }
        if self.location.key.trim().is_empty() {
            return Err("empty key".to_string());
        }
        if self.size < 0 {
            return Err(format!("negative size {}", self.size));
        }
        if let Some(hash) = &self.hash {
            if hash.trim().is_empty() {
                return Err("empty hash".to_string());
            }
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_checks_report_the_first_problem() {
        let good = Reference::new("bucket", "2025/06/11/v/images/metadata", 10, None);
        assert!(good.is_valid());

        let mut bad = good.clone();
        bad.location.bucket = " ".to_string();
        assert_eq!(bad.validate().unwrap_err(), "empty bucket");

        let mut bad = good.clone();
        bad.location.key.clear();
        assert_eq!(bad.validate().unwrap_err(), "empty key");

        let mut bad = good;
        bad.size = -1;
        assert_eq!(bad.validate().unwrap_err(), "negative size -1");
    }

    #[test]
    fn wire_form_omits_absent_hash() {
        let reference = Reference::new("b", "k", 3, None);
        let json = serde_json::to_value(&reference).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"location": {"bucket": "b", "key": "k"}, "size": 3})
        );
        let parsed: Reference =
            serde_json::from_str(r#"{"location":{"bucket":"b","key":"k"},"size":-4}"#).unwrap();
        assert!(!parsed.is_valid());
    }
}
