//! Verification id generation and parsing.
//!
//! Ids look like `verif-20250611143005-3fa9`: a fixed prefix, the UTC creation
//! time, and a short random suffix. The embedded timestamp drives the storage
//! date partition so every artifact of a run lands under the same day.
use chrono::{DateTime, NaiveDateTime, Utc};
use uuid::Uuid;

pub const ID_PREFIX: &str = "verif-";
const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";
const TIMESTAMP_LEN: usize = 14;
const SUFFIX_LEN: usize = 4;
const MAX_ID_LEN: usize = 128;

pub fn generate_verification_id(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{ID_PREFIX}{}-{}",
        now.format(TIMESTAMP_FORMAT),
        &suffix[..SUFFIX_LEN]
    )
}

/// Creation time embedded in a generated id, if the id has one.
pub fn embedded_timestamp(verification_id: &str) -> Option<DateTime<Utc>> {
    let rest = verification_id.strip_prefix(ID_PREFIX)?;
    let stamp = rest.get(..TIMESTAMP_LEN)?;
    if !matches!(rest.as_bytes().get(TIMESTAMP_LEN), None | Some(b'-')) {
        return None;
    }
    NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Ids become object key segments, so they must be a single safe path component.
pub fn validate_verification_id(verification_id: &str) -> Result<(), String> {
    if verification_id.trim().is_empty() {
        return Err("verification id is empty".to_string());
    }
    if verification_id.len() > MAX_ID_LEN {
        return Err(format!("verification id exceeds {MAX_ID_LEN} bytes"));
    }
    if verification_id == "." || verification_id == ".." {
        return Err("verification id is a relative path component".to_string());
    }
    if let Some(bad) = verification_id
        .chars()
        .find(|ch| !(ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.')))
    {
        return Err(format!("verification id contains {bad:?}"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn generated_ids_embed_their_creation_time() {
        let now = Utc.with_ymd_and_hms(2025, 6, 11, 14, 30, 5).unwrap();
        let id = generate_verification_id(now);
        assert!(id.starts_with("verif-20250611143005-"), "{id}");
        assert_eq!(id.len(), ID_PREFIX.len() + TIMESTAMP_LEN + 1 + SUFFIX_LEN);
        assert_eq!(embedded_timestamp(&id), Some(now));
        assert!(validate_verification_id(&id).is_ok());
    }

    #[test]
    fn ids_without_a_timestamp_have_no_embedded_time() {
        assert_eq!(embedded_timestamp("run-42"), None);
        assert_eq!(embedded_timestamp("verif-2025"), None);
        assert_eq!(embedded_timestamp("verif-20251399000000-abcd"), None);
        assert_eq!(embedded_timestamp("verif-20250611143005x"), None);
    }

    #[test]
    fn path_unsafe_ids_are_rejected() {
        assert!(validate_verification_id("").is_err());
        assert!(validate_verification_id("..").is_err());
        assert!(validate_verification_id("a/b").is_err());
        assert!(validate_verification_id("run 1").is_err());
        assert!(validate_verification_id("run-1_a.b").is_ok());
    }
}
