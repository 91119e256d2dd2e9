use crate::ids;
use crate::state::{Category, LogicalName};
use chrono::{DateTime, NaiveDate, Utc};

/// Day partition for a run: the id's embedded timestamp, else `now`.
pub fn date_partition(verification_id: &str, now: DateTime<Utc>) -> NaiveDate {
    ids::embedded_timestamp(verification_id)
        .unwrap_or(now)
        .date_naive()
}

/// Object key `YYYY/MM/DD/{verification-id}/{category}/{logical-name}`.
pub fn standard_path(
    category: Category,
    name: LogicalName,
    date: NaiveDate,
    verification_id: &str,
) -> String {
    format!(
        "{}/{verification_id}/{}/{}",
        date.format("%Y/%m/%d"),
        category.as_str(),
        name.as_str()
    )
}

/// Key for a later version of the artifact at `standard`: the standard key
/// plus the first 12 hex digits of the content hash.
pub fn versioned_path(standard: &str, content_hash: &str) -> String {
    let digest = content_hash.strip_prefix("sha256:").unwrap_or(content_hash);
    let short: String = digest.chars().take(12).collect();
    format!("{standard}.{short}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn partition_prefers_the_embedded_timestamp() {
        let now = Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(
            date_partition("verif-20250611235959-abcd", now),
            NaiveDate::from_ymd_opt(2025, 6, 11).unwrap()
        );
        assert_eq!(
            date_partition("manual-run", now),
            NaiveDate::from_ymd_opt(2030, 1, 2).unwrap()
        );
    }

    #[test]
    fn standard_path_layout() {
        let date = NaiveDate::from_ymd_opt(2025, 2, 7).unwrap();
        assert_eq!(
            standard_path(
                Category::Responses,
                LogicalName::Turn1RawResponse,
                date,
                "verif-1"
            ),
            "2025/02/07/verif-1/responses/turn1-raw-response"
        );
    }

    #[test]
    fn versions_hang_off_the_standard_key() {
        assert_eq!(
            versioned_path("2025/02/07/verif-1/processing/processing-metrics", "sha256:0123456789abcdef"),
            "2025/02/07/verif-1/processing/processing-metrics.0123456789ab"
        );
    }
}
