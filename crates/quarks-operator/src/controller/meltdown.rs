//! Debounces reconciles of objects which were reconciled a moment ago.
use std::{collections::BTreeMap, time::Duration};

use jiff::Timestamp;

use crate::crd::ANNOTATION_LAST_RECONCILE;

/// Whether `now` is within `window` after the last reconcile recorded in `annotations`. Objects
/// without a parseable timestamp are never in meltdown.
pub fn in_meltdown(
    annotations: &BTreeMap<String, String>,
    window: Duration,
    now: Timestamp,
) -> bool {
    let Some(start) = reconciled_at(annotations) else {
        return false;
    };
    match start.checked_add(window) {
        Ok(end) => start <= now && now <= end,
        Err(_) => start <= now,
    }
}

/// When the object was last reconciled, if `annotations` record it.
pub fn reconciled_at(annotations: &BTreeMap<String, String>) -> Option<Timestamp> {
    annotations
        .get(ANNOTATION_LAST_RECONCILE)
        .and_then(|value| value.parse().ok())
}

/// The annotation recording a reconcile at `now`.
pub fn last_reconcile(now: Timestamp) -> BTreeMap<String, String> {
    [(ANNOTATION_LAST_RECONCILE.to_owned(), now.to_string())].into()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn at(timestamp: &str) -> Timestamp {
        timestamp.parse().expect("timestamp is valid")
    }

    #[rstest]
    #[case("2026-10-16T10:00:30Z", true)]
    #[case("2026-10-16T10:01:00Z", true)]
    #[case("2026-10-16T10:01:01Z", false)]
    #[case("2026-10-16T09:59:59Z", false)]
    fn detects_meltdown(#[case] now: &str, #[case] expected: bool) {
        let annotations = last_reconcile(at("2026-10-16T10:00:00Z"));
        assert_eq!(
            in_meltdown(&annotations, Duration::from_secs(60), at(now)),
            expected
        );
    }

    #[rstest]
    #[case(BTreeMap::new())]
    #[case([(ANNOTATION_LAST_RECONCILE.to_owned(), "yesterday".to_owned())].into())]
    fn objects_without_timestamp_are_not_in_meltdown(
        #[case] annotations: BTreeMap<String, String>,
    ) {
        assert!(!in_meltdown(
            &annotations,
            Duration::from_secs(60),
            at("2026-10-16T10:00:00Z")
        ));
    }

    #[test]
    fn reads_the_recorded_reconcile() {
        let now = at("2026-10-16T10:00:00Z");
        assert_eq!(reconciled_at(&last_reconcile(now)), Some(now));
        assert_eq!(reconciled_at(&BTreeMap::new()), None);
    }
}
