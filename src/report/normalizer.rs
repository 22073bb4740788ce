use super::{Category, NormalizedReport, RawReport};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Time source for default `observedAt` stamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at one instant, for reproducible runs.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Stamps raw rows with their category and observation time.
///
/// Without an explicit timestamp each row reads the clock on its own, so
/// rows normalized a few milliseconds apart can carry different stamps.
/// The default stamp is epoch milliseconds rendered as a decimal string.
#[derive(Clone)]
pub struct Normalizer {
    clock: Arc<dyn Clock>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl Normalizer {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn normalize(
        &self,
        raw: RawReport,
        category: Category,
        explicit_timestamp: Option<&str>,
    ) -> NormalizedReport {
        let observed_at = match explicit_timestamp {
            Some(stamp) => stamp.to_owned(),
            None => self.clock.now().timestamp_millis().to_string(),
        };
        NormalizedReport::new(raw, category, observed_at)
    }

    /// Normalizes one feed's rows, preserving their order.
    pub fn normalize_all(
        &self,
        rows: Vec<RawReport>,
        category: Category,
        explicit_timestamp: Option<&str>,
    ) -> Vec<NormalizedReport> {
        rows.into_iter()
            .map(|raw| self.normalize(raw, category, explicit_timestamp))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicI64, Ordering};

    /// Advances one millisecond per reading.
    struct TickingClock(AtomicI64);

    impl Clock for TickingClock {
        fn now(&self) -> DateTime<Utc> {
            let ms = self.0.fetch_add(1, Ordering::SeqCst);
            Utc.timestamp_millis_opt(ms).unwrap()
        }
    }

    fn raw_row() -> RawReport {
        [
            ("Time", "1250"),
            ("Size", "100"),
            ("Location", "3 N Provo"),
            ("State", "UT"),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_normalization_is_additive() {
        let clock = FixedClock(Utc.with_ymd_and_hms(2024, 12, 6, 0, 0, 0).unwrap());
        let normalizer = Normalizer::new(Arc::new(clock));
        let raw = raw_row();

        let report = normalizer.normalize(raw.clone(), Category::Hail, None);

        for (name, value) in raw.iter() {
            assert_eq!(report.get(name), Some(value));
        }
        assert_eq!(report.raw(), &raw);
        assert_eq!(report.category(), Category::Hail);
        assert_eq!(report.observed_at(), "1733443200000");
    }

    #[test]
    fn test_explicit_timestamp_used_verbatim_for_every_row() {
        let normalizer = Normalizer::new(Arc::new(TickingClock(AtomicI64::new(0))));
        let rows = vec![raw_row(), raw_row(), raw_row()];

        let reports = normalizer.normalize_all(rows, Category::Wind, Some("1716764227"));

        assert_eq!(reports.len(), 3);
        assert!(reports.iter().all(|r| r.observed_at() == "1716764227"));
    }

    #[test]
    fn test_default_timestamp_read_per_row() {
        let normalizer = Normalizer::new(Arc::new(TickingClock(AtomicI64::new(1_000))));
        let reports = normalizer.normalize_all(vec![raw_row(), raw_row()], Category::Tornado, None);

        assert_eq!(reports[0].observed_at(), "1000");
        assert_eq!(reports[1].observed_at(), "1001");
    }

    #[test]
    fn test_missing_category_fields_stay_absent() {
        let normalizer = Normalizer::default();
        let raw: RawReport = [("Location", "Provo")].into_iter().collect();

        let report = normalizer.normalize(raw, Category::Hail, None);

        assert_eq!(report.get("Size"), None);
        assert_eq!(report.raw().len(), 1);
    }
}
