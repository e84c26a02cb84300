use std::sync::atomic::{AtomicU64, Ordering};

/// Rule workflow counters exposed at `/metrics`.
#[derive(Default)]
pub struct RuleMetrics {
    pub rules_created: AtomicU64,
    pub rules_updated: AtomicU64,
    pub rules_deleted: AtomicU64,
    pub rules_not_found: AtomicU64,
    pub generation_failures: AtomicU64,
    pub store_failures: AtomicU64,
}

impl RuleMetrics {
    pub fn inc_created(&self) {
        self.rules_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_updated(&self) {
        self.rules_updated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_deleted(&self) {
        self.rules_deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_not_found(&self) {
        self.rules_not_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_generation_failure(&self) {
        self.generation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_store_failure(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Serialize to Prometheus text exposition format.
    pub fn to_prometheus_text(&self) -> String {
        let created = self.rules_created.load(Ordering::Relaxed);
        let updated = self.rules_updated.load(Ordering::Relaxed);
        let deleted = self.rules_deleted.load(Ordering::Relaxed);
        let not_found = self.rules_not_found.load(Ordering::Relaxed);
        let generation = self.generation_failures.load(Ordering::Relaxed);
        let store = self.store_failures.load(Ordering::Relaxed);

        format!(
            "# HELP dq_rules_mutations_total Rule mutations by outcome\n\
             # TYPE dq_rules_mutations_total counter\n\
             dq_rules_mutations_total{{outcome=\"created\"}} {created}\n\
             dq_rules_mutations_total{{outcome=\"updated\"}} {updated}\n\
             dq_rules_mutations_total{{outcome=\"deleted\"}} {deleted}\n\
             dq_rules_mutations_total{{outcome=\"not_found\"}} {not_found}\n\
             # HELP dq_rules_upstream_failures_total Failed calls to external services\n\
             # TYPE dq_rules_upstream_failures_total counter\n\
             dq_rules_upstream_failures_total{{upstream=\"generator\"}} {generation}\n\
             dq_rules_upstream_failures_total{{upstream=\"store\"}} {store}\n"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prometheus_text_reflects_counters() {
        let metrics = RuleMetrics::default();
        metrics.inc_created();
        metrics.inc_created();
        metrics.inc_not_found();
        metrics.inc_generation_failure();

        let text = metrics.to_prometheus_text();
        assert!(text.contains("dq_rules_mutations_total{outcome=\"created\"} 2\n"));
        assert!(text.contains("dq_rules_mutations_total{outcome=\"not_found\"} 1\n"));
        assert!(text.contains("dq_rules_upstream_failures_total{upstream=\"generator\"} 1\n"));
        assert!(text.contains("dq_rules_upstream_failures_total{upstream=\"store\"} 0\n"));
    }
}
