use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct RegistryMetrics {
    // Queries
    pub total_point_queries: AtomicUsize,
    pub total_hint_hits: AtomicUsize,
    pub total_hint_misses: AtomicUsize,
    pub total_query_time_us: AtomicU64,

    // Mutations
    pub total_claims_created: AtomicUsize,
    pub total_claims_deleted: AtomicUsize,
    pub total_rejections: AtomicUsize,

    // Storage
    pub total_saves: AtomicUsize,
    pub total_save_failures: AtomicUsize,
    pub total_save_time_us: AtomicU64,
    pub max_save_time_us: AtomicU64,

    // Load
    pub total_records_loaded: AtomicUsize,
    pub total_records_skipped: AtomicUsize,
    pub total_records_deleted: AtomicUsize,
    pub total_records_migrated: AtomicUsize,

    // Session
    pub start_time: Option<Instant>,
}

impl RegistryMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn record_point_query(&self, duration: Duration) {
        self.total_point_queries.fetch_add(1, Ordering::Relaxed);
        self.total_query_time_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_hint_hit(&self) {
        self.total_hint_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hint_miss(&self) {
        self.total_hint_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_created(&self) {
        self.total_claims_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deleted(&self, count: usize) {
        self.total_claims_deleted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_rejection(&self) {
        self.total_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_save(&self, duration: Duration, ok: bool) {
        self.total_saves.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.total_save_failures.fetch_add(1, Ordering::Relaxed);
        }
        let us = duration.as_micros() as u64;
        self.total_save_time_us.fetch_add(us, Ordering::Relaxed);
        self.max_save_time_us.fetch_max(us, Ordering::Relaxed);
    }

    pub fn record_loaded(&self) {
        self.total_records_loaded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.total_records_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deleted_record(&self) {
        self.total_records_deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_migrated(&self, count: usize) {
        self.total_records_migrated.fetch_add(count, Ordering::Relaxed);
    }

    pub fn generate_report(&self) -> String {
        let uptime = self.start_time.unwrap_or_else(Instant::now).elapsed();

        let queries = self.total_point_queries.load(Ordering::Relaxed);
        let query_time = self.total_query_time_us.load(Ordering::Relaxed) as f64 / 1000.0; // ms
        let query_avg = if queries > 0 { query_time / queries as f64 } else { 0.0 };

        let hits = self.total_hint_hits.load(Ordering::Relaxed);
        let misses = self.total_hint_misses.load(Ordering::Relaxed);
        let hinted = hits + misses;
        let hit_rate = if hinted > 0 { (hits as f64 / hinted as f64) * 100.0 } else { 0.0 };

        let created = self.total_claims_created.load(Ordering::Relaxed);
        let deleted = self.total_claims_deleted.load(Ordering::Relaxed);
        let rejected = self.total_rejections.load(Ordering::Relaxed);

        let saves = self.total_saves.load(Ordering::Relaxed);
        let failures = self.total_save_failures.load(Ordering::Relaxed);
        let save_time = self.total_save_time_us.load(Ordering::Relaxed) as f64 / 1000.0;
        let save_avg = if saves > 0 { save_time / saves as f64 } else { 0.0 };
        let save_max = self.max_save_time_us.load(Ordering::Relaxed) as f64 / 1000.0;

        let loaded = self.total_records_loaded.load(Ordering::Relaxed);
        let skipped = self.total_records_skipped.load(Ordering::Relaxed);
        let dropped = self.total_records_deleted.load(Ordering::Relaxed);
        let migrated = self.total_records_migrated.load(Ordering::Relaxed);

        format!(
            "Claimguard Registry Report\n\
             ==========================\n\
             Session Duration: {:.2?}\n\n\
             [Queries]\n\
             Point Queries: {}\n\
             Avg Time: {:.3} ms/query\n\
             Hint Hits: {}\n\
             Hint Misses: {}\n\
             Hint Hit Rate: {:.1}%\n\n\
             [Mutations]\n\
             Claims Created: {}\n\
             Claims Deleted: {}\n\
             Rejections: {}\n\n\
             [Storage Write]\n\
             Saves: {}\n\
             Failures: {}\n\
             Avg Time: {:.2} ms/save\n\
             Max Time: {:.2} ms\n\n\
             [Load]\n\
             Records Loaded: {}\n\
             Records Skipped: {}\n\
             Records Deleted: {}\n\
             Records Migrated: {}\n",
            uptime,
            queries, query_avg, hits, misses, hit_rate,
            created, deleted, rejected,
            saves, failures, save_avg, save_max,
            loaded, skipped, dropped, migrated
        )
    }
}
