//! Import statistics tracking.

/// Counters for a single import operation.
#[derive(Debug, Clone, Default)]
pub struct ImportStats {
    /// Rows written by upsert statements (inserts and conflict updates).
    pub inserted: usize,
    /// Source records dropped by validation or unresolved required references.
    pub skipped: usize,
    /// Upsert statements attempted.
    pub batches: usize,
    /// Batches discarded after a database error. Only the patient path
    /// continues past these; everywhere else the first failure aborts the run.
    pub failed_batches: usize,
}

impl ImportStats {
    /// Combine counters from another operation by summing.
    pub fn merge(&mut self, other: &ImportStats) {
        self.inserted += other.inserted;
        self.skipped += other.skipped;
        self.batches += other.batches;
        self.failed_batches += other.failed_batches;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_sums_all_counters() {
        let mut total = ImportStats {
            inserted: 10,
            skipped: 1,
            batches: 2,
            failed_batches: 0,
        };
        total.merge(&ImportStats {
            inserted: 5,
            skipped: 2,
            batches: 1,
            failed_batches: 1,
        });

        assert_eq!(total.inserted, 15);
        assert_eq!(total.skipped, 3);
        assert_eq!(total.batches, 3);
        assert_eq!(total.failed_batches, 1);
    }
}
