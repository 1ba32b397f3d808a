//! In-flight jobs in start order.

use twin_core::Job;

/// Active jobs. Iteration order is insertion (start) order.
#[derive(Clone, Debug, Default)]
pub struct JobLedger {
    jobs: Vec<Job>,
}

impl JobLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter()
    }

    pub fn get(&self, id: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id.as_str() == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Callers check id uniqueness first.
    pub(crate) fn push(&mut self, job: Job) {
        debug_assert!(!self.contains(job.id.as_str()));
        self.jobs.push(job);
    }

    pub(crate) fn remove(&mut self, id: &str) -> Option<Job> {
        let idx = self.jobs.iter().position(|j| j.id.as_str() == id)?;
        Some(self.jobs.remove(idx))
    }

    /// Decrement every job by one tick and take out the ones that are done,
    /// keeping start order in both the finished and the remaining lists.
    pub(crate) fn progress(&mut self) -> Vec<Job> {
        let mut finished = Vec::new();
        let mut running = Vec::with_capacity(self.jobs.len());
        for mut job in self.jobs.drain(..) {
            job.remaining_duration = job.remaining_duration.saturating_sub(1);
            if job.remaining_duration == 0 {
                finished.push(job);
            } else {
                running.push(job);
            }
        }
        self.jobs = running;
        finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use twin_core::JobId;

    fn job(id: &str, duration: u32) -> Job {
        Job {
            id: JobId::from(id),
            quantity: 1,
            start_tick: 0,
            remaining_duration: duration,
            cost: Decimal::new(50, 0),
            revenue: Decimal::ZERO,
        }
    }

    #[test]
    fn progress_keeps_start_order() {
        let mut l = JobLedger::new();
        l.push(job("b", 2));
        l.push(job("a", 1));
        l.push(job("c", 2));
        let first: Vec<_> = l.progress().into_iter().map(|j| j.id.0).collect();
        assert_eq!(first, vec!["a"]);
        let second: Vec<_> = l.progress().into_iter().map(|j| j.id.0).collect();
        assert_eq!(second, vec!["b", "c"]);
        assert!(l.is_empty());
    }

    #[test]
    fn remove_is_by_id() {
        let mut l = JobLedger::new();
        l.push(job("x", 3));
        l.push(job("y", 3));
        assert!(l.remove("nope").is_none());
        assert_eq!(l.remove("x").map(|j| j.id.0), Some("x".to_string()));
        assert_eq!(l.len(), 1);
        assert!(l.contains("y"));
        assert_eq!(l.get("y").map(|j| j.remaining_duration), Some(3));
    }
}
