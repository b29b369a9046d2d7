/// Overall result of a run, as seen by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    /// Some indices failed, some succeeded: mark the run unstable.
    Degraded,
    Failure,
}

impl RunStatus {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Success => 0,
            RunStatus::Failure => 1,
            RunStatus::Degraded => 2,
        }
    }
}

/// Ordered per-index results of one run.
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    results: Vec<(String, bool)>,
}

impl RunOutcome {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, index: impl Into<String>, ok: bool) {
        self.results.push((index.into(), ok));
    }

    pub fn results(&self) -> &[(String, bool)] {
        &self.results
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|(_, ok)| *ok).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    pub fn failed_indices(&self) -> impl Iterator<Item = &str> {
        self.results
            .iter()
            .filter(|(_, ok)| !*ok)
            .map(|(name, _)| name.as_str())
    }

    /// An empty tally (everything skipped or already in place) is a success.
    pub fn status(&self) -> RunStatus {
        match (self.succeeded(), self.failed()) {
            (_, 0) => RunStatus::Success,
            (0, _) => RunStatus::Failure,
            _ => RunStatus::Degraded,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.status().exit_code()
    }
}
