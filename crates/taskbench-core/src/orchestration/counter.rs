use std::fmt::{self, Display};

/// Outcome tally for one driver run. Counts only ever go up.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RunCounter {
    passed: usize,
    failed: usize,
    skipped: usize,
    ignored: usize,
}

impl RunCounter {
    pub fn pass(&mut self, ident: &str) {
        self.passed += 1;
        tracing::info!(ident, passed = true, "task finished");
    }

    pub fn fail(&mut self, ident: &str) {
        self.failed += 1;
        tracing::info!(ident, passed = false, "task finished");
    }

    pub fn skip(&mut self, ident: &str, reason: &dyn Display) {
        self.skipped += 1;
        tracing::error!(ident, reason = %reason, "task testing failed; skipped");
    }

    pub fn ignore(&mut self, ident: &str) {
        self.ignored += 1;
        tracing::info!(ident, "task already finished; ignored");
    }

    pub fn passed(&self) -> usize {
        self.passed
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn ignored(&self) -> usize {
        self.ignored
    }

    pub fn total(&self) -> usize {
        self.passed + self.failed + self.skipped + self.ignored
    }
}

impl Display for RunCounter {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "{} total tested: {} passed, {} failed, {} skipped, {} ignored.",
            self.total(),
            self.passed,
            self.failed,
            self.skipped,
            self.ignored
        )
    }
}
