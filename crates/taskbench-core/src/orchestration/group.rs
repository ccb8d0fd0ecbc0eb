//! Runs of consecutive same-category tasks that share one entered session.

use std::ops::Range;

use crate::models::{CoreError, CoreErrorKind};
use crate::orchestration::OrchestrationResult;
use crate::orchestration::descriptor::TaskDescriptor;
use crate::persistence::CompletionStore;
use crate::session::{SessionGuard, lock_session, same_session};

/// Splits `items` into maximal runs of equal keys, in input order.
pub fn partition_runs<T, K, F>(items: &[T], mut key: F) -> Vec<Range<usize>>
where
    K: PartialEq,
    F: FnMut(&T) -> K,
{
    let mut runs: Vec<Range<usize>> = Vec::new();
    let mut last_key = None;

    for (index, item) in items.iter().enumerate() {
        let current = key(item);
        match runs.last_mut() {
            Some(run) if last_key.as_ref() == Some(&current) => run.end = index + 1,
            _ => runs.push(index..index + 1),
        }
        last_key = Some(current);
    }

    runs
}

pub struct TaskGroups {
    descriptors: Vec<TaskDescriptor>,
    runs: Vec<Range<usize>>,
}

impl TaskGroups {
    /// Groups descriptors as given; callers order them first.
    pub fn new(descriptors: Vec<TaskDescriptor>) -> Self {
        let runs = partition_runs(&descriptors, |descriptor| descriptor.category().clone());
        Self { descriptors, runs }
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn groups(&self) -> impl Iterator<Item = &[TaskDescriptor]> {
        self.runs.iter().map(|run| &self.descriptors[run.clone()])
    }

    pub fn into_descriptors(self) -> Vec<TaskDescriptor> {
        self.descriptors
    }

    /// Every group must share one session, unless all its sessions are instance-agnostic.
    pub fn check(&self) -> OrchestrationResult<()> {
        for group in self.groups() {
            let first = group[0].task().session();
            let shared = group
                .iter()
                .all(|member| same_session(first, member.task().session()));
            let agnostic = || {
                group
                    .iter()
                    .all(|member| lock_session(member.task().session()).instance_agnostic())
            };

            if !shared && !agnostic() {
                return Err(CoreError::new(
                    CoreErrorKind::Internal,
                    format!(
                        "group '{}' starting at '{}' mixes distinct sessions",
                        group[0].category(),
                        group[0].ident()
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Hands every descriptor to `visit` in order. A group with an unfinished member, or
    /// any group when `ignore` is off, is visited inside its entered session; a finished
    /// group is visited without entering it.
    pub fn run<F>(
        &mut self,
        store: &dyn CompletionStore,
        ignore: bool,
        mut visit: F,
    ) -> OrchestrationResult<()>
    where
        F: FnMut(&mut TaskDescriptor),
    {
        self.check()?;

        for run in self.runs.clone() {
            let members = &mut self.descriptors[run];
            let unfinished = members.iter().any(|member| {
                member.snoop(store).unwrap_or_else(|error| {
                    tracing::warn!(
                        ident = member.ident(),
                        kind = ?error.kind,
                        message = %error.message,
                        "completion lookup failed; treating task as unfinished"
                    );
                    true
                })
            });

            if !unfinished && ignore {
                members.iter_mut().for_each(&mut visit);
                continue;
            }

            let _guard = match SessionGuard::enter(members[0].task().session()) {
                Ok(guard) => Some(guard),
                Err(error) => {
                    tracing::error!(
                        category = %members[0].category(),
                        kind = ?error.kind,
                        message = %error.message,
                        "failed to open group session; tasks will open it themselves"
                    );
                    None
                }
            };
            members.iter_mut().for_each(&mut visit);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{TaskGroups, partition_runs};
    use crate::models::CoreErrorKind;
    use crate::orchestration::fixtures::{finishing_descriptor, stub_session};

    #[test]
    fn runs_cover_input_in_order() {
        let keys = ["a", "a", "b", "a", "c", "c", "c"];
        let runs = partition_runs(&keys, |key| *key);
        assert_eq!(runs, vec![0..2, 2..3, 3..4, 4..7]);
    }

    #[test]
    fn empty_input_has_no_runs() {
        let keys: [u8; 0] = [];
        assert!(partition_runs(&keys, |key| *key).is_empty());
    }

    #[test]
    fn shared_session_passes_the_check() {
        let (_, session) = stub_session(false);
        let groups = TaskGroups::new(vec![
            finishing_descriptor("first", session.clone()),
            finishing_descriptor("second", session),
        ]);

        assert_eq!(groups.len(), 1);
        assert!(groups.check().is_ok());
    }

    #[test]
    fn distinct_sessions_are_rejected_unless_all_are_agnostic() {
        let (_, first) = stub_session(false);
        let (_, second) = stub_session(false);
        let groups = TaskGroups::new(vec![
            finishing_descriptor("first", first),
            finishing_descriptor("second", second),
        ]);
        let error = groups.check().unwrap_err();
        assert_eq!(error.kind, CoreErrorKind::Internal);
        assert!(error.message.contains("shell/first"));

        let (_, first) = stub_session(true);
        let (_, second) = stub_session(false);
        let mixed = TaskGroups::new(vec![
            finishing_descriptor("first", first),
            finishing_descriptor("second", second),
        ]);
        assert!(mixed.check().is_err());

        let (_, first) = stub_session(true);
        let (_, second) = stub_session(true);
        let agnostic = TaskGroups::new(vec![
            finishing_descriptor("first", first),
            finishing_descriptor("second", second),
        ]);
        assert!(agnostic.check().is_ok());
    }
}
