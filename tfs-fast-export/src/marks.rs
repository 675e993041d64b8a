use std::collections::HashMap;

/// Allocates the numeric marks that name emitted commits.
///
/// A changeset that fans out into several branch commits gets consecutive
/// marks starting at `changeset_id * 100`; the counter resets whenever a new
/// changeset id shows up. Lookups are answered from a `(changeset, branch)`
/// table, with a per-branch last-mark table for merge sources whose exact
/// changeset can no longer be reconstructed.
#[derive(Default)]
pub struct MarkAllocator {
    marks: HashMap<(i64, String), u64>,
    last_changeset: Option<i64>,
    last_issued: u64,
    last_per_branch: HashMap<String, u64>,
}

impl MarkAllocator {
    pub fn new() -> Self {
        MarkAllocator::default()
    }

    pub fn allocate(&mut self, branch: &str, changeset_id: i64) -> u64 {
        if self.last_changeset != Some(changeset_id) {
            self.last_changeset = Some(changeset_id);
            self.last_issued = (changeset_id as u64) * 100;
        } else {
            self.last_issued += 1;
        }
        let mark = self.last_issued;
        self.marks.insert((changeset_id, branch.to_string()), mark);
        self.last_per_branch.insert(branch.to_string(), mark);
        mark
    }

    pub fn lookup(&self, changeset_id: i64, branch: &str) -> Option<u64> {
        self.marks.get(&(changeset_id, branch.to_string())).copied()
    }

    /// Last mark issued on a branch, regardless of changeset.
    pub fn last_on_branch(&self, branch: &str) -> Option<u64> {
        self.last_per_branch.get(branch).copied()
    }
}
