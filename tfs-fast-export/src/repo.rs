use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::Path;
use std::rc::Rc;

use rusqlite::{params, Connection};
use serde::Serialize;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

use crate::changeset::{Changeset, FileRow, MergeRow};
use crate::config::{Config, Limits};
use crate::delta::{DeltaApplier, RawDelta};
use crate::error::{ExportError, Result};
use crate::hooks::{Hooks, User, UserIdent};
use crate::pathutil::unmangle;
use crate::scratch::ScratchDir;
use crate::warnings::Warnings;

/// Comment the server writes into changesets whose contents were destroyed.
const TOMBSTONE_COMMENT: &str = "All of the changes in this changeset have been destroyed.";

/// Access to a TFS 2010 version-control database.
///
/// Owns the connection and the scratch storage for its whole scope; the
/// changesets and file changes it hands out are strictly shorter-lived and
/// share both through cheap handles.
pub struct Repository {
    conn: Rc<Connection>,
    scratch: Rc<ScratchDir>,
    hooks: Hooks,
    limits: Limits,
    delta: Rc<dyn DeltaApplier>,
    user_cache: RefCell<HashMap<i64, User>>,
    ident_cache: RefCell<HashMap<i64, UserIdent>>,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository").finish_non_exhaustive()
    }
}

impl Repository {
    /// Open the database named by the configuration and verify it is the
    /// supported schema generation.
    ///
    /// `temp_dir` overrides the configured scratch location when given.
    pub fn open(config: &Config, hooks: Hooks, temp_dir: Option<&Path>) -> Result<Repository> {
        let conn = Connection::open(&config.database)?;
        let supported: bool = conn.query_row(
            "select exists(select 1 from sqlite_master \
             where type = 'table' and name = 'tbl_Identity')",
            [],
            |row| row.get(0),
        )?;
        if !supported {
            return Err(ExportError::SchemaMismatch(
                "accessing newer schema generations has not been implemented".into(),
            ));
        }
        let scratch = match temp_dir.or(config.scratch_dir.as_deref()) {
            Some(dir) => ScratchDir::new(Some(dir), config.scratch_clear)?,
            None => ScratchDir::new(None, false)?,
        };
        Ok(Repository {
            conn: Rc::new(conn),
            scratch: Rc::new(scratch),
            hooks,
            limits: config.limits,
            delta: Rc::new(RawDelta::new(config.accept_legacy_magic)),
            user_cache: RefCell::new(HashMap::new()),
            ident_cache: RefCell::new(HashMap::new()),
        })
    }

    /// Swap in a different delta primitive binding.
    pub fn with_delta(mut self, delta: Rc<dyn DeltaApplier>) -> Self {
        self.delta = delta;
        self
    }

    pub(crate) fn connection(&self) -> &Rc<Connection> {
        &self.conn
    }

    pub(crate) fn scratch(&self) -> &ScratchDir {
        &self.scratch
    }

    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub(crate) fn delta(&self) -> &dyn DeltaApplier {
        &*self.delta
    }

    /// Look up a single user row, cached per internal id.
    pub fn get_user(&self, id: i64) -> Result<User> {
        if let Some(user) = self.user_cache.borrow().get(&id) {
            return Ok(user.clone());
        }
        let user = self.conn.query_row(
            "select c.DomainPart, c.NamePart, c.DisplayPart \
             from Constants c \
             inner join tbl_Identity i on c.TeamFoundationId = i.TeamFoundationId \
             where i.IdentityId = ?1",
            params![id],
            |row| {
                Ok(User {
                    id,
                    domain: row.get(0)?,
                    login: row.get(1)?,
                    display_name: row.get(2)?,
                })
            },
        )?;
        self.user_cache.borrow_mut().insert(id, user.clone());
        Ok(user)
    }

    /// Translate a user through the configured hook, memoized per id.
    pub fn user_ident(&self, user: &User) -> Result<UserIdent> {
        if let Some(ident) = self.ident_cache.borrow().get(&user.id) {
            return Ok(ident.clone());
        }
        let ident = (self.hooks.user_lookup)(user)
            .map_err(|e| ExportError::HookLookup(format!("{user}: {e}")))?;
        self.ident_cache.borrow_mut().insert(user.id, ident.clone());
        Ok(ident)
    }

    /// All users that appear as changeset owners, committers or label owners.
    pub fn active_users(&self) -> Result<Vec<User>> {
        let mut stmt = self.conn.prepare(
            "select OwnerId as UserId from tbl_ChangeSet \
             union \
             select CommitterId as UserId from tbl_ChangeSet \
             union \
             select OwnerId as UserId from tbl_Label",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
        let mut ids = BTreeSet::new();
        for row in rows {
            ids.insert(row?);
        }
        ids.into_iter().map(|id| self.get_user(id)).collect()
    }

    /// Evaluate the branch hooks against every stored path.
    pub fn branches_info(&self) -> Result<BranchesInfo> {
        let mut stmt = self.conn.prepare(
            "select distinct v.FullPath, f.FileLength \
             from tbl_Version v \
             inner join tbl_File f on v.FileId = f.FileId",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut names = BTreeSet::new();
        let mut unassigned = BTreeSet::new();
        let mut assigned: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut ignored: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut oversized: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        for row in rows {
            let (full_path, file_length) = row?;
            let path = unmangle(&full_path);
            let (branch, relpath) = (self.hooks.branch_extract)(&path);
            let Some(branch) = branch else {
                unassigned.insert(path);
                continue;
            };
            names.insert(branch.clone());
            let Some(relpath) = relpath else {
                // The branch root itself carries no relative path.
                continue;
            };
            if (self.hooks.file_filter)(&branch, &relpath) {
                if file_length > self.limits.oversize_warning as i64 {
                    oversized
                        .entry(branch.clone())
                        .or_default()
                        .insert(relpath.clone());
                }
                assigned.entry(branch).or_default().insert(relpath);
            } else {
                ignored.entry(branch).or_default().insert(relpath);
            }
        }

        let to_vecs = |map: BTreeMap<String, BTreeSet<String>>| {
            map.into_iter()
                .map(|(k, v)| (k, v.into_iter().collect()))
                .collect()
        };
        Ok(BranchesInfo {
            names: names.into_iter().collect(),
            unassigned: unassigned.into_iter().collect(),
            assigned_by_branch: to_vecs(assigned),
            ignored_by_branch: to_vecs(ignored),
            oversized_by_branch: to_vecs(oversized),
        })
    }

    /// Iterate over all changesets, fanned out per configured branch, in
    /// ascending changeset id order.
    pub fn changesets(&self) -> Changesets<'_> {
        Changesets {
            repo: self,
            last_id: 0,
            pending: VecDeque::new(),
        }
    }

    /// All labels that can be represented as tags.
    ///
    /// The returned list is sorted by branch, then by label id. Labels that
    /// span more than one changeset on a branch cannot be represented as a
    /// single tag and are skipped with a warning.
    pub fn labels(&self, warnings: &mut Warnings) -> Result<Vec<Label>> {
        let mut stmt = self.conn.prepare(
            "select LabelId, LabelName, Comment, OwnerId, LastModified from tbl_Label",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                LabelRow {
                    name: row.get(1)?,
                    comment: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    owner_id: row.get(3)?,
                    last_modified: row.get(4)?,
                },
            ))
        })?;
        let mut label_rows = HashMap::new();
        for row in rows {
            let (id, label) = row?;
            label_rows.insert(id, label);
        }

        let mut stmt = self.conn.prepare(
            "select le.LabelId, le.VersionFrom, v.FullPath \
             from tbl_LabelEntry le \
             inner join tbl_Version v \
               on v.ItemId = le.ItemId \
               and le.VersionFrom between v.VersionFrom and v.VersionTo \
             order by le.LabelId",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(EntryRow {
                label_id: row.get(0)?,
                version_from: row.get(1)?,
                full_path: row.get(2)?,
            })
        })?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }

        // Split branches and filter files.
        let by_branch = partition_rows(entries, |e| e.full_path.as_str(), &self.hooks);

        let mut branches_by_label: HashMap<i64, BTreeSet<String>> = HashMap::new();
        for (branch, entries) in &by_branch {
            for (entry, _) in entries {
                branches_by_label
                    .entry(entry.label_id)
                    .or_default()
                    .insert(branch.clone());
            }
        }

        let mut labels = Vec::new();
        for (branch, entries) in by_branch {
            let mut idx = 0;
            while idx < entries.len() {
                let label_id = entries[idx].0.label_id;
                let mut versions_from = BTreeSet::new();
                while idx < entries.len() && entries[idx].0.label_id == label_id {
                    versions_from.insert(entries[idx].0.version_from);
                    idx += 1;
                }
                let Some(label_row) = label_rows.get(&label_id) else {
                    continue;
                };
                if versions_from.len() > 1 {
                    warnings.warn(format!(
                        "ignoring label '{}' on branch '{}' because it is assigned to more \
                         than a single changeset ({}). tag fixups are not supported.",
                        label_row.name,
                        branch,
                        versions_from.len()
                    ));
                    continue;
                }
                let Some(&changeset_id) = versions_from.iter().next() else {
                    continue;
                };

                let mut name = label_row.name.clone();
                if branches_by_label
                    .get(&label_id)
                    .map_or(false, |set| set.len() > 1)
                {
                    name.push_str(&format!(" [{branch}]"));
                }

                labels.push(Label {
                    changeset_id,
                    branch: branch.clone(),
                    name,
                    comment: label_row.comment.clone(),
                    user: self.get_user(label_row.owner_id)?,
                    created_at: parse_timestamp(&label_row.last_modified)?,
                });
            }
        }
        Ok(labels)
    }
}

struct LabelRow {
    name: String,
    comment: String,
    owner_id: i64,
    last_modified: String,
}

struct EntryRow {
    label_id: i64,
    version_from: i64,
    full_path: String,
}

/// A label scoped to a single changeset on a single branch.
pub struct Label {
    pub changeset_id: i64,
    pub branch: String,
    pub name: String,
    pub comment: String,
    pub user: User,
    pub created_at: OffsetDateTime,
}

/// Result of evaluating the branch hooks against the stored file list.
#[derive(Debug, Serialize)]
pub struct BranchesInfo {
    pub names: Vec<String>,
    pub unassigned: Vec<String>,
    pub assigned_by_branch: BTreeMap<String, Vec<String>>,
    pub ignored_by_branch: BTreeMap<String, Vec<String>>,
    pub oversized_by_branch: BTreeMap<String, Vec<String>>,
}

/// Pull-based changeset iterator.
///
/// Fetches one changeset header at a time and fans it out into one entry per
/// branch that has at least one surviving file row.
pub struct Changesets<'repo> {
    repo: &'repo Repository,
    last_id: i64,
    pending: VecDeque<PendingChangeset>,
}

struct PendingChangeset {
    id: i64,
    owner_id: i64,
    committer_id: i64,
    created_at: String,
    comment: String,
    branch: String,
    rows: Vec<(FileRow, Option<String>)>,
    merge_rows: Vec<MergeRow>,
}

impl<'repo> Iterator for Changesets<'repo> {
    type Item = Result<Changeset<'repo>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(pending) = self.pending.pop_front() {
                return Some(self.build(pending));
            }
            match self.fetch_next_source_changeset() {
                Ok(true) => continue,
                Ok(false) => return None,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

impl<'repo> Changesets<'repo> {
    /// Advance to the next source changeset and queue its per-branch
    /// fan-out. Returns false at the end of history.
    fn fetch_next_source_changeset(&mut self) -> Result<bool> {
        let conn = self.repo.connection();
        let mut stmt = conn.prepare_cached(
            "select cs.ChangeSetId, cs.OwnerId, cs.CommitterId, cs.CreationDate, cs.Comment, \
               exists(select 1 from tbl_MergeHistory mh \
                      where mh.TargetVersionFrom = cs.ChangeSetId) as MayHaveMerges \
             from tbl_ChangeSet cs \
             where cs.ChangeSetId > ?1 and cs.Comment != ?2 \
             order by cs.ChangeSetId \
             limit 1",
        )?;
        use rusqlite::OptionalExtension;
        let header = stmt
            .query_row(params![self.last_id, TOMBSTONE_COMMENT], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                    row.get::<_, bool>(5)?,
                ))
            })
            .optional()?;
        let Some((id, owner_id, committer_id, created_at, comment, may_have_merges)) = header
        else {
            return Ok(false);
        };
        self.last_id = id;

        let file_rows = self.file_rows_by_branch(id)?;
        let mut merge_rows = if may_have_merges {
            self.merge_rows_by_target_branch(id)?
        } else {
            BTreeMap::new()
        };

        for (branch, rows) in file_rows {
            let merge_rows = merge_rows.remove(&branch).unwrap_or_default();
            self.pending.push_back(PendingChangeset {
                id,
                owner_id,
                committer_id,
                created_at: created_at.clone(),
                comment: comment.clone(),
                branch,
                rows,
                merge_rows,
            });
        }
        Ok(true)
    }

    /// All file rows of a single source changeset, split up into the
    /// configured branches.
    fn file_rows_by_branch(
        &self,
        id: i64,
    ) -> Result<BTreeMap<String, Vec<(FileRow, Option<String>)>>> {
        let conn = self.repo.connection();
        let mut stmt = conn.prepare_cached(
            "select v.FullPath, v.DeletionId, v.FileId, \
               f.FileLength, f.CompressionType, f.ContentType, f.HashValue \
             from tbl_Version v \
             inner join tbl_File f on f.FileId = v.FileId \
             where v.VersionFrom = ?1 and v.FileId is not null",
        )?;
        let rows = stmt.query_map(params![id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                FileRow {
                    deletion_id: row.get(1)?,
                    file_id: row.get(2)?,
                    file_length: row.get(3)?,
                    compression_code: row.get(4)?,
                    content_type_code: row.get(5)?,
                    hash: row.get(6)?,
                },
            ))
        })?;
        let mut collected = Vec::new();
        for row in rows {
            collected.push(row?);
        }
        Ok(partition_rows(
            collected,
            |(full_path, _)| full_path.as_str(),
            &self.repo.hooks,
        )
        .into_iter()
        .map(|(branch, rows)| {
            (
                branch,
                rows.into_iter()
                    .map(|((_, row), relpath)| (row, relpath))
                    .collect(),
            )
        })
        .collect())
    }

    /// All merge rows of a single source changeset, split up into the
    /// configured (target) branches. Renames show up in the merge history
    /// too and are excluded, as are backward merges.
    fn merge_rows_by_target_branch(
        &self,
        id: i64,
    ) -> Result<BTreeMap<String, Vec<MergeRow>>> {
        let conn = self.repo.connection();
        let mut stmt = conn.prepare_cached(
            "select mh.SourceVersionTo, tv.FullPath as TargetFullPath, \
               sv.FullPath as SourceFullPath \
             from tbl_MergeHistory mh \
             inner join tbl_Version tv \
               on mh.TargetItemId = tv.ItemId \
               and mh.TargetVersionFrom = tv.VersionFrom \
               and tv.ItemType = 2 \
             inner join tbl_Version sv \
               on mh.SourceItemId = sv.ItemId \
               and mh.SourceVersionFrom between sv.VersionFrom and sv.VersionTo \
               and mh.SourceVersionFrom < mh.TargetVersionFrom \
             where mh.ForwardMerge = 1 and mh.RenameHistory != 1 \
               and mh.TargetVersionFrom = ?1",
        )?;
        let rows = stmt.query_map(params![id], |row| {
            Ok((
                row.get::<_, String>(1)?,
                MergeRow {
                    source_version_to: row.get(0)?,
                    source_full_path: row.get(2)?,
                },
            ))
        })?;
        let mut collected = Vec::new();
        for row in rows {
            collected.push(row?);
        }
        Ok(partition_rows(
            collected,
            |(target_path, _)| target_path.as_str(),
            &self.repo.hooks,
        )
        .into_iter()
        .map(|(branch, rows)| {
            (
                branch,
                rows.into_iter().map(|((_, row), _)| row).collect(),
            )
        })
        .collect())
    }

    fn build(&self, pending: PendingChangeset) -> Result<Changeset<'repo>> {
        Ok(Changeset::new(
            self.repo,
            pending.id,
            self.repo.get_user(pending.owner_id)?,
            self.repo.get_user(pending.committer_id)?,
            parse_timestamp(&pending.created_at)?,
            pending.comment,
            pending.branch,
            pending.rows,
            pending.merge_rows,
        ))
    }
}

/// Group rows by branch via the branch-extract hook, dropping rows outside
/// any branch and rows whose relative path fails the file filter.
fn partition_rows<T>(
    rows: Vec<T>,
    full_path: impl Fn(&T) -> &str,
    hooks: &Hooks,
) -> BTreeMap<String, Vec<(T, Option<String>)>> {
    let mut result: BTreeMap<String, Vec<(T, Option<String>)>> = BTreeMap::new();
    for row in rows {
        let (branch, relpath) = (hooks.branch_extract)(&unmangle(full_path(&row)));
        let Some(branch) = branch else { continue };
        if let Some(relpath) = &relpath {
            if !(hooks.file_filter)(&branch, relpath) {
                continue;
            }
        }
        result.entry(branch).or_default().push((row, relpath));
    }
    result
}

/// Parse a stored timestamp and tag it as UTC, which is what the server
/// records internally.
pub(crate) fn parse_timestamp(text: &str) -> Result<OffsetDateTime> {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    // Fractional seconds are not significant for the export.
    let text = text.split('.').next().unwrap_or(text);
    let naive = PrimitiveDateTime::parse(text, &format).map_err(|e| {
        ExportError::InvalidOptions(format!("unparsable timestamp '{text}': {e}"))
    })?;
    Ok(naive.assume_utc())
}
