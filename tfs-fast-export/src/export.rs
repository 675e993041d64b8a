use std::io::Write;

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::blocks::BlockStream;
use crate::error::Result;
use crate::fastimport::{
    Blob, BlobRef, CommitCommand, FileDeleteCommand, FileModifyCommand, PersonIdent,
    ProgressCommand, TagCommand,
};
use crate::hooks::User;
use crate::marks::MarkAllocator;
use crate::pathutil::{to_git_path, to_git_tagname};
use crate::repo::Repository;
use crate::warnings::Warnings;

/// Options of a single fast-export run.
#[derive(Debug, Default)]
pub struct ExportOptions {
    /// Stop emitting commits after this changeset id.
    pub stop_after: Option<i64>,
    /// Do not emit any tags.
    pub skip_tags: bool,
    /// Emit empty blobs instead of file content.
    pub no_content: bool,
    /// Echo progress messages to stdout (used by dry runs).
    pub echo_progress: bool,
}

/// Serialize the full history as a fast-import command stream.
///
/// One left-to-right pass: commits in ascending changeset order, each
/// preceded by a progress line, followed by the tags once every commit they
/// may reference has been emitted.
pub fn fast_export(
    repo: &Repository,
    out: &mut dyn Write,
    warnings: &mut Warnings,
    opts: &ExportOptions,
) -> Result<()> {
    let mut marks = MarkAllocator::new();

    for cs in repo.changesets() {
        let cs = cs?;
        if opts.stop_after.map_or(false, |stop| cs.id > stop) {
            break; // commits are sorted
        }

        let progress = ProgressCommand::new(format!(
            "changeset {}/{} from {}",
            cs.id,
            cs.branch,
            format_timestamp(cs.created_at)
        ))?;
        progress.serialize(out)?;
        if opts.echo_progress {
            println!("{}", progress.message());
        }

        let mut merge_marks = Vec::new();
        for (branch, version) in cs.merges() {
            let resolved = match version {
                Some(version) => marks
                    .lookup(version, &branch)
                    .or_else(|| marks.last_on_branch(&branch)),
                None => marks.last_on_branch(&branch),
            };
            match resolved {
                Some(mark) => merge_marks.push(mark),
                None => warnings.warn(format!(
                    "cannot resolve merge source on branch '{}' for changeset {}/{}",
                    branch, cs.id, cs.branch
                )),
            }
        }

        CommitCommand {
            branch: to_git_path(&cs.branch),
            mark: marks.allocate(&cs.branch, cs.id),
            author: (cs.owner != cs.committer)
                .then(|| who_when(repo, &cs.owner, cs.created_at))
                .transpose()?,
            committer: who_when(repo, &cs.committer, cs.created_at)?,
            message: cs.comment.clone(),
            from: None,
            merges: merge_marks,
        }
        .serialize(out)?;

        for delete in cs.deletes() {
            FileDeleteCommand {
                path: to_git_path(&delete.relpath),
            }
            .serialize(out)?;
        }

        for change in cs.changes() {
            let (length, blocks): (u64, Box<dyn BlockStream>) = if opts.no_content {
                (0, Box::new(crate::blocks::MemoryBlocks::empty()))
            } else {
                let mut length = change.length();
                let mut blocks = change.content()?;
                if let Some(rewrite) = &repo.hooks().content_rewrite {
                    (length, blocks) = rewrite(&cs.branch, change.relpath, length, blocks)?;
                }
                if length >= repo.limits().oversize_warning {
                    warnings.warn(format!(
                        "very large file ({} bytes) in changeset {}/{}: {}",
                        length, cs.id, cs.branch, change.relpath
                    ));
                }
                (length, blocks)
            };
            FileModifyCommand {
                path: to_git_path(change.relpath),
                mode: 0o644,
                content: BlobRef::Inline(Blob {
                    len: length,
                    blocks,
                }),
            }
            .serialize(out)?;
        }
    }

    if !opts.skip_tags {
        for label in repo.labels(warnings)? {
            if opts
                .stop_after
                .map_or(false, |stop| label.changeset_id > stop)
            {
                continue; // tags are not sorted
            }
            let Some(mark) = marks.lookup(label.changeset_id, &label.branch) else {
                warnings.warn(format!(
                    "skipping label '{}' pointing to changeset {}/{} because that \
                     changeset is not migrated",
                    label.name, label.changeset_id, label.branch
                ));
                continue;
            };
            TagCommand {
                name: to_git_tagname(&label.name),
                from: mark,
                tagger: who_when(repo, &label.user, label.created_at)?,
                message: label.comment.clone(),
            }
            .serialize(out)?;
        }
    }

    Ok(())
}

/// Build the identity line payload for a user at a point in time.
fn who_when(repo: &Repository, user: &User, date: OffsetDateTime) -> Result<PersonIdent> {
    let ident = repo.user_ident(user)?;
    Ok(PersonIdent {
        name: ident.display_name,
        email: ident.email,
        secs: date.unix_timestamp(),
        offset_secs: ident.offset.map(|o| o.whole_seconds()).unwrap_or(0),
    })
}

fn format_timestamp(ts: OffsetDateTime) -> String {
    ts.format(&Rfc3339)
        .unwrap_or_else(|_| ts.unix_timestamp().to_string())
}
