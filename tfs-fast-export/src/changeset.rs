use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::rc::Rc;

use rusqlite::{params, Connection, OptionalExtension};
use time::OffsetDateTime;

use crate::blocks::{collect, BlockStream, MemoryBlocks};
use crate::checksum::Md5Validating;
use crate::decompress::{decompress, Compression};
use crate::error::{ExportError, Result};
use crate::hooks::User;
use crate::pathutil::unmangle;
use crate::repo::Repository;
use crate::scratch;

const CONTENT_TYPE_FULL: i64 = 1;
const CONTENT_TYPE_DELTA: i64 = 2;

/// One file version row of a changeset, joined to its file record.
#[derive(Debug, Clone)]
pub(crate) struct FileRow {
    pub file_id: i64,
    pub deletion_id: i64,
    pub file_length: i64,
    pub compression_code: i64,
    pub content_type_code: i64,
    pub hash: Vec<u8>,
}

/// One merge-history row scoped to a changeset's target branch.
#[derive(Debug, Clone)]
pub(crate) struct MergeRow {
    pub source_version_to: i64,
    pub source_full_path: String,
}

struct FirstChunk {
    content: Vec<u8>,
    has_more: bool,
}

/// A single commit-to-be: one source changeset restricted to one branch.
pub struct Changeset<'repo> {
    repo: &'repo Repository,
    pub id: i64,
    pub owner: User,
    pub committer: User,
    pub created_at: OffsetDateTime,
    pub comment: String,
    pub branch: String,
    rows: Vec<(FileRow, Option<String>)>,
    merge_rows: Vec<MergeRow>,
    first_chunks: RefCell<Option<HashMap<i64, FirstChunk>>>,
}

/// A pending file deletion within a changeset.
pub struct FileDelete {
    pub file_id: i64,
    pub relpath: String,
}

impl<'repo> Changeset<'repo> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        repo: &'repo Repository,
        id: i64,
        owner: User,
        committer: User,
        created_at: OffsetDateTime,
        comment: String,
        branch: String,
        rows: Vec<(FileRow, Option<String>)>,
        merge_rows: Vec<MergeRow>,
    ) -> Self {
        Changeset {
            repo,
            id,
            owner,
            committer,
            created_at,
            comment,
            branch,
            rows,
            merge_rows,
            first_chunks: RefCell::new(None),
        }
    }

    /// Content changes carried by this changeset, in row order.
    pub fn changes(&self) -> impl Iterator<Item = FileChange<'_>> + '_ {
        self.rows.iter().filter_map(move |(row, relpath)| {
            if row.deletion_id != 0 {
                return None;
            }
            relpath.as_deref().map(|relpath| FileChange {
                cs: self,
                row,
                relpath,
            })
        })
    }

    /// File deletions carried by this changeset.
    pub fn deletes(&self) -> impl Iterator<Item = FileDelete> + '_ {
        self.rows.iter().filter_map(|(row, relpath)| {
            if row.deletion_id == 0 {
                return None;
            }
            relpath.as_ref().map(|relpath| FileDelete {
                file_id: row.file_id,
                relpath: relpath.clone(),
            })
        })
    }

    /// Merge sources of this commit as `(source branch, changeset id)` pairs.
    ///
    /// The changeset id is `None` when it cannot be reconstructed any more
    /// (but the branch is known); the driver then falls back to the last
    /// mark seen on that branch.
    pub fn merges(&self) -> Vec<(String, Option<i64>)> {
        let hooks = self.repo.hooks();
        let mut by_branch: BTreeMap<String, Vec<&MergeRow>> = BTreeMap::new();
        for row in &self.merge_rows {
            let (branch, relpath) = (hooks.branch_extract)(&unmangle(&row.source_full_path));
            let Some(branch) = branch else { continue };
            if let Some(relpath) = &relpath {
                if !(hooks.file_filter)(&branch, relpath) {
                    continue;
                }
            }
            by_branch.entry(branch).or_default().push(row);
        }
        by_branch
            .into_iter()
            .map(|(branch, rows)| {
                let newest = rows
                    .iter()
                    .map(|r| r.source_version_to)
                    .filter(|v| *v < self.id)
                    .max();
                (branch, newest)
            })
            .collect()
    }

    fn conn(&self) -> &Rc<Connection> {
        self.repo.connection()
    }

    /// Stream the stored (still compressed) chunk sequence of a file.
    ///
    /// The first chunk row of every file touched by this changeset is
    /// fetched once, together with a marker telling whether more chunks
    /// exist; single-chunk files then avoid a second query entirely.
    fn content_blocks_for(&self, file_id: i64) -> Result<Box<dyn BlockStream>> {
        let mut cache = self.first_chunks.borrow_mut();
        if cache.is_none() {
            *cache = Some(self.load_first_chunks()?);
        }
        let map = cache.get_or_insert_with(HashMap::new);
        match map.get(&file_id) {
            Some(chunk) if !chunk.has_more => {
                Ok(Box::new(MemoryBlocks::new(vec![chunk.content.clone()])))
            }
            Some(_) => Ok(Box::new(ChunkBlocks::new(self.conn().clone(), file_id))),
            None => Err(ExportError::SchemaMismatch(format!(
                "no content rows for file {file_id} in changeset {}",
                self.id
            ))),
        }
    }

    fn load_first_chunks(&self) -> Result<HashMap<i64, FirstChunk>> {
        let mut stmt = self.conn().prepare_cached(
            "select c.FileId, c.Content, \
               exists(select 1 from tbl_Content c1 \
                      where c1.FileId = c.FileId and c1.OffsetFrom <> 0) as HasMoreBlocks \
             from tbl_Content c \
             inner join tbl_Version v on v.FileId = c.FileId \
             where v.VersionFrom = ?1 and c.OffsetFrom = 0",
        )?;
        let rows = stmt.query_map(params![self.id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                FirstChunk {
                    content: row.get(1)?,
                    has_more: row.get(2)?,
                },
            ))
        })?;
        let mut map = HashMap::new();
        for row in rows {
            let (file_id, chunk) = row?;
            map.insert(file_id, chunk);
        }
        Ok(map)
    }
}

/// A file content change inside of a single commit.
pub struct FileChange<'cs> {
    cs: &'cs Changeset<'cs>,
    row: &'cs FileRow,
    pub relpath: &'cs str,
}

impl FileChange<'_> {
    pub fn file_id(&self) -> i64 {
        self.row.file_id
    }

    pub fn length(&self) -> u64 {
        self.row.file_length.max(0) as u64
    }

    /// Materialize the file body as a checksum-validated block stream.
    ///
    /// Full-text revisions decompress straight out of the chunk store; delta
    /// revisions are reconstructed through the chain walk first and then
    /// streamed back from scratch storage. Either way the stream verifies
    /// the recorded MD5 at end-of-stream.
    pub fn content(&self) -> Result<Box<dyn BlockStream>> {
        let file_id = self.row.file_id;
        let blocks: Box<dyn BlockStream> = match self.row.content_type_code {
            CONTENT_TYPE_FULL => decompress(
                Compression::from_code(self.row.compression_code)?,
                self.cs.content_blocks_for(file_id)?,
            ),
            CONTENT_TYPE_DELTA => {
                let scratch_dir = self.cs.repo.scratch();
                let name = file_id.to_string();
                if !scratch_dir.exists(&name)? {
                    self.unpack_deltas_to_scratch()?;
                }
                Box::new(scratch_dir.read(&name, scratch::READ_BLOCK_SIZE, true)?)
            }
            other => {
                return Err(ExportError::UnknownContentType {
                    file_id,
                    code: other,
                })
            }
        };
        Ok(Box::new(Md5Validating::new(
            self.row.hash.clone(),
            blocks,
            file_id.to_string(),
        )))
    }

    /// Walk the backward-delta chain and leave the materialized revision in
    /// scratch storage under this file's id.
    ///
    /// The store keeps the newest version of an item as full text and older
    /// versions as backward deltas against their successor. The chain for
    /// this revision is every stored version from the nearest full text
    /// downward; rows whose `VersionFrom` is null are artifacts and ignored.
    fn unpack_deltas_to_scratch(&self) -> Result<()> {
        let chain = self.chain_rows()?;
        if chain.is_empty() {
            return Err(ExportError::SchemaMismatch(format!(
                "empty delta chain for file {}",
                self.row.file_id
            )));
        }

        let repo = self.cs.repo;
        if self.length() > repo.limits().disk_delta_threshold {
            // Patching is disk based.
            let mut base: Option<PathBuf> = None;
            for link in chain {
                let name = link.file_id.to_string();
                base = Some(match base {
                    None => {
                        let mut blocks = decompress(
                            Compression::from_code(link.compression_code)?,
                            Box::new(ChunkBlocks::new(self.cs.conn().clone(), link.file_id)),
                        );
                        repo.scratch().create(&name, Some(&mut blocks))?
                    }
                    Some(base) => {
                        let mut delta_blocks =
                            ChunkBlocks::new(self.cs.conn().clone(), link.file_id);
                        let delta_path = repo.scratch().create("delta", Some(&mut delta_blocks))?;
                        let out = repo.scratch().path_of(&name)?;
                        repo.delta().apply_on_disk(&base, &delta_path, &out)?;
                        out
                    }
                });
            }
        } else {
            // Memory based, but still save the versions to disk for reuse
            // by later consumers of the same item.
            let mut base: Option<Vec<u8>> = None;
            for link in chain {
                base = Some(match base {
                    None => collect(&mut decompress(
                        Compression::from_code(link.compression_code)?,
                        Box::new(ChunkBlocks::new(self.cs.conn().clone(), link.file_id)),
                    ))?,
                    Some(base) => {
                        let delta = collect(&mut ChunkBlocks::new(
                            self.cs.conn().clone(),
                            link.file_id,
                        ))?;
                        let patched = repo.delta().apply_in_memory(&base, &delta)?;
                        repo.scratch()
                            .create_from_bytes(&link.file_id.to_string(), &patched)?;
                        patched
                    }
                });
            }
        }
        Ok(())
    }

    /// The delta chain for this revision, newest (full text) first.
    fn chain_rows(&self) -> Result<Vec<ChainLink>> {
        let mut stmt = self.cs.conn().prepare_cached(
            "select f1.FileId, f1.CompressionType \
             from tbl_File f0 \
             inner join tbl_File f1 \
               on f1.ItemId = f0.ItemId \
               and f1.FileId >= f0.FileId \
               and f1.FileId <= (select min(f2.FileId) from tbl_File f2 \
                                 where f2.ItemId = f0.ItemId \
                                   and f2.FileId > f0.FileId \
                                   and f2.VersionFrom is not null \
                                   and f2.ContentType = ?2) \
             where f0.FileId = ?1 and f1.VersionFrom is not null \
             order by f1.FileId desc",
        )?;
        let rows = stmt.query_map(params![self.row.file_id, CONTENT_TYPE_FULL], |row| {
            Ok(ChainLink {
                file_id: row.get(0)?,
                compression_code: row.get(1)?,
            })
        })?;
        let mut chain = Vec::new();
        for row in rows {
            chain.push(row?);
        }
        Ok(chain)
    }
}

struct ChainLink {
    file_id: i64,
    compression_code: i64,
}

/// Lazy chunk-by-chunk stream over a file's content rows.
///
/// Chunks are fetched one query at a time so that at most one chunk is
/// resident; content is chunked to around a megabyte per row by the store.
struct ChunkBlocks {
    conn: Rc<Connection>,
    file_id: i64,
    next_offset: i64,
}

impl ChunkBlocks {
    fn new(conn: Rc<Connection>, file_id: i64) -> Self {
        ChunkBlocks {
            conn,
            file_id,
            next_offset: 0,
        }
    }
}

impl BlockStream for ChunkBlocks {
    fn len_hint(&self) -> Option<u64> {
        None
    }

    fn next_block(&mut self) -> Result<Option<Vec<u8>>> {
        let mut stmt = self.conn.prepare_cached(
            "select OffsetFrom, Content from tbl_Content \
             where FileId = ?1 and OffsetFrom >= ?2 \
             order by OffsetFrom limit 1",
        )?;
        let row = stmt
            .query_row(params![self.file_id, self.next_offset], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
            })
            .optional()?;
        match row {
            Some((offset, content)) => {
                self.next_offset = offset + (content.len() as i64).max(1);
                Ok(Some(content))
            }
            None => Ok(None),
        }
    }
}
