use std::fs;
use std::path::PathBuf;

use md5::{Digest, Md5};
use rusqlite::{params, Connection};

use tfs_fast_export as tfe;
use tfe::config::Config;
use tfe::delta::create_delta;
use tfe::export::{fast_export, ExportOptions};
use tfe::repo::Repository;
use tfe::warnings::Warnings;

/// A timestamp that lands exactly on a round epoch second (1400000000).
pub const TS: &str = "2014-05-13 16:53:20";

const VERSION_TO_MAX: i64 = 9_999_999;

/// A fixture database in the source schema, plus a project configuration
/// pointing at it.
pub struct Fixture {
    _dir: tempfile::TempDir,
    pub db_path: PathBuf,
    pub config_path: PathBuf,
}

impl Fixture {
    /// Create the schema and a first user (id 1, "CORP\alice").
    pub fn new() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("tfs.db");
        let conn = Connection::open(&db_path).unwrap();
        conn.execute_batch(
            "create table tbl_Identity (
                 IdentityId integer primary key,
                 TeamFoundationId integer
             );
             create table Constants (
                 TeamFoundationId integer,
                 DomainPart text,
                 NamePart text,
                 DisplayPart text
             );
             create table tbl_ChangeSet (
                 ChangeSetId integer primary key,
                 OwnerId integer,
                 CommitterId integer,
                 CreationDate text,
                 Comment text
             );
             create table tbl_Version (
                 VersionFrom integer,
                 VersionTo integer,
                 ItemId integer,
                 ItemType integer,
                 FileId integer,
                 FullPath text,
                 DeletionId integer,
                 Command integer
             );
             create table tbl_File (
                 FileId integer primary key,
                 ItemId integer,
                 VersionFrom integer,
                 FileLength integer,
                 CompressionType integer,
                 ContentType integer,
                 HashValue blob
             );
             create table tbl_Content (
                 FileId integer,
                 OffsetFrom integer,
                 Content blob
             );
             create table tbl_MergeHistory (
                 TargetItemId integer,
                 TargetVersionFrom integer,
                 SourceItemId integer,
                 SourceVersionFrom integer,
                 SourceVersionTo integer,
                 ForwardMerge integer,
                 RenameHistory integer
             );
             create table tbl_Label (
                 LabelId integer primary key,
                 LabelName text,
                 Comment text,
                 OwnerId integer,
                 LastModified text
             );
             create table tbl_LabelEntry (
                 LabelId integer,
                 ItemId integer,
                 VersionFrom integer
             );",
        )
        .unwrap();
        drop(conn);

        let fixture = Fixture {
            _dir: dir,
            db_path,
            config_path: PathBuf::new(),
        };
        fixture.add_user(1, "CORP", "alice", "Alice A");
        fixture
    }

    /// A fixture whose config maps everything onto a single `master` branch.
    #[allow(dead_code)]
    pub fn single_branch() -> Fixture {
        let mut fixture = Fixture::new();
        fixture.write_config(
            "[branches]\n\
             single = \"master\"\n",
        );
        fixture
    }

    /// A fixture whose config maps `$\\Proj\\<branch>\\<relpath>` paths.
    #[allow(dead_code)]
    pub fn multi_branch() -> Fixture {
        let mut fixture = Fixture::new();
        fixture.write_config(
            "[branches]\n\
             pattern = '^\\$\\\\Proj\\\\(?P<branch>[^\\\\]+)(\\\\(?P<relpath>.*))?$'\n",
        );
        fixture
    }

    pub fn write_config(&mut self, extra: &str) {
        let config_path = self._dir.path().join("project.toml");
        let text = format!(
            "[database]\npath = '{}'\n\n{}",
            self.db_path.display(),
            extra
        );
        fs::write(&config_path, text).unwrap();
        self.config_path = config_path;
    }

    pub fn conn(&self) -> Connection {
        Connection::open(&self.db_path).unwrap()
    }

    pub fn add_user(&self, id: i64, domain: &str, login: &str, display: &str) {
        let conn = self.conn();
        conn.execute(
            "insert into tbl_Identity (IdentityId, TeamFoundationId) values (?1, ?1)",
            params![id],
        )
        .unwrap();
        conn.execute(
            "insert into Constants (TeamFoundationId, DomainPart, NamePart, DisplayPart) \
             values (?1, ?2, ?3, ?4)",
            params![id, domain, login, display],
        )
        .unwrap();
    }

    pub fn add_changeset(&self, id: i64, owner: i64, committer: i64, comment: &str) {
        self.conn()
            .execute(
                "insert into tbl_ChangeSet \
                 (ChangeSetId, OwnerId, CommitterId, CreationDate, Comment) \
                 values (?1, ?2, ?3, ?4, ?5)",
                params![id, owner, committer, TS, comment],
            )
            .unwrap();
    }

    fn add_version_row(&self, cs: i64, item: i64, file: i64, path: &str, deletion: i64) {
        let conn = self.conn();
        // Close the still-open version range of the previous revision.
        conn.execute(
            "update tbl_Version set VersionTo = ?1 - 1 where ItemId = ?2 and VersionTo = ?3",
            params![cs, item, VERSION_TO_MAX],
        )
        .unwrap();
        conn.execute(
            "insert into tbl_Version \
             (VersionFrom, VersionTo, ItemId, ItemType, FileId, FullPath, DeletionId, Command) \
             values (?1, ?2, ?3, 2, ?4, ?5, ?6, 2)",
            params![cs, VERSION_TO_MAX, item, file, path, deletion],
        )
        .unwrap();
    }

    fn add_file_row(
        &self,
        file: i64,
        item: i64,
        cs: i64,
        length: i64,
        compression: i64,
        content_type: i64,
        hash: &[u8],
    ) {
        self.conn()
            .execute(
                "insert into tbl_File \
                 (FileId, ItemId, VersionFrom, FileLength, CompressionType, ContentType, HashValue) \
                 values (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![file, item, cs, length, compression, content_type, hash],
            )
            .unwrap();
    }

    pub fn add_content(&self, file: i64, offset: i64, bytes: &[u8]) {
        self.conn()
            .execute(
                "insert into tbl_Content (FileId, OffsetFrom, Content) values (?1, ?2, ?3)",
                params![file, offset, bytes],
            )
            .unwrap();
    }

    /// A revision stored as uncompressed full text.
    pub fn add_full_file(&self, cs: i64, item: i64, file: i64, path: &str, content: &[u8]) {
        self.add_version_row(cs, item, file, path, 0);
        let hash = Md5::digest(content);
        self.add_file_row(file, item, cs, content.len() as i64, 0, 1, hash.as_slice());
        self.add_content(file, 0, content);
    }

    /// A revision stored as a backward delta against the next-newer full
    /// text. `content` is the logical content of this revision.
    #[allow(dead_code)]
    pub fn add_delta_file(
        &self,
        cs: i64,
        item: i64,
        file: i64,
        path: &str,
        content: &[u8],
        newer_full: &[u8],
    ) {
        self.add_version_row(cs, item, file, path, 0);
        let hash = Md5::digest(content);
        self.add_file_row(file, item, cs, content.len() as i64, 0, 2, hash.as_slice());
        self.add_content(file, 0, &create_delta(newer_full, content));
    }

    /// A deletion row for a previously stored file.
    #[allow(dead_code)]
    pub fn add_deletion(&self, cs: i64, item: i64, file: i64, path: &str) {
        self.add_version_row(cs, item, file, path, 1);
    }

    #[allow(dead_code)]
    pub fn add_merge(
        &self,
        target_item: i64,
        target_cs: i64,
        source_item: i64,
        source_version_from: i64,
        source_version_to: i64,
    ) {
        self.conn()
            .execute(
                "insert into tbl_MergeHistory \
                 (TargetItemId, TargetVersionFrom, SourceItemId, \
                  SourceVersionFrom, SourceVersionTo, ForwardMerge, RenameHistory) \
                 values (?1, ?2, ?3, ?4, ?5, 1, 0)",
                params![
                    target_item,
                    target_cs,
                    source_item,
                    source_version_from,
                    source_version_to
                ],
            )
            .unwrap();
    }

    #[allow(dead_code)]
    pub fn add_label(&self, id: i64, name: &str, comment: &str, owner: i64) {
        self.conn()
            .execute(
                "insert into tbl_Label (LabelId, LabelName, Comment, OwnerId, LastModified) \
                 values (?1, ?2, ?3, ?4, ?5)",
                params![id, name, comment, owner, TS],
            )
            .unwrap();
    }

    #[allow(dead_code)]
    pub fn add_label_entry(&self, label: i64, item: i64, version_from: i64) {
        self.conn()
            .execute(
                "insert into tbl_LabelEntry (LabelId, ItemId, VersionFrom) values (?1, ?2, ?3)",
                params![label, item, version_from],
            )
            .unwrap();
    }

    pub fn open_repo(&self) -> (Config, Repository) {
        let config = Config::load(&self.config_path).unwrap();
        let repo = Repository::open(&config, config.build_hooks(), None).unwrap();
        (config, repo)
    }
}

/// Run a fast export over the fixture and return the stream plus the number
/// of warnings raised.
#[allow(dead_code)]
pub fn run_export(fixture: &Fixture, opts: &ExportOptions) -> (Vec<u8>, usize) {
    let (_config, repo) = fixture.open_repo();
    let mut warnings = Warnings::silent();
    let mut out = Vec::new();
    fast_export(&repo, &mut out, &mut warnings, opts).unwrap();
    (out, warnings.count())
}

/// Count non-overlapping occurrences of a byte pattern.
#[allow(dead_code)]
pub fn count_occurrences(haystack: &[u8], needle: &[u8]) -> usize {
    if needle.is_empty() {
        return 0;
    }
    let mut count = 0;
    let mut pos = 0;
    while pos + needle.len() <= haystack.len() {
        if &haystack[pos..pos + needle.len()] == needle {
            count += 1;
            pos += needle.len();
        } else {
            pos += 1;
        }
    }
    count
}
