use std::fmt;

use time::UtcOffset;

use crate::blocks::BlockStream;
use crate::error::Result;

/// A user identity as stored in the source database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub domain: String,
    pub login: String,
    pub display_name: String,
}

impl User {
    pub fn qualified_login(&self) -> String {
        format!("{}\\{}", self.domain, self.login)
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.qualified_login(), self.id)
    }
}

/// The translated identity used in the emitted history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdent {
    pub display_name: String,
    pub email: String,
    /// `None` means the commit is stamped in UTC.
    pub offset: Option<UtcOffset>,
}

/// Maps a full source path to a `(branch, branch-relative path)` pair.
/// Returning no branch drops the file entirely; a branch without a relative
/// path denotes the branch root itself.
pub type BranchExtractFn = Box<dyn Fn(&str) -> (Option<String>, Option<String>)>;

/// Decides whether a file (by branch and relative path) is exported.
pub type FileFilterFn = Box<dyn Fn(&str, &str) -> bool>;

/// May wholly rewrite a file body before it is emitted. Receives and returns
/// the declared length together with the block stream carrying the content;
/// the returned length must equal the sum of the returned block sizes.
pub type ContentRewriteFn =
    Box<dyn Fn(&str, &str, u64, Box<dyn BlockStream>) -> Result<(u64, Box<dyn BlockStream>)>>;

/// Translates a source user into the identity recorded in the export.
pub type UserLookupFn = Box<dyn Fn(&User) -> Result<UserIdent>>;

/// Customization hooks supplied by the operator's configuration.
///
/// All hooks must be deterministic; the engine caches `user_lookup` results
/// per internal user id for the lifetime of the run and will not call a hook
/// twice for the same input.
pub struct Hooks {
    pub branch_extract: BranchExtractFn,
    pub file_filter: FileFilterFn,
    pub content_rewrite: Option<ContentRewriteFn>,
    pub user_lookup: UserLookupFn,
}
