/// Reverse the escaping the source database applies to item paths.
///
/// TFS rewrites a few characters internally, most probably to simplify LIKE
/// queries: `_` is stored as `>`, `-` as `"` and `%` as `|`. A single
/// trailing backslash is an artifact of the storage layer and is stripped.
pub fn unmangle(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for c in path.chars() {
        out.push(match c {
            '>' => '_',
            '"' => '-',
            '|' => '%',
            other => other,
        });
    }
    if out.ends_with('\\') {
        out.pop();
    }
    out
}

/// Convert backslash separators to the forward slashes git expects.
///
/// Called only at the serialization boundary; everything upstream keeps the
/// source separators untouched.
pub fn to_git_path(path: &str) -> String {
    path.replace('\\', "/")
}

/// Map a label name onto the much stricter git tag-name grammar.
///
/// See: http://git-scm.com/docs/git-check-ref-format
pub fn to_git_tagname(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in to_git_path(name).chars() {
        match c {
            '\n' | '\r' => {}
            '[' => out.push('('),
            ']' => out.push(')'),
            ' ' => out.push('_'),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmangle_reverses_storage_escapes() {
        assert_eq!(unmangle(r#"$\proj\a>b"c|d"#), r"$\proj\a_b-c%d");
        assert_eq!(unmangle(r"$\proj\dir\"), r"$\proj\dir");
        assert_eq!(unmangle(r"$\proj\file.txt"), r"$\proj\file.txt");
    }

    #[test]
    fn unmangle_is_idempotent() {
        for p in [r#"$\proj\a>b"c|d"#, r"$\proj\dir\", "plain", ""] {
            let once = unmangle(p);
            assert_eq!(unmangle(&once), once);
        }
    }

    #[test]
    fn git_path_uses_forward_slashes() {
        assert_eq!(to_git_path(r"dir\sub\file.txt"), "dir/sub/file.txt");
        assert_eq!(to_git_path("already/fine"), "already/fine");
    }

    #[test]
    fn tagnames_are_sanitized() {
        assert_eq!(to_git_tagname("Release 1.0 [Main]"), "Release_1.0_(Main)");
        assert_eq!(to_git_tagname("a\r\nb"), "ab");
        assert_eq!(to_git_tagname(r"nested\label"), "nested/label");
    }
}
