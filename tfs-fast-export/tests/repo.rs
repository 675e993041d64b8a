mod common;
use common::*;

use std::cell::Cell;
use std::rc::Rc;

use tfs_fast_export as tfe;
use tfe::blocks::collect;
use tfe::config::Config;
use tfe::export::ExportOptions;
use tfe::hooks::{Hooks, User, UserIdent};
use tfe::repo::Repository;
use tfe::ExportError;

#[test]
fn unsupported_schema_generations_are_rejected() {
    let fixture = Fixture::single_branch();
    fixture
        .conn()
        .execute("drop table tbl_Identity", [])
        .unwrap();

    let config = Config::load(&fixture.config_path).unwrap();
    let err = Repository::open(&config, config.build_hooks(), None).unwrap_err();
    assert!(matches!(err, ExportError::SchemaMismatch(_)));
    assert!(err.to_string().contains("not been implemented"));
}

#[test]
fn branches_info_classifies_stored_paths() {
    let mut fixture = Fixture::new();
    fixture.write_config(
        "[branches]\n\
         pattern = '^\\$\\\\Proj\\\\(?P<branch>[^\\\\]+)(\\\\(?P<relpath>.*))?$'\n\
         \n\
         [filters]\n\
         ignore = ['\\.vspscc$']\n\
         \n\
         [limits]\n\
         oversize_warning = 10\n",
    );
    fixture.add_changeset(1, 1, 1, "populate");
    fixture.add_full_file(1, 10, 101, r"$\Proj\Main\kept.txt", b"ok");
    fixture.add_full_file(1, 11, 102, r"$\Proj\Main\proj.vspscc", b"scc");
    fixture.add_full_file(1, 12, 103, r"$\Proj\Dev\huge.bin", b"bigger than ten bytes");
    fixture.add_full_file(1, 13, 104, r"$\Outside\stray.txt", b"stray");

    let (_config, repo) = fixture.open_repo();
    let info = repo.branches_info().unwrap();

    assert_eq!(info.names, vec!["Dev".to_string(), "Main".to_string()]);
    assert_eq!(info.unassigned, vec![r"$\Outside\stray.txt".to_string()]);
    assert_eq!(info.assigned_by_branch["Main"], vec!["kept.txt".to_string()]);
    assert_eq!(
        info.ignored_by_branch["Main"],
        vec!["proj.vspscc".to_string()]
    );
    assert_eq!(
        info.oversized_by_branch["Dev"],
        vec!["huge.bin".to_string()]
    );
}

#[test]
fn active_users_are_the_union_of_owners_committers_and_label_owners() {
    let fixture = Fixture::single_branch();
    fixture.add_user(2, "CORP", "bob", "Bob B");
    fixture.add_user(3, "CORP", "carol", "Carol C");
    fixture.add_changeset(1, 1, 2, "mixed identities");
    fixture.add_full_file(1, 10, 101, r"$\a.txt", b"content");
    fixture.add_label(1, "L", "", 3);
    fixture.add_label_entry(1, 10, 1);

    let (_config, repo) = fixture.open_repo();
    let users: Vec<User> = repo.active_users().unwrap();
    let logins: Vec<&str> = users.iter().map(|u| u.login.as_str()).collect();
    assert_eq!(logins, vec!["alice", "bob", "carol"]);
    assert_eq!(users[0].qualified_login(), "CORP\\alice");
}

#[test]
fn user_lookup_hook_is_called_once_per_identity() {
    let fixture = Fixture::single_branch();
    let config = Config::load(&fixture.config_path).unwrap();

    let calls = Rc::new(Cell::new(0usize));
    let counter = calls.clone();
    let hooks = Hooks {
        user_lookup: Box::new(move |user: &User| {
            counter.set(counter.get() + 1);
            Ok(UserIdent {
                display_name: user.display_name.clone(),
                email: "hook@example.org".to_string(),
                offset: None,
            })
        }),
        ..config.build_hooks()
    };
    let repo = Repository::open(&config, hooks, None).unwrap();

    let user = repo.get_user(1).unwrap();
    let first = repo.user_ident(&user).unwrap();
    let second = repo.user_ident(&user).unwrap();
    assert_eq!(first, second);
    assert_eq!(calls.get(), 1);
}

fn three_revision_chain(fixture: &Fixture) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
    let v1 = b"alpha\n".repeat(40);
    let v2 = b"alpha\nbeta\n".repeat(40);
    let v3 = b"alpha\nbeta\ngamma\n".repeat(40);
    fixture.add_changeset(1, 1, 1, "v1");
    fixture.add_delta_file(1, 10, 101, r"$\f.txt", &v1, &v2);
    fixture.add_changeset(2, 1, 1, "v2");
    fixture.add_delta_file(2, 10, 102, r"$\f.txt", &v2, &v3);
    fixture.add_changeset(3, 1, 1, "v3");
    fixture.add_full_file(3, 10, 103, r"$\f.txt", &v3);
    (v1, v2, v3)
}

fn assert_all_revisions_materialize(fixture: &Fixture, revisions: &[&Vec<u8>]) {
    let (out, warning_count) = run_export(fixture, &ExportOptions::default());
    for v in revisions {
        let mut framed = format!("data {}\n", v.len()).into_bytes();
        framed.extend_from_slice(v);
        assert_eq!(count_occurrences(&out, &framed), 1);
    }
    assert_eq!(warning_count, 0);
}

#[test]
fn long_delta_chains_reconstruct_in_memory_mode() {
    let fixture = Fixture::single_branch();
    let (v1, v2, v3) = three_revision_chain(&fixture);
    assert_all_revisions_materialize(&fixture, &[&v1, &v2, &v3]);
}

#[test]
fn long_delta_chains_reconstruct_in_disk_mode() {
    let mut fixture = Fixture::new();
    // A one-byte threshold forces every delta chain onto disk.
    fixture.write_config(
        "[branches]\n\
         single = \"master\"\n\
         \n\
         [limits]\n\
         disk_delta_threshold = 1\n",
    );
    let (v1, v2, v3) = three_revision_chain(&fixture);
    assert_all_revisions_materialize(&fixture, &[&v1, &v2, &v3]);
}

#[test]
fn multi_chunk_files_stream_chunk_by_chunk() {
    let fixture = Fixture::single_branch();
    let part1 = b"first chunk ".repeat(10);
    let part2 = b"second chunk ".repeat(10);
    let mut content = part1.clone();
    content.extend_from_slice(&part2);

    fixture.add_changeset(1, 1, 1, "chunked");
    // Insert the file row manually so the content can span two chunk rows.
    use md5::Digest;
    let hash = md5::Md5::digest(&content);
    let conn = fixture.conn();
    conn.execute(
        "insert into tbl_Version \
         (VersionFrom, VersionTo, ItemId, ItemType, FileId, FullPath, DeletionId, Command) \
         values (1, 9999999, 10, 2, 101, '$\\c.bin', 0, 2)",
        [],
    )
    .unwrap();
    conn.execute(
        "insert into tbl_File \
         (FileId, ItemId, VersionFrom, FileLength, CompressionType, ContentType, HashValue) \
         values (101, 10, 1, ?1, 0, 1, ?2)",
        rusqlite::params![content.len() as i64, hash.as_slice()],
    )
    .unwrap();
    fixture.add_content(101, 0, &part1);
    fixture.add_content(101, part1.len() as i64, &part2);

    let (_config, repo) = fixture.open_repo();
    let cs = repo.changesets().next().unwrap().unwrap();
    let change = cs.changes().next().unwrap();
    let materialized = collect(&mut change.content().unwrap()).unwrap();
    assert_eq!(materialized, content);
}

#[test]
fn commit_listing_walks_changesets_in_order() {
    let (fixture, ids) = {
        let fixture = Fixture::single_branch();
        fixture.add_changeset(3, 1, 1, "third");
        fixture.add_full_file(3, 12, 103, r"$\c.txt", b"c");
        fixture.add_changeset(1, 1, 1, "first");
        fixture.add_full_file(1, 10, 101, r"$\a.txt", b"a");
        fixture.add_changeset(2, 1, 1, "second");
        fixture.add_full_file(2, 11, 102, r"$\b.txt", b"b");
        (fixture, vec![1, 2, 3])
    };

    let (_config, repo) = fixture.open_repo();
    let seen: Vec<i64> = repo
        .changesets()
        .map(|cs| cs.unwrap().id)
        .collect();
    assert_eq!(seen, ids);
}
