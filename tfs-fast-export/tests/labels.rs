mod common;
use common::*;

use tfs_fast_export as tfe;
use tfe::export::ExportOptions;
use tfe::warnings::Warnings;

#[test]
fn single_changeset_label_becomes_a_tag() {
    let fixture = Fixture::single_branch();
    fixture.add_changeset(1, 1, 1, "add");
    fixture.add_full_file(1, 10, 101, r"$\a.txt", b"content");
    fixture.add_label(1, "Release 1.0", "first release", 1);
    fixture.add_label_entry(1, 10, 1);

    let (out, warning_count) = run_export(&fixture, &ExportOptions::default());
    assert_eq!(count_occurrences(&out, b"tag Release_1.0\n"), 1);
    assert_eq!(count_occurrences(&out, b"from :100\n"), 1);
    assert_eq!(
        count_occurrences(&out, b"tagger Alice A <nobody@example.org> 1400000000 +0000\n"),
        1
    );
    assert_eq!(warning_count, 0);
}

#[test]
fn ambiguous_labels_are_skipped_with_one_warning() {
    let fixture = Fixture::single_branch();
    fixture.add_changeset(1, 1, 1, "add a");
    fixture.add_full_file(1, 10, 101, r"$\a.txt", b"a");
    fixture.add_changeset(2, 1, 1, "add b");
    fixture.add_full_file(2, 11, 102, r"$\b.txt", b"b");
    // The label pins items at two different changesets on the same branch.
    fixture.add_label(1, "Spread", "", 1);
    fixture.add_label_entry(1, 10, 1);
    fixture.add_label_entry(1, 11, 2);

    let (out, warning_count) = run_export(&fixture, &ExportOptions::default());
    assert_eq!(count_occurrences(&out, b"tag "), 0);
    assert_eq!(warning_count, 1);
}

#[test]
fn labels_spanning_branches_get_suffixed_names() {
    let fixture = Fixture::multi_branch();
    fixture.add_changeset(1, 1, 1, "both branches");
    fixture.add_full_file(1, 10, 101, r"$\Proj\Main\a.txt", b"main");
    fixture.add_full_file(1, 11, 102, r"$\Proj\Dev\b.txt", b"dev");
    fixture.add_label(1, "Milestone", "", 1);
    fixture.add_label_entry(1, 10, 1);
    fixture.add_label_entry(1, 11, 1);

    let (out, warning_count) = run_export(&fixture, &ExportOptions::default());
    // Tag names go through the tag-name sanitizer, so the branch suffix
    // ends up as `_(branch)`.
    assert_eq!(count_occurrences(&out, b"tag Milestone_(Dev)\n"), 1);
    assert_eq!(count_occurrences(&out, b"tag Milestone_(Main)\n"), 1);
    assert_eq!(warning_count, 0);
}

#[test]
fn labels_on_unexported_changesets_warn_and_are_skipped() {
    let fixture = Fixture::single_branch();
    fixture.add_changeset(1, 1, 1, "add a");
    fixture.add_full_file(1, 10, 101, r"$\a.txt", b"a");
    fixture.add_changeset(2, 1, 1, "add b");
    fixture.add_full_file(2, 11, 102, r"$\b.txt", b"b");
    fixture.add_label(1, "Late", "", 1);
    fixture.add_label_entry(1, 11, 2);

    let opts = ExportOptions {
        stop_after: Some(1),
        ..Default::default()
    };
    let (out, warning_count) = run_export(&fixture, &opts);
    assert_eq!(count_occurrences(&out, b"tag "), 0);
    assert_eq!(warning_count, 1);
}

#[test]
fn skip_tags_suppresses_all_labels() {
    let fixture = Fixture::single_branch();
    fixture.add_changeset(1, 1, 1, "add");
    fixture.add_full_file(1, 10, 101, r"$\a.txt", b"content");
    fixture.add_label(1, "Release", "", 1);
    fixture.add_label_entry(1, 10, 1);

    let opts = ExportOptions {
        skip_tags: true,
        ..Default::default()
    };
    let (out, _warnings) = run_export(&fixture, &opts);
    assert_eq!(count_occurrences(&out, b"tag "), 0);
}

#[test]
fn label_listing_matches_export_view() {
    let fixture = Fixture::single_branch();
    fixture.add_changeset(1, 1, 1, "add");
    fixture.add_full_file(1, 10, 101, r"$\a.txt", b"content");
    fixture.add_label(1, "Release 1.0", "first release", 1);
    fixture.add_label_entry(1, 10, 1);

    let (_config, repo) = fixture.open_repo();
    let mut warnings = Warnings::silent();
    let labels = repo.labels(&mut warnings).unwrap();
    assert_eq!(labels.len(), 1);
    assert_eq!(labels[0].changeset_id, 1);
    assert_eq!(labels[0].branch, "master");
    // No suffix when the label lives on a single branch.
    assert_eq!(labels[0].name, "Release 1.0");
    assert_eq!(labels[0].comment, "first release");
}
