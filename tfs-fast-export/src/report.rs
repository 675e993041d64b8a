use comfy_table::{presets::UTF8_FULL, modifiers::UTF8_ROUND_CORNERS, ContentArrangement, Table};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::Result;
use crate::repo::{BranchesInfo, Repository};
use crate::warnings::Warnings;

/// Render the branches-info evaluation, either human-readable or as JSON.
pub fn print_branches_info(info: &BranchesInfo, json: bool) -> Result<()> {
    if json {
        let rendered = serde_json::to_string_pretty(info)
            .map_err(|e| crate::ExportError::invalid_options(e.to_string()))?;
        println!("{rendered}");
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Branch", "Assigned", "Ignored", "Oversized"]);
    for name in &info.names {
        let count = |map: &std::collections::BTreeMap<String, Vec<String>>| {
            map.get(name).map_or(0, Vec::len).to_string()
        };
        table.add_row(vec![
            name.clone(),
            count(&info.assigned_by_branch),
            count(&info.ignored_by_branch),
            count(&info.oversized_by_branch),
        ]);
    }
    println!("{table}");

    println!("assigned files:");
    for branch in &info.names {
        match info.assigned_by_branch.get(branch) {
            Some(files) if !files.is_empty() => {
                for name in files {
                    println!("   {branch} - {name}");
                }
            }
            _ => println!("   {branch} - <no files !!>"),
        }
    }

    println!("ignored files:");
    for (branch, files) in &info.ignored_by_branch {
        for name in files {
            println!("   {branch} - {name}");
        }
    }

    println!("oversized files:");
    for (branch, files) in &info.oversized_by_branch {
        for name in files {
            println!("   {branch} - {name}");
        }
    }

    println!("unassigned paths:");
    for path in &info.unassigned {
        println!("   {path}");
    }
    Ok(())
}

/// List every changeset with its merge sources and (optionally) file ops.
pub fn print_commits(repo: &Repository, no_files: bool) -> Result<()> {
    for cs in repo.changesets() {
        let cs = cs?;
        println!(
            "{} / {} / {} / {} / {}: {}",
            cs.id,
            format_timestamp(cs.created_at),
            cs.owner,
            cs.committer,
            cs.branch,
            cs.comment
        );

        for (branch, version) in cs.merges() {
            match version {
                Some(version) => println!("   merged from {branch} / {version}"),
                None => println!("   merged from {branch} / <unknown>"),
            }
        }

        if no_files {
            continue;
        }

        for change in cs.changes() {
            println!("   change {}: {}", change.relpath, change.length());
        }
        for delete in cs.deletes() {
            println!("   del {}", delete.relpath);
        }
    }
    Ok(())
}

/// List every exportable label.
pub fn print_labels(repo: &Repository, warnings: &mut Warnings) -> Result<()> {
    for label in repo.labels(warnings)? {
        println!(
            "{} / {} / {}: {}",
            label.changeset_id,
            format_timestamp(label.created_at),
            label.user,
            label.name
        );
    }
    Ok(())
}

/// List all active users through the user hook.
pub fn print_users(repo: &Repository, show_ids: bool) -> Result<()> {
    for user in repo.active_users()? {
        let ident = repo.user_ident(&user)?;
        let tz = ident
            .offset
            .map(|o| o.to_string())
            .unwrap_or_else(|| "<undef>".to_string());
        let mut line = format!("{} / {} / tz={}", ident.display_name, ident.email, tz);
        if show_ids {
            line.push_str(&format!(" / {}", user.id));
        }
        println!("{line}");
    }
    Ok(())
}

fn format_timestamp(ts: OffsetDateTime) -> String {
    ts.format(&Rfc3339)
        .unwrap_or_else(|_| ts.unix_timestamp().to_string())
}
