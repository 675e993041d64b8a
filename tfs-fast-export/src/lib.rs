pub mod blocks;
pub mod changeset;
pub mod checksum;
pub mod config;
pub mod decompress;
pub mod delta;
mod error;
pub mod export;
pub mod fastimport;
pub mod hooks;
pub mod marks;
pub mod opts;
pub mod pathutil;
pub mod repo;
mod report;
pub mod scratch;
pub mod warnings;

use std::io::Write;

pub use error::{ExportError, Result};
pub use opts::Options;

use config::Config;
use opts::Command;
use repo::Repository;
use warnings::Warnings;

pub fn run(opts: &Options) -> Result<()> {
  let config = Config::load(&opts.config)?;
  let hooks = config.build_hooks();

  match &opts.command {
    Command::BranchesInfo { json } => {
      let repo = Repository::open(&config, hooks, None)?;
      let info = repo.branches_info()?;
      report::print_branches_info(&info, *json)
    }
    Command::Commits { no_files } => {
      let repo = Repository::open(&config, hooks, None)?;
      report::print_commits(&repo, *no_files)
    }
    Command::Labels => {
      let repo = Repository::open(&config, hooks, None)?;
      let mut warnings = Warnings::new(true, None)?;
      report::print_labels(&repo, &mut warnings)
    }
    Command::Users { ids } => {
      let repo = Repository::open(&config, hooks, None)?;
      report::print_users(&repo, *ids)
    }
    Command::FastExport(fe) => {
      let mut warnings = Warnings::new(!fe.quiet, fe.warnings_file.as_deref())?;
      let repo = Repository::open(&config, hooks, fe.temp_dir.as_deref())?;
      let export_opts = export::ExportOptions {
        stop_after: fe.stop_after,
        skip_tags: fe.no_tags,
        no_content: fe.no_content,
        echo_progress: fe.dry_run,
      };
      if fe.dry_run {
        export::fast_export(&repo, &mut std::io::sink(), &mut warnings, &export_opts)
      } else {
        let stdout = std::io::stdout();
        let mut out = std::io::BufWriter::new(stdout.lock());
        export::fast_export(&repo, &mut out, &mut warnings, &export_opts)?;
        out.flush()?;
        Ok(())
      }
    }
  }
}
