use std::path::PathBuf;
use std::process;

/// Parsed command line: the project configuration plus one subcommand.
#[derive(Debug, Clone)]
pub struct Options {
    pub config: PathBuf,
    pub command: Command,
}

#[derive(Debug, Clone)]
pub enum Command {
    BranchesInfo { json: bool },
    Commits { no_files: bool },
    Labels,
    Users { ids: bool },
    FastExport(FastExportOptions),
}

#[derive(Debug, Clone, Default)]
pub struct FastExportOptions {
    /// Do not write the stream, only echo progress messages.
    pub dry_run: bool,
    /// Stop the export after changeset N.
    pub stop_after: Option<i64>,
    /// Do not export any tags.
    pub no_tags: bool,
    /// Write empty files instead of file content.
    pub no_content: bool,
    /// Location for temporary delta intermediates.
    pub temp_dir: Option<PathBuf>,
    /// Dump all warnings into this file as well.
    pub warnings_file: Option<PathBuf>,
    /// Silence warnings on stderr.
    pub quiet: bool,
}

pub fn parse_args() -> Options {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match try_parse(&args) {
        Ok(opts) => opts,
        Err(msg) => {
            eprintln!("{msg}");
            eprintln!();
            print_usage();
            process::exit(2);
        }
    }
}

fn try_parse(args: &[String]) -> Result<Options, String> {
    let mut it = args.iter();
    let config = match it.next() {
        Some(arg) if arg == "-h" || arg == "--help" => {
            print_usage();
            process::exit(0);
        }
        Some(arg) => PathBuf::from(arg),
        None => return Err("missing CONFIG argument".to_string()),
    };

    let command = match it.next().map(String::as_str) {
        Some("branches-info") => {
            let mut json = false;
            for arg in it {
                match arg.as_str() {
                    "--json" => json = true,
                    other => return Err(format!("unknown branches-info flag '{other}'")),
                }
            }
            Command::BranchesInfo { json }
        }
        Some("commits") => {
            let mut no_files = false;
            for arg in it {
                match arg.as_str() {
                    "--no-files" => no_files = true,
                    other => return Err(format!("unknown commits flag '{other}'")),
                }
            }
            Command::Commits { no_files }
        }
        Some("labels") => {
            if let Some(other) = it.next() {
                return Err(format!("unknown labels flag '{other}'"));
            }
            Command::Labels
        }
        Some("users") => {
            let mut ids = false;
            for arg in it {
                match arg.as_str() {
                    "--ids" => ids = true,
                    other => return Err(format!("unknown users flag '{other}'")),
                }
            }
            Command::Users { ids }
        }
        Some("fast-export") => {
            let mut fe = FastExportOptions::default();
            while let Some(arg) = it.next() {
                match arg.as_str() {
                    "--dry-run" => fe.dry_run = true,
                    "--stop-after" => {
                        let value = it
                            .next()
                            .ok_or_else(|| "--stop-after requires N".to_string())?;
                        fe.stop_after = Some(
                            value
                                .parse::<i64>()
                                .map_err(|_| "--stop-after expects an integer".to_string())?,
                        );
                    }
                    "--no-tags" => fe.no_tags = true,
                    "--no-content" => fe.no_content = true,
                    "--temp-dir" => {
                        let value = it
                            .next()
                            .ok_or_else(|| "--temp-dir requires a directory".to_string())?;
                        fe.temp_dir = Some(PathBuf::from(value));
                    }
                    "--export-warnings" => {
                        let value = it
                            .next()
                            .ok_or_else(|| "--export-warnings requires a file".to_string())?;
                        fe.warnings_file = Some(PathBuf::from(value));
                    }
                    "--quiet" => fe.quiet = true,
                    other => return Err(format!("unknown fast-export flag '{other}'")),
                }
            }
            Command::FastExport(fe)
        }
        Some(other) => return Err(format!("unknown subcommand '{other}'")),
        None => return Err("missing subcommand".to_string()),
    };

    Ok(Options { config, command })
}

fn print_usage() {
    eprintln!(
        "usage: tfs-fast-export CONFIG SUBCOMMAND [flags]\n\
         \n\
         subcommands:\n\
         \x20 branches-info [--json]\n\
         \x20     evaluate the branch mapping against all stored files\n\
         \x20 commits [--no-files]\n\
         \x20     list all changesets (and their file operations)\n\
         \x20 labels\n\
         \x20     list all labels\n\
         \x20 users [--ids]\n\
         \x20     list all active users through the user hook\n\
         \x20 fast-export [--dry-run] [--stop-after N] [--no-tags] [--no-content]\n\
         \x20             [--temp-dir DIR] [--export-warnings FILE] [--quiet]\n\
         \x20     write the full history as a git fast-import stream to stdout"
    );
}
