use tfs_fast_export as tfe;
use std::io;

fn main() -> io::Result<()> {
  let opts = tfe::opts::parse_args();
  tfe::run(&opts)?;
  Ok(())
}
