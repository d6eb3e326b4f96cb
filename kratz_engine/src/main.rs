use anyhow::Result;

use kratz_engine::{cli, runtime};

fn main() -> Result<()> {
    let args = cli::parse()?;
    runtime::execute(args)
}
