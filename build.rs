//! Build script for man page generation.
//!
//! Generates a man page for the `dots-client` binary using `clap_mangen`. The
//! CLI definitions are imported from the `cli-defs` crate, which provides
//! stable types shared between build-time and runtime consumers.

use std::{env, fs, io, path::PathBuf};

use clap::CommandFactory;
use clap_mangen::Man;
use cli_defs::Cli;

fn main() -> io::Result<()> {
    println!("cargo::rerun-if-changed=cli-defs");

    let Ok(out_dir) = env::var("OUT_DIR").map(PathBuf::from) else {
        // Cargo does not set OUT_DIR for IDE analysis runs.
        return Ok(());
    };
    let bin_name = env::var("CARGO_PKG_NAME").unwrap_or_else(|_| "dots-client".into());

    let man = Man::new(Cli::command());
    let mut file = fs::File::create(out_dir.join(format!("{bin_name}.1")))?;
    man.render(&mut file)?;

    Ok(())
}
