//! Build script embedding build metadata
//!
//! Uses vergen-gix to capture the git commit and build timestamp reported by
//! `identity-session --version`. When git is unavailable (source tarball,
//! container build without .git) values passed through the environment
//! (VERGEN_GIT_SHA, ...) are used as-is.

use std::error::Error;
use vergen_gix::{Build, Emitter, Gix};

fn main() -> Result<(), Box<dyn Error>> {
    if std::env::var("VERGEN_GIT_SHA").is_ok() {
        println!("cargo:warning=Using git metadata from environment variables");
        return Ok(());
    }

    let build = Build::all_build();
    let gix = Gix::all_git();
    Emitter::default()
        .add_instructions(&build)?
        .add_instructions(&gix)?
        .emit()?;
    Ok(())
}
