use clap::Parser;

use oxc3_core::Result;

pub mod global_args;
pub mod package;

use global_args::GlobalArgs;

/// `OxC3_package <input-dir> <output-file> [include-dir]` (§6): packages a
/// directory tree into a single oiCA archive.
#[derive(Parser, Debug)]
#[clap(about = "oiCA archive packager", version)]
pub struct OxC3Package {
    #[clap(flatten)]
    pub global_args: GlobalArgs,
}

impl OxC3Package {
    pub fn run(self) -> Result<()> {
        package::run(self.global_args)
    }
}
