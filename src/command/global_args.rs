use clap::Args;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Directory tree to package into the archive.
    pub input_dir: PathBuf,
    /// Path the resulting oiCA file is written to.
    pub output_file: PathBuf,
    /// Extra directory searched for files referenced by name only
    /// (mirrors the original packager's include-path lookup).
    pub include_dir: Option<PathBuf>,
    /// Verbosity level, repeat to increase.
    #[clap(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}
