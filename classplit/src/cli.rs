use clap::Parser;
use std::path::PathBuf;

/// Splits LAS/LAZ point clouds by classification.
///
/// For every distinct classification code in a source file, one output file
/// is written to OUTPUT_DIR/<name>/<name>_<code>.<ext>. Points whose code is
/// in the keep set stay as they are, all other points are set to
/// "unclassified" (1). Point attributes other than the classification are
/// carried over unchanged.
#[derive(Debug, Parser)]
pub struct AppOptions {
    /// Verbosity of the command line output.
    #[clap(long, default_value = "info")]
    pub log_level: log::Level,

    /// Comma separated classification codes that keep their value in the
    /// output files. Points of any other code are set to unclassified (1).
    #[clap(long, short, value_delimiter = ',', required = true)]
    pub keep: Vec<u8>,

    /// Comma separated classification codes that do not get an output file
    /// of their own.
    #[clap(long, short, value_delimiter = ',')]
    pub skip: Vec<u8>,

    /// Number of worker threads for the rewrite phase.
    /// Defaults to half the available cpu cores.
    #[clap(long)]
    pub threads: Option<usize>,

    /// Directory with the .las/.laz files to split. Not searched recursively.
    pub input_dir: PathBuf,

    /// Directory the split files are written to. Created if missing.
    pub output_dir: PathBuf,
}
