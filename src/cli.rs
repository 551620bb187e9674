use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "fusetrace",
    version,
    about = "Dissect FUSE kernel/daemon wire dumps into named fields"
)]
pub struct Cli {
    /// Dump file to read (stdin when omitted or "-")
    pub input: Option<PathBuf>,

    /// Truncate printed byte blobs to this many bytes (0 = no limit)
    #[arg(long, short = 'l', default_value_t = 512)]
    pub limit: usize,

    /// Output format
    #[arg(long, value_enum, default_value_t = Format::Fmt)]
    pub format: Format,

    /// List the operations known to the built-in protocol tables and exit
    #[arg(long)]
    pub show_ops: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    /// One compact text line per frame
    Fmt,
    /// One JSON record per frame
    Json,
    /// Decode without printing (timing/validation runs)
    Null,
}
