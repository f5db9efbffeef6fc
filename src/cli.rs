use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "blockscript",
    version,
    about = "Compile a directory of .gs sources into a Scratch 3 project (.sb3)."
)]
pub struct Args {
    /// Project directory holding stage.gs and the sprite sources.
    #[arg(value_name = "INPUT", default_value = ".")]
    pub input: PathBuf,

    /// Output archive. Defaults to `<INPUT>/<directory name>.sb3`.
    #[arg(value_name = "OUTPUT")]
    pub output: Option<PathBuf>,

    #[arg(long, help = "Write a starter project into INPUT and exit.")]
    pub init: bool,

    #[arg(long, help = "Compile and report errors without writing an archive.")]
    pub check: bool,

    #[arg(long, help = "Do not read SVG sizes to center costume rotation points.")]
    pub no_svg_center: bool,
}
