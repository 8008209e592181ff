use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use quiltconfig::SurfaceSize;

#[derive(Parser, Debug)]
#[command(
    name = "pixelquilt",
    author,
    version,
    about = "Live webcam glitch mirror",
    arg_required_else_help = false
)]
pub struct Cli {
    #[command(flatten)]
    pub run: RunArgs,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Configuration file (defaults to `pixelquilt.toml` in the config dir).
    #[arg(long, value_name = "PATH", env = "PIXELQUILT_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Start with this image instead of the camera.
    #[arg(long, value_name = "PATH")]
    pub image: Option<PathBuf>,

    /// Initial window size (e.g. `1280x720`).
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_size)]
    pub size: Option<SurfaceSize>,

    /// Initial strip count.
    #[arg(long, value_name = "N")]
    pub strips: Option<u32>,

    /// Initial shuffle depth.
    #[arg(long, value_name = "DEPTH")]
    pub shuffles: Option<f32>,

    /// Directory exported PNGs are written to.
    #[arg(long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Device used for the user-facing camera.
    #[arg(long, value_name = "PATH")]
    pub front_device: Option<PathBuf>,

    /// Device used for the environment-facing camera.
    #[arg(long, value_name = "PATH")]
    pub back_device: Option<PathBuf>,

    /// Never open a camera; wait for a dropped image instead.
    #[arg(long)]
    pub no_camera: bool,

    /// Prefer a low-power (integrated) GPU.
    #[arg(long, global = true)]
    pub low_power: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Quilt an image file and write the export PNG without opening a window.
    Render(RenderArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RenderArgs {
    /// Image to quilt.
    #[arg(long, value_name = "PATH")]
    pub input: PathBuf,

    #[arg(long, value_name = "N")]
    pub strips: Option<u32>,

    #[arg(long, value_name = "DEPTH")]
    pub shuffles: Option<f32>,

    #[arg(long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// File name prefix for the PNG.
    #[arg(long, value_name = "PREFIX")]
    pub prefix: Option<String>,
}

pub fn parse() -> Cli {
    Cli::parse()
}

fn parse_size(value: &str) -> Result<SurfaceSize, String> {
    value.parse()
}
