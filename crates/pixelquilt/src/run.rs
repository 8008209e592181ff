use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use quilt::{ExportSettings, Frame, GestureRouter, ParameterState};
use quiltconfig::{QuiltConfig, SurfaceSize};
use renderer::{ExportTarget, GpuContext, GpuPowerPreference};
use tracing_subscriber::EnvFilter;

use crate::app;
use crate::camera::CameraDevices;
use crate::cli::{RenderArgs, RunArgs};
use crate::paths::AppPaths;

/// Everything the interactive window needs, after config and CLI are merged.
#[derive(Debug, Clone)]
pub struct AppOptions {
    pub window_size: SurfaceSize,
    pub shutter: bool,
    pub params: ParameterState,
    pub export: ExportSettings,
    pub router: GestureRouter,
    pub camera: Option<CameraDevices>,
    pub image: Option<PathBuf>,
    pub power: GpuPowerPreference,
}

impl AppOptions {
    pub fn resolve(config: &QuiltConfig, args: &RunArgs, default_output: &Path) -> Self {
        let camera = (config.camera.enabled && !args.no_camera).then(|| CameraDevices {
            front: args
                .front_device
                .clone()
                .unwrap_or_else(|| config.camera.front_device.clone()),
            back: args
                .back_device
                .clone()
                .unwrap_or_else(|| config.camera.back_device.clone()),
            width: config.camera.width,
        });

        Self {
            window_size: args.size.unwrap_or(config.window.size),
            shutter: config.window.shutter,
            params: initial_params(config, args.strips, args.shuffles),
            export: export_settings(config, args.output.clone(), None, default_output),
            router: GestureRouter::new(
                config.gestures.double_tap,
                config.gestures.swipe_threshold,
            ),
            camera,
            image: args.image.clone(),
            power: power_preference(args),
        }
    }
}

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

pub fn interactive(args: RunArgs) -> Result<()> {
    let paths = AppPaths::discover()?;
    let config = load_config(&args, &paths)?;
    let options = AppOptions::resolve(&config, &args, paths.output_dir());
    tracing::debug!(?options, "resolved options");
    app::run(options)
}

/// Headless export: decode, quilt off-screen, write the PNG, print its path.
pub fn render(run: &RunArgs, args: RenderArgs) -> Result<()> {
    let paths = AppPaths::discover()?;
    let config = load_config(run, &paths)?;
    let params = initial_params(&config, args.strips, args.shuffles);
    let mut settings = export_settings(&config, args.output, args.prefix, paths.output_dir());

    let image = image::open(&args.input)
        .with_context(|| format!("failed to decode {}", args.input.display()))?
        .to_rgba8();
    tracing::info!(
        path = %args.input.display(),
        width = image.width(),
        height = image.height(),
        "loaded input image"
    );

    let gpu = Arc::new(
        GpuContext::headless(power_preference(run)).context("failed to initialise GPU")?,
    );
    settings.max_dimension = settings.max_dimension.min(gpu.max_texture_dimension());
    let mut target = ExportTarget::new(gpu);

    let path = quilt::export::export_blocking(settings, Frame::from(image), &params, &mut target)
        .context("export failed")?;
    println!("{}", path.display());
    Ok(())
}

fn power_preference(args: &RunArgs) -> GpuPowerPreference {
    if args.low_power {
        GpuPowerPreference::Low
    } else {
        GpuPowerPreference::High
    }
}

fn load_config(args: &RunArgs, paths: &AppPaths) -> Result<QuiltConfig> {
    let path = args.config.clone().unwrap_or_else(|| paths.config_file());
    let config = QuiltConfig::load(&path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;
    tracing::debug!(path = %path.display(), "configuration loaded");
    Ok(config)
}

fn initial_params(config: &QuiltConfig, strips: Option<u32>, shuffles: Option<f32>) -> ParameterState {
    ParameterState::new(
        strips.unwrap_or(config.params.strips),
        shuffles.unwrap_or(config.params.shuffles),
    )
}

fn export_settings(
    config: &QuiltConfig,
    output: Option<PathBuf>,
    prefix: Option<String>,
    default_output: &Path,
) -> ExportSettings {
    ExportSettings {
        max_dimension: config.export.max_dimension,
        prefix: prefix.unwrap_or_else(|| config.export.prefix.clone()),
        output_dir: output
            .or_else(|| config.export.output_dir.clone())
            .unwrap_or_else(|| default_output.to_path_buf()),
        settle_delay: config.export.settle_delay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn config_values_are_used_without_flags() {
        let config = QuiltConfig::from_toml_str(
            r#"
[params]
strips = 48
shuffles = 3

[export]
output_dir = "/srv/quilts"
"#,
        )
        .unwrap();
        let options = AppOptions::resolve(&config, &RunArgs::default(), Path::new("/home/pics"));

        assert_eq!(options.params.strip_count(), 48);
        assert_eq!(options.params.shuffle_depth(), 3.0);
        assert_eq!(options.export.output_dir, PathBuf::from("/srv/quilts"));
        assert_eq!(options.export.prefix, "pixelquilt");
        assert_eq!(options.export.settle_delay, Duration::from_millis(8));
        let camera = options.camera.unwrap();
        assert_eq!(camera.front, PathBuf::from("/dev/video0"));
        assert_eq!(camera.back, PathBuf::from("/dev/video2"));
    }

    #[test]
    fn flags_override_config() {
        let config = QuiltConfig::default();
        let args = RunArgs {
            size: Some(SurfaceSize::new(320, 240)),
            strips: Some(5000),
            shuffles: Some(4.0),
            output: Some(PathBuf::from("out")),
            front_device: Some(PathBuf::from("/dev/video9")),
            ..RunArgs::default()
        };
        let options = AppOptions::resolve(&config, &args, Path::new("/home/pics"));

        assert_eq!(options.window_size, SurfaceSize::new(320, 240));
        // Out-of-range flags are clamped rather than rejected.
        assert_eq!(options.params.strip_count(), quilt::params::MAX_STRIPS);
        assert_eq!(options.params.shuffle_depth(), 4.0);
        assert_eq!(options.export.output_dir, PathBuf::from("out"));
        assert_eq!(
            options.camera.map(|c| c.front),
            Some(PathBuf::from("/dev/video9"))
        );
    }

    #[test]
    fn default_output_dir_applies_last() {
        let config = QuiltConfig::default();
        let options = AppOptions::resolve(&config, &RunArgs::default(), Path::new("/home/pics"));
        assert_eq!(options.export.output_dir, PathBuf::from("/home/pics"));
    }

    #[test]
    fn camera_can_be_disabled() {
        let mut config = QuiltConfig::default();
        let args = RunArgs {
            no_camera: true,
            ..RunArgs::default()
        };
        assert!(AppOptions::resolve(&config, &args, Path::new(".")).camera.is_none());

        config.camera.enabled = false;
        assert!(AppOptions::resolve(&config, &RunArgs::default(), Path::new("."))
            .camera
            .is_none());
    }

    #[test]
    fn low_power_flag_selects_integrated_gpu() {
        let args = RunArgs {
            low_power: true,
            ..RunArgs::default()
        };
        let options = AppOptions::resolve(&QuiltConfig::default(), &args, Path::new("."));
        assert_eq!(options.power, GpuPowerPreference::Low);
        assert_eq!(power_preference(&RunArgs::default()), GpuPowerPreference::High);
    }

    #[test]
    fn render_prefix_overrides_config() {
        let config = QuiltConfig::default();
        let settings = export_settings(&config, None, Some("cat".into()), Path::new("."));
        assert_eq!(settings.prefix, "cat");
        assert_eq!(settings.max_dimension, quilt::export::MAX_EXPORT_DIMENSION);
    }

    #[test]
    fn missing_config_file_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let args = RunArgs {
            config: Some(dir.path().join("absent.toml")),
            ..RunArgs::default()
        };
        let paths = AppPaths::from_raw(dir.path().to_path_buf(), dir.path().to_path_buf());
        let config = load_config(&args, &paths).unwrap();
        assert_eq!(config, QuiltConfig::default());
    }

    #[test]
    fn broken_config_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pixelquilt.toml");
        std::fs::write(&path, "version = 2\n").unwrap();
        let args = RunArgs {
            config: Some(path),
            ..RunArgs::default()
        };
        let paths = AppPaths::from_raw(dir.path().to_path_buf(), dir.path().to_path_buf());
        assert!(load_config(&args, &paths).is_err());
    }

    #[test]
    fn config_file_defaults_to_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("pixelquilt.toml"),
            "[params]\nstrips = 7\n",
        )
        .unwrap();
        let paths = AppPaths::from_raw(dir.path().to_path_buf(), dir.path().to_path_buf());
        let config = load_config(&RunArgs::default(), &paths).unwrap();
        assert_eq!(config.params.strips, 7);
    }
}
