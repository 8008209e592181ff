use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use quilt::params::{MAX_SHUFFLES, MAX_STRIPS, MIN_SHUFFLES, MIN_STRIPS};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE_NAME: &str = "pixelquilt.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Window size written as `WIDTHxHEIGHT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SurfaceSize {
    pub width: u32,
    pub height: u32,
}

impl SurfaceSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl FromStr for SurfaceSize {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (w, h) = value
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("invalid size '{value}'; expected WIDTHxHEIGHT"))?;
        let width: u32 = w
            .trim()
            .parse()
            .map_err(|_| format!("invalid width in '{value}'"))?;
        let height: u32 = h
            .trim()
            .parse()
            .map_err(|_| format!("invalid height in '{value}'"))?;
        if width == 0 || height == 0 {
            return Err(format!("size '{value}' must be non-zero"));
        }
        Ok(Self { width, height })
    }
}

impl TryFrom<String> for SurfaceSize {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SurfaceSize> for String {
    fn from(value: SurfaceSize) -> Self {
        value.to_string()
    }
}

impl fmt::Display for SurfaceSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct QuiltConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub window: WindowSection,
    #[serde(default)]
    pub params: ParamsSection,
    #[serde(default)]
    pub camera: CameraSection,
    #[serde(default)]
    pub export: ExportSection,
    #[serde(default)]
    pub gestures: GestureSection,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WindowSection {
    #[serde(default = "default_window_size")]
    pub size: SurfaceSize,
    /// Draw the shutter ring and accept clicks on it.
    #[serde(default = "default_true")]
    pub shutter: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ParamsSection {
    #[serde(default = "default_strips")]
    pub strips: u32,
    #[serde(default = "default_shuffles")]
    pub shuffles: f32,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CameraSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_front_device")]
    pub front_device: PathBuf,
    #[serde(default = "default_back_device")]
    pub back_device: PathBuf,
    /// Requested capture width; the device picks its closest mode.
    #[serde(default = "default_camera_width")]
    pub width: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ExportSection {
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Defaults to the platform pictures directory when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    #[serde(
        default = "default_settle_delay",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub settle_delay: Duration,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GestureSection {
    #[serde(
        default = "default_double_tap",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub double_tap: Duration,
    #[serde(default = "default_swipe_threshold")]
    pub swipe_threshold: f64,
}

fn default_version() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_window_size() -> SurfaceSize {
    SurfaceSize::new(1280, 720)
}

fn default_strips() -> u32 {
    quilt::params::DEFAULT_STRIPS
}

fn default_shuffles() -> f32 {
    quilt::params::DEFAULT_SHUFFLES
}

fn default_front_device() -> PathBuf {
    PathBuf::from("/dev/video0")
}

fn default_back_device() -> PathBuf {
    PathBuf::from("/dev/video2")
}

fn default_camera_width() -> u32 {
    quilt::REQUESTED_CAMERA_WIDTH
}

fn default_max_dimension() -> u32 {
    quilt::export::MAX_EXPORT_DIMENSION
}

fn default_prefix() -> String {
    quilt::export::DEFAULT_PREFIX.to_string()
}

fn default_settle_delay() -> Duration {
    quilt::export::DEFAULT_SETTLE_DELAY
}

fn default_double_tap() -> Duration {
    quilt::router::DEFAULT_DOUBLE_TAP_WINDOW
}

fn default_swipe_threshold() -> f64 {
    quilt::router::DEFAULT_SWIPE_THRESHOLD
}

impl Default for WindowSection {
    fn default() -> Self {
        Self {
            size: default_window_size(),
            shutter: true,
        }
    }
}

impl Default for ParamsSection {
    fn default() -> Self {
        Self {
            strips: default_strips(),
            shuffles: default_shuffles(),
        }
    }
}

impl Default for CameraSection {
    fn default() -> Self {
        Self {
            enabled: true,
            front_device: default_front_device(),
            back_device: default_back_device(),
            width: default_camera_width(),
        }
    }
}

impl Default for ExportSection {
    fn default() -> Self {
        Self {
            max_dimension: default_max_dimension(),
            prefix: default_prefix(),
            output_dir: None,
            settle_delay: default_settle_delay(),
        }
    }
}

impl Default for GestureSection {
    fn default() -> Self {
        Self {
            double_tap: default_double_tap(),
            swipe_threshold: default_swipe_threshold(),
        }
    }
}

impl Default for QuiltConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            window: WindowSection::default(),
            params: ParamsSection::default(),
            camera: CameraSection::default(),
            export: ExportSection::default(),
            gestures: GestureSection::default(),
        }
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as milliseconds or a human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Duration::from_millis(v))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_millis(v as u64))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.is_nan() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs_f64(v / 1000.0))
        }
    }

    deserializer.deserialize_any(Visitor)
}

fn serialize_duration<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&humantime::format_duration(*value).to_string())
}

impl QuiltConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: QuiltConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    /// Reads and validates `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_toml_str(&contents),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected 1",
                self.version
            )));
        }

        let strips = self.params.strips;
        if !(MIN_STRIPS..=MAX_STRIPS).contains(&strips) {
            return Err(ConfigError::Invalid(format!(
                "params.strips must be within {MIN_STRIPS}..={MAX_STRIPS}, got {strips}"
            )));
        }

        let shuffles = self.params.shuffles;
        if !shuffles.is_finite() || !(MIN_SHUFFLES..=MAX_SHUFFLES).contains(&shuffles) {
            return Err(ConfigError::Invalid(format!(
                "params.shuffles must be within {MIN_SHUFFLES}..={MAX_SHUFFLES}, got {shuffles}"
            )));
        }

        if self.camera.width == 0 {
            return Err(ConfigError::Invalid("camera.width must be > 0".into()));
        }

        if self.export.max_dimension == 0 {
            return Err(ConfigError::Invalid(
                "export.max_dimension must be > 0".into(),
            ));
        }

        let prefix = self.export.prefix.trim();
        if prefix.is_empty() {
            return Err(ConfigError::Invalid("export.prefix may not be empty".into()));
        }
        if prefix.contains(['/', '\\']) {
            return Err(ConfigError::Invalid(format!(
                "export.prefix '{prefix}' may not contain path separators"
            )));
        }

        if self.gestures.double_tap.is_zero() {
            return Err(ConfigError::Invalid(
                "gestures.double_tap must be greater than zero".into(),
            ));
        }

        let threshold = self.gestures.swipe_threshold;
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(ConfigError::Invalid(
                "gestures.swipe_threshold must be a non-negative number".into(),
            ));
        }

        Ok(())
    }
}
