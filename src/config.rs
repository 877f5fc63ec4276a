//! Configuration loading for the named options of the external interface.
//!
//! Built on the `config` crate (layered TOML file + `SPOTLIGHT_*` environment
//! overrides) the way a config-driven daemon in this corpus would: a single
//! `Config::load` entry point, defaults supplied by `#[serde(default = ...)]`
//! so a config file only needs to mention what it overrides.

use indexmap::IndexMap;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{Result, SpotlightError};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub spotlight: SpotlightSection,
    #[serde(default)]
    pub codec: CodecSection,
    #[serde(default)]
    pub export: ExportSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpotlightSection {
    #[serde(default = "default_framerate")]
    pub framerate: u32,
    #[serde(default = "default_window_size", rename = "window-size")]
    pub window_size: u32,
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default)]
    pub capture: CaptureSection,
    #[serde(default)]
    pub audio: AudioSection,
}

impl Default for SpotlightSection {
    fn default() -> Self {
        Self {
            framerate: default_framerate(),
            window_size: default_window_size(),
            threads: default_threads(),
            capture: CaptureSection::default(),
            audio: AudioSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureSection {
    #[serde(default)]
    pub x: i32,
    #[serde(default)]
    pub y: i32,
    #[serde(default = "default_capture_width")]
    pub width: u32,
    #[serde(default = "default_capture_height")]
    pub height: u32,
    #[serde(default)]
    pub scale: ScaleSection,
}

impl Default for CaptureSection {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            width: default_capture_width(),
            height: default_capture_height(),
            scale: ScaleSection::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ScaleSection {
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

impl ScaleSection {
    /// The resolution the pipeline should encode at, given a capture size.
    /// Only applies when both dimensions are non-zero.
    pub fn resolve(&self, source_width: u32, source_height: u32) -> (u32, u32) {
        if self.width != 0 && self.height != 0 {
            (self.width, self.height)
        } else {
            (source_width, source_height)
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AudioSection {
    #[serde(default = "default_audio_codec")]
    pub codec: String,
    #[serde(default = "default_audio_bitrate")]
    pub bitrate: i64,
    /// Keyed by device title, but order-preserving: stream registration
    /// order (and therefore muxer stream index) must match config-file
    /// declaration order, not hash order.
    #[serde(default)]
    pub device: IndexMap<String, AudioDeviceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioDeviceConfig {
    pub name: String,
    #[serde(default = "default_channels")]
    pub channels: String,
}

impl AudioDeviceConfig {
    pub fn channel_count(&self) -> Result<u16> {
        match self.channels.as_str() {
            "mono" => Ok(1),
            "stereo" => Ok(2),
            other => Err(SpotlightError::Configuration(format!(
                "invalid channel layout '{other}', expected 'mono' or 'stereo'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CodecSection {
    #[serde(default = "default_codec_name")]
    pub name: String,
    #[serde(default = "default_codec_container")]
    pub container: String,
    #[serde(default = "default_codec_bitrate")]
    pub bitrate: i64,
    #[serde(default)]
    pub options: HashMap<String, String>,
}

impl Default for CodecSection {
    fn default() -> Self {
        Self {
            name: default_codec_name(),
            container: default_codec_container(),
            bitrate: default_codec_bitrate(),
            options: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExportSection {
    #[serde(default = "default_export_directory")]
    pub directory: String,
}

impl Default for ExportSection {
    fn default() -> Self {
        Self {
            directory: default_export_directory(),
        }
    }
}

fn default_framerate() -> u32 {
    30
}
fn default_window_size() -> u32 {
    30
}
fn default_threads() -> usize {
    3
}
fn default_capture_width() -> u32 {
    1920
}
fn default_capture_height() -> u32 {
    1080
}
fn default_audio_codec() -> String {
    "aac".to_string()
}
fn default_audio_bitrate() -> i64 {
    64_000
}
fn default_channels() -> String {
    "stereo".to_string()
}
fn default_codec_name() -> String {
    "libx264".to_string()
}
fn default_codec_container() -> String {
    "mp4".to_string()
}
fn default_codec_bitrate() -> i64 {
    8_000_000
}
fn default_export_directory() -> String {
    "~/Videos/".to_string()
}

impl Config {
    /// Load configuration from `path` (or the default
    /// `~/.config/spotlight/config.toml` search location when `None`),
    /// layering `SPOTLIGHT_*` environment variables on top, and applying
    /// the defaults above for anything left unset.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let default_path = default_config_path();
        let chosen = path.map(Path::to_path_buf).unwrap_or(default_path);

        let builder = config::Config::builder()
            .add_source(
                config::File::from(chosen.as_path())
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix("SPOTLIGHT")
                    .separator("__")
                    .try_parsing(true),
            );

        let raw = builder
            .build()
            .map_err(|e| SpotlightError::Configuration(e.to_string()))?;

        raw.try_deserialize::<Config>()
            .map_err(|e| SpotlightError::Configuration(e.to_string()))
    }

    /// Expand `export.directory`'s leading `~` against the user's home dir.
    pub fn export_directory(&self) -> PathBuf {
        expand_tilde(&self.export.directory)
    }
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("spotlight")
        .join("config.toml")
}

fn expand_tilde(raw: &str) -> PathBuf {
    if let Some(stripped) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_original_source() {
        let cfg = Config {
            spotlight: SpotlightSection::default(),
            codec: CodecSection::default(),
            export: ExportSection::default(),
        };
        assert_eq!(cfg.spotlight.framerate, 30);
        assert_eq!(cfg.spotlight.window_size, 30);
        assert_eq!(cfg.spotlight.threads, 3);
        assert_eq!(cfg.spotlight.capture.width, 1920);
        assert_eq!(cfg.spotlight.capture.height, 1080);
        assert_eq!(cfg.spotlight.audio.codec, "aac");
        assert_eq!(cfg.spotlight.audio.bitrate, 64_000);
        assert_eq!(cfg.codec.name, "libx264");
        assert_eq!(cfg.codec.container, "mp4");
        assert_eq!(cfg.codec.bitrate, 8_000_000);
        assert_eq!(cfg.export.directory, "~/Videos/");
    }

    #[test]
    fn scale_section_passthrough_when_unset() {
        let scale = ScaleSection::default();
        assert_eq!(scale.resolve(1920, 1080), (1920, 1080));
    }

    #[test]
    fn scale_section_overrides_when_both_set() {
        let scale = ScaleSection {
            width: 1280,
            height: 720,
        };
        assert_eq!(scale.resolve(1920, 1080), (1280, 720));
    }

    #[test]
    fn channel_count_rejects_unknown_layout() {
        let dev = AudioDeviceConfig {
            name: "x".into(),
            channels: "5.1".into(),
        };
        assert!(dev.channel_count().is_err());
    }

    #[test]
    fn channel_count_accepts_mono_and_stereo() {
        let mono = AudioDeviceConfig {
            name: "x".into(),
            channels: "mono".into(),
        };
        let stereo = AudioDeviceConfig {
            name: "x".into(),
            channels: "stereo".into(),
        };
        assert_eq!(mono.channel_count().unwrap(), 1);
        assert_eq!(stereo.channel_count().unwrap(), 2);
    }
}
