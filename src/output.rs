//! Output file naming: `{export.directory}/output-{ISO8601 local}.{container}`.

use chrono::Local;
use std::path::PathBuf;

use crate::config::Config;

/// Build the path a flush should write to, creating `export.directory` if
/// it does not yet exist.
pub fn generate_output_filename(cfg: &Config) -> std::io::Result<PathBuf> {
    let dir = cfg.export_directory();
    std::fs::create_dir_all(&dir)?;

    let timestamp = Local::now().format("%Y-%m-%dT%H:%M:%S");
    let filename = format!("output-{}.{}", timestamp, cfg.codec.container);
    Ok(dir.join(filename))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CodecSection, ExportSection, SpotlightSection};

    #[test]
    fn filename_uses_configured_directory_and_container() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = Config {
            spotlight: SpotlightSection::default(),
            codec: CodecSection {
                container: "mkv".to_string(),
                ..CodecSection::default()
            },
            export: ExportSection {
                directory: tmp.path().to_string_lossy().to_string(),
            },
        };
        let path = generate_output_filename(&cfg).unwrap();
        assert_eq!(path.extension().unwrap(), "mkv");
        assert!(path.starts_with(tmp.path()));
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("output-"));
    }
}
