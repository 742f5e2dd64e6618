use anyhow::Context;
use config::Config;
use serde::Deserialize;
use std::path::PathBuf;

/// Reads a config file into any deserializable type, typically
/// [`crate::config::FrameConfig`] or an embedding application's own
/// struct wrapping it. Format is inferred from the file extension.
pub fn load_cfg<T: for<'a> Deserialize<'a>>(path: impl AsRef<str>) -> anyhow::Result<T> {
    let cfg = Config::builder()
        .add_source(config::File::from(PathBuf::from(path.as_ref())))
        .build()
        .with_context(|| format!("failed to read config from {}", path.as_ref()))?;

    let parsed: T = cfg
        .try_deserialize()
        .with_context(|| format!("failed to deserialize config from {}", path.as_ref()))?;

    Ok(parsed)
}
