#[cfg(target_os = "linux")]
mod linux;

use std::path::{Path, PathBuf};

/// Tells whether the volume holding a path is solid-state.
pub trait MediumProbe: Send + Sync {
    fn is_solid_state(&self, path: &Path) -> bool;
}

/// Probe backed by the operating system. When the medium can't be
/// determined it reports solid-state so verification is not throttled.
pub struct SystemMediumProbe;

impl MediumProbe for SystemMediumProbe {
    #[cfg(target_os = "linux")]
    fn is_solid_state(&self, path: &Path) -> bool {
        linux::is_solid_state(&nearest_existing(path)).unwrap_or(true)
    }

    #[cfg(not(target_os = "linux"))]
    fn is_solid_state(&self, _path: &Path) -> bool {
        true
    }
}

/// Probe with a fixed answer.
pub struct FixedMedium(pub bool);

impl MediumProbe for FixedMedium {
    fn is_solid_state(&self, _path: &Path) -> bool {
        self.0
    }
}

/// The path itself or its closest ancestor that exists.
pub fn nearest_existing(path: &Path) -> PathBuf {
    path.ancestors()
        .find(|p| p.exists())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}
