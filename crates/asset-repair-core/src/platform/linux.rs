use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tracing::debug;

fn dev_major(dev: u64) -> u64 {
    ((dev >> 8) & 0xfff) | ((dev >> 32) & !0xfff)
}

fn dev_minor(dev: u64) -> u64 {
    (dev & 0xff) | ((dev >> 12) & !0xff)
}

/// `Some(false)` for a rotational disk, `None` when sysfs doesn't say
/// (tmpfs, overlay, network mounts).
pub fn is_solid_state(path: &Path) -> Option<bool> {
    let dev = fs::metadata(path).ok()?.dev();
    let device_dir = fs::canonicalize(PathBuf::from(format!(
        "/sys/dev/block/{}:{}",
        dev_major(dev),
        dev_minor(dev)
    )))
    .ok()?;

    // partitions keep the queue attributes on the parent disk
    let candidates = [
        device_dir.join("queue").join("rotational"),
        device_dir.parent()?.join("queue").join("rotational"),
    ];

    for candidate in &candidates {
        if let Ok(value) = fs::read_to_string(candidate) {
            debug!("{} = {}", candidate.display(), value.trim());
            return Some(value.trim() != "1");
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dev_split() {
        // makedev(8, 17)
        let dev = (8u64 << 8) | 17;
        assert_eq!(dev_major(dev), 8);
        assert_eq!(dev_minor(dev), 17);

        // makedev(259, 300): large minor spills into the high bits
        let dev = ((300u64 & !0xff) << 12) | ((259u64 & 0xfff) << 8) | (300 & 0xff);
        assert_eq!(dev_major(dev), 259);
        assert_eq!(dev_minor(dev), 300);
    }
}
