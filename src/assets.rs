use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::json;
use tracing::debug;

use crate::parser::{BlockKind, Section};

/// Writes image and table bytes carried by blocks to a directory and puts
/// the file name into `Block::content`.
pub struct AssetWriter {
    dir: PathBuf,
}

impl AssetWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the number of files written. Names are `page_{p}_img_{k}.{ext}` and
    /// `page_{p}_table_{k}.png`, `k` counting per page in reading order.
    pub fn write_sections(&self, sections: &mut [Section]) -> Result<usize> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create assets dir {}", self.dir.display()))?;

        let mut per_page: HashMap<(u32, BlockKind), usize> = HashMap::new();
        let mut written = 0;

        for block in sections.iter_mut().flat_map(|s| s.blocks.iter_mut()) {
            if block.kind == BlockKind::Text {
                continue;
            }
            let n = per_page.entry((block.page, block.kind)).or_insert(0);
            *n += 1;
            if block.payload.is_empty() {
                continue;
            }

            let name = match block.kind {
                BlockKind::Image => {
                    let ext = block.image_format().unwrap_or("png");
                    format!("page_{}_img_{}.{}", block.page, n, ext)
                }
                _ => format!("page_{}_table_{}.png", block.page, n),
            };
            let path = self.dir.join(&name);
            std::fs::write(&path, &block.payload)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            debug!("Wrote {} ({} bytes)", name, block.payload.len());

            block.metadata.insert("sizeBytes".into(), json!(block.payload.len()));
            block.content = name;
            block.payload = Vec::new();
            written += 1;
        }

        Ok(written)
    }
}
