// SPDX-License-Identifier: MIT

use std::fs;
use std::io::{self, BufRead};
use std::path::Path;

use anyhow::{Context, bail};
use uuid::Uuid;

/// Clap value parser for partition types: UUID text or a type alias.
pub fn parse_type(s: &str) -> Result<Uuid, String> {
    gptpart::guid::parse(s).map_err(|e| e.to_string())
}

/// First line of `path` (`-` reads stdin), without its line terminator.
pub fn read_first_line(path: &Path) -> anyhow::Result<String> {
    let mut line = String::new();
    if path == Path::new("-") {
        io::stdin().lock().read_line(&mut line)?;
    } else {
        let file = fs::File::open(path).with_context(|| format!("unable to open {}", path.display()))?;
        io::BufReader::new(file).read_line(&mut line)?;
    }
    let line = line.trim_end_matches(['\r', '\n']);
    if line.is_empty() {
        bail!("no label found in {}", path.display());
    }
    Ok(line.to_string())
}

/// Whole contents of a boot image.
pub fn read_image(path: &Path) -> anyhow::Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("unable to open {}", path.display()))
}
