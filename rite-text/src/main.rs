use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use rite_core::RiteFile;

const BIN_EXT: &str = ".bin";
const TXT_EXT: &str = ".txt";
const NEW_SUFFIX: &str = ".NEW";

/// Extract the script text of a RITE container into an editable line file,
/// or rebuild a container from an edited line file.
///
/// A `.bin` path runs extraction and writes `<path>.txt` with one string
/// constant per line (`<CR>`/`<LF>` stand for embedded line breaks; keep
/// them). A `.bin.txt` path runs import: the sibling container is
/// re-parsed, the edited lines are patched into its constant pool, and the
/// result is written to `<container>.NEW`.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Container (`*.bin`) or edited line file (`*.bin.txt`).
    path: PathBuf,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let path = args.path.to_string_lossy().into_owned();
    if let Some(container) = path.strip_suffix(TXT_EXT).filter(|p| p.ends_with(BIN_EXT)) {
        import(container, &path)
    } else if path.ends_with(BIN_EXT) {
        export(&path)
    } else {
        bail!(
            "unsupported input {path:?}: expected a `{BIN_EXT}` container (extract) \
             or a `{BIN_EXT}{TXT_EXT}` line file (import)"
        );
    }
}

fn export(bin_path: &str) -> Result<()> {
    let bytes = fs::read(bin_path).with_context(|| format!("read {bin_path:?}"))?;
    let file = RiteFile::parse(&bytes).with_context(|| format!("parse {bin_path:?}"))?;

    let lines = file.extract_lines();
    log::info!(
        "{bin_path}: {} sections, {} string constants",
        file.sections.len(),
        lines.len()
    );

    let mut text = String::new();
    for line in &lines {
        text.push_str(line);
        text.push('\n');
    }
    let txt_path = format!("{bin_path}{TXT_EXT}");
    fs::write(&txt_path, text).with_context(|| format!("write {txt_path:?}"))?;
    log::info!("wrote {txt_path}");
    Ok(())
}

fn import(bin_path: &str, txt_path: &str) -> Result<()> {
    let bytes = fs::read(bin_path).with_context(|| format!("read {bin_path:?}"))?;
    let file = RiteFile::parse(&bytes).with_context(|| format!("parse {bin_path:?}"))?;

    let text = fs::read_to_string(txt_path).with_context(|| format!("read {txt_path:?}"))?;
    let lines: Vec<String> = text.lines().map(str::to_owned).collect();
    log::info!(
        "{txt_path}: {} replacement lines for {} string constants",
        lines.len(),
        file.string_count()
    );

    // The whole container is rebuilt in memory and written in one shot, so
    // a failed run leaves no partial artifact.
    let rendered = file
        .render(&lines)
        .with_context(|| format!("rebuild {bin_path:?} from {txt_path:?}"))?;

    let out_path = format!("{bin_path}{NEW_SUFFIX}");
    fs::write(&out_path, rendered).with_context(|| format!("write {out_path:?}"))?;
    log::info!("wrote {out_path}");
    Ok(())
}
