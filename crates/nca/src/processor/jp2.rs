//! PDF/TIFF to JPEG 2000 conversion.
//!
//! The source page is rendered to a PNG, encoded with `opj_compress`, and the
//! result is decoded again with `opj_decompress` to prove it is readable. A
//! small share of born-digital pages produce JP2s the decoder chokes on, so
//! when that happens the encode is retried with `-I` and then across a
//! widening set of compression rates until one round-trips.

use std::collections::{HashSet, VecDeque};
use std::ffi::OsStr;
use std::path::Path;

use super::run_tool;
use crate::error::ToolError;
use crate::storage::filesystem::{exists, link_or_copy};
use crate::storage::ScratchDir;

/// Rates are searched as integers of `rate * RATE_FACTOR` so each candidate
/// is tested once at a fixed granularity.
pub const RATE_FACTOR: f64 = 8.0;

/// Binaries used by the encoder.
#[derive(Debug, Clone)]
pub struct Jp2Tools {
    pub ghostscript: String,
    pub graphics_magick: String,
    pub opj_compress: String,
    pub opj_decompress: String,
}

impl Jp2Tools {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            ghostscript: config.ghostscript.clone(),
            graphics_magick: config.graphics_magick.clone(),
            opj_compress: config.opj_compress.clone(),
            opj_decompress: config.opj_decompress.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Jp2Outcome {
    /// The output already existed and was left alone.
    Skipped,
    /// A JP2 was written using the given `opj_compress -r` value.
    Created { rate: f64, dash_i: bool },
}

/// Converts a quality setting (0-100) into a scaled integer rate, roughly
/// the way GraphicsMagick maps quality to JP2 compression ratios.
pub fn base_rate(quality: f32) -> i64 {
    let d = 115.0 - f64::from(quality);
    let ratio = d * d / 100.0;
    (ratio * RATE_FACTOR) as i64
}

/// FIFO of rate ranges that never yields the same range twice.
#[derive(Debug, Default)]
struct RangeQueue {
    seen: HashSet<(i64, i64)>,
    queue: VecDeque<(i64, i64)>,
}

impl RangeQueue {
    fn push(&mut self, start: i64, end: i64) {
        if self.seen.insert((start, end)) {
            self.queue.push_back((start, end));
        }
    }

    fn pop(&mut self) -> Option<(i64, i64)> {
        self.queue.pop_front()
    }

    fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Searches for a usable scaled rate, starting at `base` and bisecting
/// outward. `try_rate` is called at most once per distinct rate and returns
/// whether that rate produced a readable file. After a handful of misses the
/// search accepts slightly lower quality, then larger files, and finally
/// both extremes before giving up with `None`.
pub fn search_rate<F>(base: i64, mut try_rate: F) -> Result<Option<i64>, ToolError>
where
    F: FnMut(i64) -> Result<bool, ToolError>,
{
    let mut tested = HashSet::new();
    let mut attempt = |rate: i64| -> Result<bool, ToolError> {
        if !tested.insert(rate) {
            return Ok(false);
        }
        try_rate(rate)
    };

    let mut ranges = RangeQueue::default();
    ranges.push(base, base);
    ranges.push(base * 2 / 3, base);

    let mut i = 0usize;
    while let Some((start, end)) = ranges.pop() {
        if attempt(start)? {
            return Ok(Some(start));
        }
        if attempt(end)? {
            return Ok(Some(end));
        }

        let mid = (start + end) / 2;
        ranges.push(start, mid);
        ranges.push(mid, end);

        if i == 5 {
            ranges.push(base, base * 5 / 4);
        }
        if i == 50 {
            ranges.push(base / 3, base * 2 / 3);
        }
        if i > 50 && ranges.is_empty() {
            ranges.push(base / 6, base / 3);
            ranges.push(base * 5 / 4, base * 3 / 2);
        }
        i += 1;
    }

    Ok(None)
}

fn render_png(tools: &Jp2Tools, source: &Path, png: &Path, dpi: u32) -> Result<(), ToolError> {
    let ext = source
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "pdf" => {
            let out_arg = format!("-sOutputFile={}", png.display());
            let res_arg = format!("-r{}", dpi);
            let src = source.display().to_string();
            run_tool(
                &tools.ghostscript,
                [
                    "-dNumRenderingThreads=4",
                    "-dNOPAUSE",
                    "-sDEVICE=png16m",
                    "-dFirstPage=1",
                    "-dLastPage=1",
                    "-dBackgroundColor=16#ffffff",
                    out_arg.as_str(),
                    res_arg.as_str(),
                    "-q",
                    src.as_str(),
                    "-c",
                    "quit",
                ],
            )?;
        }
        "tif" | "tiff" => {
            run_tool(
                &tools.graphics_magick,
                [
                    OsStr::new("convert"),
                    OsStr::new("-background"),
                    OsStr::new("white"),
                    OsStr::new("-quality"),
                    OsStr::new("0"),
                    source.as_os_str(),
                    png.as_os_str(),
                ],
            )?;
        }
        _ => {
            return Err(ToolError::Output(format!(
                "cannot process {} (input file must be *.pdf or *.tiff)",
                source.display()
            )))
        }
    }
    Ok(())
}

fn encode(tools: &Jp2Tools, png: &Path, jp2: &Path, rate: f64, dash_i: bool) -> Result<(), ToolError> {
    let rate_arg = format!("{:.3}", rate);
    let mut args = vec![
        "-i".to_string(),
        png.display().to_string(),
        "-o".to_string(),
        jp2.display().to_string(),
        "-t".to_string(),
        "1024,1024".to_string(),
        "-r".to_string(),
        rate_arg,
    ];
    if dash_i {
        args.push("-I".to_string());
    }
    run_tool(&tools.opj_compress, &args)?;
    Ok(())
}

fn decodes(tools: &Jp2Tools, jp2: &Path, test_png: &Path) -> bool {
    run_tool(
        &tools.opj_decompress,
        [
            OsStr::new("-i"),
            jp2.as_os_str(),
            OsStr::new("-r"),
            OsStr::new("4"),
            OsStr::new("-o"),
            test_png.as_os_str(),
        ],
    )
    .is_ok()
}

/// Builds `output` from `source` (a PDF or TIFF). Existing output is kept
/// unless `overwrite` is set.
pub fn make_jp2(
    tools: &Jp2Tools,
    source: &Path,
    output: &Path,
    quality: f32,
    dpi: u32,
    overwrite: bool,
) -> Result<Jp2Outcome, ToolError> {
    if exists(output) {
        if !overwrite {
            tracing::info!(path = %output.display(), "not generating JP2; file already exists");
            return Ok(Jp2Outcome::Skipped);
        }
        std::fs::remove_file(output).map_err(|e| {
            ToolError::Output(format!("removing existing JP2 {}: {}", output.display(), e))
        })?;
    }

    let scratch = ScratchDir::new("nca-jp2-").map_err(|e| ToolError::Output(e.to_string()))?;
    let png = scratch.join("page.png");
    let jp2 = scratch.join("page.jp2");
    let test_png = scratch.join("test.png");

    tracing::info!(source = %source.display(), "creating PNG");
    render_png(tools, source, &png, dpi)?;

    tracing::info!(source = %source.display(), "creating JP2 from PNG");
    let mut used_dash_i = false;
    let found = search_rate(base_rate(quality), |scaled| {
        let rate = scaled as f64 / RATE_FACTOR;
        for dash_i in [false, true] {
            // An encoder error is treated like an unreadable result
            if encode(tools, &png, &jp2, rate, dash_i).is_ok() && decodes(tools, &jp2, &test_png) {
                tracing::debug!(rate, dash_i, "JP2 verified");
                used_dash_i = dash_i;
                return Ok(true);
            }
        }
        tracing::debug!(rate, "JP2 rate failed");
        Ok(false)
    })?;

    let Some(scaled) = found else {
        return Err(ToolError::Output(format!(
            "no rate found for creating a valid JP2 from {}",
            source.display()
        )));
    };

    tracing::info!(path = %output.display(), "copying temp JP2 into place");
    link_or_copy(&jp2, output).map_err(|e| ToolError::Output(e.to_string()))?;

    Ok(Jp2Outcome::Created {
        rate: scaled as f64 / RATE_FACTOR,
        dash_i: used_dash_i,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_rate() {
        assert_eq!(base_rate(75.0), 128);
        assert_eq!(base_rate(100.0), 18);
        assert_eq!(base_rate(15.0), 800);
    }

    #[test]
    fn test_search_rate_first_try() {
        let mut tried = Vec::new();
        let found = search_rate(128, |r| {
            tried.push(r);
            Ok(true)
        })
        .unwrap();
        assert_eq!(found, Some(128));
        assert_eq!(tried, vec![128]);
    }

    #[test]
    fn test_search_rate_order() {
        let mut tried = Vec::new();
        let found = search_rate(120, |r| {
            tried.push(r);
            Ok(r == 90)
        })
        .unwrap();
        assert_eq!(found, Some(90));
        // base, then two thirds, then the bisections between them
        assert_eq!(tried, vec![120, 80, 100, 90]);
    }

    #[test]
    fn test_search_rate_widens_then_gives_up() {
        let mut tried = Vec::new();
        let found = search_rate(120, |r| {
            tried.push(r);
            Ok(false)
        })
        .unwrap();
        assert_eq!(found, None);
        assert!(tried.contains(&150), "quality loss range was not searched");
        assert!(tried.contains(&40), "wider range was not searched");
        assert!(tried.contains(&20), "extreme low range was not searched");
        assert!(tried.contains(&180), "extreme high range was not searched");
        assert_eq!(tried.iter().collect::<HashSet<_>>().len(), tried.len());
    }

    #[test]
    fn test_search_rate_propagates_errors() {
        let err = search_rate(64, |_| Err(ToolError::Output("disk full".into()))).unwrap_err();
        assert_eq!(err.to_string(), "disk full");
    }

    #[test]
    fn test_make_jp2_skips_existing() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("0001.jp2");
        std::fs::write(&out, b"existing").unwrap();
        let tools = Jp2Tools {
            ghostscript: "/nonexistent/gs".into(),
            graphics_magick: "/nonexistent/gm".into(),
            opj_compress: "/nonexistent/opj_compress".into(),
            opj_decompress: "/nonexistent/opj_decompress".into(),
        };
        let outcome = make_jp2(&tools, &dir.path().join("0001.pdf"), &out, 75.0, 150, false).unwrap();
        assert_eq!(outcome, Jp2Outcome::Skipped);
        assert_eq!(std::fs::read(&out).unwrap(), b"existing");
    }

    #[test]
    fn test_make_jp2_rejects_unknown_source() {
        let dir = tempfile::tempdir().unwrap();
        let tools = Jp2Tools {
            ghostscript: "gs".into(),
            graphics_magick: "gm".into(),
            opj_compress: "opj_compress".into(),
            opj_decompress: "opj_decompress".into(),
        };
        let err = make_jp2(
            &tools,
            &dir.path().join("0001.png"),
            &dir.path().join("0001.jp2"),
            75.0,
            150,
            false,
        )
        .unwrap_err();
        assert!(err.to_string().contains("must be *.pdf or *.tiff"));
    }
}
