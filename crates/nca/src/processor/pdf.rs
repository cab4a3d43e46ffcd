use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use super::run_tool;
use crate::error::ToolError;

static RE_SPLIT_PAGE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^seq-(\d+)\.pdf$").unwrap());

/// Number of pages in a PDF, read with lopdf.
pub fn page_count(path: &Path) -> Result<usize, ToolError> {
    let doc = lopdf::Document::load(path).map_err(|e| ToolError::Pdf {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(doc.get_pages().len())
}

/// Combines `inputs` (in the given order) into one PDF with ghostscript.
/// Ghostscript copes with some PDFs that crash poppler, so this also acts as
/// a normalizing pass before splitting.
pub fn combine(gs: &str, inputs: &[PathBuf], output: &Path) -> Result<(), ToolError> {
    let mut args: Vec<String> = [
        "-sDEVICE=pdfwrite",
        "-dCompatibilityLevel=1.6",
        "-dPDFSETTINGS=/default",
        "-dNOPAUSE",
        "-dQUIET",
        "-dBATCH",
        "-dDetectDuplicateImages",
        "-dCompressFonts=true",
        "-r150",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    args.push(format!("-sOutputFile={}", output.display()));
    args.extend(inputs.iter().map(|p| p.display().to_string()));

    run_tool(gs, &args)?;
    Ok(())
}

/// Splits `input` into one file per page, `seq-N.pdf`, inside `dir`.
pub fn separate(pdfseparate: &str, input: &Path, dir: &Path) -> Result<(), ToolError> {
    let pattern = dir.join("seq-%d.pdf");
    run_tool(pdfseparate, [input.as_os_str(), pattern.as_os_str()])?;
    Ok(())
}

/// Page number of a `seq-N.pdf` file name.
pub fn split_page_number(name: &str) -> Option<u32> {
    RE_SPLIT_PAGE
        .captures(name)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Converts `input` to PDF/A-2 at `output`.
pub fn convert_to_pdfa(gs: &str, input: &Path, output: &Path) -> Result<(), ToolError> {
    let out_arg = format!("-sOutputFile={}", output.display());
    let src = input.display().to_string();
    run_tool(
        gs,
        [
            "-dPDFA=2",
            "-dBATCH",
            "-dNOPAUSE",
            "-sProcessColorModel=DeviceCMYK",
            "-sDEVICE=pdfwrite",
            "-sPDFACompatibilityPolicy=1",
            out_arg.as_str(),
            src.as_str(),
        ],
    )?;
    Ok(())
}

/// Sorts upload file names the way a person would: `2.pdf` before `10.pdf`,
/// falling back to plain name order for ties and non-numeric names.
pub fn numeric_sort(paths: &mut [PathBuf]) {
    static RE_DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());

    paths.sort_by(|a, b| {
        let key = |p: &PathBuf| {
            let name = p
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let num = RE_DIGITS
                .find(&name)
                .and_then(|m| m.as_str().parse::<u64>().ok())
                .unwrap_or(u64::MAX);
            (num, name)
        };
        key(a).cmp(&key(b))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, Document, Object};

    fn write_pdf(path: &Path, pages: usize) {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let mut kids = Vec::new();
        for _ in 0..pages {
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            });
            kids.push(Object::Reference(page_id));
        }
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => pages as i64,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.save(path).unwrap();
    }

    #[test]
    fn test_page_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("master.pdf");
        write_pdf(&path, 3);
        assert_eq!(page_count(&path).unwrap(), 3);

        std::fs::write(dir.path().join("junk.pdf"), b"not a pdf").unwrap();
        assert!(matches!(
            page_count(&dir.path().join("junk.pdf")),
            Err(ToolError::Pdf { .. })
        ));
    }

    #[test]
    fn test_split_page_number() {
        assert_eq!(split_page_number("seq-1.pdf"), Some(1));
        assert_eq!(split_page_number("seq-0012.pdf"), Some(12));
        assert_eq!(split_page_number("seq-.pdf"), None);
        assert_eq!(split_page_number("page-1.pdf"), None);
    }

    #[test]
    fn test_numeric_sort() {
        let mut paths: Vec<PathBuf> = ["10.pdf", "2.pdf", "cover.pdf", "1.pdf"]
            .iter()
            .map(PathBuf::from)
            .collect();
        numeric_sort(&mut paths);
        let names: Vec<_> = paths.iter().map(|p| p.display().to_string()).collect();
        assert_eq!(names, ["1.pdf", "2.pdf", "10.pdf", "cover.pdf"]);
    }
}
