//! Page images, OCR, and page file naming.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use super::args::{ForcedArgs, LocationArgs};
use super::{OrRespond, ProcessResponse, Run, Step};
use crate::db::reference_repo;
use crate::models::Issue;
use crate::processor::alto::{make_alto, AltoJob, AltoOutcome};
use crate::processor::jp2::{make_jp2, Jp2Outcome, Jp2Tools};
use crate::processor::pdf;
use crate::storage::filesystem::{
    copy_file, ensure_dir, exists, list_files, move_path, must_not_exist, read_to_string, remove_dir_all,
    write_replace,
};
use crate::storage::ScratchDir;

static RE_PDF: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^\d{4}\.pdf$").unwrap());
static RE_TIFF: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^\d{4}\.tiff?$").unwrap());
static RE_DERIVATIVE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^\d{4}\.(xml|jp2)$").unwrap());

/// Language used for ALTO when the title has none on record.
const DEFAULT_LANG: &str = "eng";

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn issue_dir(run: &Run<'_>, issue: &Issue) -> Step<PathBuf> {
    if issue.location.is_empty() {
        run.log.error(format!("Issue {} has no location", issue.id));
        return Err(ProcessResponse::Fatal);
    }
    Ok(PathBuf::from(&issue.location))
}

/// Turns a born-digital upload into one PDF/A page per file.
///
/// The uploaded PDFs are combined in numeric order, split into pages, and
/// converted to PDF/A in a scratch directory. The finished pages are copied
/// next to the output directory under a dot-name and renamed into place, so
/// the output either holds every page or doesn't exist.
pub(super) fn page_split(run: &Run<'_>) -> Step {
    let output = LocationArgs::parse_path(&run.job.args).or_fatal(&run.log, "Invalid job args")?;
    must_not_exist(&output).or_fatal(&run.log, "Refusing to split pages")?;

    let issue = run.issue()?;
    let source_dir = issue_dir(run, &issue)?;
    let config = run.config();

    let mut inputs: Vec<PathBuf> = list_files(&source_dir)
        .or_failure(&run.log, &format!("Unable to read {:?}", source_dir))?
        .into_iter()
        .filter(|p| p.extension().is_some_and(|e| e.eq_ignore_ascii_case("pdf")))
        .collect();
    if inputs.is_empty() {
        run.log.error(format!("No PDFs found in {:?}", source_dir));
        return Err(ProcessResponse::Fatal);
    }
    pdf::numeric_sort(&mut inputs);

    let scratch = ScratchDir::new("nca-pagesplit-").or_failure(&run.log, "Unable to create scratch directory")?;
    let combined = scratch.join("combined.pdf");
    run.log.info(format!("Combining {} PDF(s) into {:?}", inputs.len(), combined));
    pdf::combine(&config.ghostscript, &inputs, &combined).or_failure(&run.log, "Unable to combine PDFs")?;

    let split_dir = scratch.join("split");
    ensure_dir(&split_dir).or_failure(&run.log, "Unable to create split directory")?;
    run.log.info("Splitting combined PDF into pages");
    pdf::separate(&config.pdfseparate, &combined, &split_dir).or_failure(&run.log, "Unable to split PDF")?;

    let mut pages = Vec::new();
    for path in list_files(&split_dir).or_failure(&run.log, "Unable to read split pages")? {
        let Some(n) = pdf::split_page_number(&file_name(&path)) else {
            run.log.warn(format!("Ignoring unexpected file {:?}", path));
            continue;
        };
        let padded = split_dir.join(format!("seq-{:04}.pdf", n));
        std::fs::rename(&path, &padded).or_failure(&run.log, &format!("Unable to rename {:?}", path))?;
        pages.push(padded);
    }
    pages.sort();

    if pages.len() < config.minimum_issue_pages as usize {
        run.log.error(format!(
            "Issue has {} page(s); at least {} are required",
            pages.len(),
            config.minimum_issue_pages
        ));
        return Err(ProcessResponse::Fatal);
    }

    let pdfa_dir = scratch.join("pdfa");
    ensure_dir(&pdfa_dir).or_failure(&run.log, "Unable to create PDF/A directory")?;
    for page in &pages {
        let dest = pdfa_dir.join(file_name(page));
        run.log.debug(format!("Converting {:?} to PDF/A", page));
        pdf::convert_to_pdfa(&config.ghostscript, page, &dest)
            .or_failure(&run.log, &format!("Unable to convert {:?} to PDF/A", page))?;
    }

    let Some(parent) = output.parent() else {
        run.log.error(format!("Output {:?} has no parent directory", output));
        return Err(ProcessResponse::Fatal);
    };
    let copy_dir = parent.join(format!(".copy-{}", file_name(&output)));
    remove_dir_all(&copy_dir).or_failure(&run.log, "Unable to clear a previous copy")?;
    ensure_dir(&copy_dir).or_failure(&run.log, "Unable to create copy directory")?;
    for file in list_files(&pdfa_dir).or_failure(&run.log, "Unable to read PDF/A pages")? {
        copy_file(&file, &copy_dir.join(file_name(&file))).or_failure(&run.log, "Unable to copy page")?;
    }
    std::fs::rename(&copy_dir, &output)
        .or_failure(&run.log, &format!("Unable to rename {:?} to {:?}", copy_dir, output))?;

    run.log.info(format!("Split issue {} into {} page(s) at {:?}", issue.id, pages.len(), output));
    Ok(())
}

/// One page's sources: the PDF always feeds ALTO; the JP2 comes from the
/// TIFF for scans.
#[derive(Debug)]
struct PageSources {
    pdf: PathBuf,
    image: PathBuf,
}

/// Checks an issue directory holds only numbered page files and pairs each
/// PDF with its image source.
fn find_page_sources(run: &Run<'_>, dir: &Path, scanned: bool) -> Step<Vec<PageSources>> {
    let mut pdfs = Vec::new();
    let mut tiffs = Vec::new();
    for path in list_files(dir).or_failure(&run.log, &format!("Unable to read {:?}", dir))? {
        let name = file_name(&path);
        if name.starts_with('.') {
            continue;
        }
        if RE_PDF.is_match(&name) {
            pdfs.push(path);
        } else if RE_TIFF.is_match(&name) {
            tiffs.push(path);
        } else if !RE_DERIVATIVE.is_match(&name) {
            run.log.error(format!("Unexpected file found: {:?}", name));
            return Err(ProcessResponse::Fatal);
        }
    }

    if pdfs.is_empty() {
        run.log.error(format!("No valid PDFs found in {:?}", dir));
        return Err(ProcessResponse::Fatal);
    }
    if !scanned {
        return Ok(pdfs
            .into_iter()
            .map(|pdf| PageSources {
                image: pdf.clone(),
                pdf,
            })
            .collect());
    }

    if pdfs.len() != tiffs.len() {
        run.log.error(format!(
            "Derivative mismatch: there are {} PDFs but {} TIFFs",
            pdfs.len(),
            tiffs.len()
        ));
        return Err(ProcessResponse::Fatal);
    }
    let mut sources = Vec::with_capacity(pdfs.len());
    for (pdf, tiff) in pdfs.into_iter().zip(tiffs) {
        if stem(&pdf) != stem(&tiff) {
            run.log.error(format!(
                "Derivative mismatch: PDF {:?} doesn't match TIFF {:?}",
                pdf, tiff
            ));
            return Err(ProcessResponse::Fatal);
        }
        sources.push(PageSources { pdf, image: tiff });
    }
    Ok(sources)
}

/// Builds ALTO XML and a JP2 for every page. Existing outputs are kept
/// unless `Forced=true`. Every page is attempted before a tool failure is
/// reported, so one retry can pick up all the stragglers.
pub(super) fn make_derivatives(run: &Run<'_>) -> Step {
    let forced = ForcedArgs::parse(&run.job.args).or_fatal(&run.log, "Invalid job args")?.forced;
    let issue = run.issue()?;
    let dir = issue_dir(run, &issue)?;
    let config = run.config();

    let title = run
        .db()
        .with_conn(|conn| reference_repo::find_title_by_lccn(conn, &issue.lccn))
        .or_failure(&run.log, "Unable to look up title")?;
    let lang = match title {
        Some(t) if !t.lang_code3.trim().is_empty() => t.lang_code3,
        Some(_) => DEFAULT_LANG.to_string(),
        None => {
            run.log.warn(format!("No title found for LCCN {:?}; using {:?} for OCR", issue.lccn, DEFAULT_LANG));
            DEFAULT_LANG.to_string()
        }
    };

    let sources = find_page_sources(run, &dir, issue.is_from_scanner)?;
    let alto_dpi = if issue.is_from_scanner {
        config.scanned_pdf_dpi
    } else {
        config.dpi
    };
    let tools = Jp2Tools::from_config(config);

    run.log.info(format!(
        "Generating derivatives for {} page(s) of issue {}{}",
        sources.len(),
        issue.id,
        if forced { " (forced)" } else { "" }
    ));

    let mut failures = 0;
    for (i, page) in sources.iter().enumerate() {
        let alto_out = page.pdf.with_extension("xml");
        let job = AltoJob {
            pdf: &page.pdf,
            output: &alto_out,
            dpi: alto_dpi,
            image_number: i + 1,
            lang: &lang,
        };
        match make_alto(&config.pdf_to_alto, &job, forced) {
            Ok(AltoOutcome::Skipped) => run.log.debug(format!("{:?} already exists", alto_out)),
            Ok(AltoOutcome::Created) => run.log.debug(format!("Created {:?}", alto_out)),
            Err(e) => {
                run.log.error(format!("Couldn't convert {:?} to ALTO: {}", page.pdf, e));
                failures += 1;
            }
        }

        let jp2_out = page.image.with_extension("jp2");
        match make_jp2(&tools, &page.image, &jp2_out, config.quality, config.dpi, forced) {
            Ok(Jp2Outcome::Skipped) => run.log.debug(format!("{:?} already exists", jp2_out)),
            Ok(Jp2Outcome::Created { rate, dash_i }) => {
                run.log.debug(format!("Created {:?} (rate {}, -I {})", jp2_out, rate, dash_i))
            }
            Err(e) => {
                run.log.error(format!("Couldn't convert {:?} to JP2: {}", page.image, e));
                failures += 1;
            }
        }
    }

    if failures > 0 {
        run.log.error(format!("{} derivative(s) failed", failures));
        return Err(ProcessResponse::Failure);
    }
    Ok(())
}

/// Moves every `.xml` and `.jp2` out of the issue directory into a new
/// directory named by `Location`.
pub(super) fn move_derivatives(run: &Run<'_>) -> Step {
    let dest = LocationArgs::parse_path(&run.job.args).or_fatal(&run.log, "Invalid job args")?;
    let issue = run.issue()?;
    let src = issue_dir(run, &issue)?;
    must_not_exist(&dest).or_fatal(&run.log, "Refusing to move derivatives")?;
    ensure_dir(&dest).or_failure(&run.log, &format!("Unable to create {:?}", dest))?;

    let mut moved = 0;
    for path in list_files(&src).or_failure(&run.log, &format!("Unable to read {:?}", src))? {
        let is_derivative = path
            .extension()
            .is_some_and(|e| e == "xml" || e == "jp2");
        if !is_derivative {
            continue;
        }
        let target = dest.join(file_name(&path));
        move_path(&path, &target).or_failure(&run.log, &format!("Unable to move {:?}", path))?;
        moved += 1;
    }
    run.log.info(format!("Moved {} derivative(s) to {:?}", moved, dest));
    Ok(())
}

/// Splits a name at its last dot: `("gray0356", ".TIF")`.
fn split_ext(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(i) => (&name[..i], &name[i..]),
        None => (name, ""),
    }
}

/// Working area for an unfinished renumbering, inside the issue directory.
const RENUMBER_DIR: &str = ".renumber";
const RENUMBER_PLAN: &str = "plan.json";
const RENUMBER_STAGED: &str = "staged";

/// Maps each source PDF/TIFF in `dir` to its `NNNN.pdf`/`NNNN.tif` name.
/// Every distinct filename prefix gets the next number in sorted order.
fn renumber_plan(run: &Run<'_>, dir: &Path) -> Step<Vec<(String, String)>> {
    let mut numbers: HashMap<String, usize> = HashMap::new();
    let mut plan = Vec::new();
    for path in list_files(dir).or_failure(&run.log, &format!("Unable to read {:?}", dir))? {
        let name = file_name(&path);
        if name.starts_with('.') {
            continue;
        }
        let (prefix, ext) = split_ext(&name);
        let ext = ext.to_ascii_lowercase();
        if !matches!(ext.as_str(), ".pdf" | ".tif" | ".tiff") {
            run.log.debug(format!("Ignoring file {:?}: not a source PDF / TIFF", name));
            continue;
        }

        let next = numbers.len() + 1;
        let number = *numbers.entry(prefix.to_string()).or_insert(next);
        plan.push((name.clone(), format!("{:04}{}", number, &ext[..4])));
    }

    let mut targets: HashMap<&str, &str> = HashMap::new();
    for (from, to) in &plan {
        if let Some(other) = targets.insert(to.as_str(), from.as_str()) {
            run.log.error(format!("{:?} and {:?} would both become {:?}", other, from, to));
            return Err(ProcessResponse::Fatal);
        }
    }
    Ok(plan)
}

/// Renames source PDFs and TIFFs to `NNNN.pdf`/`NNNN.tif`, numbering each
/// distinct filename prefix in sorted order, so `gray0356.pdf` and
/// `gray0356.tif` both become page 1.
///
/// The plan is written to `.renumber/plan.json` before anything moves.
/// Pages are staged under `.renumber/pages` by their new names and then
/// moved back, so a retry picks up the saved plan and finishes the job.
pub(super) fn renumber_pages(run: &Run<'_>) -> Step {
    let issue = run.issue()?;
    let dir = issue_dir(run, &issue)?;
    let work = dir.join(RENUMBER_DIR);
    let pages = work.join("pages");
    let plan_file = work.join(RENUMBER_PLAN);
    let staged_marker = work.join(RENUMBER_STAGED);

    let plan: Vec<(String, String)> = if exists(&plan_file) {
        run.log.warn(format!("Resuming renumbering from {:?}", plan_file));
        let text = read_to_string(&plan_file).or_failure(&run.log, "Unable to read renumber plan")?;
        serde_json::from_str(&text).or_fatal(&run.log, "Invalid renumber plan")?
    } else {
        let plan = renumber_plan(run, &dir)?;
        if plan.is_empty() {
            run.log.error(format!("No source files found in {:?}", dir));
            return Err(ProcessResponse::Failure);
        }
        let json = serde_json::to_vec(&plan).or_fatal(&run.log, "Unable to encode renumber plan")?;
        ensure_dir(&pages).or_failure(&run.log, "Unable to create renumber directory")?;
        write_replace(&plan_file, &json).or_failure(&run.log, "Unable to write renumber plan")?;
        plan
    };

    if !exists(&staged_marker) {
        ensure_dir(&pages).or_failure(&run.log, "Unable to create renumber directory")?;
        for (from, to) in &plan {
            let src = dir.join(from);
            let tmp = pages.join(to);
            match (exists(&src), exists(&tmp)) {
                (true, false) => {
                    std::fs::rename(&src, &tmp).or_failure(&run.log, &format!("Unable to stage {:?}", src))?;
                }
                (false, true) => continue,
                (true, true) => {
                    run.log.error(format!("Both {:?} and staged {:?} exist", src, tmp));
                    return Err(ProcessResponse::Fatal);
                }
                (false, false) => {
                    run.log.error(format!("Source page {:?} is missing", src));
                    return Err(ProcessResponse::Fatal);
                }
            }
        }
        write_replace(&staged_marker, b"").or_failure(&run.log, "Unable to mark pages staged")?;
    }

    for (_, to) in &plan {
        let tmp = pages.join(to);
        let dest = dir.join(to);
        if !exists(&tmp) {
            // Moved back by an earlier attempt
            if exists(&dest) {
                continue;
            }
            run.log.error(format!("Staged page {:?} is missing", tmp));
            return Err(ProcessResponse::Fatal);
        }
        must_not_exist(&dest).or_fatal(&run.log, "Renumbered pages collide")?;
        run.log.debug(format!("Renaming to {:?}", dest));
        std::fs::rename(&tmp, &dest).or_failure(&run.log, &format!("Unable to rename {:?}", tmp))?;
    }

    remove_dir_all(&work).or_failure(&run.log, "Unable to remove renumber directory")?;
    run.log.info(format!("Renumbered {} file(s) for issue {}", plan.len(), issue.id));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::tests::{context, log_text, run_job, saved_issue};
    use super::*;
    use crate::models::{Args, Job, JobType};
    use assert_fs::prelude::*;
    use assert_fs::TempDir;

    fn issue_at(ctx: &super::super::JobContext, dir: &Path) -> Issue {
        let mut issue = Issue::new("oru", "sn83025138", "1899-12-30", 1);
        issue.location = dir.display().to_string();
        saved_issue(ctx, &mut issue);
        issue
    }

    #[test]
    fn test_split_ext() {
        assert_eq!(split_ext("gray0356.TIFF"), ("gray0356", ".TIFF"));
        assert_eq!(split_ext("a.b.pdf"), ("a.b", ".pdf"));
        assert_eq!(split_ext("noext"), ("noext", ""));
    }

    #[test]
    fn test_renumber_pages() {
        let tmp = TempDir::new().unwrap();
        tmp.child("issue/gray0356.pdf").write_str("p1").unwrap();
        tmp.child("issue/gray0356.TIFF").write_str("t1").unwrap();
        tmp.child("issue/gray0357.pdf").write_str("p2").unwrap();
        tmp.child("issue/gray0357.tif").write_str("t2").unwrap();
        tmp.child("issue/notes.txt").write_str("n").unwrap();
        let ctx = context(tmp.path());
        let issue = issue_at(&ctx, &tmp.path().join("issue"));

        let (r, _) = run_job(&ctx, Job::new(JobType::RenumberPages, issue.id, Args::new()));
        assert_eq!(r, ProcessResponse::Success);
        tmp.child("issue/0001.pdf").assert("p1");
        tmp.child("issue/0001.tif").assert("t1");
        tmp.child("issue/0002.pdf").assert("p2");
        tmp.child("issue/0002.tif").assert("t2");
        tmp.child("issue/notes.txt").assert("n");
    }

    #[test]
    fn test_renumber_handles_overlapping_names() {
        let tmp = TempDir::new().unwrap();
        // 0000.pdf becomes 0001.pdf, which is still occupied until 0001.pdf moves
        tmp.child("issue/0000.pdf").write_str("first").unwrap();
        tmp.child("issue/0001.pdf").write_str("second").unwrap();
        let ctx = context(tmp.path());
        let issue = issue_at(&ctx, &tmp.path().join("issue"));

        let (r, _) = run_job(&ctx, Job::new(JobType::RenumberPages, issue.id, Args::new()));
        assert_eq!(r, ProcessResponse::Success);
        tmp.child("issue/0001.pdf").assert("first");
        tmp.child("issue/0002.pdf").assert("second");
    }

    #[test]
    fn test_renumber_collision_changes_nothing() {
        let tmp = TempDir::new().unwrap();
        tmp.child("issue/a.tif").write_str("one").unwrap();
        tmp.child("issue/a.TIFF").write_str("two").unwrap();
        let ctx = context(tmp.path());
        let issue = issue_at(&ctx, &tmp.path().join("issue"));

        let job = Job::new(JobType::RenumberPages, issue.id, Args::new());
        let (r, job) = run_job(&ctx, job);
        assert_eq!(r, ProcessResponse::Fatal);
        assert!(log_text(&ctx, &job).contains("would both become"));
        tmp.child("issue/a.tif").assert("one");
        tmp.child("issue/a.TIFF").assert("two");
        assert!(!tmp.path().join("issue/.renumber").exists());
    }

    #[test]
    fn test_renumber_resumes_interrupted_staging() {
        let tmp = TempDir::new().unwrap();
        // An earlier attempt staged 0000.pdf as page 1 and stopped before
        // 0001.pdf moved
        tmp.child("issue/.renumber/plan.json")
            .write_str(r#"[["0000.pdf","0001.pdf"],["0001.pdf","0002.pdf"]]"#)
            .unwrap();
        tmp.child("issue/.renumber/pages/0001.pdf").write_str("first").unwrap();
        tmp.child("issue/0001.pdf").write_str("second").unwrap();
        let ctx = context(tmp.path());
        let issue = issue_at(&ctx, &tmp.path().join("issue"));

        let (r, _) = run_job(&ctx, Job::new(JobType::RenumberPages, issue.id, Args::new()));
        assert_eq!(r, ProcessResponse::Success);
        tmp.child("issue/0001.pdf").assert("first");
        tmp.child("issue/0002.pdf").assert("second");
        assert!(!tmp.path().join("issue/.renumber").exists());
    }

    #[test]
    fn test_renumber_resumes_interrupted_move_back() {
        let tmp = TempDir::new().unwrap();
        tmp.child("issue/.renumber/plan.json")
            .write_str(r#"[["0000.pdf","0001.pdf"],["0001.pdf","0002.pdf"]]"#)
            .unwrap();
        tmp.child("issue/.renumber/staged").touch().unwrap();
        tmp.child("issue/.renumber/pages/0002.pdf").write_str("second").unwrap();
        tmp.child("issue/0001.pdf").write_str("first").unwrap();
        let ctx = context(tmp.path());
        let issue = issue_at(&ctx, &tmp.path().join("issue"));

        let (r, _) = run_job(&ctx, Job::new(JobType::RenumberPages, issue.id, Args::new()));
        assert_eq!(r, ProcessResponse::Success);
        tmp.child("issue/0001.pdf").assert("first");
        tmp.child("issue/0002.pdf").assert("second");
        assert!(!tmp.path().join("issue/.renumber").exists());
    }

    #[test]
    fn test_renumber_without_sources_fails() {
        let tmp = TempDir::new().unwrap();
        tmp.child("issue/readme.txt").touch().unwrap();
        let ctx = context(tmp.path());
        let issue = issue_at(&ctx, &tmp.path().join("issue"));
        let (r, _) = run_job(&ctx, Job::new(JobType::RenumberPages, issue.id, Args::new()));
        assert_eq!(r, ProcessResponse::Failure);
    }

    #[test]
    fn test_move_derivatives() {
        let tmp = TempDir::new().unwrap();
        tmp.child("issue/0001.pdf").write_str("pdf").unwrap();
        tmp.child("issue/0001.jp2").write_str("jp2").unwrap();
        tmp.child("issue/0001.xml").write_str("xml").unwrap();
        let ctx = context(tmp.path());
        let issue = issue_at(&ctx, &tmp.path().join("issue"));

        let dest = tmp.path().join("derivatives");
        let args = LocationArgs::new(dest.display().to_string()).to_args();
        let (r, _) = run_job(&ctx, Job::new(JobType::MoveDerivatives, issue.id, args.clone()));
        assert_eq!(r, ProcessResponse::Success);
        tmp.child("derivatives/0001.jp2").assert("jp2");
        tmp.child("derivatives/0001.xml").assert("xml");
        tmp.child("issue/0001.pdf").assert("pdf");
        assert!(!tmp.path().join("issue/0001.jp2").exists());

        let (r, _) = run_job(&ctx, Job::new(JobType::MoveDerivatives, issue.id, args));
        assert_eq!(r, ProcessResponse::Fatal);
    }

    #[test]
    fn test_make_derivatives_rejects_unexpected_files() {
        let tmp = TempDir::new().unwrap();
        tmp.child("issue/0001.pdf").touch().unwrap();
        tmp.child("issue/cover.png").touch().unwrap();
        let ctx = context(tmp.path());
        let issue = issue_at(&ctx, &tmp.path().join("issue"));

        let (r, job) = run_job(&ctx, Job::new(JobType::MakeDerivatives, issue.id, Args::new()));
        assert_eq!(r, ProcessResponse::Fatal);
        assert!(log_text(&ctx, &job).contains("Unexpected file found: \"cover.png\""));
    }

    #[test]
    fn test_make_derivatives_checks_scan_parity() {
        let tmp = TempDir::new().unwrap();
        tmp.child("issue/0001.pdf").touch().unwrap();
        tmp.child("issue/0002.pdf").touch().unwrap();
        tmp.child("issue/0001.tif").touch().unwrap();
        let ctx = context(tmp.path());
        let mut issue = issue_at(&ctx, &tmp.path().join("issue"));
        issue.is_from_scanner = true;
        saved_issue(&ctx, &mut issue);

        let (r, job) = run_job(&ctx, Job::new(JobType::MakeDerivatives, issue.id, Args::new()));
        assert_eq!(r, ProcessResponse::Fatal);
        assert!(log_text(&ctx, &job).contains("2 PDFs but 1 TIFFs"));
    }

    #[test]
    fn test_make_derivatives_skips_existing_outputs() {
        let tmp = TempDir::new().unwrap();
        tmp.child("issue/0001.pdf").touch().unwrap();
        tmp.child("issue/0001.xml").write_str("alto").unwrap();
        tmp.child("issue/0001.jp2").write_str("jp2").unwrap();
        let ctx = context(tmp.path());
        let issue = issue_at(&ctx, &tmp.path().join("issue"));

        // Nothing to build, so no external tool is ever invoked
        let (r, _) = run_job(&ctx, Job::new(JobType::MakeDerivatives, issue.id, Args::new()));
        assert_eq!(r, ProcessResponse::Success);
        tmp.child("issue/0001.xml").assert("alto");
        tmp.child("issue/0001.jp2").assert("jp2");
    }

    #[test]
    fn test_page_split_refuses_existing_output() {
        let tmp = TempDir::new().unwrap();
        tmp.child("upload/a.pdf").touch().unwrap();
        tmp.child("out").create_dir_all().unwrap();
        let ctx = context(tmp.path());
        let issue = issue_at(&ctx, &tmp.path().join("upload"));

        let args = LocationArgs::new(tmp.path().join("out").display().to_string()).to_args();
        let (r, _) = run_job(&ctx, Job::new(JobType::PageSplit, issue.id, args));
        assert_eq!(r, ProcessResponse::Fatal);
    }

    #[test]
    fn test_page_split_requires_pdfs() {
        let tmp = TempDir::new().unwrap();
        tmp.child("upload/readme.txt").touch().unwrap();
        let ctx = context(tmp.path());
        let issue = issue_at(&ctx, &tmp.path().join("upload"));

        let args = LocationArgs::new(tmp.path().join("out").display().to_string()).to_args();
        let (r, _) = run_job(&ctx, Job::new(JobType::PageSplit, issue.id, args));
        assert_eq!(r, ProcessResponse::Fatal);
        assert!(!tmp.path().join("out").exists());
    }
}
