//! NDNP issue METS generation.

use std::path::PathBuf;

use chrono::{DateTime, SecondsFormat, Utc};

use super::XmlDoc;
use crate::error::PackageError;
use crate::models::{Issue, Title};
use crate::storage::filesystem::write_replace;

const METS_NS: &str = "http://www.loc.gov/METS/";
const MODS_NS: &str = "http://www.loc.gov/mods/v3";
const NDNP_NS: &str = "urn:library-of-congress:ndnp:mets:newspaper";
const XLINK_NS: &str = "http://www.w3.org/1999/xlink";
const ISSUE_TYPE: &str = "urn:library-of-congress:ndnp:mets:newspaper:issue";
const ISSUE_PROFILE: &str = "urn:library-of-congress:mets:profiles:ndnp:issue:v1.5";

/// Files a page contributes to the METS file section, in `fileGrp` order.
const PAGE_FILES: [(&str, &str, &str); 3] = [
    ("jp2", "image/jp2", "service"),
    ("pdf", "application/pdf", "derivative"),
    ("xml", "text/xml", "ocr"),
];

/// Builds the METS document for `issue`. Pages are taken from the issue's
/// page labels, so labels must be set before this runs.
pub fn render(issue: &Issue, title: &Title, now: DateTime<Utc>) -> Result<Vec<u8>, PackageError> {
    if issue.page_labels.is_empty() {
        return Err(PackageError::Issue {
            key: issue.key(),
            reason: "no page labels".to_string(),
        });
    }

    let label = format!("{}, {}, Edition {}", title.name, issue.date, issue.edition);
    let created = now.to_rfc3339_opts(SecondsFormat::Secs, true);
    let edition = issue.edition.to_string();

    let mut doc = XmlDoc::new("METS XML")?;
    doc.start(
        "mets",
        &[
            ("xmlns", METS_NS),
            ("xmlns:mods", MODS_NS),
            ("xmlns:np", NDNP_NS),
            ("xmlns:xlink", XLINK_NS),
            ("TYPE", ISSUE_TYPE),
            ("PROFILE", ISSUE_PROFILE),
            ("LABEL", label.as_str()),
        ],
    )?;

    doc.start("metsHdr", &[("CREATEDATE", created.as_str())])?;
    doc.start("agent", &[("ROLE", "CREATOR"), ("TYPE", "ORGANIZATION")])?;
    doc.text("name", &[], &issue.marc_org_code)?;
    doc.end("agent")?;
    doc.end("metsHdr")?;

    // Issue-level MODS
    doc.start("dmdSec", &[("ID", "issueModsBib")])?;
    doc.start("mdWrap", &[("MDTYPE", "MODS"), ("LABEL", "Issue metadata")])?;
    doc.start("xmlData", &[])?;
    doc.start("mods:mods", &[])?;
    doc.start("mods:relatedItem", &[("type", "host")])?;
    doc.text("mods:identifier", &[("type", "lccn")], &issue.lccn)?;
    doc.start("mods:part", &[])?;
    if !issue.volume.is_empty() {
        detail(&mut doc, "volume", &issue.volume, None)?;
    }
    if !issue.issue.is_empty() {
        detail(&mut doc, "issue", &issue.issue, None)?;
    }
    let edition_label = (!issue.edition_label.is_empty()).then_some(issue.edition_label.as_str());
    detail(&mut doc, "edition", &edition, edition_label)?;
    doc.end("mods:part")?;
    doc.end("mods:relatedItem")?;
    doc.start("mods:originInfo", &[])?;
    doc.text("mods:dateIssued", &[("encoding", "iso8601")], &issue.date)?;
    if !issue.date_as_labeled.is_empty() && issue.date_as_labeled != issue.date {
        doc.text("mods:dateIssued", &[("qualifier", "questionable")], &issue.date_as_labeled)?;
    }
    doc.end("mods:originInfo")?;
    doc.text("mods:note", &[("type", "noteAboutReproduction")], "Present")?;
    doc.end("mods:mods")?;
    doc.end("xmlData")?;
    doc.end("mdWrap")?;
    doc.end("dmdSec")?;

    // Page-level MODS
    for (i, page_label) in issue.page_labels.iter().enumerate() {
        let seq = (i + 1).to_string();
        let id = format!("pageModsBib{}", i + 1);
        doc.start("dmdSec", &[("ID", id.as_str())])?;
        doc.start("mdWrap", &[("MDTYPE", "MODS"), ("LABEL", "Page metadata")])?;
        doc.start("xmlData", &[])?;
        doc.start("mods:mods", &[])?;
        doc.start("mods:part", &[])?;
        doc.start("mods:extent", &[("unit", "pages")])?;
        doc.text("mods:start", &[], &seq)?;
        doc.end("mods:extent")?;
        if !page_label.is_empty() {
            detail(&mut doc, "page number", page_label, None)?;
        }
        doc.end("mods:part")?;
        doc.text("mods:note", &[("type", "agencyResponsibleForReproduction")], &issue.marc_org_code)?;
        doc.end("mods:mods")?;
        doc.end("xmlData")?;
        doc.end("mdWrap")?;
        doc.end("dmdSec")?;
    }

    doc.start("fileSec", &[])?;
    for i in 1..=issue.page_labels.len() {
        let grp = format!("pageFileGrp{}", i);
        doc.start("fileGrp", &[("ID", grp.as_str())])?;
        for (ext, mime, use_) in PAGE_FILES {
            let id = format!("{}File{}", use_, i);
            let href = format!("./{:04}.{}", i, ext);
            doc.start("file", &[("ID", id.as_str()), ("USE", use_), ("MIMETYPE", mime)])?;
            doc.empty(
                "FLocat",
                &[("LOCTYPE", "OTHER"), ("OTHERLOCTYPE", "file"), ("xlink:href", href.as_str())],
            )?;
            doc.end("file")?;
        }
        doc.end("fileGrp")?;
    }
    doc.end("fileSec")?;

    doc.start("structMap", &[])?;
    doc.start("div", &[("TYPE", "np:issue"), ("DMDID", "issueModsBib")])?;
    for i in 1..=issue.page_labels.len() {
        let dmd = format!("pageModsBib{}", i);
        doc.start("div", &[("TYPE", "np:page"), ("DMDID", dmd.as_str())])?;
        for (_, _, use_) in PAGE_FILES {
            let id = format!("{}File{}", use_, i);
            doc.empty("fptr", &[("FILEID", id.as_str())])?;
        }
        doc.end("div")?;
    }
    doc.end("div")?;
    doc.end("structMap")?;

    doc.end("mets")?;
    Ok(doc.finish())
}

fn detail(doc: &mut XmlDoc, kind: &str, number: &str, caption: Option<&str>) -> Result<(), PackageError> {
    doc.start("mods:detail", &[("type", kind)])?;
    doc.text("mods:number", &[], number)?;
    if let Some(caption) = caption {
        doc.text("mods:caption", &[], caption)?;
    }
    doc.end("mods:detail")
}

/// Writes the METS file to the issue's canonical METS path.
pub fn write(issue: &Issue, title: &Title, now: DateTime<Utc>) -> Result<PathBuf, PackageError> {
    let xml = render(issue, title, now)?;
    let path = issue.mets_file();
    write_replace(&path, &xml)?;
    Ok(path)
}
