use std::path::{Path, PathBuf};

use super::XmlDoc;
use crate::error::PackageError;
use crate::models::{Batch, Issue};
use crate::storage::filesystem::write_replace;

const NDNP_NS: &str = "http://www.loc.gov/ndnp";

/// Renders `batch.xml`: one `<issue>` per member issue pointing at its METS
/// file, sorted by issue key.
pub fn render(batch: &Batch, issues: &[Issue]) -> Result<Vec<u8>, PackageError> {
    let mut sorted: Vec<&Issue> = issues.iter().collect();
    sorted.sort_by_key(|i| i.key());

    let name = batch.full_name();
    let year = batch.award_year().to_string();

    let mut doc = XmlDoc::new("batch XML")?;
    doc.start(
        "batch",
        &[
            ("xmlns", NDNP_NS),
            ("name", name.as_str()),
            ("awardee", batch.marc_org_code.as_str()),
            ("awardYear", year.as_str()),
        ],
    )?;
    for issue in sorted {
        let edition = format!("{:02}", issue.edition);
        let mets = mets_path(issue);
        doc.text(
            "issue",
            &[
                ("lccn", issue.lccn.as_str()),
                ("issueDate", issue.date.as_str()),
                ("editionOrder", edition.as_str()),
            ],
            &mets,
        )?;
    }
    doc.end("batch")?;
    Ok(doc.finish())
}

/// Path of an issue's METS file relative to the batch `data` directory.
pub fn mets_path(issue: &Issue) -> String {
    let de = issue.date_edition();
    format!("./{}/print/{}/{}.xml", issue.lccn, de, de)
}

/// `<batch dir>/data/batch.xml`
pub fn batch_xml_path(batch_dir: &Path) -> PathBuf {
    batch_dir.join("data").join("batch.xml")
}

/// Writes `batch.xml` into `batch_dir`, replacing any previous copy.
pub fn write(batch_dir: &Path, batch: &Batch, issues: &[Issue]) -> Result<PathBuf, PackageError> {
    let xml = render(batch, issues)?;
    let path = batch_xml_path(batch_dir);
    write_replace(&path, &xml)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn batch() -> Batch {
        let mut b = Batch::new("oru", Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap());
        b.id = 4;
        b.name = "CamasQuillAntlerFern".into();
        b
    }

    #[test]
    fn test_render_sorted_issues() {
        let issues = vec![
            Issue::new("oru", "sn96088246", "1921-06-02", 1),
            Issue::new("oru", "sn83025138", "1899-12-30", 2),
        ];
        let xml = String::from_utf8(render(&batch(), &issues).unwrap()).unwrap();

        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains(
            r#"<batch xmlns="http://www.loc.gov/ndnp" name="batch_oru_20240309CamasQuillAntlerFern_ver01" awardee="oru" awardYear="2024">"#
        ));
        let first = xml.find("sn83025138").unwrap();
        let second = xml.find("sn96088246").unwrap();
        assert!(first < second);
        assert!(xml.contains(
            r#"<issue lccn="sn83025138" issueDate="1899-12-30" editionOrder="02">./sn83025138/print/1899123002/1899123002.xml</issue>"#
        ));
    }

    #[test]
    fn test_write_into_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("data")).unwrap();
        let path = write(dir.path(), &batch(), &[]).unwrap();
        assert_eq!(path, dir.path().join("data/batch.xml"));
        assert!(std::fs::read_to_string(path).unwrap().contains("awardYear=\"2024\""));
    }
}
