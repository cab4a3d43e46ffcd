//! Everything that turns curated issues into deliverable files on disk:
//! METS and batch XML, NDNP batch directories, BagIt tag files, the
//! `.manifest` hash cache, and tarred backups.

pub mod archive;
pub mod bagit;
pub mod batch_xml;
pub mod manifest;
pub mod mets;
pub mod structure;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::error::PackageError;

/// Thin wrapper over an indenting quick-xml writer that tags every failure
/// with the document being generated.
pub(crate) struct XmlDoc {
    writer: Writer<Vec<u8>>,
    document: &'static str,
}

impl XmlDoc {
    pub(crate) fn new(document: &'static str) -> Result<Self, PackageError> {
        let mut doc = Self {
            writer: Writer::new_with_indent(Vec::new(), b' ', 2),
            document,
        };
        doc.write(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        Ok(doc)
    }

    fn write(&mut self, event: Event<'_>) -> Result<(), PackageError> {
        let document = self.document;
        self.writer
            .write_event(event)
            .map_err(|e| PackageError::Xml {
                document,
                reason: e.to_string(),
            })
    }

    fn element<'a>(name: &'a str, attrs: &[(&'a str, &'a str)]) -> BytesStart<'a> {
        let mut elem = BytesStart::new(name);
        for attr in attrs {
            elem.push_attribute(*attr);
        }
        elem
    }

    pub(crate) fn start(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<(), PackageError> {
        self.write(Event::Start(Self::element(name, attrs)))
    }

    pub(crate) fn end(&mut self, name: &str) -> Result<(), PackageError> {
        self.write(Event::End(BytesEnd::new(name)))
    }

    pub(crate) fn empty(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<(), PackageError> {
        self.write(Event::Empty(Self::element(name, attrs)))
    }

    /// `<name attrs>text</name>`, with `text` escaped.
    pub(crate) fn text(
        &mut self,
        name: &str,
        attrs: &[(&str, &str)],
        text: &str,
    ) -> Result<(), PackageError> {
        self.start(name, attrs)?;
        self.write(Event::Text(BytesText::new(text)))?;
        self.end(name)
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        let mut out = self.writer.into_inner();
        out.push(b'\n');
        out
    }
}
