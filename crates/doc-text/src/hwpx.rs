use std::io::{Cursor, Read};

use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

/// Text and table markers pulled out of an HWPX container.
#[derive(Debug, Clone)]
pub struct HwpxDocument {
    pub text: String,
    pub tables: Vec<HwpxTableStub>,
}

/// Marker for a table element found while walking a section. HWPX table
/// geometry is not reconstructed here; the stub only records where the
/// table was seen.
#[derive(Debug, Clone)]
pub struct HwpxTableStub {
    pub section: usize,
}

#[derive(Debug, Error)]
pub enum HwpxError {
    #[error("hwpx container could not be opened: {0}")]
    Container(#[from] zip::result::ZipError),

    #[error("hwpx section {section} could not be read: {source}")]
    SectionRead {
        section: String,
        source: std::io::Error,
    },

    #[error("hwpx section {section} is malformed: {source}")]
    SectionXml {
        section: String,
        source: quick_xml::Error,
    },

    #[error("hwpx container holds no Contents/section*.xml entries")]
    NoSections,
}

/// Open an HWPX document (a ZIP container) and aggregate the text of every
/// `Contents/section*.xml` entry, in section order.
pub fn read_hwpx(bytes: &[u8]) -> Result<HwpxDocument, HwpxError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;

    let mut section_names: Vec<String> = archive
        .file_names()
        .filter(|name| name.starts_with("Contents/section") && name.ends_with(".xml"))
        .map(str::to_string)
        .collect();
    section_names.sort();

    if section_names.is_empty() {
        return Err(HwpxError::NoSections);
    }

    let mut text = String::new();
    let mut tables = Vec::new();

    for (section_index, name) in section_names.iter().enumerate() {
        let mut entry = archive.by_name(name)?;
        let mut xml = String::new();
        entry
            .read_to_string(&mut xml)
            .map_err(|source| HwpxError::SectionRead {
                section: name.clone(),
                source,
            })?;

        extract_section(&xml, section_index, &mut text, &mut tables).map_err(|source| {
            HwpxError::SectionXml {
                section: name.clone(),
                source,
            }
        })?;
    }

    Ok(HwpxDocument {
        text: text.trim().to_string(),
        tables,
    })
}

fn extract_section(
    xml: &str,
    section_index: usize,
    text: &mut String,
    tables: &mut Vec<HwpxTableStub>,
) -> Result<(), quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event()? {
            Event::Start(element) => {
                if element.local_name().as_ref() == b"tbl" {
                    tables.push(HwpxTableStub {
                        section: section_index,
                    });
                }
            }
            Event::Text(fragment) => {
                let piece = fragment.unescape().map_err(quick_xml::Error::from)?;
                if !piece.trim().is_empty() {
                    if !text.is_empty() && !text.ends_with(['\n', ' ']) {
                        text.push(' ');
                    }
                    text.push_str(piece.trim());
                }
            }
            // Paragraph ends become line breaks so chunking sees prose shape.
            Event::End(element) if element.local_name().as_ref() == b"p" => {
                if !text.is_empty() && !text.ends_with('\n') {
                    text.push('\n');
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(())
}
