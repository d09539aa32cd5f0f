use doc_store::FragmentKind;

/// Source document family, decided from the file extension with the MIME
/// type as a fallback. Image uploads are not a source kind — vision input
/// is rejected at ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Pdf,
    Office,
    Text,
    Hwp,
    Hwpx,
}

const OFFICE_EXTENSIONS: &[&str] = &["doc", "docx", "ppt", "pptx", "xls", "xlsx"];
const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "markdown"];
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "bmp", "tif", "tiff"];

impl SourceKind {
    pub fn detect(name: &str, mime: &str) -> Option<Self> {
        let extension = name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();

        if IMAGE_EXTENSIONS.contains(&extension.as_str()) || mime.starts_with("image/") {
            return None;
        }

        match extension.as_str() {
            "pdf" => return Some(Self::Pdf),
            "hwp" => return Some(Self::Hwp),
            "hwpx" => return Some(Self::Hwpx),
            ext if OFFICE_EXTENSIONS.contains(&ext) => return Some(Self::Office),
            ext if TEXT_EXTENSIONS.contains(&ext) => return Some(Self::Text),
            _ => {}
        }

        match mime {
            "application/pdf" => Some(Self::Pdf),
            "text/plain" | "text/markdown" => Some(Self::Text),
            "application/x-hwp" | "application/haansofthwp" => Some(Self::Hwp),
            "application/hwp+zip" | "application/haansofthwpx" => Some(Self::Hwpx),
            mime if mime.starts_with("application/vnd.openxmlformats-officedocument")
                || mime.starts_with("application/vnd.ms-")
                || mime == "application/msword" =>
            {
                Some(Self::Office)
            }
            _ => None,
        }
    }

    /// PDF and Office documents go through the external extractor; the
    /// remaining kinds are handled in-process.
    pub fn uses_extractor(self) -> bool {
        matches!(self, Self::Pdf | Self::Office)
    }

    pub fn fragment_kind(self) -> FragmentKind {
        match self {
            Self::Pdf => FragmentKind::Pdf,
            Self::Office => FragmentKind::Office,
            Self::Text => FragmentKind::Text,
            Self::Hwp => FragmentKind::Hwp,
            Self::Hwpx => FragmentKind::Hwpx,
        }
    }
}
