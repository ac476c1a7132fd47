use std::fmt;
use std::path::Path;

use serde::Serialize;

/// Viewer a document is rendered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Category {
    /// Rendered markdown.
    #[serde(rename = "marked")]
    Markdown,
    /// Interactive API schema viewer.
    #[serde(rename = "swagger")]
    Schema,
    /// Plain text.
    #[serde(rename = "text")]
    Text,
}

/// Extension (without the dot) to viewer. Case-sensitive.
const EXTENSIONS: phf::Map<&'static str, Category> = phf::phf_map! {
    "md" => Category::Markdown,
    "json" => Category::Schema,
    "yml" => Category::Schema,
    "yaml" => Category::Schema,
};

impl Category {
    /// Classify by extension; unknown or missing extensions are plain text.
    pub fn for_extension(extension: &str) -> Self {
        EXTENSIONS
            .get(extension)
            .copied()
            .unwrap_or(Category::Text)
    }

    /// Classify a file by the text after the last `.` of its name.
    ///
    /// Unlike [`Path::extension`], a dotfile such as `.md` counts as having
    /// the extension `md`.
    pub fn for_path(path: &Path) -> Self {
        path.file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.rsplit_once('.'))
            .map_or(Category::Text, |(_, ext)| Self::for_extension(ext))
    }

    /// Name of the viewer application serving this category.
    pub fn app(&self) -> &'static str {
        match self {
            Category::Markdown => "marked",
            Category::Schema => "swagger",
            Category::Text => "text",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.app())
    }
}
