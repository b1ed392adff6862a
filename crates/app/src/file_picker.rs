//! Native file dialog (rfd) for choosing a document to attach.

use std::path::PathBuf;

/// Filter for file types.
#[derive(Clone)]
pub struct FileFilter {
    pub name: String,
    pub extensions: Vec<String>,
}

impl FileFilter {
    pub fn new(name: impl Into<String>, extensions: &[&str]) -> Self {
        Self {
            name: name.into(),
            extensions: extensions.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn pdf() -> Self {
        Self::new("PDF files", &["pdf"])
    }

    pub fn all_files() -> Self {
        Self::new("All files", &["*"])
    }
}

/// Blocking picker for a single file; `None` when the user cancels.
pub fn pick_file(title: &str, filters: &[FileFilter]) -> Option<PathBuf> {
    let mut dialog = rfd::FileDialog::new().set_title(title);
    for filter in filters {
        let ext_refs: Vec<&str> = filter.extensions.iter().map(|s| s.as_str()).collect();
        dialog = dialog.add_filter(&filter.name, &ext_refs);
    }
    if let Ok(cwd) = std::env::current_dir() {
        dialog = dialog.set_directory(cwd);
    }
    dialog.pick_file()
}

pub fn pick_pdf() -> Option<PathBuf> {
    pick_file(
        "Select a PDF to Analyze",
        &[FileFilter::pdf(), FileFilter::all_files()],
    )
}
