//! Carga de los documentos fuente desde un directorio del sistema de archivos.
//!
//! Los PDFs se extraen página a página (un `Document` por página con texto);
//! los ficheros de texto producen un único `Document`. El resto se omite.

use std::{fs, path::Path};

use mime_guess::MimeGuess;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::{
    error::LoadError,
    models::{Document, SourceMetadata},
};

/// Resumen de una carga de documentos.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadSummary {
    pub files_scanned: u32,
    pub files_loaded: u32,
    pub files_skipped: u32,
    pub documents: usize,
}

impl std::fmt::Display for LoadSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ficheros escaneados, {} cargados, {} omitidos, {} documentos.",
            self.files_scanned, self.files_loaded, self.files_skipped, self.documents
        )
    }
}

/// Carga todos los documentos del directorio en un hilo bloqueante.
pub async fn load_documents(root: &Path) -> Result<Vec<Document>, LoadError> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || load_documents_blocking(&root))
        .await
        .map_err(|e| LoadError::Task(e.to_string()))?
}

/// Recorre recursivamente el directorio en orden de ruta y extrae el texto
/// de cada fichero soportado.
pub fn load_documents_blocking(root: &Path) -> Result<Vec<Document>, LoadError> {
    if !root.is_dir() {
        return Err(LoadError::NotADirectory(root.to_path_buf()));
    }
    // Un directorio sin permisos de lectura debe fallar aquí y no quedar
    // como "vacío" tras el recorrido.
    fs::read_dir(root).map_err(|source| LoadError::Io {
        path: root.to_path_buf(),
        source,
    })?;

    let mut summary = LoadSummary::default();
    let mut documents = Vec::new();

    let entries = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| match e {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!("No se pudo acceder a una entrada de {}: {err}", root.display());
                None
            }
        })
        .filter(|e| e.file_type().is_file());

    for entry in entries {
        summary.files_scanned += 1;
        let path = entry.path();
        match load_file(path) {
            Some(mut docs) if !docs.is_empty() => {
                summary.files_loaded += 1;
                summary.documents += docs.len();
                documents.append(&mut docs);
            }
            _ => summary.files_skipped += 1,
        }
    }

    info!("Carga de {}: {}", root.display(), summary);

    if documents.is_empty() {
        return Err(LoadError::Empty(root.to_path_buf()));
    }
    Ok(documents)
}

fn load_file(path: &Path) -> Option<Vec<Document>> {
    let path_str = path.to_string_lossy().to_string();
    let file_name = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path_str.clone());
    let mime = MimeGuess::from_path(path).first_or_octet_stream();

    let metadata = |page_label| SourceMetadata {
        file_path: path_str.clone(),
        file_name: file_name.clone(),
        page_label,
    };

    if mime.essence_str() == "application/pdf" {
        let pages = match pdf_extract::extract_text_by_pages(path) {
            Ok(pages) => pages,
            Err(e) => {
                warn!("No se pudo extraer texto del PDF {}: {}. Saltando fichero.", path.display(), e);
                return None;
            }
        };
        let docs: Vec<Document> = pages
            .into_iter()
            .enumerate()
            .filter(|(_, text)| !text.trim().is_empty())
            .map(|(i, text)| Document::new(text, metadata(Some(i as u32 + 1))))
            .collect();
        if docs.is_empty() {
            warn!("PDF sin texto extraíble: {}", path.display());
        }
        return Some(docs);
    }

    if mime.type_() == mime_guess::mime::TEXT {
        return match fs::read_to_string(path) {
            Ok(text) if !text.trim().is_empty() => Some(vec![Document::new(text, metadata(None))]),
            Ok(_) => {
                warn!("Fichero vacío o sin texto útil: {}", path.display());
                None
            }
            Err(_) => {
                warn!("Saltando fichero no-texto o no-UTF8: {}", path.display());
                None
            }
        };
    }

    info!("Saltando fichero con tipo no soportado ('{}'): {}", mime, path.display());
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn loads_text_files_in_path_order() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("b_speech.txt"), "Budget speech 2023.").unwrap();
        fs::write(dir.path().join("a_budget.md"), "# Budget 2024\nCapital expenditure.").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("c.txt"), "Nested notes.").unwrap();

        let docs = load_documents_blocking(dir.path()).unwrap();
        let names: Vec<_> = docs.iter().map(|d| d.metadata.file_name.as_str()).collect();
        assert_eq!(names, vec!["a_budget.md", "b_speech.txt", "c.txt"]);
        assert!(docs.iter().all(|d| d.metadata.page_label.is_none()));
    }

    #[test]
    fn skips_unsupported_and_blank_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("image.png"), [0x89, 0x50, 0x4e, 0x47]).unwrap();
        fs::write(dir.path().join("blank.txt"), "   \n").unwrap();
        fs::write(dir.path().join("notes.txt"), "Fiscal deficit target.").unwrap();

        let docs = load_documents_blocking(dir.path()).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].text, "Fiscal deficit target.");
    }

    #[test]
    fn empty_directory_is_a_load_error() {
        let dir = tempdir().unwrap();
        let err = load_documents_blocking(dir.path()).unwrap_err();
        assert!(matches!(err, LoadError::Empty(_)));
    }

    #[tokio::test]
    async fn missing_directory_is_a_load_error() {
        let dir = tempdir().unwrap();
        let err = load_documents(&dir.path().join("no-existe")).await.unwrap_err();
        assert!(matches!(err, LoadError::NotADirectory(_)));
    }
}
