//! División de documentos en nodos respetando los límites de frase.
//!
//! Las frases se empaquetan en orden hasta `chunk_size` caracteres. Cada nodo
//! nuevo de un mismo documento arranca con las últimas frases completas del
//! anterior, hasta `chunk_overlap` caracteres. Las frases más largas que
//! `chunk_size` se cortan por palabras y, si no hay espacios, por caracteres.

use std::ops::Range;
use std::sync::Arc;

use crate::models::{Document, Node};

#[derive(Debug, Clone)]
pub struct SentenceSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl SentenceSplitter {
    /// `chunk_size` y `chunk_overlap` en caracteres; se espera
    /// `0 < chunk_overlap < chunk_size` (validado en la configuración).
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
        }
    }

    /// Divide todos los documentos, conservando el orden de entrada.
    pub fn split(&self, documents: &[Document]) -> Vec<Arc<Node>> {
        documents
            .iter()
            .flat_map(|doc| self.split_document(doc))
            .map(Arc::new)
            .collect()
    }

    pub fn split_document(&self, document: &Document) -> Vec<Node> {
        self.split_spans(&document.text)
            .into_iter()
            .enumerate()
            .map(|(i, span)| Node {
                id: format!("{}_{i}", document.id),
                document_id: document.id.clone(),
                text: document.text[span.clone()].to_string(),
                metadata: document.metadata.clone(),
                start_offset: span.start,
                end_offset: span.end,
            })
            .collect()
    }

    /// Rangos en bytes de cada nodo, ya recortados de espacios.
    fn split_spans(&self, text: &str) -> Vec<Range<usize>> {
        let pieces: Vec<(Range<usize>, usize)> = sentence_spans(text)
            .into_iter()
            .flat_map(|span| split_long(text, span, self.chunk_size))
            .map(|span| {
                let len = text[span.clone()].chars().count();
                (span, len)
            })
            .collect();

        let mut chunks = Vec::new();
        let mut current: Vec<(Range<usize>, usize)> = Vec::new();
        let mut current_len = 0;

        for (span, len) in pieces {
            if current_len + len > self.chunk_size && !current.is_empty() {
                chunks.push(covering(&current));
                let carried = self.overlap_tail(&current, len);
                current_len = carried.iter().map(|(_, l)| l).sum();
                current = carried;
            }
            current_len += len;
            current.push((span, len));
        }
        if !current.is_empty() {
            chunks.push(covering(&current));
        }

        chunks
            .into_iter()
            .filter_map(|span| trim_span(text, span))
            .collect()
    }

    /// Frases finales del nodo que pasan al siguiente. Nunca se arrastra el
    /// nodo completo y el arrastre deja sitio para la pieza entrante.
    fn overlap_tail(
        &self,
        current: &[(Range<usize>, usize)],
        incoming: usize,
    ) -> Vec<(Range<usize>, usize)> {
        let budget = self
            .chunk_overlap
            .min(self.chunk_size.saturating_sub(incoming));
        let mut taken = 0;
        let mut start = current.len();
        for (idx, (_, len)) in current.iter().enumerate().skip(1).rev() {
            if taken + len > budget {
                break;
            }
            taken += len;
            start = idx;
        }
        current[start..].to_vec()
    }
}

fn covering(pieces: &[(Range<usize>, usize)]) -> Range<usize> {
    let start = pieces.first().map(|(r, _)| r.start).unwrap_or(0);
    let end = pieces.last().map(|(r, _)| r.end).unwrap_or(start);
    start..end
}

fn trim_span(text: &str, span: Range<usize>) -> Option<Range<usize>> {
    let slice = &text[span.clone()];
    let leading = slice.len() - slice.trim_start().len();
    let trimmed = slice.trim();
    if trimmed.is_empty() {
        return None;
    }
    let start = span.start + leading;
    Some(start..start + trimmed.len())
}

/// Segmenta el texto en frases. Un terminador (`.`, `!`, `?`, `।`) seguido de
/// espacio, o un salto de párrafo, cierra la frase; el espacio posterior queda
/// dentro de ella. Los rangos cubren todo el texto.
fn sentence_spans(text: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        let boundary = match c {
            '.' | '!' | '?' | '।' => chars.peek().map_or(true, |(_, next)| next.is_whitespace()),
            '\n' => chars.peek().is_some_and(|(_, next)| *next == '\n'),
            _ => false,
        };
        if !boundary {
            continue;
        }
        let mut end = i + c.len_utf8();
        while let Some(&(j, next)) = chars.peek() {
            if !next.is_whitespace() {
                break;
            }
            end = j + next.len_utf8();
            chars.next();
        }
        spans.push(start..end);
        start = end;
    }

    if start < text.len() {
        spans.push(start..text.len());
    }
    spans
}

/// Corta un rango de más de `max` caracteres por el último espacio antes del
/// límite, o en el propio límite si no hay ninguno.
pub(crate) fn split_long(text: &str, span: Range<usize>, max: usize) -> Vec<Range<usize>> {
    let mut out = Vec::new();
    let mut start = span.start;

    while start < span.end {
        let rest = &text[start..span.end];
        let Some((limit, _)) = rest.char_indices().nth(max) else {
            out.push(start..span.end);
            break;
        };
        let window = &rest[..limit];
        let cut = window
            .rfind(char::is_whitespace)
            .map(|p| p + window[p..].chars().next().map_or(1, char::len_utf8))
            .filter(|cut| *cut > 0)
            .unwrap_or(limit);
        out.push(start..start + cut);
        start += cut;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceMetadata;

    fn doc(text: &str) -> Document {
        Document::new(
            text.to_string(),
            SourceMetadata {
                file_path: "pdfs/budget.pdf".into(),
                file_name: "budget.pdf".into(),
                page_label: Some(1),
            },
        )
    }

    #[test]
    fn short_text_is_a_single_node() {
        let nodes = SentenceSplitter::new(200, 20).split_document(&doc("  Fiscal deficit is 5.1%. Growth is strong.  "));
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].text, "Fiscal deficit is 5.1%. Growth is strong.");
        assert_eq!(nodes[0].start_offset, 2);
    }

    #[test]
    fn nodes_respect_size_and_break_on_sentences() {
        let text = "Alpha beta gamma. ".repeat(30);
        let nodes = SentenceSplitter::new(60, 0).split_document(&doc(&text));
        assert!(nodes.len() > 1);
        for node in &nodes {
            assert!(node.text.chars().count() <= 60, "nodo demasiado largo: {}", node.text);
            assert!(node.text.ends_with('.'));
        }
    }

    #[test]
    fn consecutive_nodes_share_trailing_sentences() {
        let text = (1..=12)
            .map(|i| format!("Sentence number {i:02} here."))
            .collect::<Vec<_>>()
            .join(" ");
        let nodes = SentenceSplitter::new(90, 30).split_document(&doc(&text));
        assert!(nodes.len() > 1);
        for pair in nodes.windows(2) {
            let last_sentence = pair[0].text.rsplit(". ").next().unwrap();
            assert!(
                pair[1].text.starts_with(last_sentence),
                "'{}' no arranca con '{}'",
                pair[1].text,
                last_sentence
            );
            assert!(pair[1].start_offset < pair[0].end_offset);
        }
    }

    #[test]
    fn long_sentences_fall_back_to_words_and_chars() {
        let words = "lakh crore ".repeat(20);
        let nodes = SentenceSplitter::new(25, 5).split_document(&doc(&words));
        assert!(nodes.iter().all(|n| n.text.chars().count() <= 25));

        let unbroken = "₹".repeat(70);
        let nodes = SentenceSplitter::new(30, 5).split_document(&doc(&unbroken));
        assert_eq!(nodes.len(), 3);
        assert!(nodes.iter().all(|n| n.text.chars().count() <= 30));
        let total: usize = nodes.iter().map(|n| n.text.chars().count()).sum();
        assert_eq!(total, 70);
    }

    #[test]
    fn blank_documents_produce_no_nodes() {
        assert!(SentenceSplitter::new(50, 10).split_document(&doc(" \n\n ")).is_empty());
    }

    #[test]
    fn node_ids_are_stable_and_ordered() {
        let d = doc("One. Two. Three. Four. Five. Six.");
        let splitter = SentenceSplitter::new(12, 0);
        let first: Vec<_> = splitter.split_document(&d).into_iter().map(|n| n.id).collect();
        let second: Vec<_> = splitter.split_document(&d).into_iter().map(|n| n.id).collect();
        assert_eq!(first, second);
        assert_eq!(first[0], format!("{}_0", d.id));
    }
}
