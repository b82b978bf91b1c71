//! Rendering of ranked chunks into a bounded prompt context block.

use crate::types::DocumentChunk;

/// Returned verbatim for an empty result set so the model can say "not found"
/// instead of hallucinating.
pub const EMPTY_CONTEXT: &str = "Nessuna informazione rilevante trovata nel database.";

/// Appended when the assembled context exceeds the length bound.
pub const TRUNCATION_MARKER: &str = "\n\n[...context truncated...]";

const SECTION_RULE: &str = "--------------------------------------------------------------------------------";
const HEADER_RULE: &str = "================================================================================";

pub struct ContextFormatter {
    database_label: String,
}

impl Default for ContextFormatter {
    fn default() -> Self {
        Self {
            database_label: "ATELIER DESIGNERS".into(),
        }
    }
}

impl ContextFormatter {
    pub fn new(database_label: impl Into<String>) -> Self {
        Self {
            database_label: database_label.into(),
        }
    }

    /// Render one "[DOCUMENTO N]" section per chunk under a count header.
    ///
    /// Metadata lines appear in a fixed order and only when present. When the
    /// assembled text exceeds `max_length` it is cut at the last complete
    /// document boundary that fits, or mid-document when even the first
    /// section is too long, and the truncation marker is appended. The result
    /// never exceeds `max_length` plus the marker length.
    pub fn format(
        &self,
        chunks: &[DocumentChunk],
        include_metadata: bool,
        max_length: Option<usize>,
    ) -> String {
        if chunks.is_empty() {
            return EMPTY_CONTEXT.to_string();
        }

        let mut sections: Vec<String> = Vec::with_capacity(chunks.len());
        for (i, chunk) in chunks.iter().enumerate() {
            let mut section = format!("[DOCUMENTO {}]", i + 1);

            if include_metadata {
                let m = &chunk.metadata;
                push_line(&mut section, "Titolo", m.heading.as_deref());
                push_line(&mut section, "Tipo", m.document_type.as_deref());
                push_line(&mut section, "Categoria", m.category.as_deref());
                push_line(&mut section, "Sottocategoria", m.subcategory.as_deref());
                push_line(&mut section, "Cliente", m.client.as_deref());
                push_line(&mut section, "Brand", m.brand.as_deref());
                push_line(&mut section, "Tipologia", m.client_type.as_deref());
                // URL must come through verbatim so the model never invents links.
                push_line(&mut section, "URL", m.url.as_deref());
                if let Some(priority) = m.priority {
                    section.push_str(&format!("\nPriority: {}", priority));
                }
                if let Some(featured) = m.featured {
                    section.push_str(&format!(
                        "\nFeatured: {}",
                        if featured { "Sì" } else { "No" }
                    ));
                }
                push_line(&mut section, "Visibility", m.visibility.as_deref());
                push_line(&mut section, "Scale", m.project_scale.as_deref());
                push_line(&mut section, "Tags", m.tags.as_deref());
                if let Some(similarity) = chunk.similarity {
                    if similarity > 0.0 {
                        section.push_str(&format!("\nRilevanza: {:.2}%", similarity * 100.0));
                    }
                }
            }

            section.push_str(&format!("\n\nContenuto:\n{}\n", chunk.content));
            section.push('\n');
            section.push_str(SECTION_RULE);
            sections.push(section);
        }

        let header = format!(
            "INFORMAZIONI RILEVANTI DAL DATABASE {}:\n(Trovati {} documenti rilevanti)\n{}\n\n",
            self.database_label,
            chunks.len(),
            HEADER_RULE
        );
        let mut context = header + &sections.join("\n\n");

        if let Some(max) = max_length {
            if context.len() > max {
                tracing::warn!(
                    assembled = context.len(),
                    max,
                    "context truncated"
                );
                context = truncate_at_boundary(&context, max);
                context.push_str(TRUNCATION_MARKER);
            }
        }

        tracing::debug!(documents = chunks.len(), chars = context.len(), "context formatted");
        context
    }
}

fn push_line(section: &mut String, label: &str, value: Option<&str>) {
    if let Some(value) = value {
        section.push_str(&format!("\n{}: {}", label, value));
    }
}

/// Cut after the last complete document section that fits within `max`
/// bytes; fall back to a raw cut (on a char boundary) when not even one
/// section fits.
fn truncate_at_boundary(context: &str, max: usize) -> String {
    let mut cut = max.min(context.len());
    while cut > 0 && !context.is_char_boundary(cut) {
        cut -= 1;
    }
    let head = &context[..cut];
    match head.rfind(SECTION_RULE) {
        Some(pos) => context[..pos + SECTION_RULE.len()].to_string(),
        None => head.to_string(),
    }
}
