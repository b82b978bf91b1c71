//! Query classification for hybrid search.
//!
//! Decides whether a query names a specific entity, matches a known coarse
//! category, or should be treated as purely semantic. This is a heuristic,
//! not a ground-truth classifier: vector search always runs regardless of
//! the outcome, so false positives and negatives degrade gracefully.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::QueryClassification;

// Compiled once, reused on every call. Proper-noun shapes for Italian text:
// capitalized words joined by connective particles, plain capitalized
// sequences, acronyms, name+initial.
static ENTITY_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        // "Campana di Ferro", "Torre del Greco"
        Regex::new(
            r"\b([A-Z][a-zàèéìòù]+(?:\s+(?:di|del|della|dei|degli|delle)\s+[A-Z][a-zàèéìòù]+)+)\b",
        )
        .expect("connective entity regex is valid"),
        // "Zara Home", "Casa Bianca"
        Regex::new(r"\b([A-Z][a-zàèéìòù]+(?:\s+[A-Z][a-zàèéìòù]+)+)\b")
            .expect("multiword entity regex is valid"),
        // "WTC", "ZARA"
        Regex::new(r"\b([A-Z]{2,})\b").expect("acronym regex is valid"),
        // "Alessandro P."
        Regex::new(r"\b([A-Z][a-zàèéìòù]+\s+[A-Z]\.?)\b").expect("initial regex is valid"),
    ]
});

/// Known categories in the corpus, each with its trigger keywords.
/// Declaration order is the documented tie-break when several match.
const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    ("retail", &["retail", "negozio", "negozi", "store", "punto vendita"]),
    ("food", &["food", "ristorante", "ristoranti", "bar", "caffè", "cafe"]),
    ("lusso", &["lusso", "luxury", "premium", "alta gamma"]),
    ("hospitality", &["hospitality", "hotel", "albergo", "resort"]),
    ("residenziale", &["residenziale", "casa", "appartamento", "abitazione"]),
    ("uffici", &["ufficio", "uffici", "office", "coworking"]),
    ("showroom", &["showroom", "esposizione"]),
    ("corporate", &["corporate", "aziendale"]),
];

/// Coarse intents used to derive a default category filter when the caller
/// supplied none. Scored by keyword hit count; highest wins.
const INTENT_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "portfolio",
        &[
            "progetto", "progetti", "portfolio", "lavoro", "lavori", "realizzato", "realizzati",
            "case study", "esempio", "esempi", "mostra", "mostrami", "vedere", "risultati",
            "completato", "interior", "ristrutturazione", "arredamento",
        ],
    ),
    (
        "servizi",
        &[
            "servizio", "servizi", "offrite", "offre", "cosa fate", "consulenza", "consulenze",
            "progettazione", "render", "rendering", "planimetria", "su misura", "come funziona",
            "come lavorate", "quanto costa", "prezzo", "prezzi", "costo", "costi",
        ],
    ),
    (
        "informazioni",
        &[
            "chi siete", "chi sei", "presentazione", "storia", "team", "staff", "architetti",
            "contatto", "contatti", "contattare", "email", "telefono", "dove siete", "sede",
            "indirizzo", "orario", "orari", "appuntamento", "studio", "azienda",
        ],
    ),
];

pub struct QueryClassifier {
    denylist: Vec<String>,
    category_keywords: Vec<(String, Vec<String>)>,
}

impl Default for QueryClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryClassifier {
    pub fn new() -> Self {
        Self {
            // The operator's own brand shows up capitalized in most queries
            // and must not be treated as a searchable entity.
            denylist: vec![
                "Atelier".to_string(),
                "Atelier Designers".to_string(),
                "Designers".to_string(),
            ],
            category_keywords: CATEGORY_KEYWORDS
                .iter()
                .map(|(cat, kws)| {
                    (
                        cat.to_string(),
                        kws.iter().map(|k| k.to_string()).collect(),
                    )
                })
                .collect(),
        }
    }

    pub fn with_denylist(denylist: Vec<String>) -> Self {
        Self {
            denylist,
            ..Self::new()
        }
    }

    /// Extend a category's keyword set at runtime. Returns false when the
    /// category is unknown.
    pub fn add_keywords(&mut self, category: &str, keywords: &[&str]) -> bool {
        match self
            .category_keywords
            .iter_mut()
            .find(|(cat, _)| cat == category)
        {
            Some((_, kws)) => {
                kws.extend(keywords.iter().map(|k| k.to_lowercase()));
                tracing::info!(category, added = keywords.len(), "category keywords extended");
                true
            }
            None => {
                tracing::warn!(category, "unknown category, keywords not added");
                false
            }
        }
    }

    /// Classify a raw user query. Entity extraction first, then category
    /// keywords, then semantic fallback.
    pub fn classify(&self, query: &str) -> QueryClassification {
        let entities = self.extract_entities(query);
        if !entities.is_empty() {
            tracing::debug!(?entities, "query classified as entity-based");
            return QueryClassification::EntityBased { entities };
        }

        let query_lower = query.to_lowercase();
        let mut categories = Vec::new();
        for (category, keywords) in &self.category_keywords {
            if keywords.iter().any(|kw| query_lower.contains(kw.as_str())) {
                categories.push(category.clone());
            }
        }
        if !categories.is_empty() {
            tracing::debug!(?categories, "query classified as category-based");
            return QueryClassification::CategoryBased { categories };
        }

        tracing::debug!("query classified as semantic");
        QueryClassification::Semantic
    }

    /// Extract candidate proper-noun phrases, de-duplicated in first-seen
    /// order and filtered through the denylist.
    fn extract_entities(&self, query: &str) -> Vec<String> {
        let mut entities: Vec<String> = Vec::new();
        for pattern in ENTITY_PATTERNS.iter() {
            for cap in pattern.captures_iter(query) {
                if let Some(m) = cap.get(1) {
                    let entity = m.as_str().to_string();
                    if !entities.contains(&entity) {
                        entities.push(entity);
                    }
                }
            }
        }
        entities.retain(|e| !self.denylist.iter().any(|d| d == e));
        entities
    }

    /// Coarse intent (portfolio / servizi / informazioni) by keyword score.
    /// Returns None when no keyword matches.
    pub fn detect_intent(&self, query: &str) -> Option<&'static str> {
        let query_lower = query.to_lowercase();
        let mut best: Option<(&'static str, usize)> = None;
        for (intent, keywords) in INTENT_KEYWORDS {
            let score = keywords
                .iter()
                .filter(|kw| query_lower.contains(*kw))
                .count();
            if score > 0 && best.map_or(true, |(_, s)| score > s) {
                best = Some((intent, score));
            }
        }
        best.map(|(intent, _)| intent)
    }
}
