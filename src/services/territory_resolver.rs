//! Maps free-text delivery-zone labels to canonical territory codes.
//!
//! Lookup runs in three passes and stops at the first hit: exact label or code,
//! then the built-in storefront zone table (plus configured overrides), then a
//! normalized comparison that ignores case, spacing and diacritics.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

use crate::errors::ServiceError;
use crate::models::Territory;
use crate::repositories::SyncStore;

/// Delivery zones the storefront publishes, code -> bilingual display label.
pub const CODE_TO_DISPLAY: &[(&str, &str)] = &[
    ("EGISM", "Ismailia - الاسماعيلية"),
    ("EG6OCT", "6 October - 6 أكتوبر"),
    ("EGZAYED", "Sheikh Zayed - الشيخ زايد"),
    ("EGHADAYEQOCT", "Hadayek October - حدائق أكتوبر"),
    ("EGHADAYEQAH", "Hadayek Al-Ahram - حدائق الاهرام"),
    ("EGFAYSAL", "Faisal - فيصل"),
    ("EGHARAM", "Haram - الهرم"),
    ("EGOMRANIYA", "Omraneya - العمرانيه"),
    ("EGGIZA", "Giza area - منطقة الجيزه"),
    ("EGMANIAL", "Manial - المنيل"),
    ("EGGARDENCITY", "Garden City - جاردن ستي"),
    ("EGMASROLD", "Old Cairo - مصر القديمه"),
    ("EGDOKKI", "Dokki - الدقي"),
    ("EGAWGAZA", "Agouza - العجوزه"),
    ("EGMOHANDSEEN", "Mohandessin - المهندسين"),
    ("EGZAMALEK", "Zamalek - الزمالك"),
    ("EGIMBABA", "Imbaba - امبابه"),
    ("EGBOLAK", "Boulak Al-Dakrour - بولاق الدكرور"),
    ("EGDOWNTOWN", "Downtown - وسط البلد"),
    ("EGSHOBRA", "Shubra - شبرا"),
    ("EGSHOBRAKH", "Shubra El-Kheima - شبرا الخيمه"),
    ("EGABBASSIYA", "Abbasiya - العباسيه"),
    ("EGHADAYEQ", "Hadayek El-Qobba - حدائق القبه"),
    ("EGZAWYA", "Zawya El-Hamra - الزاويه الحمرا"),
    ("EGMATARIYA", "Matareya - المطريه"),
    ("EGMASRJD", "Heliopolis - مصر الجديده"),
    ("EGNASRCITY", "Nasr City - مدينه نصر"),
    ("EGSALAM", "Alsalam City - مدينه السلام"),
    ("EGOBOUR", "Al Obour - العبور"),
    ("EGTAGAMMO", "Settlement - التجمع"),
    ("EGREHAB", "Rehab - الرحاب"),
    ("EGMADINATY", "Madinaty - مدينتي"),
    ("EGRSHEROUK", "Alsherouk - الشروق"),
    ("EGMAADI", "Maadi - المعادي"),
    ("EGMOQATTAM", "Moqattam - المقطم"),
    ("EGKATAMYA", "Katameya - القطاميه"),
];

const BILINGUAL_SEPARATOR: &str = " - ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum MatchPath {
    Exact,
    ReverseMap,
    Normalized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerritoryMatch {
    pub code: Option<String>,
    pub matched: bool,
    pub path: Option<MatchPath>,
}

impl TerritoryMatch {
    fn hit(code: &str, path: MatchPath) -> Self {
        Self {
            code: Some(code.to_string()),
            matched: true,
            path: Some(path),
        }
    }

    fn miss() -> Self {
        Self {
            code: None,
            matched: false,
            path: None,
        }
    }
}

/// The label itself plus each half of a "name - localized name" pair.
pub fn label_variants(label: &str) -> Vec<String> {
    let label = label.trim();
    if label.is_empty() {
        return Vec::new();
    }
    let mut variants = vec![label.to_string()];
    if label.contains(BILINGUAL_SEPARATOR) {
        variants.extend(
            label
                .split(BILINGUAL_SEPARATOR)
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(str::to_string),
        );
    }
    variants
}

/// Trim, collapse whitespace, casefold and strip combining marks.
pub fn normalize_label(label: &str) -> String {
    let stripped: String = label.nfd().filter(|c| !is_combining_mark(*c)).collect();
    stripped
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Immutable lookup tables built from the known territories.
#[derive(Debug, Clone, Default)]
pub struct TerritoryResolver {
    exact: HashMap<String, String>,
    reverse: HashMap<String, String>,
    normalized: HashMap<String, String>,
}

impl TerritoryResolver {
    /// `overrides` adds code -> display label entries to the built-in zone table.
    /// A label claimed by an override maps to the override's code.
    pub fn new(territories: &[Territory], overrides: &HashMap<String, String>) -> Self {
        let known: BTreeSet<&str> = territories.iter().map(|t| t.code.as_str()).collect();
        let mut resolver = Self::default();

        for territory in territories {
            resolver
                .exact
                .insert(territory.code.clone(), territory.code.clone());
            for label in &territory.labels {
                resolver
                    .exact
                    .entry(label.trim().to_string())
                    .or_insert_with(|| territory.code.clone());
            }
        }

        let mut configured: Vec<(&String, &String)> = overrides.iter().collect();
        configured.sort();
        let display_entries = configured
            .into_iter()
            .map(|(c, l)| (c.clone(), l.clone()))
            .chain(
                CODE_TO_DISPLAY
                    .iter()
                    .map(|(code, label)| (code.to_string(), label.to_string())),
            );
        for (code, display) in display_entries {
            if !known.contains(code.as_str()) {
                continue;
            }
            for variant in label_variants(&display) {
                resolver.reverse.entry(variant).or_insert_with(|| code.clone());
            }
        }

        for territory in territories {
            let candidates = std::iter::once(territory.code.clone())
                .chain(territory.labels.iter().flat_map(|l| label_variants(l)));
            for candidate in candidates {
                resolver
                    .normalized
                    .entry(normalize_label(&candidate))
                    .or_insert_with(|| territory.code.clone());
            }
        }
        for (variant, code) in &resolver.reverse {
            resolver
                .normalized
                .entry(normalize_label(variant))
                .or_insert_with(|| code.clone());
        }
        resolver.normalized.remove("");

        resolver
    }

    pub async fn load(
        store: &dyn SyncStore,
        overrides: &HashMap<String, String>,
    ) -> Result<Arc<Self>, ServiceError> {
        let territories = store.list_territories().await?;
        Ok(Arc::new(Self::new(&territories, overrides)))
    }

    pub fn resolve(&self, label: &str) -> TerritoryMatch {
        let trimmed = label.trim();
        if trimmed.is_empty() {
            return TerritoryMatch::miss();
        }

        if let Some(code) = self.exact.get(trimmed) {
            return TerritoryMatch::hit(code, MatchPath::Exact);
        }
        if let Some(code) = label_variants(trimmed)
            .iter()
            .find_map(|variant| self.reverse.get(variant))
        {
            return TerritoryMatch::hit(code, MatchPath::ReverseMap);
        }
        if let Some(code) = label_variants(trimmed)
            .iter()
            .find_map(|variant| self.normalized.get(&normalize_label(variant)))
        {
            return TerritoryMatch::hit(code, MatchPath::Normalized);
        }

        debug!(label = trimmed, "No territory matched zone label");
        TerritoryMatch::miss()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn territories() -> Vec<Territory> {
        vec![
            Territory {
                code: "EGNASRCITY".into(),
                labels: vec!["Nasr City - مدينه نصر".into()],
                pricing_profile: Some("Cairo East".into()),
                delivery_charge: None,
            },
            Territory {
                code: "EGMAADI".into(),
                labels: vec![],
                pricing_profile: None,
                delivery_charge: None,
            },
            Territory {
                code: "EGDOKKI".into(),
                labels: vec!["Dókki".into()],
                pricing_profile: None,
                delivery_charge: None,
            },
        ]
    }

    fn resolver() -> TerritoryResolver {
        TerritoryResolver::new(&territories(), &HashMap::new())
    }

    #[rstest]
    #[case("Nasr City - مدينه نصر", "EGNASRCITY", MatchPath::Exact)]
    #[case("EGMAADI", "EGMAADI", MatchPath::Exact)]
    #[case("Maadi - المعادي", "EGMAADI", MatchPath::ReverseMap)]
    #[case("المعادي", "EGMAADI", MatchPath::ReverseMap)]
    #[case("nasr city", "EGNASRCITY", MatchPath::Normalized)]
    #[case("  NASR   city ", "EGNASRCITY", MatchPath::Normalized)]
    #[case("dokki", "EGDOKKI", MatchPath::Normalized)]
    fn resolves_through_expected_path(
        #[case] label: &str,
        #[case] code: &str,
        #[case] path: MatchPath,
    ) {
        let m = resolver().resolve(label);
        assert!(m.matched);
        assert_eq!(m.code.as_deref(), Some(code));
        assert_eq!(m.path, Some(path));
    }

    #[test]
    fn bilingual_and_plain_forms_agree() {
        let r = resolver();
        assert_eq!(
            r.resolve("Nasr City - مدينه نصر").code,
            r.resolve("nasr city").code
        );
    }

    #[test]
    fn unknown_labels_do_not_match() {
        let m = resolver().resolve("Atlantis");
        assert_eq!(m, TerritoryMatch::miss());
        assert!(!resolver().resolve("   ").matched);
    }

    #[test]
    fn zone_table_only_resolves_known_territories() {
        assert!(!resolver().resolve("Zamalek - الزمالك").matched);
    }

    #[test]
    fn overrides_extend_the_zone_table() {
        let mut overrides = HashMap::new();
        overrides.insert("EGMAADI".to_string(), "Degla - دجلة".to_string());
        let r = TerritoryResolver::new(&territories(), &overrides);
        assert_eq!(r.resolve("Degla").code.as_deref(), Some("EGMAADI"));
    }

    #[test]
    fn overrides_take_labels_from_the_zone_table() {
        let mut overrides = HashMap::new();
        overrides.insert(
            "EGNASRCITY".to_string(),
            "Maadi - المعادي".to_string(),
        );
        let r = TerritoryResolver::new(&territories(), &overrides);
        let m = r.resolve("Maadi - المعادي");
        assert_eq!(m.code.as_deref(), Some("EGNASRCITY"));
        assert_eq!(m.path, Some(MatchPath::ReverseMap));
        assert_eq!(r.resolve("المعادي").code.as_deref(), Some("EGNASRCITY"));
        assert_eq!(r.resolve("EGMAADI").code.as_deref(), Some("EGMAADI"));
    }

    #[test]
    fn normalization_strips_marks_and_case() {
        assert_eq!(normalize_label("  Dókki\tAREA "), "dokki area");
    }
}
