//! Maps arbitrary CSV headers onto the semantic fields the normalizer needs.

use std::collections::BTreeMap;

/// The semantic role a CSV column can play.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Date,
    Description,
    Amount,
    Debit,
    Credit,
}

impl Role {
    /// Ordered header names tried when the source does not declare a column for this role.
    pub fn candidates(self) -> &'static [&'static str] {
        match self {
            Role::Date => &[
                "date",
                "transaction date",
                "post date",
                "posted date",
                "posting date",
                "trans date",
            ],
            Role::Description => &[
                "description",
                "details",
                "memo",
                "payee",
                "name",
                "narrative",
                "transaction description",
            ],
            Role::Amount => &["amount", "transaction amount", "amt"],
            Role::Debit => &["debit", "withdrawal", "withdrawals", "outflow", "charge"],
            Role::Credit => &["credit", "deposit", "deposits", "inflow", "payment"],
        }
    }
}

/// Normalizes a header or cell for comparison: strips BOM and zero-width spaces, turns NBSP into a
/// space, trims and lower-cases.
pub fn clean_header(s: &str) -> String {
    s.replace(['\u{feff}', '\u{200b}'], "")
        .replace('\u{a0}', " ")
        .trim()
        .to_lowercase()
}

/// Returns the index of the first column whose cleaned name equals the cleaned `declared` name,
/// or failing that the first column matching an entry of the role's candidate list.
pub fn find_column(headers: &[String], declared: Option<&str>, role: Role) -> Option<usize> {
    let cleaned: Vec<String> = headers.iter().map(|h| clean_header(h)).collect();
    if let Some(declared) = declared.filter(|d| !d.trim().is_empty()) {
        let wanted = clean_header(declared);
        if let Some(i) = cleaned.iter().position(|c| *c == wanted) {
            return Some(i);
        }
    }
    role.candidates()
        .iter()
        .find_map(|cand| cleaned.iter().position(|c| c == cand))
}

/// Like `find_column`, but falls back to the first column instead of failing. Ingestion never
/// stops on an unknown layout. Returns `None` only when there are no columns at all.
pub fn resolve_column(headers: &[String], declared: Option<&str>, role: Role) -> Option<usize> {
    if headers.is_empty() {
        return None;
    }
    Some(find_column(headers, declared, role).unwrap_or(0))
}

/// Applies a header rename map (`from` matched case-insensitively after cleaning) and returns
/// the renamed headers. Unmapped headers are kept as they are.
pub fn rename_headers(headers: &[String], renames: &BTreeMap<String, String>) -> Vec<String> {
    if renames.is_empty() {
        return headers.to_vec();
    }
    let lookup: BTreeMap<String, &String> =
        renames.iter().map(|(k, v)| (clean_header(k), v)).collect();
    headers
        .iter()
        .map(|h| match lookup.get(&clean_header(h)) {
            Some(to) => (*to).clone(),
            None => h.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_clean_header() {
        assert_eq!(clean_header("\u{feff} Posting\u{a0}Date\u{200b} "), "posting date");
    }

    #[test]
    fn test_declared_wins() {
        let h = headers(&["Date", "Value Date", "Memo"]);
        assert_eq!(find_column(&h, Some("value date"), Role::Date), Some(1));
    }

    #[test]
    fn test_declared_missing_falls_back_to_candidates() {
        let h = headers(&["Memo", "Posted Date"]);
        assert_eq!(find_column(&h, Some("Booking"), Role::Date), Some(1));
    }

    #[test]
    fn test_candidate_order() {
        // "description" precedes "memo" in the candidate list
        let h = headers(&["Memo", "Description"]);
        assert_eq!(find_column(&h, None, Role::Description), Some(1));
    }

    #[test]
    fn test_bom_header_matches() {
        let h = headers(&["\u{feff}Date", "Amount"]);
        assert_eq!(find_column(&h, None, Role::Date), Some(0));
        assert_eq!(find_column(&h, None, Role::Amount), Some(1));
    }

    #[test]
    fn test_resolve_falls_back_to_first_column() {
        let h = headers(&["Foo", "Bar"]);
        assert_eq!(find_column(&h, None, Role::Date), None);
        assert_eq!(resolve_column(&h, None, Role::Date), Some(0));
        assert_eq!(resolve_column(&[], None, Role::Date), None);
    }

    #[test]
    fn test_rename_headers() {
        let h = headers(&["Trans. Dt", "Memo"]);
        let mut renames = BTreeMap::new();
        renames.insert("trans. dt".to_string(), "Date".to_string());
        assert_eq!(rename_headers(&h, &renames), headers(&["Date", "Memo"]));
    }
}
