//! Listing search: query model, pure matcher, deterministic cache key.
//!
//! The matcher is pure and shared by every store backend, so listing semantics
//! cannot drift between them.

use serde::{Deserialize, Serialize};

use crate::item::Item;

pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Parameters of one listing search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Free text matched against title, authors, genres, publisher and isbn.
    /// Empty text matches everything.
    pub text: String,
    pub limit: usize,
    /// 1-based.
    pub page: usize,
    /// Ignore pagination and return the full result set.
    pub get_all: bool,
    /// When non-empty, an item must carry at least one of these genres.
    pub genres: Vec<String>,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            text: String::new(),
            limit: DEFAULT_PAGE_SIZE,
            page: 1,
            get_all: false,
            genres: Vec::new(),
        }
    }
}

/// One page of listing results plus the unpaginated total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub items: Vec<Item>,
    pub total: u64,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Deterministic cache key for this query.
    ///
    /// Genres are sorted so two queries differing only in genre order share a
    /// cache slot.
    pub fn cache_key(&self) -> String {
        let mut genres: Vec<String> = self
            .genres
            .iter()
            .map(|g| g.trim().to_lowercase())
            .filter(|g| !g.is_empty())
            .collect();
        genres.sort();

        format!(
            "books:search:{}:{}:{}:{}:{}",
            self.text.trim().to_lowercase(),
            self.limit,
            self.page,
            if self.get_all { "all" } else { "paginated" },
            if genres.is_empty() {
                "no-genres".to_string()
            } else {
                genres.join(",")
            },
        )
    }

    /// Does `item` satisfy both the free-text match and the genre filter?
    pub fn matches(&self, item: &Item) -> bool {
        self.matches_text(item) && self.matches_genres(item)
    }

    fn matches_text(&self, item: &Item) -> bool {
        let needle = self.text.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }

        if item.title.to_lowercase().contains(&needle)
            || item.publisher.to_lowercase().contains(&needle)
            || item.isbn.to_lowercase().contains(&needle)
        {
            return true;
        }

        // Authors and genres match on whole terms, not substrings.
        let terms: Vec<&str> = needle.split_whitespace().collect();
        let term_hits = |values: &[String]| {
            values
                .iter()
                .any(|v| terms.iter().any(|t| v.to_lowercase() == *t))
        };
        term_hits(&item.authors) || term_hits(&item.genres)
    }

    fn matches_genres(&self, item: &Item) -> bool {
        if self.genres.is_empty() {
            return true;
        }
        self.genres.iter().any(|wanted| {
            let wanted = wanted.trim().to_lowercase();
            !wanted.is_empty() && item.genres.iter().any(|g| g.to_lowercase() == wanted)
        })
    }

    /// Filter, sort (title ascending) and paginate a full scan.
    pub fn run<'a, I>(&self, items: I) -> Listing
    where
        I: IntoIterator<Item = &'a Item>,
    {
        let mut hits: Vec<Item> = items
            .into_iter()
            .filter(|i| self.matches(i))
            .cloned()
            .collect();
        hits.sort_by_key(|i| i.title.to_lowercase());

        let total = hits.len() as u64;
        let items = if self.get_all {
            hits
        } else {
            let start = self.page.saturating_sub(1).saturating_mul(self.limit);
            hits.into_iter().skip(start).take(self.limit).collect()
        };

        Listing { items, total }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ItemDraft;

    fn item(title: &str, authors: &[&str], genres: &[&str]) -> Item {
        ItemDraft {
            isbn: format!("isbn-{title}"),
            title: title.to_string(),
            authors: authors.iter().map(|s| s.to_string()).collect(),
            genres: genres.iter().map(|s| s.to_string()).collect(),
            publisher: "Tor".to_string(),
            page_count: 300,
            published_year: 1999,
            sell_price: 2_000,
            stock_price: 900,
            borrow_price: 200,
            copies: 3,
        }
        .build()
        .unwrap()
    }

    #[test]
    fn empty_text_matches_everything() {
        let a = item("Dune", &["Herbert"], &["scifi"]);
        let b = item("Emma", &["Austen"], &["classic"]);
        let listing = SearchQuery::default().run([&a, &b]);
        assert_eq!(listing.total, 2);
    }

    #[test]
    fn title_matches_are_substring_and_case_insensitive() {
        let a = item("The Left Hand of Darkness", &["Le Guin"], &["scifi"]);
        let q = SearchQuery::new("left hand");
        assert!(q.matches(&a));
    }

    #[test]
    fn author_matches_are_whole_terms() {
        let a = item("Dune", &["Herbert"], &["scifi"]);
        assert!(SearchQuery::new("herbert").matches(&a));
        assert!(!SearchQuery::new("herb").matches(&a));
    }

    #[test]
    fn genre_filter_requires_overlap() {
        let a = item("Dune", &["Herbert"], &["scifi"]);
        let mut q = SearchQuery::default();
        q.genres = vec!["Classic".to_string()];
        assert!(!q.matches(&a));
        q.genres = vec!["SCIFI".to_string()];
        assert!(q.matches(&a));
    }

    #[test]
    fn results_are_title_sorted_and_paginated() {
        let items = [
            item("Watership Down", &[], &[]),
            item("animal farm", &[], &[]),
            item("Middlemarch", &[], &[]),
        ];
        let q = SearchQuery {
            limit: 2,
            ..Default::default()
        };
        let listing = q.run(items.iter());
        assert_eq!(listing.total, 3);
        let titles: Vec<_> = listing.items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, ["animal farm", "Middlemarch"]);

        let page2 = SearchQuery {
            limit: 2,
            page: 2,
            ..Default::default()
        }
        .run(items.iter());
        assert_eq!(page2.items.len(), 1);
        assert_eq!(page2.items[0].title, "Watership Down");
    }

    #[test]
    fn get_all_ignores_pagination() {
        let items = [item("A", &[], &[]), item("B", &[], &[]), item("C", &[], &[])];
        let q = SearchQuery {
            limit: 1,
            get_all: true,
            ..Default::default()
        };
        assert_eq!(q.run(items.iter()).items.len(), 3);
    }

    #[test]
    fn cache_key_is_order_insensitive_in_genres() {
        let mut a = SearchQuery::new("dune");
        a.genres = vec!["scifi".to_string(), "classic".to_string()];
        let mut b = SearchQuery::new("dune");
        b.genres = vec!["classic".to_string(), "scifi".to_string()];
        assert_eq!(a.cache_key(), b.cache_key());
        assert!(a.cache_key().starts_with("books:search:dune:"));
    }
}
