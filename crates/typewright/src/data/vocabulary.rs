//! # Counters and Vocabularies
//!
//! Counting is per file; vocabularies are built once from merged counts.
//! Both steps are order independent: merging sums counts, and ranking breaks
//! count ties lexicographically.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// The reserved out-of-vocabulary token; always id 0.
pub const UNK_TOKEN: &str = "%UNK%";

/// A ``{ token -> count }`` accumulator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Counter {
    counts: BTreeMap<String, u64>,
}

impl Counter {
    /// Create an empty counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one occurrence of `token`.
    pub fn add<S: AsRef<str>>(
        &mut self,
        token: S,
    ) {
        self.add_n(token, 1);
    }

    /// Count `n` occurrences of `token`.
    pub fn add_n<S: AsRef<str>>(
        &mut self,
        token: S,
        n: u64,
    ) {
        let token = token.as_ref();
        match self.counts.get_mut(token) {
            Some(count) => *count += n,
            None => {
                self.counts.insert(token.to_string(), n);
            }
        }
    }

    /// Add every count of `other` into this counter.
    pub fn merge(
        &mut self,
        other: &Counter,
    ) {
        for (token, &n) in &other.counts {
            self.add_n(token, n);
        }
    }

    /// The count of `token`.
    pub fn get(
        &self,
        token: &str,
    ) -> u64 {
        self.counts.get(token).copied().unwrap_or(0)
    }

    /// The number of distinct tokens.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Is the counter empty?
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Tokens ranked by descending count, ties broken by token order.
    pub fn most_common(&self) -> Vec<(&str, u64)> {
        let mut ranked: Vec<(&str, u64)> =
            self.counts.iter().map(|(k, &v)| (k.as_str(), v)).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked
    }
}

/// A dense ``{ token <-> id }`` mapping with [`UNK_TOKEN`] at id 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct Vocabulary {
    tokens: Vec<String>,
    index: HashMap<String, u32>,
}

impl From<Vec<String>> for Vocabulary {
    fn from(tokens: Vec<String>) -> Self {
        let index = tokens
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), i as u32))
            .collect();
        Self { tokens, index }
    }
}

impl From<Vocabulary> for Vec<String> {
    fn from(vocab: Vocabulary) -> Self {
        vocab.tokens
    }
}

impl Vocabulary {
    /// Build a vocabulary from counts.
    ///
    /// ## Arguments
    /// * `counts` - merged token counts.
    /// * `max_size` - the maximum number of entries, including [`UNK_TOKEN`].
    /// * `count_threshold` - tokens seen fewer times are left out.
    pub fn from_counts(
        counts: &Counter,
        max_size: usize,
        count_threshold: u64,
    ) -> Self {
        let mut tokens = vec![UNK_TOKEN.to_string()];
        tokens.extend(
            counts
                .most_common()
                .into_iter()
                .filter(|&(token, n)| n >= count_threshold && token != UNK_TOKEN)
                .take(max_size.saturating_sub(1))
                .map(|(token, _)| token.to_string()),
        );
        tokens.into()
    }

    /// Build a vocabulary from an explicit token list; [`UNK_TOKEN`] is prepended.
    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut all = vec![UNK_TOKEN.to_string()];
        all.extend(
            tokens
                .into_iter()
                .map(Into::into)
                .filter(|t: &String| t != UNK_TOKEN),
        );
        all.into()
    }

    /// The number of entries, including [`UNK_TOKEN`].
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Always false; the vocabulary holds at least [`UNK_TOKEN`].
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// The id of `token`, or 0 for out-of-vocabulary tokens.
    pub fn get_id(
        &self,
        token: &str,
    ) -> u32 {
        self.index.get(token).copied().unwrap_or(0)
    }

    /// Is `token` in the vocabulary?
    pub fn contains(
        &self,
        token: &str,
    ) -> bool {
        self.index.contains_key(token)
    }

    /// The token with id `id`.
    pub fn get_token(
        &self,
        id: u32,
    ) -> Option<&str> {
        self.tokens.get(id as usize).map(String::as_str)
    }

    /// All tokens, in id order.
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_merge_is_order_independent() {
        let mut a = Counter::new();
        a.add("int");
        a.add("str");
        a.add("int");

        let mut b = Counter::new();
        b.add("str");
        b.add_n("float", 3);

        let mut ab = Counter::new();
        ab.merge(&a);
        ab.merge(&b);

        let mut ba = Counter::new();
        ba.merge(&b);
        ba.merge(&a);

        assert_eq!(ab, ba);
        assert_eq!(ab.get("int"), 2);
        assert_eq!(ab.get("str"), 2);
        assert_eq!(ab.get("float"), 3);
        assert_eq!(ab.get("bool"), 0);

        assert_eq!(ab.most_common(), vec![("float", 3), ("int", 2), ("str", 2)]);
    }

    #[test]
    fn test_vocabulary_from_counts() {
        let mut counts = Counter::new();
        counts.add_n("a", 5);
        counts.add_n("b", 1);
        counts.add_n("c", 5);
        counts.add_n("d", 2);

        let vocab = Vocabulary::from_counts(&counts, 3, 1);
        assert_eq!(vocab.tokens(), &[UNK_TOKEN, "a", "c"]);
        assert_eq!(vocab.get_id("c"), 2);
        assert_eq!(vocab.get_id("d"), 0);
        assert_eq!(vocab.get_token(1), Some("a"));
        assert_eq!(vocab.get_token(9), None);

        let vocab = Vocabulary::from_counts(&counts, 100, 2);
        assert_eq!(vocab.tokens(), &[UNK_TOKEN, "a", "c", "d"]);
    }

    #[test]
    fn test_vocabulary_serde() {
        let vocab = Vocabulary::from_tokens(["CHILD", "NEXT"]);
        let json = serde_json::to_string(&vocab).unwrap();
        assert_eq!(json, r#"["%UNK%","CHILD","NEXT"]"#);

        let back: Vocabulary = serde_json::from_str(&json).unwrap();
        assert_eq!(back, vocab);
        assert_eq!(back.get_id("NEXT"), 2);
    }
}
