use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Result, Seq2SeqError};

/// On-disk form of the vocabulary (`idx_dict.json`).
#[derive(Debug, Serialize, Deserialize)]
struct IdxDict {
    char_to_index: BTreeMap<String, usize>,
    start_token: usize,
    end_token: usize,
}

/// Character vocabulary with two reserved tokens.
///
/// Characters are numbered from 0 in sorted order, followed by the start token
/// and the end token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "IdxDict", into = "IdxDict")]
pub struct Vocab {
    index_to_char: Vec<char>,
    char_to_index: HashMap<char, usize>,
}

impl Vocab {
    pub fn from_chars<I: IntoIterator<Item = char>>(chars: I) -> Self {
        let index_to_char = chars
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect::<Vec<_>>();
        let char_to_index = index_to_char
            .iter()
            .enumerate()
            .map(|(i, &c)| (c, i))
            .collect();
        Self {
            index_to_char,
            char_to_index,
        }
    }

    pub fn from_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut chars = BTreeSet::new();
        for word in words {
            chars.extend(word.as_ref().chars());
        }
        Self::from_chars(chars)
    }

    pub fn start_token(&self) -> usize {
        self.index_to_char.len()
    }

    pub fn end_token(&self) -> usize {
        self.index_to_char.len() + 1
    }

    pub fn vocab_size(&self) -> usize {
        self.index_to_char.len() + 2
    }

    pub fn index_of(&self, c: char) -> Result<usize> {
        self.char_to_index
            .get(&c)
            .copied()
            .ok_or(Seq2SeqError::UnknownChar(c))
    }

    pub fn char_at(&self, index: usize) -> Option<char> {
        self.index_to_char.get(index).copied()
    }

    /// Character indices of `word` followed by the end token.
    pub fn encode_word(&self, word: &str) -> Result<Vec<usize>> {
        let mut ids = word
            .chars()
            .map(|c| self.index_of(c))
            .collect::<Result<Vec<_>>>()?;
        ids.push(self.end_token());
        Ok(ids)
    }

    /// Drops the reserved tokens.
    pub fn decode(&self, ids: &[usize]) -> String {
        ids.iter().filter_map(|&i| self.char_at(i)).collect()
    }

    /// Display label for a token: the character itself, `SOS` or `EOS`.
    pub fn label(&self, index: usize) -> Option<String> {
        match self.char_at(index) {
            Some(c) => Some(c.to_string()),
            None if index == self.start_token() => Some("SOS".to_string()),
            None if index == self.end_token() => Some("EOS".to_string()),
            None => None,
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut w = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut w, self)?;
        w.flush()?;
        Ok(())
    }
}

impl TryFrom<IdxDict> for Vocab {
    type Error = Seq2SeqError;

    fn try_from(dict: IdxDict) -> Result<Self> {
        let n = dict.char_to_index.len();
        let mut index_to_char = vec![None; n];
        for (key, &index) in &dict.char_to_index {
            let mut chars = key.chars();
            let (Some(c), None) = (chars.next(), chars.next()) else {
                return Err(Seq2SeqError::Checkpoint(format!(
                    "idx_dict key {key:?} is not a single character"
                )));
            };
            match index_to_char.get_mut(index) {
                Some(slot) if slot.is_none() => *slot = Some(c),
                _ => {
                    return Err(Seq2SeqError::Checkpoint(format!(
                        "idx_dict index {index} for {key:?} is out of range or repeated"
                    )))
                }
            }
        }
        if dict.start_token != n || dict.end_token != n + 1 {
            return Err(Seq2SeqError::Checkpoint(format!(
                "idx_dict reserves tokens {} and {}, expected {} and {}",
                dict.start_token,
                dict.end_token,
                n,
                n + 1
            )));
        }

        let index_to_char = index_to_char.into_iter().flatten().collect::<Vec<_>>();
        let char_to_index = index_to_char
            .iter()
            .enumerate()
            .map(|(i, &c)| (c, i))
            .collect();
        Ok(Self {
            index_to_char,
            char_to_index,
        })
    }
}

impl From<Vocab> for IdxDict {
    fn from(vocab: Vocab) -> Self {
        Self {
            start_token: vocab.start_token(),
            end_token: vocab.end_token(),
            char_to_index: vocab
                .index_to_char
                .iter()
                .enumerate()
                .map(|(i, c)| (c.to_string(), i))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_sorted_characters_then_reserved_tokens() {
        let vocab = Vocab::from_words(["cab", "well-done"]);
        // - a b c d e l n o w
        assert_eq!(vocab.vocab_size(), 12);
        assert_eq!(vocab.index_of('-').unwrap(), 0);
        assert_eq!(vocab.index_of('w').unwrap(), 9);
        assert_eq!(vocab.start_token(), 10);
        assert_eq!(vocab.end_token(), 11);
    }

    #[test]
    fn encodes_with_trailing_end_token() {
        let vocab = Vocab::from_chars("abc".chars());
        assert_eq!(vocab.encode_word("cab").unwrap(), vec![2, 0, 1, 4]);
        assert_eq!(vocab.encode_word("").unwrap(), vec![4]);
        assert_eq!(vocab.decode(&[3, 2, 0, 1, 4]), "cab");
        assert!(matches!(
            vocab.encode_word("abz"),
            Err(Seq2SeqError::UnknownChar('z'))
        ));
    }

    #[test]
    fn labels_reserved_tokens() {
        let vocab = Vocab::from_chars("xy".chars());
        assert_eq!(vocab.label(1).as_deref(), Some("y"));
        assert_eq!(vocab.label(2).as_deref(), Some("SOS"));
        assert_eq!(vocab.label(3).as_deref(), Some("EOS"));
        assert_eq!(vocab.label(4), None);
    }

    #[test]
    fn json_round_trip() {
        let vocab = Vocab::from_words(["ten-year-old"]);
        let json = serde_json::to_string(&vocab).unwrap();
        assert!(json.contains("\"start_token\""));
        let back: Vocab = serde_json::from_str(&json).unwrap();
        assert_eq!(back, vocab);
    }

    #[test]
    fn rejects_inconsistent_idx_dict() {
        let gap = r#"{"char_to_index": {"a": 0, "b": 2}, "start_token": 2, "end_token": 3}"#;
        assert!(serde_json::from_str::<Vocab>(gap).is_err());

        let reserved = r#"{"char_to_index": {"a": 0}, "start_token": 5, "end_token": 6}"#;
        assert!(serde_json::from_str::<Vocab>(reserved).is_err());

        let ok = r#"{"char_to_index": {"b": 1, "a": 0}, "start_token": 2, "end_token": 3}"#;
        let vocab = serde_json::from_str::<Vocab>(ok).unwrap();
        assert_eq!(vocab.encode_word("ba").unwrap(), vec![1, 0, 3]);
    }
}
