use serde::{Deserialize, Serialize};

// --- Lexicon Records ---

/// One headword parsed from the corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordEntry {
    /// Lowercase ASCII letters only; unique key in the index.
    pub word: String,
    /// Pronunciation including the surrounding slashes, e.g. `/əˈbændən/`.
    #[serde(default)]
    pub phonetic: Option<String>,
    /// Morpheme fragments in order, e.g. `["a", "ban", "don"]`.
    #[serde(default)]
    pub root_split: Vec<String>,
    /// Per-fragment glosses, parallel to `root_split`.
    #[serde(default)]
    pub root_meaning: Vec<String>,
    pub definition: String,
    #[serde(default)]
    pub senses: Vec<Sense>,
    #[serde(default)]
    pub examples: Vec<String>,
    #[serde(default)]
    pub synonyms: Vec<String>,
    /// Trailing `=`-separated sections after the definition.
    #[serde(default)]
    pub notes: Vec<String>,
    /// The whitespace-collapsed paragraph this entry came from.
    pub raw_text: String,
}

impl WordEntry {
    /// Creates a bare entry with only a headword and definition.
    pub fn new(word: impl Into<String>, definition: impl Into<String>) -> Self {
        let definition = definition.into();
        let word = word.into();
        WordEntry {
            raw_text: format!("{} {}", word, definition),
            senses: parse_senses(&definition),
            word,
            phonetic: None,
            root_split: Vec::new(),
            root_meaning: Vec::new(),
            definition,
            examples: Vec::new(),
            synonyms: Vec::new(),
            notes: Vec::new(),
        }
    }

    /// Pairs each fragment with its gloss.
    pub fn fragments(&self) -> impl Iterator<Item = (&str, &str)> {
        self.root_split
            .iter()
            .zip(self.root_meaning.iter())
            .map(|(f, m)| (f.as_str(), m.as_str()))
    }
}

/// A root (morpheme) and its gloss.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RootEntry {
    pub root: String,
    pub meaning: String,
    #[serde(default)]
    pub raw_text: String,
}

impl RootEntry {
    pub fn new(root: impl Into<String>, meaning: impl Into<String>) -> Self {
        let root = root.into();
        let meaning = meaning.into();
        RootEntry {
            raw_text: format!("△ {}={}", root, meaning),
            root,
            meaning,
        }
    }
}

/// One part-of-speech tagged sense of a definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sense {
    pub pos: Option<PartOfSpeech>,
    pub gloss: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartOfSpeech {
    N,    // Noun
    V,    // Verb
    A,    // Adjective
    R,    // Adverb
    P,    // Preposition
    C,    // Conjunction
    Pron, // Pronoun
    Num,  // Numeral
    Art,  // Article
    Int,  // Interjection
    X,    // Other
}

/// Lowercases and keeps ASCII letters only.
///
/// Used for headwords, root variants and incoming tokens alike, so all three
/// share one key space.
pub fn normalize_token(raw: &str) -> String {
    raw.chars()
        .filter(char::is_ascii_alphabetic)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Splits a definition on part-of-speech tags like `v.` or `adj.`.
///
/// Text before the first tag becomes an untagged sense. A definition with no
/// tags at all yields one untagged sense.
pub fn parse_senses(definition: &str) -> Vec<Sense> {
    let mut senses = Vec::new();
    let mut pending: Option<PartOfSpeech> = None;
    let mut gloss_start = 0;
    let bytes = definition.as_bytes();

    let mut i = 0;
    while i < bytes.len() {
        let at_boundary = i == 0 || !bytes[i - 1].is_ascii_alphabetic();
        if at_boundary && bytes[i].is_ascii_alphabetic() {
            let tag_end = definition[i..]
                .find(|c: char| !c.is_ascii_alphabetic())
                .map_or(definition.len(), |n| i + n);
            if definition[tag_end..].starts_with('.') {
                if let Ok(pos) = definition[i..tag_end].parse::<PartOfSpeech>() {
                    push_sense(&mut senses, pending, &definition[gloss_start..i]);
                    pending = Some(pos);
                    gloss_start = tag_end + 1;
                    i = tag_end + 1;
                    continue;
                }
            }
            i = tag_end;
            continue;
        }
        i += 1;
    }
    push_sense(&mut senses, pending, &definition[gloss_start..]);
    senses
}

fn push_sense(senses: &mut Vec<Sense>, pos: Option<PartOfSpeech>, gloss: &str) {
    let gloss = gloss.trim().trim_end_matches(['；', ';']).trim();
    if gloss.is_empty() && pos.is_none() {
        return;
    }
    senses.push(Sense {
        pos,
        gloss: gloss.to_string(),
    });
}

impl std::fmt::Display for PartOfSpeech {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                PartOfSpeech::N => "noun",
                PartOfSpeech::V => "verb",
                PartOfSpeech::A => "adjective",
                PartOfSpeech::R => "adverb",
                PartOfSpeech::P => "preposition",
                PartOfSpeech::C => "conjunction",
                PartOfSpeech::Pron => "pronoun",
                PartOfSpeech::Num => "numeral",
                PartOfSpeech::Art => "article",
                PartOfSpeech::Int => "interjection",
                PartOfSpeech::X => "other",
            }
        )
    }
}

// Accepts both the dictionary abbreviations used in the corpus and full names.
impl std::str::FromStr for PartOfSpeech {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "n" | "noun" => Ok(PartOfSpeech::N),
            "v" | "vt" | "vi" | "verb" => Ok(PartOfSpeech::V),
            "a" | "adj" | "adjective" => Ok(PartOfSpeech::A),
            "ad" | "adv" | "adverb" => Ok(PartOfSpeech::R),
            "prep" | "preposition" => Ok(PartOfSpeech::P),
            "conj" | "conjunction" => Ok(PartOfSpeech::C),
            "pron" | "pronoun" => Ok(PartOfSpeech::Pron),
            "num" | "numeral" => Ok(PartOfSpeech::Num),
            "art" | "article" => Ok(PartOfSpeech::Art),
            "int" | "interj" | "interjection" => Ok(PartOfSpeech::Int),
            "x" | "other" => Ok(PartOfSpeech::X),
            _ => Err(format!("Invalid part of speech: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_token() {
        assert_eq!(normalize_token("Abandon,"), "abandon");
        assert_eq!(normalize_token("well-known"), "wellknown");
        assert_eq!(normalize_token("café"), "caf");
        assert_eq!(normalize_token("123 !"), "");
    }

    #[test]
    fn test_parse_senses_tagged() {
        let senses = parse_senses("v. 放弃；抛弃 n. 放任");
        assert_eq!(senses.len(), 2);
        assert_eq!(senses[0].pos, Some(PartOfSpeech::V));
        assert_eq!(senses[0].gloss, "放弃；抛弃");
        assert_eq!(senses[1].pos, Some(PartOfSpeech::N));
        assert_eq!(senses[1].gloss, "放任");
    }

    #[test]
    fn test_parse_senses_untagged_prefix_and_words() {
        // "see." is not a tag, "adj." is.
        let senses = parse_senses("see below adj. amateur");
        assert_eq!(senses.len(), 2);
        assert_eq!(senses[0].pos, None);
        assert_eq!(senses[0].gloss, "see below");
        assert_eq!(senses[1].pos, Some(PartOfSpeech::A));
        assert_eq!(senses[1].gloss, "amateur");

        assert!(parse_senses("   ").is_empty());
    }

    #[test]
    fn test_part_of_speech_round_trip_names() {
        assert_eq!("vt".parse::<PartOfSpeech>(), Ok(PartOfSpeech::V));
        assert_eq!("ADJ".parse::<PartOfSpeech>(), Ok(PartOfSpeech::A));
        assert!("see".parse::<PartOfSpeech>().is_err());
        assert_eq!(PartOfSpeech::R.to_string(), "adverb");
    }

    #[test]
    fn test_fragments_pairs() {
        let mut entry = WordEntry::new("abandon", "v. 放弃");
        entry.root_split = vec!["a".into(), "ban".into(), "don".into()];
        entry.root_meaning = vec!["×".into(), "禁止".into(), "给出".into()];
        let pairs: Vec<_> = entry.fragments().collect();
        assert_eq!(pairs[1], ("ban", "禁止"));
    }
}
