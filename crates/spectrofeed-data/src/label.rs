// Label mapping: closed set of class names and their indices
//
// Stores hold raw integer labels. A `LabelSet` is the fixed enumeration those
// integers must belong to; anything outside it is a malformed record.

use std::fmt;
use std::str::FromStr;

use ndarray::ArrayViewMut1;
use serde::{Deserialize, Serialize};

use spectrofeed_core::{Error, Result};

/// A closed enumeration of classes, each with a stable integer index.
pub trait LabelSet: Copy + Eq + fmt::Debug + Send + Sync + 'static {
    /// Number of classes; the width of a one-hot label row.
    const NUM_CLASSES: usize;

    /// Map a raw stored label to its class, or `None` if it is not in the set.
    fn from_index(index: i64) -> Option<Self>;

    /// Position of this class in `0..NUM_CLASSES`.
    fn index(self) -> usize;

    /// Human-readable class name.
    fn name(self) -> &'static str;

    /// Decode a raw label read from record `key`.
    fn decode(key: &str, raw: i64) -> Result<Self> {
        Self::from_index(raw).ok_or_else(|| Error::UnknownLabel {
            key: key.to_string(),
            label: raw,
            num_classes: Self::NUM_CLASSES,
        })
    }

    /// Write this class as a one-hot row into `row` (which must be zeroed).
    fn write_one_hot(self, mut row: ArrayViewMut1<'_, f32>) {
        row[self.index()] = 1.0;
    }
}

/// The five animal-sound classes of the acoustic scene task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AscLabel {
    Cat,
    Cow,
    Dog,
    Frog,
    Pig,
}

impl AscLabel {
    /// Every class, in index order.
    pub const ALL: [AscLabel; 5] = [
        AscLabel::Cat,
        AscLabel::Cow,
        AscLabel::Dog,
        AscLabel::Frog,
        AscLabel::Pig,
    ];
}

impl LabelSet for AscLabel {
    const NUM_CLASSES: usize = 5;

    fn from_index(index: i64) -> Option<Self> {
        usize::try_from(index)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
    }

    fn index(self) -> usize {
        match self {
            AscLabel::Cat => 0,
            AscLabel::Cow => 1,
            AscLabel::Dog => 2,
            AscLabel::Frog => 3,
            AscLabel::Pig => 4,
        }
    }

    fn name(self) -> &'static str {
        match self {
            AscLabel::Cat => "cat",
            AscLabel::Cow => "cow",
            AscLabel::Dog => "dog",
            AscLabel::Frog => "frog",
            AscLabel::Pig => "pig",
        }
    }
}

impl fmt::Display for AscLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AscLabel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|l| l.name() == s)
            .ok_or_else(|| Error::msg(format!("unknown class name: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;

    #[test]
    fn indices_match_mapping() {
        for (i, label) in AscLabel::ALL.iter().enumerate() {
            assert_eq!(label.index(), i);
            assert_eq!(AscLabel::from_index(i as i64), Some(*label));
        }
        assert_eq!(AscLabel::from_index(5), None);
        assert_eq!(AscLabel::from_index(-1), None);
    }

    #[test]
    fn parse_by_name() {
        assert_eq!("frog".parse::<AscLabel>().unwrap(), AscLabel::Frog);
        assert!("horse".parse::<AscLabel>().is_err());
        assert_eq!(AscLabel::Pig.to_string(), "pig");
    }

    #[test]
    fn decode_rejects_out_of_set() {
        let err = AscLabel::decode("clip_7", 9).unwrap_err();
        assert!(matches!(
            err,
            Error::UnknownLabel {
                label: 9,
                num_classes: 5,
                ..
            }
        ));
    }

    #[test]
    fn one_hot_row() {
        let mut row = Array1::<f32>::zeros(AscLabel::NUM_CLASSES);
        AscLabel::Dog.write_one_hot(row.view_mut());
        assert_eq!(row.to_vec(), vec![0.0, 0.0, 1.0, 0.0, 0.0]);
    }
}
