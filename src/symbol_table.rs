//! Mapping from labels to their offsets in the assembled program.
//!
//! TEXT labels are instruction indices, DATA labels are byte addresses starting at `0x8000` and
//! CONST labels are byte addresses starting at `0`. All three share one namespace.

use std::collections::HashMap;
use std::fmt;

/// Information stored about a single label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolInfo {
    /// The value the label resolves to.
    pub offset: u16,

    /// The source line that defined the label, if it came from the source.
    pub line: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    inner: HashMap<String, SymbolInfo>,
}

impl SymbolTable {
    pub fn new() -> SymbolTable {
        SymbolTable::default()
    }

    /// Defines a label that does not originate from the source, eg. the halt sentinel.
    pub fn define<S: Into<String>>(&mut self, label: S, offset: u16) -> Result<(), DuplicateLabel> {
        self.insert(label.into(), SymbolInfo { offset, line: None })
    }

    /// Defines a label declared on the given source line.
    pub fn define_at<S>(&mut self, label: S, offset: u16, line: usize) -> Result<(), DuplicateLabel>
    where
        S: Into<String>,
    {
        self.insert(label.into(), SymbolInfo { offset, line: Some(line) })
    }

    fn insert(&mut self, label: String, info: SymbolInfo) -> Result<(), DuplicateLabel> {
        if let Some(previous) = self.inner.get(&label) {
            return Err(DuplicateLabel {
                label,
                previous_line: previous.line,
            });
        }

        self.inner.insert(label, info);

        Ok(())
    }

    pub fn get(&self, label: &str) -> Option<&SymbolInfo> {
        self.inner.get(label)
    }

    pub fn offset(&self, label: &str) -> Option<u16> {
        self.get(label).map(|info| info.offset)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.inner.contains_key(label)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SymbolInfo)> {
        self.inner.iter().map(|(label, info)| (label.as_str(), info))
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Returned when a label is defined more than once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateLabel {
    pub label: String,
    pub previous_line: Option<usize>,
}

impl fmt::Display for DuplicateLabel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.previous_line {
            Some(line) => write!(f, "label '{}' already defined on line {}", self.label, line),
            None => write!(f, "label '{}' is reserved", self.label),
        }
    }
}

#[test]
fn test_duplicate_labels() {
    let mut table = SymbolTable::new();

    table.define("X$0", 19).unwrap();
    table.define_at("main_", 20, 4).unwrap();

    assert_eq!(table.offset("main_"), Some(20));
    assert_eq!(table.get("main_").and_then(|info| info.line), Some(4));

    assert_eq!(
        table.define_at("main_", 30, 9),
        Err(DuplicateLabel { label: "main_".into(), previous_line: Some(4) }),
    );
    assert_eq!(
        table.define_at("X$0", 30, 9),
        Err(DuplicateLabel { label: "X$0".into(), previous_line: None }),
    );
    assert_eq!(table.len(), 2);
}
