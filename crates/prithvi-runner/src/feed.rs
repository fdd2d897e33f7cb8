//! JSONL readers for replaying captured station inventories and pick
//! streams through the engine.

use std::io::BufRead;
use std::path::Path;

/// Generic JSONL reader for any deserializable type.
pub struct JsonlReader<T> {
    lines: std::io::Lines<std::io::BufReader<std::fs::File>>,
    _phantom: std::marker::PhantomData<T>,
}

impl<T: serde::de::DeserializeOwned> JsonlReader<T> {
    /// Open a file for reading JSONL records.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let f = std::fs::File::open(&path)?;
        Ok(Self {
            lines: std::io::BufReader::new(f).lines(),
            _phantom: std::marker::PhantomData,
        })
    }
}

impl<T: serde::de::DeserializeOwned> Iterator for JsonlReader<T> {
    type Item = anyhow::Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(err) => return Some(Err(err.into())),
            };
            if line.trim().is_empty() {
                continue;
            }
            return Some(serde_json::from_str(&line).map_err(Into::into));
        }
    }
}
