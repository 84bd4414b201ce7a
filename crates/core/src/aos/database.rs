//! AOS outcome database.
//!
//! One record per region fingerprint: the pass schedule used and the
//! measured compile/execution times. Persisted as a line-oriented key/value
//! text format, one document per record:
//!
//! ```text
//! DNA: 1000.add.jne
//! SetOpts: 5 0 1 13
//! compileTime: 0.004
//! ExecTime: 0.120
//! ---
//! ```

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use crate::common::{Error, Result};

/// One measured outcome.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Data {
    /// Region fingerprint this record belongs to.
    pub dna: String,
    /// Pass codes applied, in order.
    pub set_opts: Vec<u16>,
    /// Seconds spent compiling.
    pub compile_time: f64,
    /// Seconds spent executing (0 when not yet measured).
    pub exec_time: f64,
}

/// In-memory database of outcomes keyed by fingerprint.
#[derive(Clone, Debug, Default)]
pub struct Database {
    entries: HashMap<String, Data>,
}

impl Database {
    /// Creates an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the database has no records.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up the record for a fingerprint.
    pub fn get(&self, dna: &str) -> Option<&Data> {
        self.entries.get(dna)
    }

    /// Inserts or replaces the record for its fingerprint.
    pub fn insert(&mut self, data: Data) {
        let _ = self.entries.insert(data.dna.clone(), data);
    }

    /// Parses a database from its text form.
    pub fn from_reader<R: std::io::Read>(reader: R) -> Result<Self> {
        let mut db = Self::new();
        let mut cur = Data::default();
        let mut have_any = false;

        for (idx, line) in BufReader::new(reader).lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line == "---" {
                if have_any {
                    db.insert(std::mem::take(&mut cur));
                    have_any = false;
                }
                continue;
            }
            let (key, value) = line.split_once(':').ok_or(Error::Database {
                line: idx + 1,
                reason: "expected `key: value`".into(),
            })?;
            let value = value.trim();
            match key {
                "DNA" => cur.dna = value.to_string(),
                "SetOpts" => {
                    cur.set_opts = value
                        .split_whitespace()
                        .map(|t| {
                            t.parse::<u16>().map_err(|_| Error::Database {
                                line: idx + 1,
                                reason: format!("bad pass code `{t}`"),
                            })
                        })
                        .collect::<Result<_>>()?;
                }
                "compileTime" => {
                    cur.compile_time = value.parse().map_err(|_| Error::Database {
                        line: idx + 1,
                        reason: "bad compileTime".into(),
                    })?;
                }
                "ExecTime" => {
                    cur.exec_time = value.parse().map_err(|_| Error::Database {
                        line: idx + 1,
                        reason: "bad ExecTime".into(),
                    })?;
                }
                other => {
                    return Err(Error::Database {
                        line: idx + 1,
                        reason: format!("unknown field `{other}`"),
                    })
                }
            }
            have_any = true;
        }
        if have_any {
            db.insert(cur);
        }
        Ok(db)
    }

    /// Writes the database in its text form.
    pub fn to_writer<W: Write>(&self, writer: &mut W) -> Result<()> {
        let mut keys: Vec<&String> = self.entries.keys().collect();
        keys.sort();
        for key in keys {
            let data = &self.entries[key];
            writeln!(writer, "DNA: {}", data.dna)?;
            let opts: Vec<String> = data.set_opts.iter().map(u16::to_string).collect();
            writeln!(writer, "SetOpts: {}", opts.join(" "))?;
            writeln!(writer, "compileTime: {}", data.compile_time)?;
            writeln!(writer, "ExecTime: {}", data.exec_time)?;
            writeln!(writer, "---")?;
        }
        Ok(())
    }

    /// Loads a database from a file.
    pub fn load(path: &Path) -> Result<Self> {
        Self::from_reader(std::fs::File::open(path)?)
    }

    /// Saves the database to a file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut file = std::fs::File::create(path)?;
        self.to_writer(&mut file)
    }
}
