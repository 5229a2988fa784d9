use std::fmt;

use storage::{Field, FieldKind, Record, RecordReader, RecordWriter, Result, Schema};

pub const LABEL_MAX_LENGTH: usize = 64;

/// Record type stored by the `obtree` binary.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub key: i64,
    pub label: String,
    pub score: f64,
    pub active: bool,
}

impl Record for Entry {
    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("key", FieldKind::I64),
            Field::string_with_max("label", LABEL_MAX_LENGTH),
            Field::new("score", FieldKind::F64),
            Field::new("active", FieldKind::Bool),
        ])
    }

    fn key(&self) -> i64 {
        self.key
    }

    fn encode(&self, w: &mut RecordWriter<'_>) -> Result<()> {
        w.put_i64(self.key)?;
        w.put_str(&self.label)?;
        w.put_f64(self.score)?;
        w.put_bool(self.active)
    }

    fn decode(r: &mut RecordReader<'_>) -> Result<Self> {
        Ok(Self {
            key: r.get_i64()?,
            label: r.get_str()?,
            score: r.get_f64()?,
            active: r.get_bool()?,
        })
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}",
            self.key,
            self.label,
            self.score,
            if self.active { "active" } else { "inactive" }
        )
    }
}
