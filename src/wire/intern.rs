use indexmap::IndexSet;

use crate::error::Error;

/// Insertion-ordered string table for the v0.5 encoding. Every string in the
/// payload is replaced by its index into this table.
pub(crate) struct StringInterner {
    strings: IndexSet<String>,
}

impl StringInterner {
    pub(crate) fn new() -> Self {
        StringInterner {
            strings: IndexSet::new(),
        }
    }

    /// Returns the table index for `value`, inserting it on first sight.
    pub(crate) fn intern(&mut self, value: &str) -> u32 {
        match self.strings.get_index_of(value) {
            Some(index) => index as u32,
            None => self.strings.insert_full(value.to_owned()).0 as u32,
        }
    }

    /// Writes the table as a msgpack array of strings, in index order.
    pub(crate) fn write_table(&self, out: &mut Vec<u8>) -> Result<(), Error> {
        rmp::encode::write_array_len(out, self.strings.len() as u32)?;
        for value in &self.strings {
            rmp::encode::write_str(out, value)?;
        }
        Ok(())
    }
}
