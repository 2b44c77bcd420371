/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! ASCII stat record format (spec §6 "Stat record format"): one `name=value`
//! field per line. `no_std` friendly — parsing borrows from the input
//! buffer and formatting writes through `core::fmt::Write` rather than
//! allocating.

use core::fmt;

/// One `name=value` field of a stat record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field<'a> {
    pub name: &'a str,
    pub value: &'a str,
}

/// Minimum fields every `FS_STAT` reply carries.
pub const SIZE: &str = "size";
pub const TYPE: &str = "type";
pub const OWNER: &str = "owner";
pub const INODE: &str = "inode";
pub const PERM: &str = "perm";
pub const ACC: &str = "acc";

/// Iterates the `name=value\n` lines of a raw stat record.
pub fn fields(record: &str) -> impl Iterator<Item = Field<'_>> {
    record.lines().filter_map(|line| {
        let mut parts = line.splitn(2, '=');
        let name = parts.next()?;
        let value = parts.next()?;
        if name.is_empty() {
            return None;
        }
        Some(Field { name, value })
    })
}

pub fn field<'a>(record: &'a str, name: &str) -> Option<&'a str> {
    fields(record).find(|f| f.name == name).map(|f| f.value)
}

/// Writes one `name=value\n` field.
pub fn write_field<W: fmt::Write>(w: &mut W, name: &str, value: &str) -> fmt::Result {
    writeln!(w, "{name}={value}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimum_fields() {
        let record = "size=1024\ntype=f\nowner=0.0\ninode=7\nperm=0.0/644\nacc=755\n";
        assert_eq!(field(record, SIZE), Some("1024"));
        assert_eq!(field(record, TYPE), Some("f"));
        assert_eq!(field(record, "missing"), None);
    }

    #[test]
    fn skips_malformed_lines() {
        let record = "noequalsign\nsize=1\n";
        let mut it = fields(record);
        assert_eq!(it.next(), Some(Field { name: "size", value: "1" }));
        assert_eq!(it.next(), None);
    }
}
