/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! Permission label encoding (spec §6 "Permission label"). A label is an
//! array of `{id-bytes, uid, disabled-bit}` entries; rights are composed by
//! matching the longest-prefix id entry. A zero-length prefix is "root".

/// Maximum id-bytes an entry carries; the original ABI bounds this to keep
/// a label fixed-size on the wire.
pub const MAX_ID_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permission {
    pub id: [u8; MAX_ID_LEN],
    pub id_len: usize,
    pub uid: u32,
    pub disabled: bool,
}

impl Permission {
    pub fn id_bytes(&self) -> &[u8] {
        &self.id[..self.id_len]
    }

    pub fn is_root(&self) -> bool {
        self.id_len == 0
    }
}

/// A label is a caller-owned slice of `Permission` entries; the kernel keeps
/// the storage (in `Proc`), this type only implements longest-prefix lookup
/// over it.
#[derive(Debug, Clone, Copy)]
pub struct PermissionLabel<'a> {
    entries: &'a [Permission],
}

impl<'a> PermissionLabel<'a> {
    pub fn new(entries: &'a [Permission]) -> Self {
        PermissionLabel { entries }
    }

    /// Returns the entry whose id is the longest prefix of `path`, skipping
    /// disabled entries. A root entry (empty id) always matches, so this
    /// never returns `None` if a root entry is present.
    pub fn longest_prefix(&self, path: &[u8]) -> Option<&'a Permission> {
        self.entries
            .iter()
            .filter(|p| !p.disabled && path.starts_with(p.id_bytes()))
            .max_by_key(|p| p.id_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn perm(id: &str, uid: u32, disabled: bool) -> Permission {
        let mut buf = [0u8; MAX_ID_LEN];
        buf[..id.len()].copy_from_slice(id.as_bytes());
        Permission {
            id: buf,
            id_len: id.len(),
            uid,
            disabled,
        }
    }

    #[test]
    fn picks_longest_matching_prefix() {
        let entries = [perm("", 0, false), perm("sys", 1, false), perm("sys.net", 2, false)];
        let label = PermissionLabel::new(&entries);
        let hit = label.longest_prefix(b"sys.net.io").unwrap();
        assert_eq!(hit.uid, 2);
    }

    #[test]
    fn skips_disabled_entries() {
        let entries = [perm("", 0, false), perm("sys", 1, true)];
        let label = PermissionLabel::new(&entries);
        let hit = label.longest_prefix(b"sys").unwrap();
        assert_eq!(hit.uid, 0);
    }

    #[test]
    fn root_entry_matches_everything() {
        let entries = [perm("", 7, false)];
        let label = PermissionLabel::new(&entries);
        assert_eq!(label.longest_prefix(b"anything").unwrap().uid, 7);
    }
}
