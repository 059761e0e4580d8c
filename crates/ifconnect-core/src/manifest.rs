//! The typed command catalog ("manifest").
//!
//! The simulator assigns numeric command ids at runtime; the mapping from
//! path-shaped names (`aircraft/0/altitude_msl`) to ids and wire types is
//! obtained once per connection by fetching the manifest. This module holds
//! the parsed, immutable snapshot with lookup indices in both directions.
//!
//! # Manifest text format
//!
//! ```text
//! <command_id>,<type_code>,<name>\n
//! ```
//!
//! Type codes `0..=5` map to the six scalar [`WireType`]s; any other code
//! (conventionally `-1`) marks an invokable command that takes string-valued
//! named arguments and returns no data. Names may themselves contain commas,
//! so each line is split on the first two commas only.

use std::collections::HashMap;

use crate::types::WireType;

/// What a manifest entry is: readable/writable state, or a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A state variable of the given scalar type.
    Value(WireType),
    /// An invokable command. Takes zero or more string-valued named
    /// arguments on write and produces no response.
    Invokable,
}

/// One entry of the command catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Runtime-assigned command id (`>= 0`).
    pub id: i32,
    /// Whether this entry is typed state or an invokable command.
    pub kind: EntryKind,
    /// Path-shaped identifier, e.g. `aircraft/0/altitude_msl`.
    pub name: String,
}

/// An immutable snapshot of the command catalog.
///
/// Both indices are consistent: every entry is reachable by name and by id,
/// and names and ids are each unique within a snapshot. Duplicate lines in
/// the manifest text keep the first occurrence; later ones are logged and
/// dropped.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
    by_name: HashMap<String, usize>,
    by_id: HashMap<i32, usize>,
}

impl Manifest {
    /// Create an empty manifest.
    pub fn new() -> Self {
        Manifest::default()
    }

    /// Parse manifest text into a snapshot.
    ///
    /// Lines whose command id does not parse as an integer are skipped, as
    /// are lines with fewer than three fields or a non-numeric type code.
    /// Parsing never fails outright; a hostile catalog simply yields fewer
    /// entries.
    pub fn parse(text: &str) -> Manifest {
        let mut manifest = Manifest::new();

        for line in text.lines() {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }

            // Names may contain commas; split on the first two only.
            let mut fields = line.splitn(3, ',');
            let (Some(id_str), Some(type_str), Some(name)) =
                (fields.next(), fields.next(), fields.next())
            else {
                tracing::debug!(line = %line, "Skipping short manifest line");
                continue;
            };

            let Ok(id) = id_str.trim().parse::<i32>() else {
                tracing::debug!(line = %line, "Skipping manifest line with non-numeric id");
                continue;
            };
            let Ok(type_code) = type_str.trim().parse::<i32>() else {
                tracing::debug!(line = %line, "Skipping manifest line with non-numeric type");
                continue;
            };

            let kind = match WireType::from_code(type_code) {
                Some(ty) => EntryKind::Value(ty),
                None => EntryKind::Invokable,
            };

            manifest.insert(ManifestEntry {
                id,
                kind,
                name: name.to_string(),
            });
        }

        tracing::debug!(entries = manifest.len(), "Manifest parsed");
        manifest
    }

    /// Insert an entry, keeping the first occurrence on duplicate name or id.
    fn insert(&mut self, entry: ManifestEntry) {
        if self.by_name.contains_key(&entry.name) || self.by_id.contains_key(&entry.id) {
            tracing::warn!(id = entry.id, name = %entry.name, "Duplicate manifest entry dropped");
            return;
        }
        let index = self.entries.len();
        self.by_name.insert(entry.name.clone(), index);
        self.by_id.insert(entry.id, index);
        self.entries.push(entry);
    }

    /// Look up an entry by its manifest name.
    pub fn entry_by_name(&self, name: &str) -> Option<&ManifestEntry> {
        self.by_name.get(name).map(|&i| &self.entries[i])
    }

    /// Look up an entry by its command id.
    pub fn entry_by_id(&self, id: i32) -> Option<&ManifestEntry> {
        self.by_id.get(&id).map(|&i| &self.entries[i])
    }

    /// Number of entries in the catalog.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over all entries in catalog order.
    pub fn iter(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_single_entry() {
        let m = Manifest::parse("1,2,aircraft/0/alt\n");
        assert_eq!(m.len(), 1);
        let e = m.entry_by_name("aircraft/0/alt").unwrap();
        assert_eq!(e.id, 1);
        assert_eq!(e.kind, EntryKind::Value(WireType::Float));
        assert_eq!(m.entry_by_id(1).unwrap().name, "aircraft/0/alt");
    }

    #[test]
    fn parse_all_type_codes() {
        let text = "0,0,a\n1,1,b\n2,2,c\n3,3,d\n4,4,e\n5,5,f\n";
        let m = Manifest::parse(text);
        assert_eq!(m.len(), 6);
        assert_eq!(m.entry_by_name("a").unwrap().kind, EntryKind::Value(WireType::Boolean));
        assert_eq!(m.entry_by_name("b").unwrap().kind, EntryKind::Value(WireType::Integer));
        assert_eq!(m.entry_by_name("c").unwrap().kind, EntryKind::Value(WireType::Float));
        assert_eq!(m.entry_by_name("d").unwrap().kind, EntryKind::Value(WireType::Double));
        assert_eq!(m.entry_by_name("e").unwrap().kind, EntryKind::Value(WireType::String));
        assert_eq!(m.entry_by_name("f").unwrap().kind, EntryKind::Value(WireType::Long));
    }

    #[test]
    fn type_code_outside_scalars_is_invokable() {
        let m = Manifest::parse("42,-1,commands/Autopilot.Engage\n");
        let e = m.entry_by_name("commands/Autopilot.Engage").unwrap();
        assert_eq!(e.kind, EntryKind::Invokable);
    }

    #[test]
    fn name_may_contain_commas() {
        let m = Manifest::parse("7,4,aircraft/0/notes,with,commas\n");
        let e = m.entry_by_id(7).unwrap();
        assert_eq!(e.name, "aircraft/0/notes,with,commas");
        assert!(m.entry_by_name("aircraft/0/notes,with,commas").is_some());
    }

    #[test]
    fn non_numeric_id_is_skipped() {
        let m = Manifest::parse("garbage,2,x\n3,2,y\n");
        assert_eq!(m.len(), 1);
        assert!(m.entry_by_name("y").is_some());
    }

    #[test]
    fn non_numeric_type_is_skipped() {
        let m = Manifest::parse("1,zap,x\n2,5,y\n");
        assert_eq!(m.len(), 1);
        assert!(m.entry_by_name("y").is_some());
    }

    #[test]
    fn short_and_empty_lines_are_skipped() {
        let m = Manifest::parse("\n1,2\n\n5,3,ok\n");
        assert_eq!(m.len(), 1);
        assert!(m.entry_by_name("ok").is_some());
    }

    #[test]
    fn duplicate_id_keeps_first() {
        let m = Manifest::parse("1,2,first\n1,3,second\n");
        assert_eq!(m.len(), 1);
        assert_eq!(m.entry_by_id(1).unwrap().name, "first");
        assert!(m.entry_by_name("second").is_none());
    }

    #[test]
    fn duplicate_name_keeps_first() {
        let m = Manifest::parse("1,2,same\n2,3,same\n");
        assert_eq!(m.len(), 1);
        assert_eq!(m.entry_by_name("same").unwrap().id, 1);
        assert!(m.entry_by_id(2).is_none());
    }

    #[test]
    fn indices_are_consistent() {
        let text = "1,2,aircraft/0/alt\n7,4,aircraft/0/callsign\n42,-1,commands/Brakes\n";
        let m = Manifest::parse(text);
        for entry in m.iter() {
            assert_eq!(m.entry_by_name(&entry.name).unwrap().id, entry.id);
            assert_eq!(m.entry_by_id(entry.id).unwrap().name, entry.name);
        }
    }

    #[test]
    fn crlf_line_endings() {
        let m = Manifest::parse("1,2,aircraft/0/alt\r\n2,0,aircraft/0/on_ground\r\n");
        assert_eq!(m.len(), 2);
        assert_eq!(m.entry_by_name("aircraft/0/on_ground").unwrap().id, 2);
    }

    #[test]
    fn lookup_misses_return_none() {
        let m = Manifest::parse("1,2,x\n");
        assert!(m.entry_by_name("nope").is_none());
        assert!(m.entry_by_id(99).is_none());
    }
}
