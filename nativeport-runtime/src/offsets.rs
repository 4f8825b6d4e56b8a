//! Member offsets and struct sizes reported by loaded modules
//!
//! Generated `np_module_load` hooks call `put_member_offset` once per field
//! (and once with the member name `sizeof`) for every non-opaque class.

use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::collections::HashMap;

static OFFSETS: Lazy<DashMap<String, HashMap<String, usize>>> = Lazy::new(DashMap::new);

/// Member name under which a class size is stored
pub const SIZEOF: &str = "sizeof";

pub fn put_member_offset(class: &str, member: &str, offset: usize) {
    OFFSETS
        .entry(class.to_string())
        .or_default()
        .insert(member.to_string(), offset);
}

/// Byte offset of `member` inside `class`
pub fn offsetof(class: &str, member: &str) -> Option<usize> {
    OFFSETS.get(class)?.get(member).copied()
}

/// Size of `class` in bytes
pub fn sizeof(class: &str) -> Option<usize> {
    offsetof(class, SIZEOF)
}

/// Forget everything registered for `class`
pub fn remove_class(class: &str) -> bool {
    OFFSETS.remove(class).is_some()
}
